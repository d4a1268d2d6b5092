//! Forecast Store (spec §4.B): durable, file-backed persistence for
//! `ForecastEnsemble` artifacts, keyed by product and cycle start time.
//!
//! Layout under `root`:
//!   YYYY/MM/<PRODUCT>_<YYYYMMDDTHHMMSS>.parquet   one file per cycle
//!   latest/<PRODUCT>.parquet                      pointer to the most recent cycle
//!   index.parquet                                 flat index over every artifact

pub mod artifact;
pub mod index;

use crate::forecasting::ForecastEnsemble;
use crate::time::{Product, ALL_PRODUCTS};
use artifact::{dataframe_to_ensemble, ensemble_to_dataframe, SchemaValidationError, SCHEMA_VERSION};
use chrono::{DateTime, Duration, Utc};
use index::{tmp_path_for, IndexEntry, IndexError, StorageIndex};
use parking_lot::Mutex;
use polars::prelude::*;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("artifact schema error: {0}")]
    Schema(#[from] SchemaValidationError),
    #[error("no artifact found for {0} at {1}")]
    NotFound(Product, DateTime<Utc>),
    #[error("no artifacts found for {0}")]
    NoneForProduct(Product),
}

#[derive(Debug, Clone)]
pub struct StoreInfo {
    pub root: PathBuf,
    pub artifact_count: usize,
    pub products_present: Vec<Product>,
    pub oldest_start_time: Option<DateTime<Utc>>,
    pub newest_start_time: Option<DateTime<Utc>>,
    /// Products with no artifact (direct or fallback) covering right now,
    /// used by the storage health check (spec §4.I.2).
    pub products_missing_current_forecast: Vec<Product>,
    /// Whether every `.parquet` artifact on disk has a matching index
    /// entry — a cheap proxy for "the index is rebuildable" without
    /// actually re-reading and re-parsing every artifact.
    pub index_consistent: bool,
}

/// The Forecast Store's append-mostly artifact archive. All index
/// mutations serialize through `index`, which also gatekeeps the
/// write-then-rename sequence so a crash mid-write never leaves the
/// index pointing at a partial file.
pub struct ForecastStore {
    root: PathBuf,
    index: Mutex<StorageIndex>,
}

fn cycle_file_name(product: Product, start_time: DateTime<Utc>) -> String {
    format!("{}_{}.parquet", product.as_str(), start_time.format("%Y%m%dT%H%M%S"))
}

fn relative_cycle_path(product: Product, start_time: DateTime<Utc>) -> PathBuf {
    PathBuf::from(format!("{}", start_time.format("%Y")))
        .join(format!("{}", start_time.format("%m")))
        .join(cycle_file_name(product, start_time))
}

fn latest_relative_path(product: Product) -> PathBuf {
    PathBuf::from("latest").join(format!("{}.parquet", product.as_str()))
}

impl ForecastStore {
    /// Opens (or initializes) a store rooted at `root`, loading the
    /// existing index if present.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let index_path = root.join("index.parquet");
        let index = StorageIndex::load(&index_path)?;
        info!(path = %root.display(), entries = index.entries.len(), "opened forecast store");
        Ok(Self {
            root,
            index: Mutex::new(index),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.parquet")
    }

    /// Writes an ensemble to its dated path, updates the `latest/`
    /// pointer, and records the index entry. Both artifact writes use a
    /// temp-file-then-rename to keep partial writes from ever being
    /// read back.
    pub fn put(&self, ensemble: &ForecastEnsemble) -> Result<(), StoreError> {
        let mut df = ensemble_to_dataframe(ensemble)?;

        let relative = relative_cycle_path(ensemble.product, ensemble.start_time);
        let full_path = self.root.join(&relative);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_parquet_atomic(&full_path, &mut df)?;

        let latest_relative = latest_relative_path(ensemble.product);
        let latest_path = self.root.join(&latest_relative);
        if let Some(parent) = latest_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_parquet_atomic(&latest_path, &mut df)?;

        let entry = IndexEntry {
            product: ensemble.product,
            start_time: ensemble.start_time,
            end_time: ensemble.end_time,
            generation_timestamp: ensemble.generation_timestamp(),
            is_fallback: ensemble.is_fallback(),
            file_path: relative.to_string_lossy().replace('\\', "/"),
            schema_version: SCHEMA_VERSION.to_string(),
        };

        let mut index = self.index.lock();
        index.upsert(entry);
        index.save(&self.index_path())?;
        debug!(product = %ensemble.product, start_time = %ensemble.start_time, "stored forecast ensemble");
        Ok(())
    }

    /// Reads the ensemble for `product` whose `[start_time, end_time)`
    /// window contains `at` (spec §4.B): an artifact started on an earlier
    /// cycle still covers later dates inside its 72-hour horizon.
    pub fn get(&self, product: Product, at: DateTime<Utc>) -> Result<ForecastEnsemble, StoreError> {
        let path = {
            let index = self.index.lock();
            let entry = index
                .containing(product, at)
                .ok_or(StoreError::NotFound(product, at))?;
            self.root.join(&entry.file_path)
        };
        read_ensemble(&path)
    }

    /// Reads the most recently written ensemble for `product`, via the
    /// `latest/` pointer rather than the index (cheaper, and correct even
    /// if the index is being rebuilt).
    pub fn get_latest(&self, product: Product) -> Result<ForecastEnsemble, StoreError> {
        let path = self.root.join(latest_relative_path(product));
        if !path.exists() {
            return Err(StoreError::NoneForProduct(product));
        }
        read_ensemble(&path)
    }

    /// Most recent *non-fallback* artifact for `product` ending at or
    /// before `before`, the source the Fallback Engine re-stamps.
    pub fn get_latest_non_fallback(
        &self,
        product: Product,
        before: DateTime<Utc>,
    ) -> Result<ForecastEnsemble, StoreError> {
        let path = {
            let index = self.index.lock();
            let entry = index
                .latest_non_fallback_for(product, before)
                .ok_or(StoreError::NoneForProduct(product))?;
            self.root.join(&entry.file_path)
        };
        read_ensemble(&path)
    }

    /// Ensemble-granular range query: every ensemble for `product` whose
    /// `start_time` falls in `[start, end)`, ordered by `start_time`.
    pub fn get_range(
        &self,
        product: Product,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ForecastEnsemble>, StoreError> {
        let paths: Vec<PathBuf> = {
            let index = self.index.lock();
            index
                .range_for(product, start, end)
                .into_iter()
                .map(|e| self.root.join(&e.file_path))
                .collect()
        };
        paths.iter().map(|p| read_ensemble(p)).collect()
    }

    /// Rebuilds the index from whatever artifact files exist on disk,
    /// for recovery after an index file is lost or corrupted.
    pub fn rebuild_index(&self) -> Result<usize, StoreError> {
        let mut rebuilt = StorageIndex::new();
        for year_dir in list_dirs(&self.root)? {
            if year_dir.file_name().map(|n| n == "latest").unwrap_or(false) {
                continue;
            }
            for month_dir in list_dirs(&year_dir)? {
                for entry in std::fs::read_dir(&month_dir)? {
                    let entry = entry?;
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                        continue;
                    }
                    match read_ensemble(&path) {
                        Ok(ensemble) => {
                            let relative = path
                                .strip_prefix(&self.root)
                                .unwrap_or(&path)
                                .to_string_lossy()
                                .replace('\\', "/");
                            rebuilt.upsert(IndexEntry {
                                product: ensemble.product,
                                start_time: ensemble.start_time,
                                end_time: ensemble.end_time,
                                generation_timestamp: ensemble.generation_timestamp(),
                                is_fallback: ensemble.is_fallback(),
                                file_path: relative,
                                schema_version: SCHEMA_VERSION.to_string(),
                            });
                        }
                        Err(err) => {
                            warn!(path = %path.display(), error = %err, "skipping unreadable artifact during index rebuild");
                        }
                    }
                }
            }
        }
        let count = rebuilt.entries.len();
        let mut index = self.index.lock();
        *index = rebuilt;
        index.save(&self.index_path())?;
        info!(entries = count, "rebuilt forecast store index");
        Ok(count)
    }

    pub fn info(&self) -> StoreInfo {
        let artifact_count = {
            let index = self.index.lock();
            index.entries.len()
        };
        let mut products_present: Vec<Product> = {
            let index = self.index.lock();
            index.entries.iter().map(|e| e.product).collect()
        };
        products_present.sort();
        products_present.dedup();

        let now = Utc::now();
        let products_missing_current_forecast = ALL_PRODUCTS
            .iter()
            .copied()
            .filter(|product| self.get(*product, now).is_err())
            .collect();

        StoreInfo {
            root: self.root.clone(),
            artifact_count,
            oldest_start_time: {
                let index = self.index.lock();
                index.entries.iter().map(|e| e.start_time).min()
            },
            newest_start_time: {
                let index = self.index.lock();
                index.entries.iter().map(|e| e.start_time).max()
            },
            products_present,
            products_missing_current_forecast,
            index_consistent: self.artifact_count_on_disk() == artifact_count,
        }
    }

    /// Counts `.parquet` cycle artifacts present on disk (excluding the
    /// `latest/` pointer copies), without touching the in-memory index.
    /// Used only to cross-check `info()`'s consistency flag.
    fn artifact_count_on_disk(&self) -> usize {
        let mut count = 0;
        let Ok(year_dirs) = list_dirs(&self.root) else {
            return count;
        };
        for year_dir in year_dirs {
            if year_dir.file_name().map(|n| n == "latest").unwrap_or(false) {
                continue;
            }
            let Ok(month_dirs) = list_dirs(&year_dir) else {
                continue;
            };
            for month_dir in month_dirs {
                let Ok(entries) = std::fs::read_dir(&month_dir) else {
                    continue;
                };
                count += entries
                    .flatten()
                    .filter(|e| e.path().extension().and_then(|ext| ext.to_str()) == Some("parquet"))
                    .count();
            }
        }
        count
    }
}

fn write_parquet_atomic(path: &Path, df: &mut DataFrame) -> Result<(), StoreError> {
    let tmp = tmp_path_for(path);
    {
        let file = std::fs::File::create(&tmp)?;
        ParquetWriter::new(file).finish(df)?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn read_ensemble(path: &Path) -> Result<ForecastEnsemble, StoreError> {
    let file = std::fs::File::open(path)?;
    let df = ParquetReader::new(file).finish()?;
    Ok(dataframe_to_ensemble(&df)?)
}

fn list_dirs(root: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

/// Computes the relative path a `put` would use for this date, without
/// performing any I/O — used by the Query API to answer
/// "where would this land" diagnostics (spec §11 supplement).
pub fn get_storage_path_for_date(root: &Path, product: Product, start_time: DateTime<Utc>) -> PathBuf {
    root.join(relative_cycle_path(product, start_time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecasting::ProbabilisticForecast;
    use tempfile::tempdir;

    fn sample_ensemble(product: Product, start: DateTime<Utc>, fallback: bool) -> ForecastEnsemble {
        let forecasts = (0..72)
            .map(|h| {
                let ts = start + Duration::hours(h);
                ProbabilisticForecast::new(ts, product, 40.0, vec![40.0; 100], ts, fallback).unwrap()
            })
            .collect();
        ForecastEnsemble::new(product, start, forecasts).unwrap()
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = ForecastStore::open(dir.path()).unwrap();
        let start = DateTime::parse_from_rfc3339("2023-06-01T07:00:00Z").unwrap().with_timezone(&Utc);
        let ensemble = sample_ensemble(Product::Dalmp, start, false);
        store.put(&ensemble).unwrap();

        let fetched = store.get(Product::Dalmp, start).unwrap();
        assert_eq!(fetched.forecasts.len(), 72);
        assert_eq!(fetched.product, Product::Dalmp);
    }

    #[test]
    fn get_latest_tracks_most_recent_put() {
        let dir = tempdir().unwrap();
        let store = ForecastStore::open(dir.path()).unwrap();
        let start1 = DateTime::parse_from_rfc3339("2023-06-01T07:00:00Z").unwrap().with_timezone(&Utc);
        let start2 = start1 + Duration::days(1);
        store.put(&sample_ensemble(Product::Dalmp, start1, false)).unwrap();
        store.put(&sample_ensemble(Product::Dalmp, start2, false)).unwrap();

        let latest = store.get_latest(Product::Dalmp).unwrap();
        assert_eq!(latest.start_time, start2);
    }

    #[test]
    fn get_range_is_ordered_and_bounded() {
        let dir = tempdir().unwrap();
        let store = ForecastStore::open(dir.path()).unwrap();
        let start1 = DateTime::parse_from_rfc3339("2023-06-01T07:00:00Z").unwrap().with_timezone(&Utc);
        let start2 = start1 + Duration::days(1);
        let start3 = start1 + Duration::days(2);
        store.put(&sample_ensemble(Product::Dalmp, start2, false)).unwrap();
        store.put(&sample_ensemble(Product::Dalmp, start1, false)).unwrap();
        store.put(&sample_ensemble(Product::Dalmp, start3, false)).unwrap();

        let results = store.get_range(Product::Dalmp, start1, start3).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].start_time, start1);
        assert_eq!(results[1].start_time, start2);
    }

    #[test]
    fn rebuild_index_recovers_from_missing_index_file() {
        let dir = tempdir().unwrap();
        let start = DateTime::parse_from_rfc3339("2023-06-01T07:00:00Z").unwrap().with_timezone(&Utc);
        {
            let store = ForecastStore::open(dir.path()).unwrap();
            store.put(&sample_ensemble(Product::Rtlmp, start, false)).unwrap();
        }
        std::fs::remove_file(dir.path().join("index.parquet")).unwrap();

        let store = ForecastStore::open(dir.path()).unwrap();
        assert_eq!(store.info().artifact_count, 0);
        let rebuilt = store.rebuild_index().unwrap();
        assert_eq!(rebuilt, 1);
        assert_eq!(store.info().artifact_count, 1);
    }

    #[test]
    fn get_missing_artifact_returns_not_found() {
        let dir = tempdir().unwrap();
        let store = ForecastStore::open(dir.path()).unwrap();
        let err = store.get(Product::Dalmp, Utc::now());
        assert!(matches!(err, Err(StoreError::NotFound(_, _))));
    }
}
