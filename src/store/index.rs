//! The flat index over every artifact written under the storage root
//! (spec §4.B). Kept as both an in-memory table and a parquet file at
//! `<root>/index.parquet`, rewritten atomically on every mutation.

use crate::time::Product;
use chrono::{DateTime, TimeZone, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const INDEX_TZ: &str = "America/Chicago";

fn datetime_series(name: &str, values: &[DateTime<Utc>]) -> Series {
    let millis: Vec<i64> = values.iter().map(|ts| ts.timestamp_millis()).collect();
    Series::new(name, millis)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, Some(INDEX_TZ.to_string())))
        .expect("i64 millis always casts to Datetime")
}

fn read_datetime_column(df: &DataFrame, name: &str) -> Result<Vec<DateTime<Utc>>, IndexError> {
    let ca = df.column(name)?.datetime()?;
    let time_unit = ca.time_unit();
    let mut out = Vec::with_capacity(ca.len());
    for raw in ca.into_iter() {
        let raw = raw.ok_or_else(|| IndexError::BadTimestamp(format!("null in {name}")))?;
        let millis = match time_unit {
            TimeUnit::Milliseconds => raw,
            TimeUnit::Microseconds => raw / 1_000,
            TimeUnit::Nanoseconds => raw / 1_000_000,
        };
        let dt = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| IndexError::BadTimestamp(format!("{name}={millis}")))?;
        out.push(dt);
    }
    Ok(out)
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),
    #[error("malformed timestamp in index: {0}")]
    BadTimestamp(String),
    #[error("unrecognized product in index: {0}")]
    BadProduct(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub product: Product,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub generation_timestamp: DateTime<Utc>,
    pub is_fallback: bool,
    pub file_path: String,
    pub schema_version: String,
}

/// In-memory mirror of `<root>/index.parquet`. All mutation goes through
/// `upsert`/`remove`, which the caller is responsible for serializing
/// (the store wraps this behind a `Mutex`).
#[derive(Debug, Default, Clone)]
pub struct StorageIndex {
    pub entries: Vec<IndexEntry>,
}

impl StorageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, entry: IndexEntry) {
        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.product == entry.product && e.start_time == entry.start_time)
        {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    pub fn remove(&mut self, product: Product, start_time: DateTime<Utc>) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.product == product && e.start_time == start_time));
        self.entries.len() != before
    }

    pub fn latest_for(&self, product: Product) -> Option<&IndexEntry> {
        self.entries
            .iter()
            .filter(|e| e.product == product)
            .max_by_key(|e| e.start_time)
    }

    /// Most recent non-fallback artifact for `product` whose window ends
    /// at or before `before` — the source the Fallback Engine re-stamps
    /// (spec §4.F step 1).
    pub fn latest_non_fallback_for(&self, product: Product, before: DateTime<Utc>) -> Option<&IndexEntry> {
        self.entries
            .iter()
            .filter(|e| e.product == product && !e.is_fallback && e.end_time <= before)
            .max_by_key(|e| e.start_time)
    }

    /// The artifact for `product` whose `[start_time, end_time)` window
    /// contains `at` — the lookup `ForecastStore::get` needs for a date
    /// that falls inside a stored cycle without being its exact start.
    pub fn containing(&self, product: Product, at: DateTime<Utc>) -> Option<&IndexEntry> {
        self.entries
            .iter()
            .filter(|e| e.product == product && e.start_time <= at && at < e.end_time)
            .max_by_key(|e| e.start_time)
    }

    pub fn range_for(
        &self,
        product: Product,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<&IndexEntry> {
        let mut matches: Vec<&IndexEntry> = self
            .entries
            .iter()
            .filter(|e| e.product == product && e.start_time >= start && e.start_time < end)
            .collect();
        matches.sort_by_key(|e| e.start_time);
        matches
    }

    pub fn to_dataframe(&self) -> Result<DataFrame, IndexError> {
        let mut product = Vec::with_capacity(self.entries.len());
        let mut start_time = Vec::with_capacity(self.entries.len());
        let mut end_time = Vec::with_capacity(self.entries.len());
        let mut generation_timestamp = Vec::with_capacity(self.entries.len());
        let mut is_fallback = Vec::with_capacity(self.entries.len());
        let mut file_path = Vec::with_capacity(self.entries.len());
        let mut schema_version = Vec::with_capacity(self.entries.len());

        for entry in &self.entries {
            product.push(entry.product.as_str().to_string());
            start_time.push(entry.start_time);
            end_time.push(entry.end_time);
            generation_timestamp.push(entry.generation_timestamp);
            is_fallback.push(entry.is_fallback);
            file_path.push(entry.file_path.clone());
            schema_version.push(entry.schema_version.clone());
        }

        Ok(DataFrame::new(vec![
            Series::new("product", product),
            datetime_series("start_time", &start_time),
            datetime_series("end_time", &end_time),
            datetime_series("generation_timestamp", &generation_timestamp),
            Series::new("is_fallback", is_fallback),
            Series::new("file_path", file_path),
            Series::new("schema_version", schema_version),
        ])?)
    }

    pub fn from_dataframe(df: &DataFrame) -> Result<Self, IndexError> {
        if df.height() == 0 {
            return Ok(Self::new());
        }
        let product = df.column("product")?.utf8()?;
        let start_time = read_datetime_column(df, "start_time")?;
        let end_time = read_datetime_column(df, "end_time")?;
        let generation_timestamp = read_datetime_column(df, "generation_timestamp")?;
        let is_fallback = df.column("is_fallback")?.bool()?;
        let file_path = df.column("file_path")?.utf8()?;
        let schema_version = df.column("schema_version")?.utf8()?;

        let mut entries = Vec::with_capacity(df.height());
        for row in 0..df.height() {
            let product_str = product.get(row).unwrap_or_default();
            let product = Product::parse(product_str)
                .ok_or_else(|| IndexError::BadProduct(product_str.to_string()))?;
            entries.push(IndexEntry {
                product,
                start_time: start_time[row],
                end_time: end_time[row],
                generation_timestamp: generation_timestamp[row],
                is_fallback: is_fallback.get(row).unwrap_or(false),
                file_path: file_path.get(row).unwrap_or_default().to_string(),
                schema_version: schema_version.get(row).unwrap_or_default().to_string(),
            });
        }
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self, IndexError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let file = std::fs::File::open(path)?;
        let df = ParquetReader::new(file).finish()?;
        Self::from_dataframe(&df)
    }

    /// Writes the index atomically: build the full parquet in a temp file
    /// in the same directory, then rename over the target.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let mut df = self.to_dataframe()?;
        let tmp_path = tmp_path_for(path);
        {
            let file = std::fs::File::create(&tmp_path)?;
            ParquetWriter::new(file).finish(&mut df)?;
        }
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

pub fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = path
        .file_name()
        .map(|n| format!(".{}.tmp", n.to_string_lossy()))
        .unwrap_or_else(|| ".tmp".to_string());
    tmp.set_file_name(file_name);
    tmp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_same_product_and_start_time() {
        let mut index = StorageIndex::new();
        let start = Utc::now();
        let entry = IndexEntry {
            product: Product::Dalmp,
            start_time: start,
            end_time: start,
            generation_timestamp: start,
            is_fallback: false,
            file_path: "a".to_string(),
            schema_version: "1.0".to_string(),
        };
        index.upsert(entry.clone());
        let mut updated = entry.clone();
        updated.file_path = "b".to_string();
        index.upsert(updated);
        assert_eq!(index.entries.len(), 1);
        assert_eq!(index.entries[0].file_path, "b");
    }

    #[test]
    fn round_trips_through_dataframe() {
        let mut index = StorageIndex::new();
        let start = Utc::now();
        index.upsert(IndexEntry {
            product: Product::Rtlmp,
            start_time: start,
            end_time: start,
            generation_timestamp: start,
            is_fallback: true,
            file_path: "x.parquet".to_string(),
            schema_version: "1.0".to_string(),
        });
        let df = index.to_dataframe().unwrap();
        let restored = StorageIndex::from_dataframe(&df).unwrap();
        assert_eq!(restored.entries.len(), 1);
        assert_eq!(restored.entries[0].product, Product::Rtlmp);
        assert!(restored.entries[0].is_fallback);
    }

    #[test]
    fn latest_for_picks_max_start_time() {
        let mut index = StorageIndex::new();
        let base = Utc::now();
        index.upsert(IndexEntry {
            product: Product::Dalmp,
            start_time: base,
            end_time: base,
            generation_timestamp: base,
            is_fallback: false,
            file_path: "old".to_string(),
            schema_version: "1.0".to_string(),
        });
        index.upsert(IndexEntry {
            product: Product::Dalmp,
            start_time: base + chrono::Duration::hours(24),
            end_time: base,
            generation_timestamp: base,
            is_fallback: false,
            file_path: "new".to_string(),
            schema_version: "1.0".to_string(),
        });
        assert_eq!(index.latest_for(Product::Dalmp).unwrap().file_path, "new");
    }
}
