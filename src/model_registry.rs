//! Model Registry (spec §4.C): resolves a (product, hour) key to a linear
//! model, its feature contract, and training metrics.

use crate::time::{validate_hour, validate_product, Product};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ModelRegistryError {
    #[error("invalid model key: {0}")]
    InvalidKey(#[from] crate::time::TimeError),
    #[error("io error loading model registry: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Opaque linear model: `y = X . coefficients + intercept`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LinearModel {
    pub fn predict(&self, features: &[f64]) -> Option<f64> {
        if features.len() != self.coefficients.len() {
            return None;
        }
        let dot: f64 = features
            .iter()
            .zip(self.coefficients.iter())
            .map(|(x, w)| x * w)
            .sum();
        let y = dot + self.intercept;
        if y.is_finite() {
            Some(y)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub rmse: f64,
    pub r_squared: f64,
    pub mae: f64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub model: LinearModel,
    pub feature_names: Vec<String>,
    pub metrics: ModelMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelKey {
    pub product: Product,
    pub hour: u8,
}

impl ModelKey {
    fn file_name(&self) -> String {
        format!("{}_{}.json", self.product.as_str(), self.hour)
    }
}

/// In-memory registry, synced to `<root>/models/<product>_<hour>.json`.
/// Initialization is idempotent: `load_all` is safe to call more than once.
pub struct ModelRegistry {
    models_dir: PathBuf,
    entries: Arc<RwLock<HashMap<ModelKey, ModelEntry>>>,
}

impl ModelRegistry {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register(
        &self,
        product: Product,
        hour: i64,
        model: LinearModel,
        feature_names: Vec<String>,
        metrics: ModelMetrics,
    ) -> Result<(), ModelRegistryError> {
        let hour = validate_hour(hour)?;
        let key = ModelKey { product, hour };
        let entry = ModelEntry {
            model,
            feature_names,
            metrics,
        };

        std::fs::create_dir_all(&self.models_dir)?;
        let final_path = self.models_dir.join(key.file_name());
        let tmp_path = self.models_dir.join(format!("{}.tmp", key.file_name()));
        std::fs::write(&tmp_path, serde_json::to_vec_pretty(&entry)?)?;
        std::fs::rename(&tmp_path, &final_path)?;

        self.entries.write().insert(key, entry);
        Ok(())
    }

    pub fn get(&self, product: Product, hour: i64) -> Option<ModelEntry> {
        let hour = validate_hour(hour).ok()?;
        self.entries.read().get(&ModelKey { product, hour }).cloned()
    }

    pub fn has(&self, product: Product, hour: i64) -> bool {
        self.get(product, hour).is_some()
    }

    pub fn list(&self) -> Vec<ModelKey> {
        self.entries.read().keys().copied().collect()
    }

    pub fn delete(&self, product: Product, hour: i64) -> Result<bool, ModelRegistryError> {
        let hour = validate_hour(hour)?;
        let key = ModelKey { product, hour };
        let removed = self.entries.write().remove(&key).is_some();
        if removed {
            let path = self.models_dir.join(key.file_name());
            let _ = std::fs::remove_file(path);
        }
        Ok(removed)
    }

    pub fn save_all(&self) -> Result<(), ModelRegistryError> {
        std::fs::create_dir_all(&self.models_dir)?;
        for (key, entry) in self.entries.read().iter() {
            let final_path = self.models_dir.join(key.file_name());
            let tmp_path = self.models_dir.join(format!("{}.tmp", key.file_name()));
            std::fs::write(&tmp_path, serde_json::to_vec_pretty(entry)?)?;
            std::fs::rename(&tmp_path, &final_path)?;
        }
        Ok(())
    }

    /// Loads every `<product>_<hour>.json` file found under the models
    /// directory, parsing the key from the filename. Safe to call more
    /// than once; later loads simply refresh the in-memory map.
    pub fn load_all(&self) -> Result<usize, ModelRegistryError> {
        if !self.models_dir.exists() {
            return Ok(0);
        }
        let mut loaded = 0;
        for entry in std::fs::read_dir(&self.models_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(key) = parse_key_from_path(&path) {
                let bytes = std::fs::read(&path)?;
                let model_entry: ModelEntry = serde_json::from_slice(&bytes)?;
                self.entries.write().insert(key, model_entry);
                loaded += 1;
            }
        }
        Ok(loaded)
    }
}

fn parse_key_from_path(path: &Path) -> Option<ModelKey> {
    let stem = path.file_stem()?.to_str()?;
    let (product_str, hour_str) = stem.rsplit_once('_')?;
    let product = validate_product(product_str).ok()?;
    let hour = validate_hour(hour_str.parse().ok()?).ok()?;
    Some(ModelKey { product, hour })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_metrics() -> ModelMetrics {
        ModelMetrics {
            rmse: 1.0,
            r_squared: 0.9,
            mae: 0.5,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn register_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path());
        let model = LinearModel {
            coefficients: vec![1.0, 2.0],
            intercept: 0.5,
        };
        registry
            .register(
                Product::Dalmp,
                7,
                model.clone(),
                vec!["load_mw".into(), "gen_mw".into()],
                sample_metrics(),
            )
            .unwrap();

        let fetched = registry.get(Product::Dalmp, 7).unwrap();
        assert_eq!(fetched.feature_names, vec!["load_mw", "gen_mw"]);
        assert!(registry.has(Product::Dalmp, 7));
        assert!(!registry.has(Product::Dalmp, 8));
    }

    #[test]
    fn missing_entry_returns_none_not_error() {
        let dir = tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path());
        assert!(registry.get(Product::Rtlmp, 0).is_none());
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path());
        registry
            .register(
                Product::Nsrs,
                3,
                LinearModel {
                    coefficients: vec![0.1],
                    intercept: 1.0,
                },
                vec!["load_mw".into()],
                sample_metrics(),
            )
            .unwrap();

        let reloaded = ModelRegistry::new(dir.path());
        let count = reloaded.load_all().unwrap();
        assert_eq!(count, 1);
        assert!(reloaded.has(Product::Nsrs, 3));
    }

    #[test]
    fn predict_rejects_mismatched_feature_count() {
        let model = LinearModel {
            coefficients: vec![1.0, 2.0],
            intercept: 0.0,
        };
        assert!(model.predict(&[1.0]).is_none());
        assert_eq!(model.predict(&[1.0, 1.0]), Some(3.0));
    }
}
