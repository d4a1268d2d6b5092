//! Forecasting Engine (spec §4.D): the single-hour forecast pipeline and
//! the 72-hour ensemble assembly built on top of it.

use super::ensemble::{EnsembleError, ForecastEnsemble, ProbabilisticForecast};
use super::sampling::{apply_bounds, generate_samples, SampleDistribution};
use super::uncertainty::{derive_uncertainty, HistoricalSeries, UncertaintyMethod};
use crate::model_registry::ModelRegistry;
use crate::time::{Product, FORECAST_HORIZON_HOURS, PROBABILISTIC_SAMPLE_COUNT};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForecastStageError {
    #[error("invalid input for {product}@hour{hour}: {reason}")]
    InvalidInput {
        product: Product,
        hour: u8,
        reason: String,
    },
    #[error("no model registered for {product}@hour{hour}")]
    ModelSelection { product: Product, hour: u8 },
    #[error("feature projection failed for {product}@hour{hour}: missing columns {missing:?}")]
    InvalidFeature {
        product: Product,
        hour: u8,
        missing: Vec<String>,
    },
    #[error("model execution failed for {product}@hour{hour}: non-finite prediction")]
    ModelExecution { product: Product, hour: u8 },
    #[error("ensemble assembly failed: {0}")]
    Ensemble(#[from] EnsembleError),
}

#[derive(Debug, Error)]
#[error("forecast generation failed at stage '{stage}' for {product}@hour{hour}: {source}")]
pub struct ForecastGenerationError {
    pub product: Product,
    pub hour: u8,
    pub stage: &'static str,
    #[source]
    pub source: ForecastStageError,
}

/// A single row of named numeric features plus its timestamp.
#[derive(Debug, Clone, Default)]
pub struct FeatureRow {
    pub values: HashMap<String, f64>,
}

/// A feature table indexed by timestamp, reused across all 72 hours of an
/// ensemble call (spec §4.D.2).
#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    pub rows: HashMap<DateTime<Utc>, FeatureRow>,
}

impl FeatureTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct HistoricalData {
    pub series: HashMap<String, HistoricalSeries>,
}

impl HistoricalData {
    pub fn key(product: Product, hour: u8) -> String {
        format!("{}_{}", product.as_str(), hour)
    }

    pub fn get(&self, product: Product, hour: u8) -> Option<&HistoricalSeries> {
        self.series.get(&Self::key(product, hour))
    }
}

#[derive(Debug, Clone)]
pub struct ForecastRequestConfig {
    pub uncertainty_method: UncertaintyMethod,
    pub sample_distribution: SampleDistribution,
    pub skewness: Option<f64>,
    pub use_cache: bool,
}

impl Default for ForecastRequestConfig {
    fn default() -> Self {
        Self {
            uncertainty_method: UncertaintyMethod::DEFAULT,
            sample_distribution: SampleDistribution::DEFAULT,
            skewness: None,
            use_cache: false,
        }
    }
}

type CacheKey = (Product, u8, DateTime<Utc>, u64);

/// Engine caching and randomness. The cache is consulted only when a
/// request opts in (spec §4.D.3); it is cleared on restart and on
/// `clear_cache()`.
pub struct ForecastingEngine {
    registry: Arc<ModelRegistry>,
    cache: Mutex<HashMap<CacheKey, ProbabilisticForecast>>,
}

impl ForecastingEngine {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    fn hash_features(row: &FeatureRow) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut keys: Vec<_> = row.values.keys().collect();
        keys.sort();
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for k in keys {
            k.hash(&mut hasher);
            row.values[k].to_bits().hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Produces one `ProbabilisticForecast`, following the 8-stage sequence
    /// in spec §4.D.1.
    #[allow(clippy::too_many_arguments)]
    pub fn forecast_hour(
        &self,
        product: Product,
        hour: u8,
        timestamp: DateTime<Utc>,
        features: &FeatureTable,
        historical: &HistoricalData,
        config: &ForecastRequestConfig,
        rng: &mut impl Rng,
    ) -> Result<(ProbabilisticForecast, Vec<String>), ForecastGenerationError> {
        let wrap = |stage: &'static str, source: ForecastStageError| ForecastGenerationError {
            product,
            hour,
            stage,
            source,
        };

        // 1. Validate inputs.
        if features.is_empty() {
            return Err(wrap(
                "validate_inputs",
                ForecastStageError::InvalidInput {
                    product,
                    hour,
                    reason: "feature table is empty".into(),
                },
            ));
        }
        let feature_row = features.rows.get(&timestamp).ok_or_else(|| {
            wrap(
                "validate_inputs",
                ForecastStageError::InvalidInput {
                    product,
                    hour,
                    reason: format!("no feature row for timestamp {timestamp}"),
                },
            )
        })?;

        let cache_key = (product, hour, timestamp, Self::hash_features(feature_row));
        if config.use_cache {
            if let Some(cached) = self.cache.lock().get(&cache_key) {
                return Ok((cached.clone(), Vec::new()));
            }
        }

        // 2. Model dispatch.
        let entry = self
            .registry
            .get(product, hour as i64)
            .ok_or_else(|| wrap("model_dispatch", ForecastStageError::ModelSelection { product, hour }))?;

        // 3. Feature projection.
        let mut missing = Vec::new();
        let mut projected = Vec::with_capacity(entry.feature_names.len());
        for name in &entry.feature_names {
            match feature_row.values.get(name) {
                Some(v) if v.is_finite() => projected.push(*v),
                _ => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(wrap(
                "feature_projection",
                ForecastStageError::InvalidFeature {
                    product,
                    hour,
                    missing,
                },
            ));
        }

        // 4. Point prediction.
        let point = entry
            .model
            .predict(&projected)
            .ok_or_else(|| wrap("point_prediction", ForecastStageError::ModelExecution { product, hour }))?;

        // 5. Uncertainty derivation.
        let history = historical.get(product, hour);
        let (params, mut warnings) =
            derive_uncertainty(config.uncertainty_method, product, point, history);

        // 6. Sample generation.
        let mut samples = generate_samples(
            config.sample_distribution,
            params.mean,
            params.std_dev,
            PROBABILISTIC_SAMPLE_COUNT,
            config.skewness,
            rng,
        );

        // 7. Product constraints.
        if product.is_ancillary() {
            apply_bounds(&mut samples, Some(0.0), None);
        }

        // 8. Assemble.
        let generation_timestamp = Utc::now();
        let forecast =
            ProbabilisticForecast::new(timestamp, product, point, samples, generation_timestamp, false)
                .map_err(|e| wrap("assemble", ForecastStageError::Ensemble(e)))?;

        if config.use_cache {
            self.cache.lock().insert(cache_key, forecast.clone());
        }

        warnings.sort();
        Ok((forecast, warnings))
    }

    /// Produces a 72-hour ensemble. Per-hour failures propagate immediately
    /// (policy (a) in spec §4.D.2) — the pipeline, not the engine, decides
    /// whether to route to fallback.
    pub fn forecast_ensemble(
        &self,
        product: Product,
        hour_provider: impl Fn(DateTime<Utc>) -> u8,
        start_time: DateTime<Utc>,
        features: &FeatureTable,
        historical: &HistoricalData,
        config: &ForecastRequestConfig,
        rng: &mut impl Rng,
    ) -> Result<(ForecastEnsemble, Vec<String>), ForecastGenerationError> {
        let mut forecasts = Vec::with_capacity(FORECAST_HORIZON_HOURS as usize);
        let mut all_warnings = Vec::new();
        for offset in 0..FORECAST_HORIZON_HOURS {
            let timestamp = start_time + Duration::hours(offset);
            let hour = hour_provider(timestamp);
            let (forecast, warnings) = self.forecast_hour(
                product, hour, timestamp, features, historical, config, rng,
            )?;
            forecasts.push(forecast);
            all_warnings.extend(warnings);
        }

        let ensemble = ForecastEnsemble::new(product, start_time, forecasts)
            .map_err(|e| ForecastGenerationError {
                product,
                hour: 0,
                stage: "ensemble_assembly",
                source: ForecastStageError::Ensemble(e),
            })?;
        Ok((ensemble, all_warnings))
    }
}

/// Bounded FIFO of recent absolute errors, used to build `HistoricalSeries`
/// incrementally as new actuals arrive (operational helper, not on the
/// pipeline's hot path).
#[derive(Debug, Clone)]
pub struct RollingErrorWindow {
    max_len: usize,
    errors: VecDeque<f64>,
}

impl RollingErrorWindow {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            errors: VecDeque::with_capacity(max_len),
        }
    }

    pub fn push(&mut self, error: f64) {
        if self.errors.len() == self.max_len {
            self.errors.pop_front();
        }
        self.errors.push_back(error);
    }

    pub fn as_vec(&self) -> Vec<f64> {
        self.errors.iter().copied().collect()
    }
}
