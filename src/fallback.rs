//! Fallback Engine (spec §4.F): produces a usable ensemble when the
//! Pipeline Executor cannot complete a normal forecast cycle, either by
//! re-stamping the last known-good stored ensemble onto the new window or,
//! for a product with no prior non-fallback history, synthesizing one
//! from the cold-start constants in `time::Product`.

use crate::forecasting::{EnsembleError, ForecastEnsemble, ProbabilisticForecast};
use crate::store::{ForecastStore, StoreError};
use crate::time::{Product, FORECAST_HORIZON_HOURS, PROBABILISTIC_SAMPLE_COUNT};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("ensemble assembly error: {0}")]
    Ensemble(#[from] EnsembleError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    /// A prior non-fallback ensemble exists for this product; re-stamp it
    /// onto the requested window.
    StaleRepeat,
    /// No prior non-fallback ensemble exists; synthesize constant-value
    /// forecasts from the product's cold-start default price.
    ColdStart,
}

pub struct FallbackEngine<'a> {
    store: &'a ForecastStore,
}

impl<'a> FallbackEngine<'a> {
    pub fn new(store: &'a ForecastStore) -> Self {
        Self { store }
    }

    /// Resolves a fallback ensemble for `product` starting at
    /// `new_start`: step 1 looks for the most recent non-fallback
    /// artifact ending at or before `new_start` and re-stamps it; step 2,
    /// on cold start, synthesizes a constant-value ensemble (spec §4.F).
    pub fn resolve(
        &self,
        product: Product,
        new_start: DateTime<Utc>,
        generation_timestamp: DateTime<Utc>,
    ) -> Result<(ForecastEnsemble, FallbackKind), FallbackError> {
        match self.store.get_latest_non_fallback(product, new_start) {
            Ok(previous) => {
                info!(product = %product, "fallback: re-stamping prior ensemble onto new window");
                let restamped = previous.restamped_to(new_start, generation_timestamp)?;
                Ok((restamped, FallbackKind::StaleRepeat))
            }
            Err(StoreError::NoneForProduct(_)) => {
                warn!(product = %product, "fallback: no prior non-fallback ensemble, synthesizing cold-start forecast");
                let synthesized = cold_start_ensemble(product, new_start, generation_timestamp)?;
                Ok((synthesized, FallbackKind::ColdStart))
            }
            Err(other) => Err(other.into()),
        }
    }
}

/// Builds a 72-hour ensemble of constant-value forecasts at the product's
/// cold-start default price with zero-variance samples (every sample
/// equal to the point forecast) — this guarantees the invariant "there is
/// always an artifact" without inventing a spread the system has no basis
/// for (spec §4.F step 2).
pub fn cold_start_ensemble(
    product: Product,
    start: DateTime<Utc>,
    generation_timestamp: DateTime<Utc>,
) -> Result<ForecastEnsemble, EnsembleError> {
    let point = product.cold_start_default_price();

    let forecasts = (0..FORECAST_HORIZON_HOURS)
        .map(|h| {
            let ts = start + Duration::hours(h);
            let samples = vec![point; PROBABILISTIC_SAMPLE_COUNT];
            ProbabilisticForecast::new(ts, product, point, samples, generation_timestamp, true)
        })
        .collect::<Result<Vec<_>, _>>()?;

    ForecastEnsemble::new(product, start, forecasts)
}
