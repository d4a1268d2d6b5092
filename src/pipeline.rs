//! Pipeline Executor (spec §4.G): the staged ingest → features → forecast
//! → validate → store DAG run once per product per cycle, with a single
//! cycle allowed to run at a time and a state machine recorded per run.

use crate::fallback::FallbackEngine;
use crate::forecasting::engine::{FeatureRow, FeatureTable, ForecastRequestConfig, HistoricalData};
use crate::forecasting::{ForecastEnsemble, ForecastingEngine, HistoricalSeries};
use crate::ingest::{DataSourceClient, IngestError, RawSeries, RawSeriesPoint};
use crate::store::{ForecastStore, StoreError};
use crate::time::{Product, ALL_PRODUCTS};
use crate::validation::{validate_ensemble, validate_consistency};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

pub const INGEST_TIMEOUT: Duration = Duration::from_secs(600);
pub const FEATURES_TIMEOUT: Duration = Duration::from_secs(300);
pub const FORECAST_TIMEOUT: Duration = Duration::from_secs(900);
pub const VALIDATE_TIMEOUT: Duration = Duration::from_secs(120);
pub const STORE_TIMEOUT: Duration = Duration::from_secs(120);

pub const ENERGY_SANITY_BOUNDS: (f64, f64) = (-500.0, 5000.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Init,
    Running,
    Validating,
    Storing,
    Completed,
    Fallback,
    FallbackStoring,
    CompletedFallback,
    Failed,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("a pipeline cycle is already running")]
    AlreadyRunning,
    #[error("stage '{0}' timed out")]
    StageTimeout(&'static str),
    #[error("ingest failed: {0}")]
    Ingest(#[from] IngestError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductOutcome {
    pub product: Product,
    pub state: PipelineState,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunReport {
    pub target_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<ProductOutcome>,
}

/// Orchestrates one full cycle across all six products. `running` enforces
/// `max_instances = 1` (spec §4.H): a second `run_cycle` call while one is
/// in flight returns `PipelineError::AlreadyRunning` immediately rather
/// than queuing.
pub struct PipelineExecutor {
    data_source: Arc<dyn DataSourceClient>,
    engine: Arc<ForecastingEngine>,
    store: Arc<ForecastStore>,
    running: Mutex<bool>,
}

impl PipelineExecutor {
    pub fn new(
        data_source: Arc<dyn DataSourceClient>,
        engine: Arc<ForecastingEngine>,
        store: Arc<ForecastStore>,
    ) -> Self {
        Self {
            data_source,
            engine,
            store,
            running: Mutex::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    pub async fn run_cycle(&self, target_date: NaiveDate) -> Result<PipelineRunReport, PipelineError> {
        {
            let mut running = self.running.lock();
            if *running {
                return Err(PipelineError::AlreadyRunning);
            }
            *running = true;
        }
        let result = self.run_cycle_inner(target_date).await;
        *self.running.lock() = false;
        result
    }

    async fn run_cycle_inner(&self, target_date: NaiveDate) -> Result<PipelineRunReport, PipelineError> {
        let started_at = Utc::now();
        info!(%target_date, "starting pipeline cycle");

        let start_time = start_time_for(target_date);
        let mut outcomes = Vec::with_capacity(ALL_PRODUCTS.len());
        let mut built: HashMap<Product, ForecastEnsemble> = HashMap::new();

        match self.stage_ingest_and_project(target_date).await {
            Ok((features, historical)) => {
                for product in ALL_PRODUCTS {
                    let outcome = self
                        .run_product(product, start_time, &features, &historical)
                        .await;
                    if let Ok(ensemble) = self.store.get(product, start_time) {
                        built.insert(product, ensemble);
                    }
                    outcomes.push(outcome);
                }
            }
            Err(err) => {
                // An ingest failure denies every product its feature table, but
                // spec §7/§8 still requires a completed cycle with a fallback
                // artifact per product rather than an empty store.
                warn!(%target_date, error = %err, "ingest stage failed, routing every product to fallback");
                let reason = err.to_string();
                for product in ALL_PRODUCTS {
                    let outcome = self.fallback_only(product, start_time, reason.clone());
                    if let Ok(ensemble) = self.store.get(product, start_time) {
                        built.insert(product, ensemble);
                    }
                    outcomes.push(outcome);
                }
            }
        }

        if let (Some(dalmp), Some(rtlmp)) = (built.get(&Product::Dalmp), built.get(&Product::Rtlmp)) {
            let ancillaries: Vec<&ForecastEnsemble> = [Product::RegUp, Product::RegDown, Product::Rrs, Product::Nsrs]
                .iter()
                .filter_map(|p| built.get(p))
                .collect();
            let consistency = validate_consistency(Some(dalmp), Some(rtlmp), &ancillaries);
            if !consistency.is_valid() {
                warn!(errors = ?consistency.errors, "cross-product consistency check raised non-blocking warnings");
            }
        }

        let finished_at = Utc::now();
        info!(%target_date, "pipeline cycle finished");
        Ok(PipelineRunReport {
            target_date,
            started_at,
            finished_at,
            outcomes,
        })
    }

    async fn stage_ingest_and_project(
        &self,
        target_date: NaiveDate,
    ) -> Result<(FeatureTable, HistoricalData), PipelineError> {
        let (load_forecast, historical_prices, generation_forecast) =
            tokio::time::timeout(INGEST_TIMEOUT, self.fetch_all(target_date))
                .await
                .map_err(|_| PipelineError::StageTimeout("ingest"))??;

        let historical = self.build_historical_data(&historical_prices);
        let features = tokio::time::timeout(
            FEATURES_TIMEOUT,
            async { project_features((load_forecast, generation_forecast)) },
        )
        .await
        .map_err(|_| PipelineError::StageTimeout("features"))?;
        Ok((features, historical))
    }

    async fn fetch_all(
        &self,
        target_date: NaiveDate,
    ) -> Result<(RawSeries, RawSeries, RawSeries), IngestError> {
        let load_forecast = self.data_source.fetch_load_forecast(target_date).await?;
        let historical_prices = self.data_source.fetch_historical_prices(target_date).await?;
        let generation_forecast = self.data_source.fetch_generation_forecast(target_date).await?;
        Ok((load_forecast, historical_prices, generation_forecast))
    }

    /// Turns the historical-prices feed into per-(product, hour) error
    /// series (spec §4.D.1) by comparing each actual price against
    /// whatever forecast was previously stored for that exact timestamp.
    /// Timestamps with no prior forecast on file (cold start, new product)
    /// simply contribute nothing — `derive_uncertainty` falls back to
    /// `historical_residuals`'s no-history branch for those keys.
    fn build_historical_data(&self, historical_prices: &RawSeries) -> HistoricalData {
        let mut points: Vec<&RawSeriesPoint> = historical_prices.points.iter().collect();
        points.sort_by_key(|point| point.timestamp);

        let mut series: HashMap<String, HistoricalSeries> = HashMap::new();
        for point in points {
            for (product_name, &actual) in &point.values {
                let Some(product) = Product::parse(product_name) else {
                    continue;
                };
                let Ok(ensemble) = self.store.get(product, point.timestamp) else {
                    continue;
                };
                let Some(forecast) = ensemble
                    .forecasts
                    .iter()
                    .find(|f| f.timestamp == point.timestamp)
                else {
                    continue;
                };

                let residual = forecast.point_forecast - actual;
                let percent_error = if actual != 0.0 { residual / actual } else { 0.0 };
                let key = HistoricalData::key(product, hour_of_day(point.timestamp));
                let entry = series.entry(key).or_default();
                entry.residuals.push(residual);
                entry.percent_errors.push(percent_error);
                entry.recent_absolute_errors.push(residual.abs());
            }
        }
        HistoricalData { series }
    }

    /// Routes `product` straight to fallback without a forecast attempt,
    /// used when the ingest stage fails before any feature table exists.
    fn fallback_only(&self, product: Product, start_time: DateTime<Utc>, reason: String) -> ProductOutcome {
        match self.fallback(product, start_time) {
            Ok(ensemble) => {
                let validation = validate_ensemble(&ensemble, ENERGY_SANITY_BOUNDS);
                let mut warnings = vec![reason];
                if !validation.is_valid() {
                    for messages in validation.errors.values() {
                        warnings.extend(messages.iter().cloned());
                    }
                }
                self.store_outcome(product, ensemble, warnings, true)
            }
            Err(err) => {
                error!(%product, error = %err, "fallback failed after ingest failure");
                ProductOutcome {
                    product,
                    state: PipelineState::Failed,
                    warnings: vec![reason, err.to_string()],
                }
            }
        }
    }

    async fn run_product(
        &self,
        product: Product,
        start_time: DateTime<Utc>,
        features: &FeatureTable,
        historical: &HistoricalData,
    ) -> ProductOutcome {
        let mut rng = rand::thread_rng();
        let config = ForecastRequestConfig::default();

        // forecast_ensemble is CPU-bound and synchronous; FORECAST_TIMEOUT
        // bounds the stage conceptually but is enforced by the caller
        // (e.g. the scheduler's execution monitor), not by an inner await.
        let generated = self.engine.forecast_ensemble(
            product,
            hour_of_day,
            start_time,
            features,
            historical,
            &config,
            &mut rng,
        );

        let (ensemble, mut warnings, state) = match generated {
            Err(err) => {
                warn!(%product, error = %err, "forecast generation failed, routing to fallback");
                match self.fallback(product, start_time) {
                    Ok(e) => (e, vec![err.to_string()], PipelineState::Fallback),
                    Err(fallback_err) => {
                        error!(%product, error = %fallback_err, "fallback also failed");
                        return ProductOutcome {
                            product,
                            state: PipelineState::Failed,
                            warnings: vec![err.to_string(), fallback_err.to_string()],
                        };
                    }
                }
            }
            Ok((ensemble, warnings)) => (ensemble, warnings, PipelineState::Running),
        };

        let validation = validate_ensemble(&ensemble, ENERGY_SANITY_BOUNDS);
        if !validation.is_valid() {
            for messages in validation.errors.values() {
                warnings.extend(messages.iter().cloned());
            }
            warn!(%product, "validation failed after generation, routing to fallback");
            match self.fallback(product, start_time) {
                Ok(fallback_ensemble) => {
                    return self.store_outcome(product, fallback_ensemble, warnings, true);
                }
                Err(err) => {
                    return ProductOutcome {
                        product,
                        state: PipelineState::Failed,
                        warnings: vec![err.to_string()],
                    };
                }
            }
        }

        self.store_outcome(product, ensemble, warnings, state != PipelineState::Running)
    }

    fn store_outcome(
        &self,
        product: Product,
        ensemble: ForecastEnsemble,
        warnings: Vec<String>,
        is_fallback: bool,
    ) -> ProductOutcome {
        match self.store.put(&ensemble) {
            Ok(()) => ProductOutcome {
                product,
                state: if is_fallback {
                    PipelineState::CompletedFallback
                } else {
                    PipelineState::Completed
                },
                warnings,
            },
            Err(err) => {
                error!(%product, error = %err, "failed to store ensemble");
                ProductOutcome {
                    product,
                    state: PipelineState::Failed,
                    warnings: vec![err.to_string()],
                }
            }
        }
    }

    fn fallback(
        &self,
        product: Product,
        start_time: DateTime<Utc>,
    ) -> Result<ForecastEnsemble, crate::fallback::FallbackError> {
        let engine = FallbackEngine::new(&self.store);
        let (ensemble, _kind) = engine.resolve(product, start_time, Utc::now())?;
        Ok(ensemble)
    }
}

/// The forecast window for `target_date` starts at midnight
/// America/Chicago of that date (spec §4.B), not midnight UTC.
fn start_time_for(target_date: NaiveDate) -> DateTime<Utc> {
    let naive = target_date.and_hms_opt(0, 0, 0).expect("midnight always valid");
    crate::time::localize(naive, crate::time::SCHEDULE_TIMEZONE).with_timezone(&Utc)
}

fn hour_of_day(timestamp: DateTime<Utc>) -> u8 {
    use chrono::Timelike;
    timestamp.hour() as u8
}

/// Merges the load-forecast and generation-forecast ingest series into a
/// single feature table keyed by timestamp (spec §4.D.2).
fn project_features((load_forecast, generation_forecast): (RawSeries, RawSeries)) -> FeatureTable {
    let mut rows: HashMap<DateTime<Utc>, FeatureRow> = HashMap::new();
    for point in load_forecast.points {
        rows.entry(point.timestamp).or_default().values.extend(point.values);
    }
    for point in generation_forecast.points {
        rows.entry(point.timestamp).or_default().values.extend(point.values);
    }
    FeatureTable { rows }
}
