//! Forecasting Engine (spec §4.D): model dispatch, uncertainty derivation,
//! sample generation, and ensemble assembly.

pub mod engine;
pub mod ensemble;
pub mod sampling;
pub mod statistics;
pub mod uncertainty;

pub use engine::{
    FeatureRow, FeatureTable, ForecastGenerationError, ForecastRequestConfig, ForecastStageError,
    ForecastingEngine, HistoricalData, RollingErrorWindow,
};
pub use ensemble::{
    aggregate_forecasts, compare, AggregatedForecastRow, EnsembleError, ForecastComparison,
    ForecastEnsemble, ProbabilisticForecast,
};
pub use sampling::SampleDistribution;
pub use statistics::ForecastStatistics;
pub use uncertainty::{HistoricalSeries, UncertaintyMethod};
