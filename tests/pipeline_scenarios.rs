//! End-to-end pipeline scenarios: happy path, ingest failure, and
//! cold-start fallback, driven through the public `PipelineExecutor` and
//! `ForecastStore` surfaces rather than any single module's internals.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use price_forecast_backend::forecasting::ForecastingEngine;
use price_forecast_backend::ingest::{DataSourceClient, FixtureDataSourceClient, IngestError, RawSeries, RawSeriesPoint};
use price_forecast_backend::model_registry::{LinearModel, ModelMetrics, ModelRegistry};
use price_forecast_backend::pipeline::{PipelineExecutor, PipelineState};
use price_forecast_backend::store::ForecastStore;
use price_forecast_backend::time::{localize, Product, SCHEDULE_TIMEZONE, ALL_PRODUCTS};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::tempdir;

/// Mirrors `PipelineExecutor`'s own `start_time_for`: midnight
/// America/Chicago of the target date, converted to UTC.
fn cycle_start(target_date: NaiveDate) -> chrono::DateTime<Utc> {
    let naive = target_date.and_hms_opt(0, 0, 0).unwrap();
    localize(naive, SCHEDULE_TIMEZONE).with_timezone(&Utc)
}

fn fixture_with_features(start: chrono::DateTime<Utc>) -> FixtureDataSourceClient {
    let mut load_forecast = RawSeries::default();
    let mut generation_forecast = RawSeries::default();
    for h in 0..72 {
        let ts = start + Duration::hours(h);
        load_forecast.points.push(RawSeriesPoint {
            timestamp: ts,
            values: HashMap::from([("load_mw".to_string(), 1200.0)]),
        });
        generation_forecast.points.push(RawSeriesPoint {
            timestamp: ts,
            values: HashMap::from([("gen_mw".to_string(), 600.0)]),
        });
    }
    FixtureDataSourceClient {
        load_forecast,
        historical_prices: RawSeries::default(),
        generation_forecast,
    }
}

fn registry_with_all_products(models_dir: std::path::PathBuf) -> Arc<ModelRegistry> {
    let registry = Arc::new(ModelRegistry::new(models_dir));
    for product in ALL_PRODUCTS {
        for hour in 0..24 {
            registry
                .register(
                    product,
                    hour,
                    LinearModel {
                        coefficients: vec![0.01, 0.02],
                        intercept: 15.0,
                    },
                    vec!["load_mw".into(), "gen_mw".into()],
                    ModelMetrics {
                        rmse: 1.0,
                        r_squared: 0.9,
                        mae: 0.5,
                        created_at: Utc::now(),
                    },
                )
                .unwrap();
        }
    }
    registry
}

/// A data source that always fails, simulating every upstream feed being
/// unreachable.
struct FailingDataSourceClient;

#[async_trait]
impl DataSourceClient for FailingDataSourceClient {
    async fn fetch_load_forecast(&self, _target_date: NaiveDate) -> Result<RawSeries, IngestError> {
        Err(IngestError::Exhausted(3))
    }
    async fn fetch_historical_prices(&self, _target_date: NaiveDate) -> Result<RawSeries, IngestError> {
        Err(IngestError::Exhausted(3))
    }
    async fn fetch_generation_forecast(&self, _target_date: NaiveDate) -> Result<RawSeries, IngestError> {
        Err(IngestError::Exhausted(3))
    }
}

#[tokio::test]
async fn happy_path_produces_a_queryable_artifact_per_product() {
    let store_dir = tempdir().unwrap();
    let models_dir = tempdir().unwrap();
    let store = Arc::new(ForecastStore::open(store_dir.path()).unwrap());
    let registry = registry_with_all_products(models_dir.path().to_path_buf());
    let engine = Arc::new(ForecastingEngine::new(registry));
    let target_date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let start = cycle_start(target_date);
    let data_source: Arc<dyn DataSourceClient> = Arc::new(fixture_with_features(start));

    let pipeline = PipelineExecutor::new(data_source, engine, store.clone());
    let report = pipeline.run_cycle(target_date).await.unwrap();

    assert_eq!(report.outcomes.len(), 6);
    for product in ALL_PRODUCTS {
        let ensemble = store.get(product, start).expect("artifact stored for every product");
        assert_eq!(ensemble.forecasts.len(), 72);
        assert!(!ensemble.is_fallback());
    }
}

#[tokio::test]
async fn ingest_failure_routes_every_product_to_fallback() {
    let store_dir = tempdir().unwrap();
    let models_dir = tempdir().unwrap();
    let store = Arc::new(ForecastStore::open(store_dir.path()).unwrap());
    let registry = registry_with_all_products(models_dir.path().to_path_buf());
    let engine = Arc::new(ForecastingEngine::new(registry));
    let target_date = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
    let start = cycle_start(target_date);
    let data_source: Arc<dyn DataSourceClient> = Arc::new(FailingDataSourceClient);

    let pipeline = PipelineExecutor::new(data_source, engine, store.clone());
    let report = pipeline.run_cycle(target_date).await.unwrap();

    assert_eq!(report.outcomes.len(), 6);
    for outcome in &report.outcomes {
        assert_eq!(outcome.state, PipelineState::CompletedFallback);
    }
    assert_eq!(store.info().artifact_count, 6);
    for product in ALL_PRODUCTS {
        let ensemble = store.get(product, start).expect("fallback artifact stored for every product");
        assert!(ensemble.is_fallback());
    }
}

#[tokio::test]
async fn cold_start_fallback_covers_every_product_when_no_models_are_registered() {
    let store_dir = tempdir().unwrap();
    let models_dir = tempdir().unwrap();
    let store = Arc::new(ForecastStore::open(store_dir.path()).unwrap());
    let registry = Arc::new(ModelRegistry::new(models_dir.path().to_path_buf()));
    let engine = Arc::new(ForecastingEngine::new(registry));
    let target_date = NaiveDate::from_ymd_opt(2024, 3, 3).unwrap();
    let start = cycle_start(target_date);
    let data_source: Arc<dyn DataSourceClient> = Arc::new(fixture_with_features(start));

    let pipeline = PipelineExecutor::new(data_source, engine, store.clone());
    let report = pipeline.run_cycle(target_date).await.unwrap();

    for outcome in &report.outcomes {
        assert_eq!(outcome.state, PipelineState::CompletedFallback);
    }
    for product in ALL_PRODUCTS {
        let ensemble = store.get(product, start).unwrap();
        assert!(ensemble.is_fallback());
        assert_eq!(ensemble.forecasts[0].point_forecast, product.cold_start_default_price());
    }
}

#[tokio::test]
async fn a_second_cycle_reuses_the_same_store_and_replaces_latest() {
    let store_dir = tempdir().unwrap();
    let models_dir = tempdir().unwrap();
    let store = Arc::new(ForecastStore::open(store_dir.path()).unwrap());
    let registry = registry_with_all_products(models_dir.path().to_path_buf());
    let engine = Arc::new(ForecastingEngine::new(registry));

    let day1 = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
    let day2 = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
    let start1 = cycle_start(day1);
    let start2 = cycle_start(day2);

    let data_source1: Arc<dyn DataSourceClient> = Arc::new(fixture_with_features(start1));
    let pipeline = PipelineExecutor::new(data_source1, engine.clone(), store.clone());
    pipeline.run_cycle(day1).await.unwrap();

    let data_source2: Arc<dyn DataSourceClient> = Arc::new(fixture_with_features(start2));
    let pipeline = PipelineExecutor::new(data_source2, engine, store.clone());
    pipeline.run_cycle(day2).await.unwrap();

    let latest = store.get_latest(Product::Dalmp).unwrap();
    assert_eq!(latest.start_time, start2);
    assert!(store.get(Product::Dalmp, start1).is_ok());
}
