//! Query API scenarios exercised through the real `axum::Router`: query by
//! date, a 404 for a missing artifact, a 400 for an invalid product, and
//! component health dispatch including a stuck-job timeout.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use price_forecast_backend::api::{build_router, AppState};
use price_forecast_backend::forecasting::{ForecastingEngine, ProbabilisticForecast};
use price_forecast_backend::ingest::{DataSourceClient, FixtureDataSourceClient};
use price_forecast_backend::model_registry::ModelRegistry;
use price_forecast_backend::pipeline::PipelineExecutor;
use price_forecast_backend::scheduler::registry::{JobRecord, JobRegistry, JobStatus, JobType};
use price_forecast_backend::store::ForecastStore;
use price_forecast_backend::forecasting::ForecastEnsemble;
use price_forecast_backend::time::Product;
use std::sync::Arc;
use tempfile::tempdir;
use tower::ServiceExt;

fn sample_ensemble(product: Product, start: chrono::DateTime<Utc>) -> ForecastEnsemble {
    let forecasts = (0..72)
        .map(|h| {
            let ts = start + Duration::hours(h);
            ProbabilisticForecast::new(ts, product, 42.0, vec![42.0; 100], ts, false).unwrap()
        })
        .collect();
    ForecastEnsemble::new(product, start, forecasts).unwrap()
}

fn build_state(store: Arc<ForecastStore>, jobs: Arc<JobRegistry>) -> AppState {
    let models_dir = tempdir().unwrap();
    let registry = Arc::new(ModelRegistry::new(models_dir.path().to_path_buf()));
    let engine = Arc::new(ForecastingEngine::new(registry.clone()));
    let data_source: Arc<dyn DataSourceClient> = Arc::new(FixtureDataSourceClient::default());
    let pipeline = Arc::new(PipelineExecutor::new(data_source, engine, store.clone()));
    AppState::new(store, registry, pipeline, jobs, Vec::new())
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn query_by_date_returns_the_stored_ensemble() {
    let dir = tempdir().unwrap();
    let store = Arc::new(ForecastStore::open(dir.path()).unwrap());
    let start = chrono::DateTime::parse_from_rfc3339("2024-04-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    store.put(&sample_ensemble(Product::Dalmp, start)).unwrap();

    let app = build_router(build_state(store, Arc::new(JobRegistry::new())));
    let request = Request::builder()
        .uri("/forecasts/2024-04-01/DALMP")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["product"], "DALMP");
    assert_eq!(json["forecasts"].as_array().unwrap().len(), 72);
}

#[tokio::test]
async fn query_for_a_date_with_no_artifact_returns_404() {
    let dir = tempdir().unwrap();
    let store = Arc::new(ForecastStore::open(dir.path()).unwrap());
    let app = build_router(build_state(store, Arc::new(JobRegistry::new())));

    let request = Request::builder()
        .uri("/forecasts/2024-04-01/DALMP")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_product_is_rejected_before_any_store_lookup() {
    let dir = tempdir().unwrap();
    let store = Arc::new(ForecastStore::open(dir.path()).unwrap());
    let app = build_router(build_state(store, Arc::new(JobRegistry::new())));

    let request = Request::builder()
        .uri("/forecasts/latest/NOTAPRODUCT")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unsupported_format_is_rejected_after_a_valid_product() {
    let dir = tempdir().unwrap();
    let store = Arc::new(ForecastStore::open(dir.path()).unwrap());
    let start = Utc::now();
    store.put(&sample_ensemble(Product::Rtlmp, start)).unwrap();
    let app = build_router(build_state(store, Arc::new(JobRegistry::new())));

    let request = Request::builder()
        .uri("/forecasts/latest/RTLMP?format=yaml")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_component_rejects_an_unrecognized_name_with_400() {
    let dir = tempdir().unwrap();
    let store = Arc::new(ForecastStore::open(dir.path()).unwrap());
    let app = build_router(build_state(store, Arc::new(JobRegistry::new())));

    let request = Request::builder()
        .uri("/health/component/nonexistent")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_component_pipeline_flags_a_job_stuck_past_its_timeout() {
    let dir = tempdir().unwrap();
    let store = Arc::new(ForecastStore::open(dir.path()).unwrap());
    let jobs = Arc::new(JobRegistry::new());
    jobs.register(JobRecord {
        id: "stuck-job".to_string(),
        job_type: JobType::Daily,
        scheduled_for: Utc::now() - Duration::hours(3),
        status: JobStatus::Running,
        started_at: Some(Utc::now() - Duration::hours(2)),
        finished_at: None,
    });
    let app = build_router(build_state(store, jobs));

    let request = Request::builder()
        .uri("/health/component/pipeline")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "unhealthy");
}

#[tokio::test]
async fn health_component_pipeline_is_healthy_with_no_stuck_jobs() {
    let dir = tempdir().unwrap();
    let store = Arc::new(ForecastStore::open(dir.path()).unwrap());
    let jobs = Arc::new(JobRegistry::new());
    jobs.register(JobRecord {
        id: "fresh-job".to_string(),
        job_type: JobType::Manual,
        scheduled_for: Utc::now(),
        status: JobStatus::Running,
        started_at: Some(Utc::now()),
        finished_at: None,
    });
    let app = build_router(build_state(store, jobs));

    let request = Request::builder()
        .uri("/health/component/pipeline")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
}
