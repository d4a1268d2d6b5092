//! Query API (spec §4.I): read-only HTTP surface over the Forecast Store,
//! Model Registry, Pipeline Executor, and job registry.

mod health;
mod routes;

use crate::model_registry::ModelRegistry;
use crate::pipeline::PipelineExecutor;
use crate::scheduler::registry::JobRegistry;
use crate::store::ForecastStore;
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use health::{ComponentStatus, HealthStatus};

/// Shared collaborators every handler needs, cloned cheaply per request
/// (everything inside is `Arc`-wrapped).
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ForecastStore>,
    pub registry: Arc<ModelRegistry>,
    pub pipeline: Arc<PipelineExecutor>,
    pub jobs: Arc<JobRegistry>,
    pub data_source_urls: Vec<String>,
    pub health_cache: Arc<Mutex<Option<health::CachedHealth>>>,
}

impl AppState {
    pub fn new(
        store: Arc<ForecastStore>,
        registry: Arc<ModelRegistry>,
        pipeline: Arc<PipelineExecutor>,
        jobs: Arc<JobRegistry>,
        data_source_urls: Vec<String>,
    ) -> Self {
        Self {
            store,
            registry,
            pipeline,
            jobs,
            data_source_urls,
            health_cache: Arc::new(Mutex::new(None)),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(routes::index))
        .route("/health", get(health::health))
        .route("/health/detailed", get(health::health_detailed))
        .route("/health/component/:name", get(health::health_component))
        .route("/storage/status", get(routes::storage_status))
        .route("/forecasts/:date/:product", get(routes::forecast_by_date))
        .route("/forecasts/latest/:product", get(routes::forecast_latest))
        .route(
            "/forecasts/range/:start/:end/:product",
            get(routes::forecast_range),
        )
        .route(
            "/forecasts/model/:date/:product",
            get(routes::forecast_model_by_date),
        )
        .route(
            "/forecasts/model/latest/:product",
            get(routes::forecast_model_latest),
        )
        .route("/products", get(routes::products))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
