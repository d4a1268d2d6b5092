//! Health checks (spec §4.I.2): a cached top-level `/health`, a fresh
//! three-way `/health/detailed`, and single-component dispatch.

use super::AppState;
use crate::scheduler::DEFAULT_TIMEOUT_SECONDS;
use crate::scheduler::registry::JobStatus;
use axum::extract::{Path, State as AxumState};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const HEALTH_CACHE_TTL: Duration = Duration::minutes(5);
const PROBE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    pub status: HealthStatus,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct CachedHealth {
    pub checked_at: DateTime<Utc>,
    pub status: HealthStatus,
}

#[derive(Debug, Serialize)]
pub struct SimpleHealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DetailedHealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub data_sources: ComponentStatus,
    pub storage: ComponentStatus,
    pub pipeline: ComponentStatus,
}

/// `/health`: reuses the last detailed check's overall status if it is
/// younger than 5 minutes, else runs a fresh detailed check.
pub async fn health(AxumState(state): AxumState<AppState>) -> Json<SimpleHealthResponse> {
    let cached = state.health_cache.lock().clone();
    let now = Utc::now();
    if let Some(cached) = cached {
        if now - cached.checked_at < HEALTH_CACHE_TTL {
            return Json(SimpleHealthResponse {
                status: cached.status,
                timestamp: cached.checked_at,
            });
        }
    }
    let detailed = run_detailed_check(&state).await;
    *state.health_cache.lock() = Some(CachedHealth {
        checked_at: now,
        status: detailed.status,
    });
    Json(SimpleHealthResponse {
        status: detailed.status,
        timestamp: now,
    })
}

pub async fn health_detailed(AxumState(state): AxumState<AppState>) -> Json<DetailedHealthResponse> {
    let detailed = run_detailed_check(&state).await;
    *state.health_cache.lock() = Some(CachedHealth {
        checked_at: detailed.timestamp,
        status: detailed.status,
    });
    Json(detailed)
}

pub async fn health_component(
    AxumState(state): AxumState<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ComponentStatus>, StatusCode> {
    let status = match name.as_str() {
        "data_sources" => check_data_sources(&state).await,
        "storage" => check_storage(&state),
        "pipeline" => check_pipeline(&state),
        _ => return Err(StatusCode::BAD_REQUEST),
    };
    Ok(Json(status))
}

async fn run_detailed_check(state: &AppState) -> DetailedHealthResponse {
    let data_sources = check_data_sources(state).await;
    let storage = check_storage(state);
    let pipeline = check_pipeline(state);
    let overall = if [data_sources.status, storage.status, pipeline.status]
        .iter()
        .all(|s| *s == HealthStatus::Healthy)
    {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    };
    DetailedHealthResponse {
        status: overall,
        timestamp: Utc::now(),
        data_sources,
        storage,
        pipeline,
    }
}

async fn check_data_sources(state: &AppState) -> ComponentStatus {
    if state.data_source_urls.is_empty() {
        return ComponentStatus {
            status: HealthStatus::Healthy,
            detail: "no upstream data sources configured".to_string(),
        };
    }
    let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
        Ok(client) => client,
        Err(err) => {
            return ComponentStatus {
                status: HealthStatus::Unhealthy,
                detail: format!("could not build probe client: {err}"),
            }
        }
    };

    let mut unhealthy = Vec::new();
    for url in &state.data_source_urls {
        match client.head(url).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => unhealthy.push(format!("{url} returned {}", response.status())),
            Err(err) => unhealthy.push(format!("{url} unreachable: {err}")),
        }
    }

    if unhealthy.is_empty() {
        ComponentStatus {
            status: HealthStatus::Healthy,
            detail: format!("{} upstream source(s) reachable", state.data_source_urls.len()),
        }
    } else {
        ComponentStatus {
            status: HealthStatus::Unhealthy,
            detail: unhealthy.join("; "),
        }
    }
}

fn check_storage(state: &AppState) -> ComponentStatus {
    let info = state.store.info();
    if !state.store.root().exists() {
        return ComponentStatus {
            status: HealthStatus::Unhealthy,
            detail: format!("storage root {} does not exist", state.store.root().display()),
        };
    }
    let probe_path = state.store.root().join(".health_write_probe");
    if let Err(err) = std::fs::write(&probe_path, b"ok") {
        return ComponentStatus {
            status: HealthStatus::Unhealthy,
            detail: format!("storage root not writable: {err}"),
        };
    }
    let _ = std::fs::remove_file(&probe_path);

    if !info.index_consistent {
        return ComponentStatus {
            status: HealthStatus::Unhealthy,
            detail: "index does not match artifacts on disk, rebuild_index needed".to_string(),
        };
    }

    if !info.products_missing_current_forecast.is_empty() {
        let missing: Vec<&str> = info
            .products_missing_current_forecast
            .iter()
            .map(|p| p.as_str())
            .collect();
        return ComponentStatus {
            status: HealthStatus::Unhealthy,
            detail: format!("no forecast covers now for: {}", missing.join(", ")),
        };
    }

    ComponentStatus {
        status: HealthStatus::Healthy,
        detail: format!(
            "{} artifacts across {} product(s)",
            info.artifact_count,
            info.products_present.len()
        ),
    }
}

fn check_pipeline(state: &AppState) -> ComponentStatus {
    let now = Utc::now();
    let stuck: Vec<String> = state
        .jobs
        .list_by_status(JobStatus::Running)
        .into_iter()
        .filter(|job| {
            job.started_at
                .map(|started| (now - started).num_seconds() > DEFAULT_TIMEOUT_SECONDS as i64)
                .unwrap_or(false)
        })
        .map(|job| job.id)
        .collect();

    if stuck.is_empty() {
        ComponentStatus {
            status: HealthStatus::Healthy,
            detail: format!("pipeline running = {}", state.pipeline.is_running()),
        }
    } else {
        ComponentStatus {
            status: HealthStatus::Unhealthy,
            detail: format!("jobs stuck past their timeout: {}", stuck.join(", ")),
        }
    }
}
