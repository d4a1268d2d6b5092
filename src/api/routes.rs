//! Forecast/status routes (spec §4.I): product and format are validated
//! before any store access, product first (§4.I.1).

use super::AppState;
use crate::format::{self, OutputFormat};
use crate::forecasting::{aggregate_forecasts, ForecastEnsemble, ProbabilisticForecast};
use crate::store::StoreError;
use crate::time::{validate_product, Product, ALL_PRODUCTS};
use axum::body::Bytes;
use axum::extract::{Path, Query, State as AxumState};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct FormatQuery {
    pub format: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub endpoints: Vec<&'static str>,
}

pub async fn index() -> Json<IndexResponse> {
    Json(IndexResponse {
        name: "price-forecast-backend",
        version: env!("CARGO_PKG_VERSION"),
        endpoints: vec![
            "/health",
            "/health/detailed",
            "/health/component/:name",
            "/storage/status",
            "/forecasts/:date/:product",
            "/forecasts/latest/:product",
            "/forecasts/range/:start/:end/:product",
            "/forecasts/model/:date/:product",
            "/forecasts/model/latest/:product",
            "/products",
        ],
    })
}

#[derive(Debug, Serialize)]
pub struct ProductsResponse {
    pub products: Vec<&'static str>,
}

pub async fn products() -> Json<ProductsResponse> {
    Json(ProductsResponse {
        products: ALL_PRODUCTS.iter().map(|p| p.as_str()).collect(),
    })
}

#[derive(Debug, Serialize)]
pub struct StorageStatusResponse {
    pub root: String,
    pub artifact_count: usize,
    pub products_present: Vec<&'static str>,
    pub oldest_start_time: Option<DateTime<Utc>>,
    pub newest_start_time: Option<DateTime<Utc>>,
}

pub async fn storage_status(
    AxumState(state): AxumState<AppState>,
) -> Result<Json<StorageStatusResponse>, StatusCode> {
    let info = state.store.info();
    Ok(Json(StorageStatusResponse {
        root: info.root.display().to_string(),
        artifact_count: info.artifact_count,
        products_present: info.products_present.iter().map(|p| p.as_str()).collect(),
        oldest_start_time: info.oldest_start_time,
        newest_start_time: info.newest_start_time,
    }))
}

fn parse_product(raw: &str) -> Result<Product, StatusCode> {
    validate_product(raw).map_err(|_| StatusCode::BAD_REQUEST)
}

fn parse_format(query: &FormatQuery) -> Result<OutputFormat, StatusCode> {
    match &query.format {
        None => Ok(OutputFormat::Json),
        Some(raw) => raw.parse::<OutputFormat>().map_err(|_| StatusCode::BAD_REQUEST),
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, StatusCode> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| StatusCode::BAD_REQUEST)
}

/// Midnight America/Chicago of `date`, converted to UTC — the same
/// convention the pipeline uses to start a cycle's forecast window.
fn day_start_utc(date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_hms_opt(0, 0, 0).expect("midnight always valid");
    crate::time::localize(naive, crate::time::SCHEDULE_TIMEZONE).with_timezone(&Utc)
}

fn store_error_to_status(err: StoreError) -> StatusCode {
    match err {
        StoreError::NotFound(_, _) | StoreError::NoneForProduct(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn rendered_response(ensemble: &ForecastEnsemble, format: OutputFormat) -> Result<Response, StatusCode> {
    let body = format::render(ensemble, format).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        format.content_type().parse().expect("valid content type"),
    );
    Ok((headers, Bytes::from(body)).into_response())
}

/// `/forecasts/<date>/<product>?format=F`
pub async fn forecast_by_date(
    AxumState(state): AxumState<AppState>,
    Path((date, product)): Path<(String, String)>,
    Query(query): Query<FormatQuery>,
) -> Result<Response, StatusCode> {
    let product = parse_product(&product)?;
    let format = parse_format(&query)?;
    let date = parse_date(&date)?;
    let start = day_start_utc(date);
    let ensemble = state.store.get(product, start).map_err(store_error_to_status)?;
    rendered_response(&ensemble, format)
}

/// `/forecasts/latest/<product>?format=F`
pub async fn forecast_latest(
    AxumState(state): AxumState<AppState>,
    Path(product): Path<String>,
    Query(query): Query<FormatQuery>,
) -> Result<Response, StatusCode> {
    let product = parse_product(&product)?;
    let format = parse_format(&query)?;
    let ensemble = state.store.get_latest(product).map_err(store_error_to_status)?;
    rendered_response(&ensemble, format)
}

/// `/forecasts/range/<start>/<end>/<product>?format=F`: concatenated as an
/// aggregated per-timestamp view across the ensembles in range.
pub async fn forecast_range(
    AxumState(state): AxumState<AppState>,
    Path((start, end, product)): Path<(String, String, String)>,
    Query(query): Query<FormatQuery>,
) -> Result<Response, StatusCode> {
    let product = parse_product(&product)?;
    let format = parse_format(&query)?;
    let start_date = parse_date(&start)?;
    let end_date = parse_date(&end)?;
    let ensembles = state
        .store
        .get_range(product, day_start_utc(start_date), day_start_utc(end_date))
        .map_err(store_error_to_status)?;
    if ensembles.is_empty() {
        return Err(StatusCode::NOT_FOUND);
    }

    match format {
        OutputFormat::Json => {
            let rows = aggregate_forecasts(&ensembles);
            Ok(Json(rows).into_response())
        }
        other => {
            // Non-JSON range responses render each ensemble's bytes
            // concatenated is not well-formed for csv/excel/parquet, so
            // range queries in those formats return the most recent
            // ensemble in the window, matching `forecasts/latest` shape.
            let last = ensembles.last().expect("checked non-empty above");
            rendered_response(last, other)
        }
    }
}

/// `/forecasts/model/<date>/<product>`: the raw per-hour forecast list.
pub async fn forecast_model_by_date(
    AxumState(state): AxumState<AppState>,
    Path((date, product)): Path<(String, String)>,
) -> Result<Json<Vec<ProbabilisticForecast>>, StatusCode> {
    let product = parse_product(&product)?;
    let date = parse_date(&date)?;
    let start = day_start_utc(date);
    let ensemble = state.store.get(product, start).map_err(store_error_to_status)?;
    Ok(Json(ensemble.forecasts))
}

/// `/forecasts/model/latest/<product>`: the raw per-hour forecast list for
/// the most recent ensemble.
pub async fn forecast_model_latest(
    AxumState(state): AxumState<AppState>,
    Path(product): Path<String>,
) -> Result<Json<Vec<ProbabilisticForecast>>, StatusCode> {
    let product = parse_product(&product)?;
    let ensemble = state.store.get_latest(product).map_err(store_error_to_status)?;
    Ok(Json(ensemble.forecasts))
}
