//! Conversion between `ForecastEnsemble` and the on-disk columnar row
//! format (spec §6.2).

use crate::forecasting::{ForecastEnsemble, ProbabilisticForecast};
use crate::time::{sample_column_names, Product, PROBABILISTIC_SAMPLE_COUNT};
use chrono::{DateTime, TimeZone, Utc};
use polars::prelude::*;
use thiserror::Error;

pub const SCHEMA_VERSION: &str = "1.0";

/// Timestamp columns are persisted as tz-aware `Datetime` columns (spec
/// §6.2), not strings, so downstream parquet consumers get a typed column.
const ARTIFACT_TZ: &str = "America/Chicago";

fn datetime_series(name: &str, values: &[DateTime<Utc>]) -> Series {
    let millis: Vec<i64> = values.iter().map(|ts| ts.timestamp_millis()).collect();
    Series::new(name, millis)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, Some(ARTIFACT_TZ.to_string())))
        .expect("i64 millis always casts to Datetime")
}

fn read_datetime_column(
    df: &DataFrame,
    name: &str,
) -> Result<Vec<DateTime<Utc>>, SchemaValidationError> {
    let ca = df.column(name)?.datetime()?;
    let time_unit = ca.time_unit();
    let mut out = Vec::with_capacity(ca.len());
    for raw in ca.into_iter() {
        let raw = raw.ok_or_else(|| SchemaValidationError::BadTimestamp(format!("null in {name}")))?;
        let millis = match time_unit {
            TimeUnit::Milliseconds => raw,
            TimeUnit::Microseconds => raw / 1_000,
            TimeUnit::Nanoseconds => raw / 1_000_000,
        };
        let dt = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| SchemaValidationError::BadTimestamp(format!("{name}={millis}")))?;
        out.push(dt);
    }
    Ok(out)
}

#[derive(Debug, Error)]
pub enum SchemaValidationError {
    #[error("missing required column: {0}")]
    MissingColumn(String),
    #[error("column {0} has wrong type: {1}")]
    WrongType(String, String),
    #[error("sample column count {0} does not match expected {1}")]
    WrongSampleColumnCount(usize, usize),
    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),
    #[error("malformed timestamp: {0}")]
    BadTimestamp(String),
    #[error("unrecognized product: {0}")]
    BadProduct(String),
    #[error("ensemble assembly error: {0}")]
    Ensemble(#[from] crate::forecasting::EnsembleError),
}

/// Builds the artifact DataFrame for one ensemble, one row per forecast.
pub fn ensemble_to_dataframe(ensemble: &ForecastEnsemble) -> Result<DataFrame, SchemaValidationError> {
    let n = ensemble.forecasts.len();
    let mut timestamp = Vec::with_capacity(n);
    let mut product = Vec::with_capacity(n);
    let mut point_forecast = Vec::with_capacity(n);
    let mut generation_timestamp = Vec::with_capacity(n);
    let mut is_fallback = Vec::with_capacity(n);
    let mut sample_cols: Vec<Vec<f64>> = vec![Vec::with_capacity(n); PROBABILISTIC_SAMPLE_COUNT];

    let ensemble_generation_timestamp = ensemble.generation_timestamp();
    let ensemble_is_fallback = ensemble.is_fallback();

    for forecast in &ensemble.forecasts {
        timestamp.push(forecast.timestamp);
        product.push(forecast.product.as_str().to_string());
        point_forecast.push(forecast.point_forecast);
        generation_timestamp.push(forecast.generation_timestamp);
        is_fallback.push(forecast.is_fallback);
        for (i, col) in sample_cols.iter_mut().enumerate() {
            col.push(forecast.samples[i]);
        }
    }

    let mut columns = vec![
        datetime_series("timestamp", &timestamp),
        Series::new("product", product),
        Series::new("point_forecast", point_forecast),
        datetime_series("generation_timestamp", &generation_timestamp),
        Series::new("is_fallback", is_fallback),
    ];
    for (name, col) in sample_column_names(PROBABILISTIC_SAMPLE_COUNT).into_iter().zip(sample_cols) {
        columns.push(Series::new(&name, col));
    }
    columns.push(datetime_series(
        "ensemble_generation_timestamp",
        &vec![ensemble_generation_timestamp; n],
    ));
    columns.push(Series::new("ensemble_is_fallback", vec![ensemble_is_fallback; n]));
    columns.push(Series::new("schema_version", vec![SCHEMA_VERSION; n]));

    Ok(DataFrame::new(columns)?)
}

/// Parses an artifact DataFrame back into a `ForecastEnsemble`. Validates
/// that every required column is present with the expected sample count
/// before constructing any forecast.
pub fn dataframe_to_ensemble(df: &DataFrame) -> Result<ForecastEnsemble, SchemaValidationError> {
    let required = ["timestamp", "product", "point_forecast", "generation_timestamp", "is_fallback"];
    for col in required {
        if df.column(col).is_err() {
            return Err(SchemaValidationError::MissingColumn(col.to_string()));
        }
    }

    let sample_names = sample_column_names(PROBABILISTIC_SAMPLE_COUNT);
    let found_samples = sample_names.iter().filter(|n| df.column(n).is_ok()).count();
    if found_samples != PROBABILISTIC_SAMPLE_COUNT {
        return Err(SchemaValidationError::WrongSampleColumnCount(
            found_samples,
            PROBABILISTIC_SAMPLE_COUNT,
        ));
    }

    let timestamp = read_datetime_column(df, "timestamp")?;
    let product = df.column("product")?.utf8()?;
    let point_forecast = df.column("point_forecast")?.f64()?;
    let generation_timestamp = read_datetime_column(df, "generation_timestamp")?;
    let is_fallback = df.column("is_fallback")?.bool()?;

    let sample_series: Vec<_> = sample_names
        .iter()
        .map(|n| df.column(n).unwrap().f64().unwrap())
        .collect();

    let mut forecasts = Vec::with_capacity(df.height());
    let mut ensemble_product: Option<Product> = None;
    for row in 0..df.height() {
        let ts = timestamp[row];
        let product_str = product.get(row).unwrap_or_default();
        let product_enum = Product::parse(product_str)
            .ok_or_else(|| SchemaValidationError::BadProduct(product_str.to_string()))?;
        ensemble_product.get_or_insert(product_enum);

        let point = point_forecast.get(row).unwrap_or(f64::NAN);
        let gen_ts = generation_timestamp[row];
        let fallback = is_fallback.get(row).unwrap_or(false);
        let samples: Vec<f64> = sample_series.iter().map(|s| s.get(row).unwrap_or(f64::NAN)).collect();

        forecasts.push(ProbabilisticForecast::new(ts, product_enum, point, samples, gen_ts, fallback)?);
    }

    let start_time = forecasts
        .iter()
        .map(|f| f.timestamp)
        .min()
        .ok_or_else(|| SchemaValidationError::MissingColumn("timestamp".to_string()))?;
    let product = ensemble_product
        .ok_or_else(|| SchemaValidationError::MissingColumn("product".to_string()))?;

    Ok(ForecastEnsemble::new(product, start_time, forecasts)?)
}
