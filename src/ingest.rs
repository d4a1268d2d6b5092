//! Data ingestion (spec §4.A / §6.1): fetches load forecasts, historical
//! prices, and generation forecasts from external data sources behind a
//! common `DataSourceClient` trait, with exponential-backoff retry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const RETRY_ATTEMPTS: u32 = 3;
pub const RETRY_BASE: Duration = Duration::from_secs(1);
pub const RETRY_FACTOR: f64 = 2.0;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("data source returned malformed payload: {0}")]
    MalformedPayload(String),
    #[error("data source unavailable after {0} attempts")]
    Exhausted(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSeriesPoint {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub values: HashMap<String, f64>,
}

/// A time series payload from one data source, keyed by timestamp.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSeries {
    pub points: Vec<RawSeriesPoint>,
}

/// Abstraction over the three ingest feeds (load forecast, historical
/// prices, generation forecast) so the pipeline can be driven by either
/// a live HTTP source or an in-memory fixture in tests.
#[async_trait]
pub trait DataSourceClient: Send + Sync {
    async fn fetch_load_forecast(&self, target_date: chrono::NaiveDate) -> Result<RawSeries, IngestError>;
    async fn fetch_historical_prices(&self, target_date: chrono::NaiveDate) -> Result<RawSeries, IngestError>;
    async fn fetch_generation_forecast(&self, target_date: chrono::NaiveDate) -> Result<RawSeries, IngestError>;
}

/// Live HTTP-backed data source client, retrying each call with
/// exponential backoff (spec §6.1: 3 attempts, base 1s, factor 2).
pub struct HttpDataSourceClient {
    client: reqwest::Client,
    load_forecast_url: String,
    historical_prices_url: String,
    generation_forecast_url: String,
    api_key: Option<String>,
}

impl HttpDataSourceClient {
    pub fn new(
        load_forecast_url: String,
        historical_prices_url: String,
        generation_forecast_url: String,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            load_forecast_url,
            historical_prices_url,
            generation_forecast_url,
            api_key,
        }
    }

    async fn fetch_with_retry(&self, url: &str, target_date: chrono::NaiveDate) -> Result<RawSeries, IngestError> {
        let mut delay = RETRY_BASE;
        let mut last_err = None;
        for attempt in 1..=RETRY_ATTEMPTS {
            match self.fetch_once(url, target_date).await {
                Ok(series) => return Ok(series),
                Err(err) => {
                    warn!(url, attempt, error = %err, "ingest attempt failed");
                    last_err = Some(err);
                    if attempt < RETRY_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay = delay.mul_f64(RETRY_FACTOR);
                    }
                }
            }
        }
        debug!(url, "ingest exhausted all retry attempts");
        Err(last_err.unwrap_or(IngestError::Exhausted(RETRY_ATTEMPTS)))
    }

    async fn fetch_once(&self, url: &str, target_date: chrono::NaiveDate) -> Result<RawSeries, IngestError> {
        let mut request = self.client.get(url).query(&[("date", target_date.to_string())]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?.error_for_status()?;
        let series: RawSeries = response.json().await?;
        Ok(series)
    }
}

#[async_trait]
impl DataSourceClient for HttpDataSourceClient {
    async fn fetch_load_forecast(&self, target_date: chrono::NaiveDate) -> Result<RawSeries, IngestError> {
        self.fetch_with_retry(&self.load_forecast_url, target_date).await
    }

    async fn fetch_historical_prices(&self, target_date: chrono::NaiveDate) -> Result<RawSeries, IngestError> {
        self.fetch_with_retry(&self.historical_prices_url, target_date).await
    }

    async fn fetch_generation_forecast(&self, target_date: chrono::NaiveDate) -> Result<RawSeries, IngestError> {
        self.fetch_with_retry(&self.generation_forecast_url, target_date).await
    }
}

/// In-memory fixture client for tests and local runs without live data
/// sources; always succeeds with whatever series it was constructed with.
#[derive(Default)]
pub struct FixtureDataSourceClient {
    pub load_forecast: RawSeries,
    pub historical_prices: RawSeries,
    pub generation_forecast: RawSeries,
}

#[async_trait]
impl DataSourceClient for FixtureDataSourceClient {
    async fn fetch_load_forecast(&self, _target_date: chrono::NaiveDate) -> Result<RawSeries, IngestError> {
        Ok(self.load_forecast.clone())
    }

    async fn fetch_historical_prices(&self, _target_date: chrono::NaiveDate) -> Result<RawSeries, IngestError> {
        Ok(self.historical_prices.clone())
    }

    async fn fetch_generation_forecast(&self, _target_date: chrono::NaiveDate) -> Result<RawSeries, IngestError> {
        Ok(self.generation_forecast.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixture_client_returns_configured_series() {
        let mut load_forecast = RawSeries::default();
        load_forecast.points.push(RawSeriesPoint {
            timestamp: chrono::Utc::now(),
            values: HashMap::from([("load_mw".to_string(), 1000.0)]),
        });
        let client = FixtureDataSourceClient {
            load_forecast,
            ..Default::default()
        };
        let date = chrono::Utc::now().date_naive();
        let series = client.fetch_load_forecast(date).await.unwrap();
        assert_eq!(series.points.len(), 1);
    }
}
