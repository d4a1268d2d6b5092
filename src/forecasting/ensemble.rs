//! `ProbabilisticForecast`, `ForecastEnsemble`, and the diagnostic
//! aggregation/comparison helpers supplemented from the original
//! implementation (spec §4.D.4).

use super::statistics::{compute_statistics, ForecastStatistics};
use crate::time::{Product, FORECAST_HORIZON_HOURS, PROBABILISTIC_SAMPLE_COUNT};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum EnsembleError {
    #[error("sample count {0} does not match required count {1}")]
    WrongSampleCount(usize, usize),
    #[error("sample at index {0} is not finite")]
    NonFiniteSample(usize),
    #[error("ancillary product sample at index {0} is negative: {1}")]
    NegativeAncillarySample(usize, f64),
    #[error("ensemble expects {0} forecasts, got {1}")]
    WrongForecastCount(usize, usize),
    #[error("forecast product {0} does not match ensemble product {1}")]
    ProductMismatch(Product, Product),
    #[error("forecast timestamp {0} falls outside ensemble window [{1}, {2})")]
    TimestampOutOfWindow(DateTime<Utc>, DateTime<Utc>, DateTime<Utc>),
    #[error("forecast timestamps must be the {0} consecutive hours starting at the window start")]
    TimestampsNotConsecutive(i64),
    #[error("cannot compare ensembles of different products: {0} vs {1}")]
    ProductMismatchInComparison(Product, Product),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbabilisticForecast {
    pub timestamp: DateTime<Utc>,
    pub product: Product,
    pub point_forecast: f64,
    pub samples: Vec<f64>,
    pub generation_timestamp: DateTime<Utc>,
    pub is_fallback: bool,
    pub statistics: ForecastStatistics,
}

impl ProbabilisticForecast {
    pub fn new(
        timestamp: DateTime<Utc>,
        product: Product,
        point_forecast: f64,
        samples: Vec<f64>,
        generation_timestamp: DateTime<Utc>,
        is_fallback: bool,
    ) -> Result<Self, EnsembleError> {
        if samples.len() != PROBABILISTIC_SAMPLE_COUNT {
            return Err(EnsembleError::WrongSampleCount(
                samples.len(),
                PROBABILISTIC_SAMPLE_COUNT,
            ));
        }
        for (i, s) in samples.iter().enumerate() {
            if !s.is_finite() {
                return Err(EnsembleError::NonFiniteSample(i));
            }
            if product.is_ancillary() && *s < 0.0 {
                return Err(EnsembleError::NegativeAncillarySample(i, *s));
            }
        }

        let statistics = compute_statistics(&samples);
        Ok(Self {
            timestamp,
            product,
            point_forecast,
            samples,
            generation_timestamp,
            is_fallback,
            statistics,
        })
    }

    /// Re-stamps this forecast onto a new timestamp/generation time and
    /// marks it as a fallback substitution, used by the Fallback Engine.
    pub fn restamped(&self, new_timestamp: DateTime<Utc>, generation_timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: new_timestamp,
            generation_timestamp,
            is_fallback: true,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastEnsemble {
    pub product: Product,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub forecasts: Vec<ProbabilisticForecast>,
}

impl ForecastEnsemble {
    /// Validates and constructs an ensemble. The window is half-open
    /// `[start_time, start_time + 72h)`, matching the spec's authoritative
    /// testable property over the original source's inclusive-bound check
    /// (see DESIGN.md).
    pub fn new(
        product: Product,
        start_time: DateTime<Utc>,
        mut forecasts: Vec<ProbabilisticForecast>,
    ) -> Result<Self, EnsembleError> {
        let end_time = start_time + Duration::hours(FORECAST_HORIZON_HOURS);
        let expected = FORECAST_HORIZON_HOURS as usize;
        if forecasts.len() != expected {
            return Err(EnsembleError::WrongForecastCount(expected, forecasts.len()));
        }

        forecasts.sort_by_key(|f| f.timestamp);
        for (i, forecast) in forecasts.iter().enumerate() {
            if forecast.product != product {
                return Err(EnsembleError::ProductMismatch(forecast.product, product));
            }
            if forecast.timestamp < start_time || forecast.timestamp >= end_time {
                return Err(EnsembleError::TimestampOutOfWindow(
                    forecast.timestamp,
                    start_time,
                    end_time,
                ));
            }
            let expected_ts = start_time + Duration::hours(i as i64);
            if forecast.timestamp != expected_ts {
                return Err(EnsembleError::TimestampsNotConsecutive(FORECAST_HORIZON_HOURS));
            }
        }

        Ok(Self {
            product,
            start_time,
            end_time,
            forecasts,
        })
    }

    /// True iff any child forecast is a fallback (spec §9 open question,
    /// resolved to `any` rather than `all`).
    pub fn is_fallback(&self) -> bool {
        self.forecasts.iter().any(|f| f.is_fallback)
    }

    pub fn generation_timestamp(&self) -> DateTime<Utc> {
        self.forecasts
            .iter()
            .map(|f| f.generation_timestamp)
            .max()
            .unwrap_or(self.start_time)
    }

    /// Shifts every child forecast so the ensemble's start becomes
    /// `new_start`, preserving point/sample values — used by the Fallback
    /// Engine to re-stamp a prior artifact onto today's window.
    pub fn restamped_to(
        &self,
        new_start: DateTime<Utc>,
        generation_timestamp: DateTime<Utc>,
    ) -> Result<Self, EnsembleError> {
        let forecasts = self
            .forecasts
            .iter()
            .enumerate()
            .map(|(i, f)| f.restamped(new_start + Duration::hours(i as i64), generation_timestamp))
            .collect();
        Self::new(self.product, new_start, forecasts)
    }
}

/// A derived, read-only view pairing two ensembles of the same product,
/// reporting per-hour and aggregate absolute differences (spec §4.D.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastComparison {
    pub product: Product,
    pub per_hour_abs_diff: Vec<(DateTime<Utc>, f64)>,
    pub mean_abs_diff: f64,
    pub max_abs_diff: f64,
}

pub fn compare(a: &ForecastEnsemble, b: &ForecastEnsemble) -> Result<ForecastComparison, EnsembleError> {
    if a.product != b.product {
        return Err(EnsembleError::ProductMismatchInComparison(a.product, b.product));
    }
    let mut per_hour = Vec::new();
    for fa in &a.forecasts {
        if let Some(fb) = b.forecasts.iter().find(|fb| fb.timestamp == fa.timestamp) {
            per_hour.push((fa.timestamp, (fa.point_forecast - fb.point_forecast).abs()));
        }
    }
    let mean_abs_diff = if per_hour.is_empty() {
        0.0
    } else {
        per_hour.iter().map(|(_, d)| *d).sum::<f64>() / per_hour.len() as f64
    };
    let max_abs_diff = per_hour.iter().map(|(_, d)| *d).fold(0.0_f64, f64::max);

    Ok(ForecastComparison {
        product: a.product,
        per_hour_abs_diff: per_hour,
        mean_abs_diff,
        max_abs_diff,
    })
}

/// Per-timestamp summary across several ensembles of the same product,
/// used by operational diagnostic tooling rather than the pipeline's hot
/// path (spec §4.D.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedForecastRow {
    pub timestamp: DateTime<Utc>,
    pub mean_point_forecast: f64,
    pub median_point_forecast: f64,
    pub min_point_forecast: f64,
    pub max_point_forecast: f64,
}

pub fn aggregate_forecasts(ensembles: &[ForecastEnsemble]) -> Vec<AggregatedForecastRow> {
    use std::collections::BTreeMap;
    let mut by_ts: BTreeMap<DateTime<Utc>, Vec<f64>> = BTreeMap::new();
    for ensemble in ensembles {
        for forecast in &ensemble.forecasts {
            by_ts
                .entry(forecast.timestamp)
                .or_default()
                .push(forecast.point_forecast);
        }
    }
    by_ts
        .into_iter()
        .map(|(timestamp, mut values)| {
            values.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let median = if values.len() % 2 == 0 {
                let mid = values.len() / 2;
                (values[mid - 1] + values[mid]) / 2.0
            } else {
                values[values.len() / 2]
            };
            AggregatedForecastRow {
                timestamp,
                mean_point_forecast: mean,
                median_point_forecast: median,
                min_point_forecast: *values.first().unwrap(),
                max_point_forecast: *values.last().unwrap(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forecast_at(hour_offset: i64, product: Product, fallback: bool) -> ProbabilisticForecast {
        let base = DateTime::parse_from_rfc3339("2023-06-01T07:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let ts = base + Duration::hours(hour_offset);
        ProbabilisticForecast::new(ts, product, 50.0, vec![50.0; PROBABILISTIC_SAMPLE_COUNT], ts, fallback)
            .unwrap()
    }

    #[test]
    fn rejects_wrong_sample_count() {
        let base = Utc::now();
        let err = ProbabilisticForecast::new(base, Product::Dalmp, 1.0, vec![1.0; 5], base, false);
        assert!(matches!(err, Err(EnsembleError::WrongSampleCount(5, 100))));
    }

    #[test]
    fn rejects_negative_ancillary_sample() {
        let base = Utc::now();
        let mut samples = vec![1.0; PROBABILISTIC_SAMPLE_COUNT];
        samples[3] = -1.0;
        let err = ProbabilisticForecast::new(base, Product::RegUp, 1.0, samples, base, false);
        assert!(matches!(err, Err(EnsembleError::NegativeAncillarySample(3, _))));
    }

    #[test]
    fn ensemble_requires_exactly_72_consecutive_hours() {
        let forecasts: Vec<_> = (0..72).map(|h| forecast_at(h, Product::Dalmp, false)).collect();
        let start = forecasts[0].timestamp;
        let ensemble = ForecastEnsemble::new(Product::Dalmp, start, forecasts).unwrap();
        assert_eq!(ensemble.forecasts.len(), 72);
        assert!(!ensemble.is_fallback());
    }

    #[test]
    fn ensemble_is_fallback_iff_any_child_is() {
        let mut forecasts: Vec<_> = (0..72).map(|h| forecast_at(h, Product::Dalmp, false)).collect();
        forecasts[10] = forecast_at(10, Product::Dalmp, true);
        let start = forecasts[0].timestamp;
        let ensemble = ForecastEnsemble::new(Product::Dalmp, start, forecasts).unwrap();
        assert!(ensemble.is_fallback());
    }

    #[test]
    fn ensemble_rejects_wrong_count() {
        let forecasts: Vec<_> = (0..10).map(|h| forecast_at(h, Product::Dalmp, false)).collect();
        let start = forecasts[0].timestamp;
        let err = ForecastEnsemble::new(Product::Dalmp, start, forecasts);
        assert!(matches!(err, Err(EnsembleError::WrongForecastCount(72, 10))));
    }

    #[test]
    fn compare_rejects_mismatched_products() {
        let f1: Vec<_> = (0..72).map(|h| forecast_at(h, Product::Dalmp, false)).collect();
        let f2: Vec<_> = (0..72).map(|h| forecast_at(h, Product::Rtlmp, false)).collect();
        let e1 = ForecastEnsemble::new(Product::Dalmp, f1[0].timestamp, f1).unwrap();
        let e2 = ForecastEnsemble::new(Product::Rtlmp, f2[0].timestamp, f2).unwrap();
        assert!(compare(&e1, &e2).is_err());
    }
}
