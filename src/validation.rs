//! Validation (spec §4.E): completeness, plausibility, consistency, and
//! schema checks. Validators are pure functions that compose by merging
//! their `ValidationResult`s.

use crate::forecasting::ForecastEnsemble;
use crate::time::{Product, FORECAST_HORIZON_HOURS, PROBABILISTIC_SAMPLE_COUNT};
use chrono::Duration;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValidationCategory {
    Completeness,
    Plausibility,
    Consistency,
    Schema,
    Generic,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: HashMap<ValidationCategory, Vec<String>>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.values().all(|v| v.is_empty())
    }

    pub fn push(&mut self, category: ValidationCategory, message: impl Into<String>) {
        self.errors.entry(category).or_default().push(message.into());
    }

    pub fn merge(mut self, other: ValidationResult) -> Self {
        for (category, messages) in other.errors {
            self.errors.entry(category).or_default().extend(messages);
        }
        self
    }
}

/// Every hour in `[start_time, end_time)` is present exactly once.
pub fn validate_completeness(ensemble: &ForecastEnsemble) -> ValidationResult {
    let mut result = ValidationResult::ok();
    let expected = FORECAST_HORIZON_HOURS as usize;
    if ensemble.forecasts.len() != expected {
        result.push(
            ValidationCategory::Completeness,
            format!(
                "expected {expected} forecasts, found {}",
                ensemble.forecasts.len()
            ),
        );
        return result;
    }
    for (i, forecast) in ensemble.forecasts.iter().enumerate() {
        let expected_ts = ensemble.start_time + Duration::hours(i as i64);
        if forecast.timestamp != expected_ts {
            result.push(
                ValidationCategory::Completeness,
                format!("missing or out-of-order forecast for hour offset {i}"),
            );
        }
    }
    result
}

/// Points/samples finite; ancillary non-negative; energy within a sanity
/// envelope.
pub fn validate_plausibility(ensemble: &ForecastEnsemble, energy_bounds: (f64, f64)) -> ValidationResult {
    let mut result = ValidationResult::ok();
    let (lo, hi) = energy_bounds;
    for forecast in &ensemble.forecasts {
        if !forecast.point_forecast.is_finite() || forecast.samples.iter().any(|s| !s.is_finite()) {
            result.push(
                ValidationCategory::Plausibility,
                format!("non-finite value at {}", forecast.timestamp),
            );
        }
        if forecast.product.is_ancillary() && forecast.point_forecast < 0.0 {
            result.push(
                ValidationCategory::Plausibility,
                format!("negative ancillary point forecast at {}", forecast.timestamp),
            );
        }
        if !forecast.product.is_ancillary() && !(lo..=hi).contains(&forecast.point_forecast) {
            result.push(
                ValidationCategory::Plausibility,
                format!(
                    "energy point forecast {} at {} outside sanity envelope [{lo}, {hi}]",
                    forecast.point_forecast, forecast.timestamp
                ),
            );
        }
    }
    result
}

/// Cross-product relations. `RTLMP` volatility >= `DALMP` volatility is a
/// soft warning (non-blocking); `RegUp`/`RegDown` non-negativity and the
/// ancillary sum are hard checks.
pub fn validate_consistency(
    dalmp: Option<&ForecastEnsemble>,
    rtlmp: Option<&ForecastEnsemble>,
    ancillaries: &[&ForecastEnsemble],
) -> ValidationResult {
    let mut result = ValidationResult::ok();

    if let (Some(dalmp), Some(rtlmp)) = (dalmp, rtlmp) {
        for (d, r) in dalmp.forecasts.iter().zip(rtlmp.forecasts.iter()) {
            if r.statistics.std_dev < d.statistics.std_dev {
                result.push(
                    ValidationCategory::Consistency,
                    format!(
                        "RTLMP volatility {} below DALMP volatility {} at {}",
                        r.statistics.std_dev, d.statistics.std_dev, d.timestamp
                    ),
                );
            }
        }
    }

    for ensemble in ancillaries {
        if matches!(ensemble.product, Product::RegUp | Product::RegDown) {
            for forecast in &ensemble.forecasts {
                if forecast.point_forecast < 0.0 {
                    result.push(
                        ValidationCategory::Consistency,
                        format!("{} negative at {}", ensemble.product, forecast.timestamp),
                    );
                }
            }
        }
    }

    if ancillaries.len() > 1 {
        let len = ancillaries[0].forecasts.len();
        for i in 0..len {
            let sum: f64 = ancillaries
                .iter()
                .filter_map(|e| e.forecasts.get(i))
                .map(|f| f.point_forecast)
                .sum();
            if sum < 0.0 {
                result.push(
                    ValidationCategory::Consistency,
                    format!("ancillary sum negative at offset {i}"),
                );
            }
        }
    }

    result
}

/// Sample-column count and required columns match the declared schema.
pub fn validate_schema(ensemble: &ForecastEnsemble) -> ValidationResult {
    let mut result = ValidationResult::ok();
    for forecast in &ensemble.forecasts {
        if forecast.samples.len() != PROBABILISTIC_SAMPLE_COUNT {
            result.push(
                ValidationCategory::Schema,
                format!(
                    "expected {PROBABILISTIC_SAMPLE_COUNT} sample columns, found {}",
                    forecast.samples.len()
                ),
            );
        }
    }
    result
}

/// Runs all four validators and merges their results.
pub fn validate_ensemble(ensemble: &ForecastEnsemble, energy_bounds: (f64, f64)) -> ValidationResult {
    validate_completeness(ensemble)
        .merge(validate_plausibility(ensemble, energy_bounds))
        .merge(validate_schema(ensemble))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecasting::ProbabilisticForecast;
    use chrono::Utc;

    fn make_ensemble(product: Product, point: f64) -> ForecastEnsemble {
        let base = Utc::now();
        let forecasts = (0..72)
            .map(|h| {
                let ts = base + Duration::hours(h);
                ProbabilisticForecast::new(ts, product, point, vec![point; 100], ts, false).unwrap()
            })
            .collect();
        ForecastEnsemble::new(product, base, forecasts).unwrap()
    }

    #[test]
    fn well_formed_ensemble_passes_all_validators() {
        let ensemble = make_ensemble(Product::Dalmp, 40.0);
        let result = validate_ensemble(&ensemble, (-1000.0, 10000.0));
        assert!(result.is_valid());
    }

    #[test]
    fn energy_outside_envelope_is_flagged() {
        let ensemble = make_ensemble(Product::Dalmp, 50000.0);
        let result = validate_plausibility(&ensemble, (-1000.0, 10000.0));
        assert!(!result.is_valid());
        assert!(result.errors.contains_key(&ValidationCategory::Plausibility));
    }

    #[test]
    fn merge_combines_categories_without_losing_either() {
        let mut a = ValidationResult::ok();
        a.push(ValidationCategory::Schema, "a");
        let mut b = ValidationResult::ok();
        b.push(ValidationCategory::Completeness, "b");
        let merged = a.merge(b);
        assert_eq!(merged.errors.len(), 2);
    }
}
