//! Uncertainty derivation registry (spec §4.D.1 step 5): a closed set of
//! named methods, unknown names degrading to the default with a warning
//! rather than a dynamic dispatch failure.

use crate::time::Product;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UncertaintyMethod {
    HistoricalResiduals,
    PercentageOfForecast,
    FixedValue,
    Adaptive,
}

impl UncertaintyMethod {
    pub const DEFAULT: Self = UncertaintyMethod::HistoricalResiduals;

    /// Parses a method name, returning the default plus a warning string
    /// when the name is not recognized instead of failing the forecast.
    pub fn parse(name: &str) -> (Self, Option<String>) {
        match name {
            "historical_residuals" => (UncertaintyMethod::HistoricalResiduals, None),
            "percentage_of_forecast" => (UncertaintyMethod::PercentageOfForecast, None),
            "fixed_value" => (UncertaintyMethod::FixedValue, None),
            "adaptive" => (UncertaintyMethod::Adaptive, None),
            other => (
                Self::DEFAULT,
                Some(format!(
                    "unknown uncertainty method '{other}', falling back to historical_residuals"
                )),
            ),
        }
    }
}

/// Historical error series for one (product, hour) key, keyed upstream by
/// `"<product>_<hour>"` as in the original implementation.
#[derive(Debug, Clone, Default)]
pub struct HistoricalSeries {
    /// Raw forecast - actual residuals, chronological order.
    pub residuals: Vec<f64>,
    /// (forecast - actual) / actual, chronological order.
    pub percent_errors: Vec<f64>,
    /// Absolute errors, chronological order, most recent last.
    pub recent_absolute_errors: Vec<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct UncertaintyParams {
    pub mean: f64,
    pub std_dev: f64,
}

fn mean_of(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn mean_of_abs(xs: &[f64]) -> f64 {
    xs.iter().map(|x| x.abs()).sum::<f64>() / xs.len() as f64
}

fn population_std(xs: &[f64]) -> f64 {
    let m = mean_of(xs);
    (xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64).sqrt()
}

/// Derives the mean/std_dev of the forecast distribution for one hour,
/// applying the product adjustment factor to `std_dev` as the final step.
/// Returns any warnings raised along the way (e.g. unknown method, adaptive
/// falling back for lack of data).
pub fn derive_uncertainty(
    method: UncertaintyMethod,
    product: Product,
    point: f64,
    history: Option<&HistoricalSeries>,
) -> (UncertaintyParams, Vec<String>) {
    let mut warnings = Vec::new();
    let (mean, raw_std_dev) = match method {
        UncertaintyMethod::HistoricalResiduals => historical_residuals(point, history),
        UncertaintyMethod::PercentageOfForecast => percentage_of_forecast(point, history),
        UncertaintyMethod::FixedValue => (point, product.fixed_uncertainty_stddev()),
        UncertaintyMethod::Adaptive => match adaptive(point, history) {
            Some(result) => result,
            None => {
                warnings.push(
                    "no recent error history recorded for adaptive method, \
                     falling back to historical_residuals"
                        .to_string(),
                );
                historical_residuals(point, history)
            }
        },
    };

    let std_dev = raw_std_dev * product.uncertainty_adjustment_factor();
    (UncertaintyParams { mean, std_dev }, warnings)
}

fn historical_residuals(point: f64, history: Option<&HistoricalSeries>) -> (f64, f64) {
    match history.filter(|h| !h.residuals.is_empty()) {
        Some(h) => {
            let mean = point + mean_of(&h.residuals);
            let std_dev = population_std(&h.residuals).max(0.05 * point.abs());
            (mean, std_dev)
        }
        None => (point, 0.10 * point.abs()),
    }
}

fn percentage_of_forecast(point: f64, history: Option<&HistoricalSeries>) -> (f64, f64) {
    match history.filter(|h| !h.percent_errors.is_empty()) {
        Some(h) => {
            let mean_pct_err = mean_of(&h.percent_errors);
            let std_pct_err = population_std(&h.percent_errors);
            let mean = point * (1.0 + mean_pct_err);
            let std_dev = point.abs() * std_pct_err.max(0.05);
            (mean, std_dev)
        }
        None => (point * (1.0 + 0.0), point.abs() * 0.10),
    }
}

/// Derives mean/std directly from recent absolute errors (not the residual
/// series), matching the original's "use recent errors unless entirely
/// absent" contract. A trend multiplier on top needs at least 3 points to
/// compare a recent window against an older one; with fewer, the trend is
/// flat and only the recent-error mean/std apply.
fn adaptive(point: f64, history: Option<&HistoricalSeries>) -> Option<(f64, f64)> {
    let history = history?;
    let errors = &history.recent_absolute_errors;
    if errors.is_empty() {
        return None;
    }

    let trend = if errors.len() < 3 {
        0.0
    } else {
        let recent_window = &errors[errors.len() - 3..];
        let older_window = if errors.len() >= 6 {
            &errors[errors.len() - 6..errors.len() - 3]
        } else {
            &errors[..errors.len() - 3]
        };
        let recent_mean = mean_of_abs(recent_window);
        let older_mean = mean_of_abs(older_window);
        (recent_mean - older_mean) / older_mean.max(1.0)
    };

    let mean = point + mean_of(errors);
    let std_dev = population_std(errors).max(0.05 * point.abs());
    let trend_adjustment = 1.0 + trend.max(0.0);

    Some((mean, std_dev * trend_adjustment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_method_falls_back_with_warning() {
        let (method, warning) = UncertaintyMethod::parse("made_up_method");
        assert_eq!(method, UncertaintyMethod::HistoricalResiduals);
        assert!(warning.is_some());
    }

    #[test]
    fn historical_residuals_no_history_uses_ten_percent() {
        let (params, warnings) =
            derive_uncertainty(UncertaintyMethod::HistoricalResiduals, Product::Dalmp, 50.0, None);
        assert!(warnings.is_empty());
        assert_eq!(params.mean, 50.0);
        assert_eq!(params.std_dev, 5.0); // 0.10 * 50 * adjustment(1.0)
    }

    #[test]
    fn fixed_value_applies_product_constant_and_adjustment() {
        let (params, _) =
            derive_uncertainty(UncertaintyMethod::FixedValue, Product::Rtlmp, 40.0, None);
        assert_eq!(params.std_dev, 8.0 * 1.2);
    }

    #[test]
    fn adaptive_never_shrinks_relative_to_historical_residuals() {
        let history = HistoricalSeries {
            residuals: vec![1.0, -1.0, 2.0],
            percent_errors: vec![],
            recent_absolute_errors: vec![1.0, 1.0, 1.0, 1.0, 1.0, 5.0],
        };
        let (adaptive_params, warnings) =
            derive_uncertainty(UncertaintyMethod::Adaptive, Product::Dalmp, 50.0, Some(&history));
        assert!(warnings.is_empty());
        let (baseline, _) =
            derive_uncertainty(UncertaintyMethod::HistoricalResiduals, Product::Dalmp, 50.0, Some(&history));
        assert!(adaptive_params.std_dev >= baseline.std_dev);
    }

    #[test]
    fn adaptive_uses_recent_errors_directly_with_few_samples() {
        let history = HistoricalSeries {
            residuals: vec![100.0, 100.0, 100.0],
            percent_errors: vec![],
            recent_absolute_errors: vec![1.0, 2.0],
        };
        let (params, warnings) =
            derive_uncertainty(UncertaintyMethod::Adaptive, Product::Dalmp, 50.0, Some(&history));
        assert!(warnings.is_empty());
        assert_eq!(params.mean, 51.5);
        assert_eq!(params.std_dev, 2.5); // clamped to 0.05 * |point|, no trend (< 3 points)
    }

    #[test]
    fn adaptive_falls_back_when_no_recent_error_history_recorded() {
        let history = HistoricalSeries {
            residuals: vec![1.0],
            percent_errors: vec![],
            recent_absolute_errors: vec![],
        };
        let (_, warnings) =
            derive_uncertainty(UncertaintyMethod::Adaptive, Product::Dalmp, 50.0, Some(&history));
        assert_eq!(warnings.len(), 1);
    }
}
