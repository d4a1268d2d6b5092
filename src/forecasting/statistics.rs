//! Derived statistics cached on a `ProbabilisticForecast` at construction.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastStatistics {
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub range: f64,
    pub skew: f64,
    pub kurtosis: f64,
}

pub fn compute_statistics(samples: &[f64]) -> ForecastStatistics {
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = if sorted.len() % 2 == 0 {
        let mid = sorted.len() / 2;
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[sorted.len() / 2]
    };

    let min = sorted.first().copied().unwrap_or(f64::NAN);
    let max = sorted.last().copied().unwrap_or(f64::NAN);

    let skew = if samples.len() > 2 && std_dev > 0.0 {
        samples
            .iter()
            .map(|x| ((x - mean) / std_dev).powi(3))
            .sum::<f64>()
            / n
    } else {
        0.0
    };

    let kurtosis = if samples.len() > 3 && std_dev > 0.0 {
        samples
            .iter()
            .map(|x| ((x - mean) / std_dev).powi(4))
            .sum::<f64>()
            / n
            - 3.0
    } else {
        0.0
    };

    ForecastStatistics {
        mean,
        median,
        std_dev,
        min,
        max,
        range: max - min,
        skew,
        kurtosis,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_samples_have_zero_spread() {
        let samples = vec![10.0; 100];
        let stats = compute_statistics(&samples);
        assert_eq!(stats.mean, 10.0);
        assert_eq!(stats.std_dev, 0.0);
        assert_eq!(stats.skew, 0.0);
        assert_eq!(stats.kurtosis, 0.0);
    }

    #[test]
    fn short_samples_default_higher_moments_to_zero() {
        let stats = compute_statistics(&[1.0, 2.0]);
        assert_eq!(stats.skew, 0.0);
        let stats3 = compute_statistics(&[1.0, 2.0, 3.0]);
        assert_eq!(stats3.kurtosis, 0.0);
    }

    #[test]
    fn median_of_even_length_averages_middle_pair() {
        let stats = compute_statistics(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(stats.median, 2.5);
    }
}
