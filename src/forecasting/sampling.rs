//! Sample generation registry (spec §4.D.1 step 6): draws N probabilistic
//! samples from one of a closed set of named distributions.

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleDistribution {
    Normal,
    Lognormal,
    TruncatedNormal,
    SkewedNormal,
}

impl SampleDistribution {
    pub const DEFAULT: Self = SampleDistribution::Normal;

    pub fn parse(name: &str) -> (Self, Option<String>) {
        match name {
            "normal" => (SampleDistribution::Normal, None),
            "lognormal" => (SampleDistribution::Lognormal, None),
            "truncated_normal" => (SampleDistribution::TruncatedNormal, None),
            "skewed_normal" => (SampleDistribution::SkewedNormal, None),
            other => (
                Self::DEFAULT,
                Some(format!(
                    "unknown sample distribution '{other}', falling back to normal"
                )),
            ),
        }
    }
}

fn standard_normal(rng: &mut impl Rng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Draws `n` samples for the given distribution. `skewness` is only
/// consulted for `SkewedNormal` and defaults to 0 when absent.
pub fn generate_samples(
    dist: SampleDistribution,
    mean: f64,
    std_dev: f64,
    n: usize,
    skewness: Option<f64>,
    rng: &mut impl Rng,
) -> Vec<f64> {
    match dist {
        SampleDistribution::Normal => (0..n).map(|_| mean + std_dev * standard_normal(rng)).collect(),
        SampleDistribution::Lognormal => {
            let point = if mean <= 0.0 { 0.01 } else { mean };
            let cv = if point > 0.0 { std_dev / point } else { 0.0 };
            let sigma_log = (1.0 + cv * cv).ln().sqrt();
            let mu_log = point.ln() - sigma_log * sigma_log / 2.0;
            (0..n)
                .map(|_| (mu_log + sigma_log * standard_normal(rng)).exp())
                .collect()
        }
        SampleDistribution::TruncatedNormal => {
            let lower = mean - 3.0 * std_dev;
            let upper = mean + 3.0 * std_dev;
            (0..n)
                .map(|_| {
                    for _ in 0..32 {
                        let x = mean + std_dev * standard_normal(rng);
                        if x >= lower && x <= upper {
                            return x;
                        }
                    }
                    mean.clamp(lower, upper)
                })
                .collect()
        }
        SampleDistribution::SkewedNormal => {
            let alpha = skewness.unwrap_or(0.0);
            let delta = alpha / (1.0 + alpha * alpha).sqrt();
            (0..n)
                .map(|_| {
                    let z0 = standard_normal(rng);
                    let z1 = standard_normal(rng);
                    let skewed = delta * z0.abs() + (1.0 - delta * delta).sqrt() * z1;
                    mean + std_dev * skewed
                })
                .collect()
        }
    }
}

/// Clamps every sample to the given product's non-negativity constraint
/// when applicable; other min/max bounds can be layered on top.
pub fn apply_bounds(samples: &mut [f64], min: Option<f64>, max: Option<f64>) {
    for s in samples.iter_mut() {
        if let Some(min) = min {
            *s = s.max(min);
        }
        if let Some(max) = max {
            *s = s.min(max);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn normal_samples_are_finite_and_roughly_centered() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let samples = generate_samples(SampleDistribution::Normal, 50.0, 5.0, 1000, None, &mut rng);
        assert_eq!(samples.len(), 1000);
        assert!(samples.iter().all(|x| x.is_finite()));
        let mean: f64 = samples.iter().sum::<f64>() / samples.len() as f64;
        assert!((mean - 50.0).abs() < 2.0);
    }

    #[test]
    fn lognormal_samples_are_always_positive() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let samples = generate_samples(SampleDistribution::Lognormal, 30.0, 5.0, 200, None, &mut rng);
        assert!(samples.iter().all(|x| *x > 0.0 && x.is_finite()));
    }

    #[test]
    fn truncated_normal_stays_within_three_sigma() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let samples =
            generate_samples(SampleDistribution::TruncatedNormal, 10.0, 1.0, 500, None, &mut rng);
        assert!(samples.iter().all(|x| *x >= 7.0 - 1e-9 && *x <= 13.0 + 1e-9));
    }

    #[test]
    fn apply_bounds_clamps_ancillary_samples_non_negative() {
        let mut samples = vec![-5.0, 0.0, 10.0];
        apply_bounds(&mut samples, Some(0.0), None);
        assert_eq!(samples, vec![0.0, 0.0, 10.0]);
    }

    #[test]
    fn unknown_distribution_falls_back_to_normal() {
        let (dist, warning) = SampleDistribution::parse("something_else");
        assert_eq!(dist, SampleDistribution::Normal);
        assert!(warning.is_some());
    }
}
