//! Probability calibration for the position classifier.
//!
//! Calibration adjusts softmax probabilities to better match observed
//! finishing frequencies on held-out races.

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

pub const MIN_TEMPERATURE: f64 = 0.1;
pub const MAX_TEMPERATURE: f64 = 10.0;

/// Temperature scaling calibration.
///
/// Divides class logits by a learned temperature before the softmax:
/// calibrated = softmax(logits / temperature)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureScaling {
    pub temperature: f64,
}

impl Default for TemperatureScaling {
    fn default() -> Self {
        Self { temperature: 1.0 }
    }
}

impl TemperatureScaling {
    pub fn new(temperature: f64) -> Self {
        Self {
            temperature: temperature.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE),
        }
    }

    /// Whether the temperature is one `new` or `fit` could have produced.
    pub fn is_valid(&self) -> bool {
        (MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&self.temperature)
    }

    /// Fit the temperature minimizing negative log-likelihood on
    /// validation logits.
    ///
    /// Coarse grid over [0.1, 10] followed by a fine pass around the best
    /// coarse point. Empty input leaves the identity temperature.
    pub fn fit(logits: &Array2<f64>, labels: &[usize]) -> Self {
        if logits.nrows() == 0 || logits.nrows() != labels.len() {
            return Self::default();
        }

        let mut best = Self::default();
        let mut best_nll = best.nll(logits, labels);

        let coarse = (1..=100).map(|i| i as f64 * 0.1);
        for t in coarse {
            let candidate = Self::new(t);
            let nll = candidate.nll(logits, labels);
            if nll < best_nll {
                best_nll = nll;
                best = candidate;
            }
        }

        let center = best.temperature;
        for i in -10..=10 {
            let candidate = Self::new(center + i as f64 * 0.01);
            let nll = candidate.nll(logits, labels);
            if nll < best_nll {
                best_nll = nll;
                best = candidate;
            }
        }

        best
    }

    /// Calibrated class probabilities for one row of logits.
    pub fn probabilities(&self, logits: ArrayView1<f64>) -> Array1<f64> {
        softmax(&logits.mapv(|z| z / self.temperature))
    }

    /// Mean negative log-likelihood of the true labels.
    pub fn nll(&self, logits: &Array2<f64>, labels: &[usize]) -> f64 {
        if logits.nrows() == 0 {
            return 0.0;
        }
        let eps = 1e-12;
        let total: f64 = logits
            .rows()
            .into_iter()
            .zip(labels)
            .map(|(row, &label)| {
                let probs = self.probabilities(row);
                -(probs[label].max(eps)).ln()
            })
            .sum();
        total / logits.nrows() as f64
    }
}

/// Numerically stable softmax.
pub fn softmax(logits: &Array1<f64>) -> Array1<f64> {
    let max = logits.fold(f64::NEG_INFINITY, |m, &z| m.max(z));
    let exp = logits.mapv(|z| (z - max).exp());
    let sum = exp.sum();
    exp / sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&array![1.0, 2.0, 3.0]);
        assert!((probs.sum() - 1.0).abs() < 1e-12);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_softmax_handles_large_logits() {
        let probs = softmax(&array![1000.0, 1000.0]);
        assert!((probs[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_identity_temperature() {
        let ts = TemperatureScaling::default();
        let logits = array![0.5, 1.5];
        let calibrated = ts.probabilities(logits.view());
        let raw = softmax(&logits);
        assert!((calibrated[0] - raw[0]).abs() < 1e-12);
    }

    #[test]
    fn test_high_temperature_flattens() {
        let ts = TemperatureScaling::new(3.0);
        let logits = array![2.0, 0.0];
        let calibrated = ts.probabilities(logits.view());
        assert!(calibrated[0] < softmax(&logits)[0]);
        assert!(calibrated[0] > 0.5);
    }

    #[test]
    fn test_new_clamps_range() {
        assert!((TemperatureScaling::new(0.0).temperature - MIN_TEMPERATURE).abs() < 1e-12);
        assert!((TemperatureScaling::new(50.0).temperature - MAX_TEMPERATURE).abs() < 1e-12);
    }

    #[test]
    fn test_fit_softens_overconfident_logits() {
        // Confident logits that are right only half the time
        let logits = array![[4.0, 0.0], [4.0, 0.0], [4.0, 0.0], [4.0, 0.0]];
        let labels = [0, 1, 0, 1];
        let fitted = TemperatureScaling::fit(&logits, &labels);

        assert!(fitted.temperature > 1.0);
        assert!(fitted.nll(&logits, &labels) < TemperatureScaling::default().nll(&logits, &labels));
    }

    #[test]
    fn test_fit_empty_is_identity() {
        let logits = Array2::<f64>::zeros((0, 3));
        assert_eq!(TemperatureScaling::fit(&logits, &[]), TemperatureScaling::default());
    }

    #[test]
    fn test_json_round_trip() {
        let json = r#"{"temperature": 1.5}"#;
        let ts: TemperatureScaling = serde_json::from_str(json).unwrap();
        assert!((ts.temperature - 1.5).abs() < 0.01);
    }
}
