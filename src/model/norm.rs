//! RMS normalization
//!
//! Root-mean-square normalization over the feature axis, used on gate
//! inputs and on each hyper-connection branch ahead of the convolution.

use ndarray::{Array1, ArrayView1};

use crate::defaults;

/// RMS normalization with a learnable per-feature scale
#[derive(Debug, Clone)]
pub struct RmsNorm {
    /// Per-feature scale, initialized to ones
    weight: Array1<f64>,
    eps: f64,
}

impl RmsNorm {
    /// Create a norm over `dim` features
    pub fn new(dim: usize) -> Self {
        Self {
            weight: Array1::ones(dim),
            eps: defaults::RMS_EPS,
        }
    }

    /// Normalize one feature vector
    pub fn apply(&self, x: ArrayView1<f64>) -> Array1<f64> {
        let n = x.len().max(1) as f64;
        let mean_sq = x.iter().map(|v| v * v).sum::<f64>() / n;
        let scale = 1.0 / (mean_sq + self.eps).sqrt();

        let mut out = Array1::zeros(x.len());
        for (i, &v) in x.iter().enumerate() {
            out[i] = v * scale * self.weight[i];
        }
        out
    }

    /// Number of features
    pub fn dim(&self) -> usize {
        self.weight.len()
    }

    /// Per-feature scale (for loading weights)
    pub fn weight(&self) -> &Array1<f64> {
        &self.weight
    }

    /// Replace the per-feature scale
    pub fn set_weight(&mut self, weight: Array1<f64>) {
        self.weight = weight;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_unit_rms_output() {
        let norm = RmsNorm::new(4);
        let x = array![3.0, -3.0, 3.0, -3.0];
        let out = norm.apply(x.view());

        let rms = (out.iter().map(|v| v * v).sum::<f64>() / 4.0).sqrt();
        assert_relative_eq!(rms, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_preserves_direction() {
        let norm = RmsNorm::new(3);
        let x = array![1.0, -2.0, 0.5];
        let out = norm.apply(x.view());

        for (a, b) in x.iter().zip(out.iter()) {
            assert_eq!(a.signum(), b.signum());
        }
    }

    #[test]
    fn test_zero_input_is_finite() {
        let norm = RmsNorm::new(3);
        let x = array![0.0, 0.0, 0.0];
        let out = norm.apply(x.view());

        for &v in out.iter() {
            assert!(v.is_finite());
            assert_eq!(v, 0.0);
        }
    }
}
