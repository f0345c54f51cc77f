//! Short causal convolution
//!
//! Depthwise causal 1-D convolution over the hyper-connection branches.
//! Each branch is RMS-normalized independently, branches are laid out
//! along the channel axis, and every channel gets its own kernel. The
//! dilation widens the receptive field without adding parameters; output
//! at position `t` never depends on inputs past `t`.

use ndarray::{s, Array2, Array3, Array4};
use rand::rngs::StdRng;
use rand::Rng;
use ndarray_rand::rand_distr::StandardNormal;

use crate::model::RmsNorm;

/// Depthwise causal convolution over `[batch, seq, hc_mult, dim]` input
#[derive(Debug, Clone)]
pub struct ShortConv {
    /// One independent norm per hyper-connection branch
    branch_norms: Vec<RmsNorm>,
    /// Kernel per channel `[hc_mult * dim, kernel_size]`
    weight: Array2<f64>,
    kernel_size: usize,
    dilation: usize,
    hc_mult: usize,
    dim: usize,
    use_silu: bool,
}

impl ShortConv {
    /// Create a convolution over `hc_mult` branches of `dim` channels each
    pub fn new(
        hc_mult: usize,
        dim: usize,
        kernel_size: usize,
        dilation: usize,
        use_silu: bool,
        rng: &mut StdRng,
    ) -> Self {
        let channels = hc_mult * dim;
        let std = (1.0 / kernel_size as f64).sqrt();
        let weight = Array2::from_shape_fn((channels, kernel_size), |_| {
            let z: f64 = rng.sample(StandardNormal);
            z * std
        });

        let branch_norms = (0..hc_mult).map(|_| RmsNorm::new(dim)).collect();

        Self {
            branch_norms,
            weight,
            kernel_size,
            dilation,
            hc_mult,
            dim,
            use_silu,
        }
    }

    /// Forward pass.
    ///
    /// Input and output are `[batch, seq_len, hc_mult, dim]`. Positions
    /// before the sequence start contribute zero, equivalent to a left pad
    /// of `(kernel_size - 1) * dilation`.
    pub fn forward(&self, x: &Array4<f64>) -> Array4<f64> {
        let (batch, seq_len, hc, dim) = x.dim();
        debug_assert_eq!(hc, self.hc_mult);
        debug_assert_eq!(dim, self.dim);

        let channels = hc * dim;

        // Per-branch RMS norm, branches concatenated along the channel axis
        let mut normed = Array3::zeros((batch, seq_len, channels));
        for b in 0..batch {
            for t in 0..seq_len {
                for branch in 0..hc {
                    let row = x.slice(s![b, t, branch, ..]);
                    let nr = self.branch_norms[branch].apply(row);
                    for j in 0..dim {
                        normed[[b, t, branch * dim + j]] = nr[j];
                    }
                }
            }
        }

        // Depthwise causal convolution; tap i reaches back
        // (kernel_size - 1 - i) * dilation positions
        let mut out = Array4::zeros((batch, seq_len, hc, dim));
        for b in 0..batch {
            for t in 0..seq_len {
                for c in 0..channels {
                    let mut acc = 0.0;
                    for i in 0..self.kernel_size {
                        let shift = (self.kernel_size - 1 - i) * self.dilation;
                        if t >= shift {
                            acc += self.weight[[c, i]] * normed[[b, t - shift, c]];
                        }
                    }
                    let v = if self.use_silu { silu(acc) } else { acc };
                    out[[b, t, c / dim, c % dim]] = v;
                }
            }
        }

        out
    }

    /// Kernel size
    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    /// Dilation
    pub fn dilation(&self) -> usize {
        self.dilation
    }

    /// Kernel weights (for gradient updates)
    pub fn weight(&self) -> &Array2<f64> {
        &self.weight
    }

    /// Replace the kernel weights
    pub fn set_weight(&mut self, weight: Array2<f64>) {
        self.weight = weight;
    }
}

/// SiLU activation: `x * sigmoid(x)`
fn silu(x: f64) -> f64 {
    x / (1.0 + (-x).exp())
}
