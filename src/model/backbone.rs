//! Backbone interface
//!
//! The engram layer only reads the backbone's hidden state; it does not
//! care what produced it. This trait stands in for the surrounding
//! transformer block so the layer can be exercised without one.

use ndarray::Array4;

/// A block of the surrounding model producing the hidden state the
/// engram layer gates against
pub trait BackboneBlock: Send + Sync {
    /// Transform the hidden state `[batch, seq_len, hc_mult, hidden]`
    fn forward(&self, hidden: &Array4<f64>) -> Array4<f64>;
}

/// Pass-through backbone for tests and standalone use
#[derive(Debug, Clone, Default)]
pub struct IdentityBackbone;

impl BackboneBlock for IdentityBackbone {
    fn forward(&self, hidden: &Array4<f64>) -> Array4<f64> {
        hidden.clone()
    }
}
