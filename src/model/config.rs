//! Engram layer configuration
//!
//! Configuration for the hashing scheme, embedding tables, gating, and
//! local convolution.

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{EngramError, Result};

/// Engram configuration
///
/// One configuration drives every layer of a stack; the per-layer state
/// (multipliers, prime moduli) is derived from `rng_seed` and the layer id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngramConfig {
    /// Largest n-gram order hashed at each position; orders run
    /// `2..=max_ngram_size`
    pub max_ngram_size: usize,

    /// Target vocabulary size per order, one entry for each order
    /// `2..=max_ngram_size`. The actual modulus per head is the next free
    /// prime at or above `target - 1`.
    pub target_vocab_size_per_order: Vec<usize>,

    /// Hash heads per n-gram order
    pub heads_per_order: usize,

    /// Embedding dimension per head
    pub embed_dim_per_order: usize,

    /// Backbone hidden size
    pub hidden_size: usize,

    /// Number of hyper-connection branches
    pub hc_mult: usize,

    /// Layer ids this stack builds a layer for
    pub layer_ids: Vec<usize>,

    /// Token id substituted for missing left context at sequence start
    pub pad_id: i64,

    /// Seed for multiplier generation and weight initialization
    pub rng_seed: u64,

    /// Depthwise convolution kernel size
    pub conv_kernel_size: usize,

    /// Apply a SiLU activation after the convolution
    pub use_silu: bool,
}

impl Default for EngramConfig {
    fn default() -> Self {
        Self {
            max_ngram_size: defaults::MAX_NGRAM_SIZE,
            target_vocab_size_per_order: vec![
                defaults::TARGET_VOCAB_SIZE;
                defaults::MAX_NGRAM_SIZE - 1
            ],
            heads_per_order: defaults::HEADS_PER_ORDER,
            embed_dim_per_order: defaults::EMBED_DIM_PER_ORDER,
            hidden_size: defaults::HIDDEN_SIZE,
            hc_mult: defaults::HC_MULT,
            layer_ids: vec![1],
            pad_id: defaults::PAD_ID,
            rng_seed: defaults::RNG_SEED,
            conv_kernel_size: defaults::CONV_KERNEL_SIZE,
            use_silu: true,
        }
    }
}

impl EngramConfig {
    /// Small configuration for tests and quick experiments
    pub fn small() -> Self {
        Self {
            max_ngram_size: 3,
            target_vocab_size_per_order: vec![50, 50],
            heads_per_order: 2,
            embed_dim_per_order: 8,
            hidden_size: 32,
            hc_mult: 2,
            layer_ids: vec![1],
            pad_id: 0,
            rng_seed: 0,
            conv_kernel_size: 4,
            use_silu: true,
        }
    }

    /// N-gram orders hashed at each position
    pub fn orders(&self) -> std::ops::RangeInclusive<usize> {
        2..=self.max_ngram_size
    }

    /// Number of n-gram orders
    pub fn n_orders(&self) -> usize {
        self.max_ngram_size.saturating_sub(1)
    }

    /// Total hash heads across all orders
    pub fn total_heads(&self) -> usize {
        self.n_orders() * self.heads_per_order
    }

    /// Width of the flattened per-position embedding vector
    pub fn concat_dim(&self) -> usize {
        self.total_heads() * self.embed_dim_per_order
    }

    /// Convolution dilation; tied to the largest n-gram order so the
    /// receptive field widens without extra parameters
    pub fn conv_dilation(&self) -> usize {
        self.max_ngram_size
    }

    /// Exclusive upper bound for raw multiplier draws.
    ///
    /// Multipliers are `2r + 1` with `r` drawn below this bound, keeping
    /// the odd multiplier within `i64::MAX / target_vocab_size`. A target
    /// vocabulary too large for 64-bit hashing makes the bound
    /// non-positive, which is a fatal configuration error.
    pub fn half_bound(&self) -> Result<i64> {
        let max_target = self
            .target_vocab_size_per_order
            .iter()
            .copied()
            .max()
            .unwrap_or(0);
        if max_target == 0 {
            return Err(EngramError::Config(
                "target_vocab_size_per_order must not be empty".to_string(),
            ));
        }
        let bound = i64::MAX / max_target as i64 / 2;
        if bound <= 0 {
            return Err(EngramError::Config(format!(
                "target vocabulary size {} too large for 64-bit hashing",
                max_target
            )));
        }
        Ok(bound)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_ngram_size < 2 {
            return Err(EngramError::Config(
                "max_ngram_size must be >= 2".to_string(),
            ));
        }
        if self.target_vocab_size_per_order.len() != self.n_orders() {
            return Err(EngramError::Config(format!(
                "target_vocab_size_per_order has {} entries, expected one per order 2..={} ({})",
                self.target_vocab_size_per_order.len(),
                self.max_ngram_size,
                self.n_orders()
            )));
        }
        for (i, &target) in self.target_vocab_size_per_order.iter().enumerate() {
            if target < 2 {
                return Err(EngramError::Config(format!(
                    "target vocabulary size for order {} must be >= 2, got {}",
                    i + 2,
                    target
                )));
            }
        }
        if self.heads_per_order == 0 {
            return Err(EngramError::Config(
                "heads_per_order must be >= 1".to_string(),
            ));
        }
        if self.embed_dim_per_order == 0 {
            return Err(EngramError::Config(
                "embed_dim_per_order must be >= 1".to_string(),
            ));
        }
        if self.hidden_size == 0 {
            return Err(EngramError::Config("hidden_size must be >= 1".to_string()));
        }
        if self.hc_mult == 0 {
            return Err(EngramError::Config("hc_mult must be >= 1".to_string()));
        }
        if self.conv_kernel_size == 0 {
            return Err(EngramError::Config(
                "conv_kernel_size must be >= 1".to_string(),
            ));
        }
        if self.layer_ids.is_empty() {
            return Err(EngramError::Config(
                "layer_ids must not be empty".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for &id in &self.layer_ids {
            if !seen.insert(id) {
                return Err(EngramError::Config(format!(
                    "duplicate layer id {} in layer_ids",
                    id
                )));
            }
        }
        if self.pad_id < 0 {
            return Err(EngramError::Config("pad_id must be >= 0".to_string()));
        }
        self.half_bound()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngramConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_small_config() {
        let config = EngramConfig::small();
        assert!(config.validate().is_ok());
        assert_eq!(config.n_orders(), 2);
        assert_eq!(config.total_heads(), 4);
        assert_eq!(config.concat_dim(), 32);
    }

    #[test]
    fn test_orders_range() {
        let config = EngramConfig::small();
        let orders: Vec<usize> = config.orders().collect();
        assert_eq!(orders, vec![2, 3]);
    }

    #[test]
    fn test_invalid_order_count() {
        let mut config = EngramConfig::small();
        config.target_vocab_size_per_order = vec![50];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_ngram_size() {
        let mut config = EngramConfig::small();
        config.max_ngram_size = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_layer_ids() {
        let mut config = EngramConfig::small();
        config.layer_ids = vec![1, 2, 1];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_half_bound_overflow() {
        let mut config = EngramConfig::small();
        config.target_vocab_size_per_order = vec![usize::MAX / 2, 50];
        assert!(config.half_bound().is_err());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_conv_dilation_tracks_ngram_size() {
        let config = EngramConfig::small();
        assert_eq!(config.conv_dilation(), 3);
    }

    #[test]
    fn test_serialization() {
        let config = EngramConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: EngramConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.max_ngram_size, deserialized.max_ngram_size);
        assert_eq!(config.rng_seed, deserialized.rng_seed);
        assert_eq!(
            config.target_vocab_size_per_order,
            deserialized.target_vocab_size_per_order
        );
    }
}
