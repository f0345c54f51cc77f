//! N-gram hash mapping
//!
//! Turns a token-id sequence into per-head hash indices. Each layer owns
//! one mapping: a vector of seeded odd multipliers shared by all orders,
//! and one prime modulus per (order, head) drawn from the shared
//! allocator. Hashing uses wrapping 64-bit signed arithmetic; the
//! wraparound is part of the hash, not an error condition.

use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{EngramError, Result};
use crate::hash::PrimeAllocator;
use crate::model::EngramConfig;

/// Stride between per-layer RNG seeds
pub const LAYER_SEED_STRIDE: u64 = 1_000_000_007;

/// Deterministic hash mapping for one layer.
///
/// Serializable so a constructed mapping can be cached and reloaded; a
/// reloaded mapping reproduces identical hash output. Construction is the
/// only mutation of the allocator and must not run concurrently across
/// layers sharing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NgramHashMapping {
    layer_id: usize,
    max_ngram_size: usize,
    pad_id: i64,
    /// Odd multipliers, one per window position
    multipliers: Vec<i64>,
    /// Prime moduli indexed by [order - 2][head]
    primes: Vec<Vec<u64>>,
}

impl NgramHashMapping {
    /// Build the mapping for `layer_id`, drawing primes from the shared
    /// allocator.
    ///
    /// Deterministic given `(config.rng_seed, layer_id)` and the
    /// allocator's prior state.
    pub fn new(
        config: &EngramConfig,
        layer_id: usize,
        allocator: &mut PrimeAllocator,
    ) -> Result<Self> {
        let half_bound = config.half_bound()?;

        let seed = config
            .rng_seed
            .wrapping_add(LAYER_SEED_STRIDE.wrapping_mul(layer_id as u64));
        let mut rng = StdRng::seed_from_u64(seed);

        // Odd multipliers keep the multiply step from collapsing into an
        // even-only hash.
        let multipliers: Vec<i64> = (0..config.max_ngram_size)
            .map(|_| 2 * rng.gen_range(0..half_bound) + 1)
            .collect();

        let mut primes = Vec::with_capacity(config.n_orders());
        for (order_idx, _order) in config.orders().enumerate() {
            let target = config.target_vocab_size_per_order[order_idx];
            let mut cursor = (target as u64).saturating_sub(1);
            let mut order_primes = Vec::with_capacity(config.heads_per_order);
            for _head in 0..config.heads_per_order {
                let prime = allocator.allocate_from(cursor)?;
                cursor = prime;
                order_primes.push(prime);
            }
            primes.push(order_primes);
        }

        tracing::debug!(
            layer_id,
            n_orders = primes.len(),
            heads_per_order = config.heads_per_order,
            "assigned hash moduli"
        );

        Ok(Self {
            layer_id,
            max_ngram_size: config.max_ngram_size,
            pad_id: config.pad_id,
            multipliers,
            primes,
        })
    }

    /// Layer id this mapping belongs to
    pub fn layer_id(&self) -> usize {
        self.layer_id
    }

    /// Largest n-gram order
    pub fn max_ngram_size(&self) -> usize {
        self.max_ngram_size
    }

    /// Odd multipliers, one per window position
    pub fn multipliers(&self) -> &[i64] {
        &self.multipliers
    }

    /// Prime moduli indexed by [order - 2][head]
    pub fn primes(&self) -> &[Vec<u64>] {
        &self.primes
    }

    /// Per-head index-space sizes, flattened in (order, head) order.
    /// These are the row counts the embedding table is built from.
    pub fn head_sizes(&self) -> Vec<usize> {
        self.primes
            .iter()
            .flat_map(|order_primes| order_primes.iter().map(|&p| p as usize))
            .collect()
    }

    /// Total hash heads across all orders
    pub fn total_heads(&self) -> usize {
        self.primes.iter().map(|p| p.len()).sum()
    }

    /// Hash a token-id batch into per-head indices.
    ///
    /// Input: `[batch, seq_len]`. Output: `[batch, seq_len, total_heads]`
    /// with every value in `[0, prime[order][head])`. Window positions
    /// before the sequence start are filled with `pad_id`; an all-pad
    /// window still produces a valid (if collision-prone) hash.
    pub fn hash_sequence(&self, token_ids: &Array2<i64>) -> Array3<i64> {
        let (batch, seq_len) = token_ids.dim();
        let total_heads = self.total_heads();
        let mut out = Array3::zeros((batch, seq_len, total_heads));

        for b in 0..batch {
            for t in 0..seq_len {
                let mut head_axis = 0;
                for (order_idx, order_primes) in self.primes.iter().enumerate() {
                    let order = order_idx + 2;
                    let mix = self.mix_window(token_ids, b, t, order);
                    for &prime in order_primes {
                        out[[b, t, head_axis]] = mix.rem_euclid(prime as i64);
                        head_axis += 1;
                    }
                }
            }
        }

        out
    }

    /// Combine the `order` tokens ending at position `t` into one 64-bit
    /// value. All arithmetic wraps in two's complement.
    fn mix_window(&self, token_ids: &Array2<i64>, b: usize, t: usize, order: usize) -> i64 {
        let mut mix = 0i64;
        for k in 0..order {
            let offset = order - 1 - k;
            let token = if t >= offset {
                token_ids[[b, t - offset]]
            } else {
                self.pad_id
            };
            let term = token.wrapping_mul(self.multipliers[k]);
            if k == 0 {
                mix = term;
            } else {
                mix ^= term;
            }
        }
        mix
    }

    /// Fail fast when the mapping's head layout disagrees with an
    /// embedding head-size list.
    pub fn check_head_sizes(&self, head_sizes: &[usize]) -> Result<()> {
        let own = self.head_sizes();
        if own.len() != head_sizes.len() {
            return Err(EngramError::ShapeMismatch {
                context: "hash head count vs embedding head-size list",
                expected: own.len(),
                got: head_sizes.len(),
            });
        }
        for (&a, &b) in own.iter().zip(head_sizes.iter()) {
            if a != b {
                return Err(EngramError::ShapeMismatch {
                    context: "embedding head size",
                    expected: a,
                    got: b,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping_for(config: &EngramConfig, layer_id: usize) -> NgramHashMapping {
        let mut allocator = PrimeAllocator::new();
        NgramHashMapping::new(config, layer_id, &mut allocator).unwrap()
    }

    #[test]
    fn test_multipliers_are_odd() {
        let config = EngramConfig::small();
        let mapping = mapping_for(&config, 1);

        assert_eq!(mapping.multipliers().len(), config.max_ngram_size);
        for &m in mapping.multipliers() {
            assert_eq!(m.rem_euclid(2), 1, "multiplier {} is not odd", m);
        }
    }

    #[test]
    fn test_deterministic_across_builds() {
        let config = EngramConfig::small();
        let a = mapping_for(&config, 1);
        let b = mapping_for(&config, 1);

        assert_eq!(a.multipliers(), b.multipliers());
        assert_eq!(a.primes(), b.primes());

        let ids = Array2::from_shape_vec((1, 5), vec![3, 7, 2, 9, 4]).unwrap();
        assert_eq!(a.hash_sequence(&ids), b.hash_sequence(&ids));
    }

    #[test]
    fn test_layers_get_different_multipliers() {
        let config = EngramConfig::small();
        let a = mapping_for(&config, 1);
        let b = mapping_for(&config, 2);
        assert_ne!(a.multipliers(), b.multipliers());
    }

    #[test]
    fn test_primes_distinct_within_layer() {
        let config = EngramConfig::small();
        let mapping = mapping_for(&config, 1);

        let flat: Vec<u64> = mapping
            .primes()
            .iter()
            .flat_map(|p| p.iter().copied())
            .collect();
        let unique: std::collections::HashSet<u64> = flat.iter().copied().collect();
        assert_eq!(unique.len(), flat.len());
    }

    #[test]
    fn test_primes_start_at_target() {
        let config = EngramConfig::small();
        let mapping = mapping_for(&config, 1);

        // Cursor starts at target - 1 = 49; heads for order 2 get 53, 59,
        // then order 3 restarts its cursor at 49 and takes the next free
        // primes 61, 67.
        assert_eq!(mapping.primes()[0], vec![53, 59]);
        assert_eq!(mapping.primes()[1], vec![61, 67]);
    }

    #[test]
    fn test_hash_shape_and_range() {
        let config = EngramConfig::small();
        let mapping = mapping_for(&config, 1);

        let ids = Array2::from_shape_vec((1, 5), vec![3, 7, 2, 9, 4]).unwrap();
        let hashes = mapping.hash_sequence(&ids);
        assert_eq!(hashes.dim(), (1, 5, 4));

        let head_sizes = mapping.head_sizes();
        for t in 0..5 {
            for (h, &size) in head_sizes.iter().enumerate() {
                let v = hashes[[0, t, h]];
                assert!(v >= 0, "hash {} negative", v);
                assert!((v as usize) < size, "hash {} >= modulus {}", v, size);
            }
        }
    }

    #[test]
    fn test_short_sequence_uses_padding() {
        let config = EngramConfig::small();
        let mapping = mapping_for(&config, 1);

        // Shorter than the largest order: every window is pad-filled
        let ids = Array2::from_shape_vec((1, 1), vec![9]).unwrap();
        let hashes = mapping.hash_sequence(&ids);
        assert_eq!(hashes.dim(), (1, 1, 4));

        for (h, &size) in mapping.head_sizes().iter().enumerate() {
            let v = hashes[[0, 0, h]];
            assert!(v >= 0 && (v as usize) < size);
        }
    }

    #[test]
    fn test_padding_matches_explicit_pad_prefix() {
        let config = EngramConfig::small();
        let mapping = mapping_for(&config, 1);

        // Hash of position 0 with implicit padding must equal the hash of
        // the same token preceded by explicit pad ids.
        let bare = Array2::from_shape_vec((1, 1), vec![5]).unwrap();
        let padded =
            Array2::from_shape_vec((1, 3), vec![config.pad_id, config.pad_id, 5]).unwrap();

        let h_bare = mapping.hash_sequence(&bare);
        let h_padded = mapping.hash_sequence(&padded);

        for h in 0..mapping.total_heads() {
            assert_eq!(h_bare[[0, 0, h]], h_padded[[0, 2, h]]);
        }
    }

    #[test]
    fn test_serde_roundtrip_reproduces_hashes() {
        let config = EngramConfig::small();
        let mapping = mapping_for(&config, 1);

        let json = serde_json::to_string(&mapping).unwrap();
        let reloaded: NgramHashMapping = serde_json::from_str(&json).unwrap();
        assert_eq!(mapping, reloaded);

        let ids = Array2::from_shape_vec((2, 4), vec![1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(mapping.hash_sequence(&ids), reloaded.hash_sequence(&ids));
    }

    #[test]
    fn test_check_head_sizes_mismatch() {
        let config = EngramConfig::small();
        let mapping = mapping_for(&config, 1);

        assert!(mapping.check_head_sizes(&mapping.head_sizes()).is_ok());
        assert!(mapping.check_head_sizes(&[53, 59, 61]).is_err());
    }
}
