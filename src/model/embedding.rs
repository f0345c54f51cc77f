//! Multi-head embedding
//!
//! One concatenated table serves every hash head. Head `h` owns the row
//! block starting at the cumulative sum of the preceding head sizes, so a
//! lookup can never read another head's rows.

use ndarray::{Array2, Array3, Array4};
use rand::rngs::StdRng;
use rand::Rng;
use ndarray_rand::rand_distr::StandardNormal;

use crate::defaults;
use crate::error::{EngramError, Result};

/// Embedding table shared by all hash heads of one layer
#[derive(Debug, Clone)]
pub struct MultiHeadEmbedding {
    /// Concatenated table `[sum(head_sizes), embed_dim]`
    table: Array2<f64>,
    /// Row offset per head, cumulative sum of preceding head sizes
    offsets: Vec<usize>,
    head_sizes: Vec<usize>,
    embed_dim: usize,
}

impl MultiHeadEmbedding {
    /// Create a table for the given per-head vocabulary sizes
    pub fn new(head_sizes: &[usize], embed_dim: usize, rng: &mut StdRng) -> Self {
        let mut offsets = Vec::with_capacity(head_sizes.len());
        let mut total = 0usize;
        for &size in head_sizes {
            offsets.push(total);
            total += size;
        }

        let table = Array2::from_shape_fn((total, embed_dim), |_| {
            let z: f64 = rng.sample(StandardNormal);
            z * defaults::EMBED_INIT_STD
        });

        Self {
            table,
            offsets,
            head_sizes: head_sizes.to_vec(),
            embed_dim,
        }
    }

    /// Look up embeddings for per-head hash ids.
    ///
    /// Input: `[batch, seq_len, heads]` with head `h` ids in
    /// `[0, head_sizes[h])`. Output: `[batch, seq_len, heads, embed_dim]`.
    /// Ids outside a head's range are rejected before any table access.
    pub fn forward(&self, hash_ids: &Array3<i64>) -> Result<Array4<f64>> {
        let (batch, seq_len, heads) = hash_ids.dim();
        if heads != self.head_sizes.len() {
            return Err(EngramError::ShapeMismatch {
                context: "hash head axis vs embedding heads",
                expected: self.head_sizes.len(),
                got: heads,
            });
        }

        let mut out = Array4::zeros((batch, seq_len, heads, self.embed_dim));
        for b in 0..batch {
            for t in 0..seq_len {
                for h in 0..heads {
                    let id = hash_ids[[b, t, h]];
                    if id < 0 || id as usize >= self.head_sizes[h] {
                        return Err(EngramError::TokenOutOfRange {
                            id,
                            bound: self.head_sizes[h],
                            batch: b,
                            pos: t,
                        });
                    }
                    let row = self.offsets[h] + id as usize;
                    for d in 0..self.embed_dim {
                        out[[b, t, h, d]] = self.table[[row, d]];
                    }
                }
            }
        }
        Ok(out)
    }

    /// Per-head row offsets
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Per-head vocabulary sizes
    pub fn head_sizes(&self) -> &[usize] {
        &self.head_sizes
    }

    /// Embedding dimension per head
    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    /// Total rows across all heads
    pub fn num_rows(&self) -> usize {
        self.table.nrows()
    }

    /// The underlying table (for gradient updates)
    pub fn table(&self) -> &Array2<f64> {
        &self.table
    }

    /// Replace the underlying table (for loading weights)
    pub fn set_table(&mut self, table: Array2<f64>) {
        self.table = table;
    }
}
