//! Engram layer and stack
//!
//! The layer retrieves hash-addressed n-gram embeddings, gates them
//! against the backbone hidden state, and mixes the gated values locally
//! with a short causal convolution. The result is a residual contribution
//! the caller adds back into its stream.
//!
//! A stack builds one layer per configured layer id from a single shared
//! prime allocator, so no modulus repeats anywhere in the model.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::{s, Array2, Array3, Array4};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{EngramError, Result};
use crate::hash::{NgramHashMapping, PrimeAllocator, LAYER_SEED_STRIDE};
use crate::model::{EngramConfig, MultiHeadEmbedding, RmsNorm, ShortConv};
use crate::tokenizer::CompressedTokenizer;

/// One engram layer.
///
/// Stateless after construction: `forward` is a pure function of the
/// hidden state and token ids, and `&self` is safe to share across
/// threads.
#[derive(Debug, Clone)]
pub struct EngramLayer {
    layer_id: usize,
    mapping: NgramHashMapping,
    embedding: MultiHeadEmbedding,
    /// Key projection `[concat_dim, hidden_size]`
    w_key: Array2<f64>,
    /// Value projection `[concat_dim, hidden_size]`
    w_value: Array2<f64>,
    /// Norm applied to projected keys before gating
    key_norm: RmsNorm,
    /// Norm applied to the hidden state before gating
    query_norm: RmsNorm,
    conv: ShortConv,
    concat_dim: usize,
    hidden_size: usize,
    hc_mult: usize,
    gate_eps: f64,
}

impl EngramLayer {
    /// Build the layer for `layer_id`, drawing primes from the shared
    /// allocator. All structural checks happen here; `forward` only
    /// validates its inputs.
    pub fn new(
        config: &EngramConfig,
        layer_id: usize,
        allocator: &mut PrimeAllocator,
    ) -> Result<Self> {
        config.validate()?;

        let mapping = NgramHashMapping::new(config, layer_id, allocator)?;
        let head_sizes = mapping.head_sizes();
        if head_sizes.len() != config.total_heads() {
            return Err(EngramError::ShapeMismatch {
                context: "hash head count vs configured heads",
                expected: config.total_heads(),
                got: head_sizes.len(),
            });
        }

        // Weights use a stream adjacent to the multiplier stream so both
        // are reproducible from the one seed.
        let weight_seed = config
            .rng_seed
            .wrapping_add(LAYER_SEED_STRIDE.wrapping_mul(layer_id as u64))
            .wrapping_add(1);
        let mut rng = StdRng::seed_from_u64(weight_seed);

        let embedding = MultiHeadEmbedding::new(&head_sizes, config.embed_dim_per_order, &mut rng);
        mapping.check_head_sizes(embedding.head_sizes())?;

        let concat_dim = config.concat_dim();
        let hidden_size = config.hidden_size;

        // Xavier initialization
        let limit = (6.0 / (concat_dim + hidden_size) as f64).sqrt();
        let w_key = Array2::random_using(
            (concat_dim, hidden_size),
            Uniform::new(-limit, limit),
            &mut rng,
        );
        let w_value = Array2::random_using(
            (concat_dim, hidden_size),
            Uniform::new(-limit, limit),
            &mut rng,
        );

        let conv = ShortConv::new(
            config.hc_mult,
            hidden_size,
            config.conv_kernel_size,
            config.conv_dilation(),
            config.use_silu,
            &mut rng,
        );

        Ok(Self {
            layer_id,
            mapping,
            embedding,
            w_key,
            w_value,
            key_norm: RmsNorm::new(hidden_size),
            query_norm: RmsNorm::new(hidden_size),
            conv,
            concat_dim,
            hidden_size,
            hc_mult: config.hc_mult,
            gate_eps: defaults::GATE_EPS,
        })
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// * `hidden_state` - Backbone state `[batch, seq_len, hc_mult, hidden]`
    /// * `token_ids` - Compressed token ids `[batch, seq_len]`
    ///
    /// # Returns
    /// Residual contribution `[batch, seq_len, hc_mult, hidden]` to be
    /// added into the backbone stream by the caller.
    pub fn forward(
        &self,
        hidden_state: &Array4<f64>,
        token_ids: &Array2<i64>,
    ) -> Result<Array4<f64>> {
        let (batch, seq_len, hc, hidden) = hidden_state.dim();
        if hc != self.hc_mult {
            return Err(EngramError::ShapeMismatch {
                context: "hyper-connection branch axis",
                expected: self.hc_mult,
                got: hc,
            });
        }
        if hidden != self.hidden_size {
            return Err(EngramError::ShapeMismatch {
                context: "hidden axis",
                expected: self.hidden_size,
                got: hidden,
            });
        }
        let (id_batch, id_len) = token_ids.dim();
        if id_batch != batch {
            return Err(EngramError::ShapeMismatch {
                context: "token id batch axis",
                expected: batch,
                got: id_batch,
            });
        }
        if id_len != seq_len {
            return Err(EngramError::ShapeMismatch {
                context: "token id sequence axis",
                expected: seq_len,
                got: id_len,
            });
        }
        for ((b, t), &id) in token_ids.indexed_iter() {
            if id < 0 {
                return Err(EngramError::NegativeTokenId {
                    id,
                    batch: b,
                    pos: t,
                });
            }
        }

        // 1. Hash and retrieve, then flatten heads into one feature
        //    vector per position
        let hashes = self.mapping.hash_sequence(token_ids);
        let emb = self.embedding.forward(&hashes)?;

        let heads = self.embedding.head_sizes().len();
        let embed_dim = self.embedding.embed_dim();
        let mut concat = Array3::zeros((batch, seq_len, self.concat_dim));
        for b in 0..batch {
            for t in 0..seq_len {
                for h in 0..heads {
                    for d in 0..embed_dim {
                        concat[[b, t, h * embed_dim + d]] = emb[[b, t, h, d]];
                    }
                }
            }
        }

        // 2. Project to key and value
        let key = self.project(&concat, &self.w_key);
        let value_base = self.project(&concat, &self.w_value);

        // 3. Gate per hyper-connection branch:
        //    sigmoid(signed_sqrt(norm(k) . norm(q) / sqrt(hidden)))
        let scale = (self.hidden_size as f64).sqrt();
        let mut value = Array4::zeros((batch, seq_len, hc, hidden));
        for b in 0..batch {
            for t in 0..seq_len {
                let k_norm = self.key_norm.apply(key.slice(s![b, t, ..]));
                for branch in 0..hc {
                    let q_norm = self
                        .query_norm
                        .apply(hidden_state.slice(s![b, t, branch, ..]));
                    let raw = k_norm.dot(&q_norm) / scale;
                    let gate = sigmoid(signed_sqrt(raw, self.gate_eps));
                    for d in 0..hidden {
                        value[[b, t, branch, d]] = gate * value_base[[b, t, d]];
                    }
                }
            }
        }

        // 4. Local mix; output = value + conv(value)
        let conv_out = self.conv.forward(&value);
        Ok(&value + &conv_out)
    }

    /// Linear transformation for a 3-D tensor
    fn project(&self, x: &Array3<f64>, w: &Array2<f64>) -> Array3<f64> {
        let (batch, seq_len, d_in) = x.dim();
        let d_out = w.ncols();

        let mut out = Array3::zeros((batch, seq_len, d_out));
        for b in 0..batch {
            for t in 0..seq_len {
                for o in 0..d_out {
                    let mut sum = 0.0;
                    for i in 0..d_in {
                        sum += x[[b, t, i]] * w[[i, o]];
                    }
                    out[[b, t, o]] = sum;
                }
            }
        }
        out
    }

    /// Layer id this layer was built for
    pub fn layer_id(&self) -> usize {
        self.layer_id
    }

    /// The layer's hash mapping
    pub fn mapping(&self) -> &NgramHashMapping {
        &self.mapping
    }

    /// The layer's embedding table
    pub fn embedding(&self) -> &MultiHeadEmbedding {
        &self.embedding
    }

    /// Backbone hidden size
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Number of hyper-connection branches
    pub fn hc_mult(&self) -> usize {
        self.hc_mult
    }
}

/// Stack of engram layers sharing one prime allocator.
///
/// Optionally carries the compressed tokenizer; when present, forward
/// input ids are additionally checked against the compressed vocabulary
/// bound.
#[derive(Debug, Clone)]
pub struct Engram {
    config: EngramConfig,
    tokenizer: Option<CompressedTokenizer>,
    layers: Vec<EngramLayer>,
}

impl Engram {
    /// Build a stack with one layer per configured layer id
    pub fn new(config: EngramConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Build a stack that also owns the compressed tokenizer
    pub fn with_tokenizer(config: EngramConfig, tokenizer: CompressedTokenizer) -> Result<Self> {
        Self::build(config, Some(tokenizer))
    }

    fn build(config: EngramConfig, tokenizer: Option<CompressedTokenizer>) -> Result<Self> {
        config.validate()?;

        let mut allocator = PrimeAllocator::new();
        let mut layers = Vec::with_capacity(config.layer_ids.len());
        for &layer_id in &config.layer_ids {
            layers.push(EngramLayer::new(&config, layer_id, &mut allocator)?);
        }

        tracing::info!(
            layers = layers.len(),
            primes = allocator.len(),
            "built engram stack"
        );

        Ok(Self {
            config,
            tokenizer,
            layers,
        })
    }

    /// Stack configuration
    pub fn config(&self) -> &EngramConfig {
        &self.config
    }

    /// The attached tokenizer, if any
    pub fn tokenizer(&self) -> Option<&CompressedTokenizer> {
        self.tokenizer.as_ref()
    }

    /// All layers in configuration order
    pub fn layers(&self) -> &[EngramLayer] {
        &self.layers
    }

    /// Look up a layer by its layer id
    pub fn layer(&self, layer_id: usize) -> Option<&EngramLayer> {
        self.layers.iter().find(|l| l.layer_id() == layer_id)
    }

    /// Compress raw token ids with the attached tokenizer
    pub fn compress(&self, ids: &Array2<i64>) -> Result<Array2<i64>> {
        match &self.tokenizer {
            Some(tokenizer) => tokenizer.compress(ids),
            None => Err(EngramError::Config(
                "no tokenizer attached to this stack".to_string(),
            )),
        }
    }

    /// Forward pass through the layer registered for `layer_id`.
    ///
    /// When a tokenizer is attached, ids are also checked against the
    /// compressed vocabulary bound before hashing.
    pub fn forward(
        &self,
        layer_id: usize,
        hidden_state: &Array4<f64>,
        token_ids: &Array2<i64>,
    ) -> Result<Array4<f64>> {
        let layer = self
            .layer(layer_id)
            .ok_or(EngramError::UnknownLayer { layer_id })?;

        if let Some(tokenizer) = &self.tokenizer {
            let bound = tokenizer.compressed_size();
            for ((b, t), &id) in token_ids.indexed_iter() {
                if id >= bound as i64 {
                    return Err(EngramError::TokenOutOfRange {
                        id,
                        bound,
                        batch: b,
                        pos: t,
                    });
                }
            }
        }

        layer.forward(hidden_state, token_ids)
    }

    /// Snapshot of the deterministic state worth caching: the vocabulary
    /// table and every layer's multiplier/prime assignment
    pub fn plan(&self) -> EngramPlan {
        EngramPlan {
            tokenizer: self.tokenizer.clone(),
            mappings: self.layers.iter().map(|l| l.mapping().clone()).collect(),
        }
    }

    /// Save the plan as JSON
    pub fn save_plan<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.plan().save(path)
    }
}

/// Serialized form of the stack's deterministic state.
///
/// Recomputing this state is `O(vocab_size)` plus the prime search, so
/// caching it across runs is worthwhile; everything else (weights) is
/// cheap to re-draw from the seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngramPlan {
    /// Compressed-vocabulary lookup table, when a tokenizer was attached
    pub tokenizer: Option<CompressedTokenizer>,
    /// Per-layer multiplier and prime assignments
    pub mappings: Vec<NgramHashMapping>,
}

impl EngramPlan {
    /// Save as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Load a previously saved plan
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let plan = serde_json::from_reader(BufReader::new(file))?;
        Ok(plan)
    }
}

/// Sigmoid: `1 / (1 + exp(-x))`
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Sign-preserving square root: `sign(x) * sqrt(max(|x|, eps))`.
/// Compresses the gate logit's dynamic range without losing direction.
fn signed_sqrt(x: f64, eps: f64) -> f64 {
    if x == 0.0 {
        0.0
    } else {
        x.signum() * x.abs().max(eps).sqrt()
    }
}
