//! # Engram
//!
//! N-gram hashed memory augmentation for transformer-style backbones.
//!
//! The layer offloads local pattern memorization into hash-addressed
//! embedding tables so the backbone can spend its capacity on longer-range
//! structure. Token-id sequences are hashed per n-gram order and head into
//! bounded index spaces with pairwise-distinct prime moduli, the retrieved
//! embeddings are gated against the backbone hidden state, and a short
//! causal convolution mixes the result locally before it is handed back to
//! the caller as a residual contribution.
//!
//! ## Features
//!
//! - Vocabulary compression by normalized text form (smaller id space,
//!   smaller tables)
//! - Deterministic multiplicative-XOR hashing with seeded odd multipliers
//!   and globally collision-free prime moduli
//! - Single concatenated embedding table addressed via per-head offsets
//! - Context gating with a sign-preserving square root ahead of the sigmoid
//! - Depthwise causal convolution with dilation for a wider receptive field
//!
//! ## Modules
//!
//! - `tokenizer` - Vocabulary deduplication and id compression
//! - `hash` - Prime allocation and n-gram hash mapping
//! - `model` - Embedding, convolution, gating, and the layer stack
//! - `error` - Crate-wide error type
//!
//! ## Example
//!
//! ```no_run
//! use engram::{Engram, EngramConfig};
//! use ndarray::{Array2, Array4};
//!
//! let config = EngramConfig::small();
//! let engram = Engram::new(config.clone()).unwrap();
//!
//! let token_ids = Array2::<i64>::zeros((1, 8));
//! let hidden = Array4::<f64>::zeros((1, 8, config.hc_mult, config.hidden_size));
//!
//! let out = engram.forward(1, &hidden, &token_ids).unwrap();
//! assert_eq!(out.dim(), (1, 8, config.hc_mult, config.hidden_size));
//! ```

pub mod error;
pub mod hash;
pub mod model;
pub mod tokenizer;

// Re-exports for convenience
pub use error::{EngramError, Result};
pub use hash::{NgramHashMapping, PrimeAllocator};
pub use model::{
    BackboneBlock, Engram, EngramConfig, EngramLayer, EngramPlan, IdentityBackbone,
    MultiHeadEmbedding, RmsNorm, ShortConv,
};
pub use tokenizer::CompressedTokenizer;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Largest n-gram order hashed at each position
    pub const MAX_NGRAM_SIZE: usize = 3;

    /// Target vocabulary size for every n-gram order
    pub const TARGET_VOCAB_SIZE: usize = 4096;

    /// Hash heads per n-gram order
    pub const HEADS_PER_ORDER: usize = 2;

    /// Embedding dimension per head
    pub const EMBED_DIM_PER_ORDER: usize = 32;

    /// Backbone hidden size
    pub const HIDDEN_SIZE: usize = 256;

    /// Number of hyper-connection branches
    pub const HC_MULT: usize = 2;

    /// Token id used to fill missing left context
    pub const PAD_ID: i64 = 0;

    /// Seed for multiplier generation and weight initialization
    pub const RNG_SEED: u64 = 42;

    /// Depthwise convolution kernel size
    pub const CONV_KERNEL_SIZE: usize = 4;

    /// Floor inside the sign-preserving square root of the gate logit
    pub const GATE_EPS: f64 = 1e-6;

    /// Epsilon for RMS normalization
    pub const RMS_EPS: f64 = 1e-6;

    /// Standard deviation for embedding table initialization
    pub const EMBED_INIT_STD: f64 = 0.02;
}
