//! Error types shared across the crate.

use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, EngramError>;

/// Errors raised during construction, vocabulary handling, or input
/// validation. Forward passes only fail on malformed inputs; everything
/// structural is rejected at build time.
#[derive(Error, Debug)]
pub enum EngramError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("vocabulary I/O error: {0}")]
    VocabIo(#[from] std::io::Error),

    #[error("vocabulary parse error: {0}")]
    VocabParse(#[from] serde_json::Error),

    #[error("prime search exhausted after {attempts} candidates starting at {start}")]
    PrimesExhausted { start: u64, attempts: usize },

    #[error("shape mismatch in {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("token id {id} outside [0, {bound}) at batch {batch}, position {pos}")]
    TokenOutOfRange {
        id: i64,
        bound: usize,
        batch: usize,
        pos: usize,
    },

    #[error("negative token id {id} at batch {batch}, position {pos} (sentinels must not reach the forward pass)")]
    NegativeTokenId { id: i64, batch: usize, pos: usize },

    #[error("no layer configured for layer id {layer_id}")]
    UnknownLayer { layer_id: usize },
}
