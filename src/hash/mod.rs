//! Deterministic n-gram hashing
//!
//! Prime allocation and the per-layer hash mapping that turns token
//! sequences into bounded per-head indices.

mod mapping;
mod primes;

pub use mapping::{NgramHashMapping, LAYER_SEED_STRIDE};
pub use primes::PrimeAllocator;
