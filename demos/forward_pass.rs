//! Walkthrough of the engram pipeline: vocabulary compression, n-gram
//! hashing, and a gated forward pass against a stand-in backbone.
//!
//! Run with: cargo run --example forward_pass

use anyhow::Result;
use engram::{BackboneBlock, CompressedTokenizer, Engram, EngramConfig, IdentityBackbone};
use ndarray::{Array2, Array4};
use ndarray_rand::rand_distr::StandardNormal;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    // A toy vocabulary with case duplicates the tokenizer will merge
    let vocab: Vec<String> = vec![
        "price", "Price", "breaks", "above", "Above", "resistance", "volume", "spikes", "then",
        "fades",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    let tokenizer = CompressedTokenizer::from_vocab(&vocab);
    println!(
        "vocabulary: {} ids -> {} compressed",
        tokenizer.original_size(),
        tokenizer.compressed_size()
    );

    let config = EngramConfig::small();
    let engram = Engram::with_tokenizer(config.clone(), tokenizer)?;

    let layer = &engram.layers()[0];
    println!(
        "layer {}: heads={}, moduli={:?}",
        layer.layer_id(),
        layer.mapping().total_heads(),
        layer.mapping().primes()
    );

    // "price breaks above resistance volume spikes"
    let raw = Array2::from_shape_vec((1, 6), vec![0, 2, 3, 5, 6, 7])?;
    let token_ids = engram.compress(&raw)?;

    let hashes = layer.mapping().hash_sequence(&token_ids);
    println!("hash tensor: {:?}", hashes.dim());

    // Random backbone state, two hyper-connection branches
    let mut rng = StdRng::seed_from_u64(1);
    let hidden = Array4::from_shape_fn(
        (1, 6, config.hc_mult, config.hidden_size),
        |_| {
            let z: f64 = rng.sample(StandardNormal);
            z
        },
    );

    let backbone = IdentityBackbone;
    let state = backbone.forward(&hidden);

    let residual = engram.forward(1, &state, &token_ids)?;
    let fused = &state + &residual;

    let norm = residual.iter().map(|v| v * v).sum::<f64>().sqrt();
    println!("residual contribution: {:?}, l2 norm {:.4}", residual.dim(), norm);
    println!("fused stream: {:?}", fused.dim());

    Ok(())
}
