//! Vocabulary compression
//!
//! Many vocabularies carry ids whose decoded text differs only in case,
//! accents, or surrounding whitespace. Merging those ids behind a
//! normalized key shrinks the id space the hash layer has to cover,
//! without touching the caller's original tokenizer.
//!
//! # Example
//!
//! ```rust
//! use engram::CompressedTokenizer;
//!
//! let vocab = vec![
//!     "Hello".to_string(),
//!     "hello".to_string(),
//!     "world".to_string(),
//! ];
//! let tokenizer = CompressedTokenizer::from_vocab(&vocab);
//!
//! assert_eq!(tokenizer.compressed_size(), 2);
//! assert_eq!(tokenizer.compress_id(0).unwrap(), tokenizer.compress_id(1).unwrap());
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::{EngramError, Result};

/// Marker produced by decoders for byte sequences with no text form
const REPLACEMENT: char = '\u{FFFD}';

/// Prefix keeping whitespace-only and empty tokens apart from each other
const WHITESPACE_SENTINEL: char = '\u{2400}';

/// Immutable original-id to compressed-id lookup table.
///
/// Built once at model construction; `compress` is read-only afterwards
/// and safe to share across threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedTokenizer {
    /// Entry per original id, each value in `[0, compressed_size)`
    table: Vec<usize>,
    compressed_size: usize,
}

impl CompressedTokenizer {
    /// Build the lookup table from a decode function and a raw
    /// token-string function.
    ///
    /// Ids whose decoded text normalizes to the same key share one
    /// compressed id, assigned in first-encounter order. Ids that decode
    /// to the undecodable-byte marker are grouped by their raw token
    /// string instead, so unrelated byte tokens do not collapse together.
    pub fn build<D, S>(vocab_size: usize, decode: D, token_to_string: S) -> Self
    where
        D: Fn(usize) -> String,
        S: Fn(usize) -> String,
    {
        let mut table = vec![0usize; vocab_size];
        let mut key_to_id: HashMap<String, usize> = HashMap::new();

        for id in 0..vocab_size {
            let decoded = decode(id);
            let key = if decoded.contains(REPLACEMENT) {
                token_to_string(id)
            } else {
                normalize(&decoded)
            };
            let next = key_to_id.len();
            table[id] = *key_to_id.entry(key).or_insert(next);
        }

        let compressed_size = key_to_id.len();
        tracing::info!(
            original = vocab_size,
            compressed = compressed_size,
            "compressed vocabulary"
        );

        Self {
            table,
            compressed_size,
        }
    }

    /// Build from a plain list of token strings
    pub fn from_vocab(tokens: &[String]) -> Self {
        Self::build(tokens.len(), |id| tokens[id].clone(), |id| tokens[id].clone())
    }

    /// Build from a JSON file holding an array of token strings.
    ///
    /// Load failures are fatal and propagate with their cause; there is
    /// no retry.
    pub fn from_vocab_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let tokens: Vec<String> = serde_json::from_reader(BufReader::new(file))?;
        tracing::info!(
            path = %path.as_ref().display(),
            tokens = tokens.len(),
            "loaded vocabulary"
        );
        Ok(Self::from_vocab(&tokens))
    }

    /// Compress a batch of token ids elementwise.
    ///
    /// Negative values are sentinels (ignore-label markers and the like)
    /// and pass through unchanged. Non-negative ids outside the original
    /// vocabulary are rejected.
    pub fn compress(&self, ids: &Array2<i64>) -> Result<Array2<i64>> {
        let mut out = ids.clone();
        for ((b, t), &id) in ids.indexed_iter() {
            if id < 0 {
                continue;
            }
            let idx = id as usize;
            if idx >= self.table.len() {
                return Err(EngramError::TokenOutOfRange {
                    id,
                    bound: self.table.len(),
                    batch: b,
                    pos: t,
                });
            }
            out[[b, t]] = self.table[idx] as i64;
        }
        Ok(out)
    }

    /// Compress a single id; negative sentinels pass through
    pub fn compress_id(&self, id: i64) -> Result<i64> {
        if id < 0 {
            return Ok(id);
        }
        let idx = id as usize;
        if idx >= self.table.len() {
            return Err(EngramError::TokenOutOfRange {
                id,
                bound: self.table.len(),
                batch: 0,
                pos: 0,
            });
        }
        Ok(self.table[idx] as i64)
    }

    /// Size of the compressed id space
    pub fn compressed_size(&self) -> usize {
        self.compressed_size
    }

    /// Size of the original vocabulary
    pub fn original_size(&self) -> usize {
        self.table.len()
    }

    /// The full original-id to compressed-id table
    pub fn map(&self) -> &[usize] {
        &self.table
    }

    /// Save the lookup table as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Load a previously saved lookup table
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let tokenizer = serde_json::from_reader(BufReader::new(file))?;
        Ok(tokenizer)
    }
}

/// Normalization pipeline producing the grouping key for a decoded token:
/// NFKC, then NFD with combining marks stripped, lowercase, whitespace
/// runs collapsed to a single space. Tokens that normalize to nothing
/// keep their raw text behind a sentinel so distinct whitespace-only
/// tokens stay distinct.
fn normalize(text: &str) -> String {
    let nfkc: String = text.nfkc().collect();
    let stripped: String = nfkc.nfd().filter(|c| !is_combining_mark(*c)).collect();
    let lower = stripped.to_lowercase();
    let collapsed = lower.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.is_empty() {
        let mut key = String::with_capacity(text.len() + 1);
        key.push(WHITESPACE_SENTINEL);
        key.push_str(text);
        key
    } else {
        collapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn vocab(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_case_and_accent_merging() {
        let tokens = vocab(&["Cafe\u{301}", "café", "CAFE", "tea"]);
        let tokenizer = CompressedTokenizer::from_vocab(&tokens);

        assert_eq!(tokenizer.compressed_size(), 2);
        let a = tokenizer.compress_id(0).unwrap();
        assert_eq!(a, tokenizer.compress_id(1).unwrap());
        assert_eq!(a, tokenizer.compress_id(2).unwrap());
        assert_ne!(a, tokenizer.compress_id(3).unwrap());
    }

    #[test]
    fn test_first_encounter_order() {
        let tokens = vocab(&["b", "a", "B"]);
        let tokenizer = CompressedTokenizer::from_vocab(&tokens);

        assert_eq!(tokenizer.compress_id(0).unwrap(), 0);
        assert_eq!(tokenizer.compress_id(1).unwrap(), 1);
        assert_eq!(tokenizer.compress_id(2).unwrap(), 0);
    }

    #[test]
    fn test_whitespace_tokens_stay_distinct() {
        let tokens = vocab(&[" ", "  ", "\t", ""]);
        let tokenizer = CompressedTokenizer::from_vocab(&tokens);

        // Whitespace runs inside text collapse, but whole-whitespace
        // tokens must not merge with each other.
        assert_eq!(tokenizer.compressed_size(), 4);
    }

    #[test]
    fn test_whitespace_runs_collapse() {
        let tokens = vocab(&["a  b", "a b", "a\tb"]);
        let tokenizer = CompressedTokenizer::from_vocab(&tokens);
        assert_eq!(tokenizer.compressed_size(), 1);
    }

    #[test]
    fn test_undecodable_tokens_group_by_raw_string() {
        let tokenizer = CompressedTokenizer::build(
            3,
            |id| {
                if id < 2 {
                    "\u{FFFD}".to_string()
                } else {
                    "ok".to_string()
                }
            },
            |id| format!("<0x{:02X}>", id),
        );

        // The two undecodable ids have distinct raw strings and must not
        // merge.
        assert_eq!(tokenizer.compressed_size(), 3);
    }

    #[test]
    fn test_compression_never_increases() {
        let tokens = vocab(&["a", "b", "c", "A", "B"]);
        let tokenizer = CompressedTokenizer::from_vocab(&tokens);

        assert!(tokenizer.compressed_size() <= tokenizer.original_size());
        for &v in tokenizer.map() {
            assert!(v < tokenizer.compressed_size());
        }
    }

    #[test]
    fn test_compress_batch_with_sentinels() {
        let tokens = vocab(&["a", "A", "b"]);
        let tokenizer = CompressedTokenizer::from_vocab(&tokens);

        let ids = array![[0, 1, 2, -100]];
        let out = tokenizer.compress(&ids).unwrap();

        assert_eq!(out[[0, 0]], out[[0, 1]]);
        assert_eq!(out[[0, 3]], -100);
        for t in 0..3 {
            let v = out[[0, t]];
            assert!(v >= 0 && (v as usize) < tokenizer.compressed_size());
        }
    }

    #[test]
    fn test_compress_rejects_out_of_range() {
        let tokens = vocab(&["a", "b"]);
        let tokenizer = CompressedTokenizer::from_vocab(&tokens);

        let ids = array![[0, 5]];
        let err = tokenizer.compress(&ids).unwrap_err();
        assert!(matches!(err, EngramError::TokenOutOfRange { id: 5, .. }));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tokens = vocab(&["a", "A", "b", " "]);
        let tokenizer = CompressedTokenizer::from_vocab(&tokens);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab_map.json");
        tokenizer.save(&path).unwrap();

        let reloaded = CompressedTokenizer::load(&path).unwrap();
        assert_eq!(tokenizer, reloaded);
    }

    #[test]
    fn test_missing_vocab_file_is_fatal() {
        let err = CompressedTokenizer::from_vocab_file("/nonexistent/vocab.json").unwrap_err();
        assert!(matches!(err, EngramError::VocabIo(_)));
    }
}
