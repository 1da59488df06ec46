//! Embedding-model adapter (§1 out-of-scope external collaborator).
//!
//! The core only depends on the [`Embedder`] trait. [`HashEmbedder`] is a
//! deterministic, model-free fallback so the engine is usable without any
//! external model file; a real deployment swaps in a model-backed
//! implementation (see the `onnx-embeddings` feature) behind the same trait.

#[cfg(feature = "onnx-embeddings")]
pub mod onnx;

use crate::error::Result;

/// Embeds text into fixed-dimension vectors for the Vector Index.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Batch embedding; the default just calls [`Embedder::embed`] per item,
    /// overridden by implementations that can batch on a model runtime.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize;
}

/// Deterministic, model-free embedder: hashes overlapping word shingles into
/// buckets of a fixed-dimension vector, then L2-normalizes. Not semantically
/// meaningful, but stable, dependency-free, and satisfies every Vector Index
/// invariant (fixed dimension, normalized for inner-product-as-cosine).
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0f32; self.dimension];
        for word in text.split_whitespace() {
            let bucket = (fnv1a(word.as_bytes()) as usize) % self.dimension;
            let sign = if fnv1a(&[word.as_bytes(), b"#sign"].concat()) & 1 == 0 {
                1.0
            } else {
                -1.0
            };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_configured_dimension() {
        let embedder = HashEmbedder::new(32);
        let v = embedder.embed("hello world").unwrap();
        assert_eq!(v.len(), 32);
    }

    #[test]
    fn is_deterministic() {
        let embedder = HashEmbedder::new(16);
        assert_eq!(
            embedder.embed("same text").unwrap(),
            embedder.embed("same text").unwrap()
        );
    }

    #[test]
    fn is_l2_normalized_for_nonempty_text() {
        let embedder = HashEmbedder::new(16);
        let v = embedder.embed("a handful of words here").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}
