//! Embedding model seam.
//!
//! The store never computes embeddings itself; it calls through the
//! [`Embedder`] trait and serializes the resulting float vectors into the
//! little-endian f32 byte layout the vector extension expects.
//!
//! [`HashEmbedder`] is a deterministic, dependency-free implementation
//! (hashed bag-of-words) suitable for tests and offline smoke runs. Real
//! deployments plug in a model-backed implementation.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A text embedding model with a fixed output dimension.
///
/// Implementations must be deterministic in their output length: the vector
/// index is declared with the dimensionality probed at enable time, and every
/// later vector must match it.
pub trait Embedder: Send + Sync {
    /// Embed a batch of documents.
    fn embed_documents(&self, texts: &[String]) -> Vec<Vec<f32>>;

    /// Embed a single query string.
    fn embed_query(&self, text: &str) -> Vec<f32>;
}

/// Serialize a float vector into the byte layout stored in `embedding`
/// columns (little-endian f32, no header).
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Parse an `embedding` blob back into floats. Trailing partial floats are
/// ignored.
pub fn vector_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Deterministic bag-of-words embedder.
///
/// Each lowercased alphanumeric token is hashed into one of `dim` buckets;
/// the resulting count vector is L2-normalized. Two texts sharing tokens get
/// correlated vectors, which is enough for index plumbing and tests.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    /// Output dimension of every vector this embedder produces.
    pub fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dim;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Embedder for HashEmbedder {
    fn embed_documents(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn embed_query(&self, text: &str) -> Vec<f32> {
        self.embed(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_round_trip() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(vector_from_bytes(&vector_to_bytes(&v)), v);
    }

    #[test]
    fn test_hash_embedder_deterministic() {
        let emb = HashEmbedder::new(32);
        let a = emb.embed_query("machine learning is great");
        let b = emb.embed_query("machine learning is great");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_hash_embedder_normalized() {
        let emb = HashEmbedder::new(16);
        let v = emb.embed_query("some text to embed");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedder_empty_text() {
        let emb = HashEmbedder::new(8);
        let v = emb.embed_query("");
        assert_eq!(v, vec![0.0; 8]);
    }

    #[test]
    fn test_embed_documents_batch() {
        let emb = HashEmbedder::new(16);
        let out = emb.embed_documents(&["one".to_string(), "two".to_string()]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], emb.embed_query("one"));
    }
}
