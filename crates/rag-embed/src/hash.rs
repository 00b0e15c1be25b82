//! Feature-hashing embedder.
//!
//! Needs no model files. Each lowercased word is hashed with blake3 into one
//! of `dimension` buckets with a hash-derived sign, and the bag is
//! L2-normalized. Texts sharing words land close together, which is enough
//! for offline indexing, tests and smoke runs.

use async_trait::async_trait;
use unicode_segmentation::UnicodeSegmentation;

use rag_core::{Embedder, RagError, Result};

use crate::session::l2_normalize;

/// Deterministic bag-of-words embedder.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    /// Create an embedder producing vectors of the given dimension.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::invalid_config("embedding.dimension must be >= 1"));
        }
        Ok(Self { dimension })
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for word in text.unicode_words() {
            let hash = blake3::hash(word.to_lowercase().as_bytes());
            let bytes = hash.as_bytes();

            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&bytes[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };

            vector[index] += sign;
        }

        l2_normalize(vector)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_one(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_normalized_output() {
        let embedder = HashEmbedder::new(64).unwrap();
        let embeddings = embedder
            .embed_documents(&["Hello world", "Rust is great"])
            .await
            .unwrap();

        assert_eq!(embeddings.len(), 2);
        for e in &embeddings {
            assert_eq!(e.len(), 64);
            assert!((norm(e) - 1.0).abs() < 1e-5);
        }
    }

    #[tokio::test]
    async fn test_deterministic_and_case_insensitive() {
        let embedder = HashEmbedder::new(128).unwrap();
        let a = embedder.embed_query("Consistent Input").await.unwrap();
        let b = embedder.embed_query("consistent input").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_shared_words_are_closer() {
        let embedder = HashEmbedder::new(256).unwrap();
        let query = embedder.embed_query("hybrid retrieval").await.unwrap();
        let near = embedder
            .embed_query("hybrid retrieval with reranking")
            .await
            .unwrap();
        let far = embedder.embed_query("banana bread recipe").await.unwrap();
        assert!(dot(&query, &near) > dot(&query, &far));
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let embedder = HashEmbedder::new(16).unwrap();
        let v = embedder.embed_query("").await.unwrap();
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(HashEmbedder::new(0).is_err());
    }
}
