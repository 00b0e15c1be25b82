//! Exact inner-product search over normalized embeddings.

use ndarray::{Array2, ArrayView1};
use tracing::debug;

use rag_core::{rank_descending, ChunkId, RagError, Result};

/// Dense vector index.
///
/// Rows are chunk embeddings in id order. Vectors are expected to be
/// L2-normalized, so the inner product equals cosine similarity.
#[derive(Debug, Clone)]
pub struct DenseIndex {
    dimension: usize,
    vectors: Array2<f32>,
}

impl DenseIndex {
    /// Build an index from one vector per chunk.
    pub fn build(dimension: usize, embeddings: &[Vec<f32>]) -> Result<Self> {
        let mut flat = Vec::with_capacity(embeddings.len() * dimension);
        for vector in embeddings {
            if vector.len() != dimension {
                return Err(RagError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            flat.extend_from_slice(vector);
        }

        let vectors = Array2::from_shape_vec((embeddings.len(), dimension), flat)
            .map_err(|e| RagError::internal(format!("embedding matrix shape: {}", e)))?;

        debug!(
            "Built dense index: {} vectors, dimension {}",
            embeddings.len(),
            dimension
        );

        Ok(Self { dimension, vectors })
    }

    /// Embedding dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of indexed vectors.
    pub fn len(&self) -> usize {
        self.vectors.nrows()
    }

    /// Whether the index holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `k` nearest chunks by inner product, best first.
    ///
    /// An empty index answers with no hits for any query. Otherwise the query
    /// must match the index dimension.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(ChunkId, f32)>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        if query.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let scores = self.vectors.dot(&ArrayView1::from(query));

        let mut hits: Vec<(ChunkId, f32)> = scores
            .iter()
            .enumerate()
            .map(|(i, &s)| (ChunkId::from_index(i), s))
            .collect();

        rank_descending(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> DenseIndex {
        DenseIndex::build(
            2,
            &[
                vec![1.0, 0.0],
                vec![0.0, 1.0],
                vec![0.6, 0.8],
                vec![0.6, 0.8],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_search_orders_by_inner_product() {
        let hits = index().search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0], (ChunkId(0), 1.0));
        assert_eq!(hits[1].0, ChunkId(2));
        assert!((hits[1].1 - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_ties_by_ascending_id() {
        let hits = index().search(&[0.0, 1.0], 3).unwrap();
        let ids: Vec<u32> = hits.iter().map(|(id, _)| id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_k_larger_than_index() {
        let hits = index().search(&[1.0, 0.0], 50).unwrap();
        assert_eq!(hits.len(), 4);
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let err = index().search(&[1.0, 0.0, 0.0], 2).unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_build_rejects_ragged_vectors() {
        let err = DenseIndex::build(2, &[vec![1.0, 0.0], vec![1.0]]).unwrap_err();
        assert_eq!(err.error_code(), "DIMENSION_MISMATCH");
    }

    #[test]
    fn test_empty_index() {
        let empty = DenseIndex::build(8, &[]).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.dimension(), 8);
        assert!(empty.search(&[1.0; 3], 5).unwrap().is_empty());
    }
}
