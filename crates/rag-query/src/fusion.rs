//! Weighted linear fusion of dense and lexical scores.

use std::collections::BTreeSet;

use rag_core::{rank_descending, ChunkId, ScoreMap};

/// Fuse dense and lexical score maps.
///
/// Every id present in either map is scored as
/// `alpha * dense + (1 - alpha) * sparse`, with 0.0 standing in for the side
/// that did not retrieve it. The result is sorted best first (ties by
/// ascending id) and truncated to `limit`.
pub fn fuse(dense: &ScoreMap, sparse: &ScoreMap, alpha: f32, limit: usize) -> Vec<(ChunkId, f32)> {
    let ids: BTreeSet<ChunkId> = dense.keys().chain(sparse.keys()).copied().collect();

    let mut fused: Vec<(ChunkId, f32)> = ids
        .into_iter()
        .map(|id| {
            let d = dense.get(&id).copied().unwrap_or(0.0);
            let s = sparse.get(&id).copied().unwrap_or(0.0);
            (id, alpha * d + (1.0 - alpha) * s)
        })
        .collect();

    rank_descending(&mut fused);
    fused.truncate(limit);
    fused
}

/// Collect a ranked list into a score map.
pub fn to_score_map(hits: &[(ChunkId, f32)]) -> ScoreMap {
    hits.iter().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(u32, f32)]) -> ScoreMap {
        entries.iter().map(|&(id, s)| (ChunkId(id), s)).collect()
    }

    fn dense() -> ScoreMap {
        map(&[(0, 0.9), (1, 0.5), (2, 0.1)])
    }

    fn sparse() -> ScoreMap {
        map(&[(1, 4.0), (3, 2.0)])
    }

    fn score_of(fused: &[(ChunkId, f32)], id: u32) -> f32 {
        fused
            .iter()
            .find(|(i, _)| i.0 == id)
            .map(|(_, s)| *s)
            .unwrap()
    }

    #[test]
    fn test_union_of_keys() {
        let fused = fuse(&dense(), &sparse(), 0.6, 100);
        let mut ids: Vec<u32> = fused.iter().map(|(id, _)| id.0).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_formula_at_several_alphas() {
        for alpha in [0.0f32, 0.5, 1.0, 0.6] {
            let fused = fuse(&dense(), &sparse(), alpha, 100);
            assert_eq!(score_of(&fused, 0), alpha * 0.9);
            assert_eq!(score_of(&fused, 1), alpha * 0.5 + (1.0 - alpha) * 4.0);
            assert_eq!(score_of(&fused, 2), alpha * 0.1);
            assert_eq!(score_of(&fused, 3), (1.0 - alpha) * 2.0);
        }
    }

    #[test]
    fn test_alpha_extremes_order() {
        let dense_only: Vec<u32> = fuse(&dense(), &sparse(), 1.0, 100)
            .iter()
            .map(|(id, _)| id.0)
            .collect();
        assert_eq!(dense_only, vec![0, 1, 2, 3]);

        let sparse_only: Vec<u32> = fuse(&dense(), &sparse(), 0.0, 100)
            .iter()
            .map(|(id, _)| id.0)
            .collect();
        assert_eq!(sparse_only, vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_truncation_and_ties() {
        let d = map(&[(4, 1.0), (2, 1.0), (7, 1.0)]);
        let fused = fuse(&d, &ScoreMap::new(), 0.5, 2);
        assert_eq!(fused, vec![(ChunkId(2), 0.5), (ChunkId(4), 0.5)]);
    }

    #[test]
    fn test_deterministic() {
        let a = fuse(&dense(), &sparse(), 0.37, 3);
        let b = fuse(&dense(), &sparse(), 0.37, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(fuse(&ScoreMap::new(), &ScoreMap::new(), 0.6, 10).is_empty());
    }
}
