use std::collections::{BTreeSet, HashMap};
use std::cmp::Ordering;

use proptest::prelude::*;
use rag_query::fuse;
use rag_core::{ChunkId, ScoreMap};

fn score_map() -> impl Strategy<Value = HashMap<u32, f32>> {
    prop::collection::hash_map(0u32..64, -10.0f32..10.0, 0..32)
}

fn to_map(raw: &HashMap<u32, f32>) -> ScoreMap {
    raw.iter().map(|(&id, &s)| (ChunkId(id), s)).collect()
}

proptest! {
    #[test]
    fn fused_ids_are_the_union(dense in score_map(), sparse in score_map(), alpha in 0.0f32..=1.0) {
        let fused = fuse(&to_map(&dense), &to_map(&sparse), alpha, usize::MAX);

        let ids: BTreeSet<u32> = fused.iter().map(|(id, _)| id.0).collect();
        let union: BTreeSet<u32> = dense.keys().chain(sparse.keys()).copied().collect();
        prop_assert_eq!(fused.len(), ids.len());
        prop_assert_eq!(ids, union);
    }

    #[test]
    fn fused_score_is_the_weighted_sum(dense in score_map(), sparse in score_map(), alpha in 0.0f32..=1.0) {
        let fused = fuse(&to_map(&dense), &to_map(&sparse), alpha, usize::MAX);

        for (id, score) in fused {
            let d = dense.get(&id.0).copied().unwrap_or(0.0);
            let s = sparse.get(&id.0).copied().unwrap_or(0.0);
            let expected = alpha * d + (1.0 - alpha) * s;
            prop_assert_eq!(score.to_bits(), expected.to_bits(), "id {}: {} != {}", id, score, expected);
        }
    }

    #[test]
    fn fused_order_is_descending_with_id_ties(
        dense in score_map(),
        sparse in score_map(),
        alpha in prop_oneof![Just(0.0f32), Just(0.5f32), Just(1.0f32), 0.0f32..=1.0],
    ) {
        let fused = fuse(&to_map(&dense), &to_map(&sparse), alpha, usize::MAX);

        for pair in fused.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let in_order = match a.1.total_cmp(&b.1) {
                Ordering::Greater => true,
                Ordering::Equal => a.0 < b.0,
                Ordering::Less => false,
            };
            prop_assert!(in_order, "{:?} before {:?}", a, b);
        }
    }

    #[test]
    fn fusion_is_deterministic(dense in score_map(), sparse in score_map(), alpha in 0.0f32..=1.0, limit in 1usize..48) {
        let first = fuse(&to_map(&dense), &to_map(&sparse), alpha, limit);
        let again = fuse(&to_map(&dense), &to_map(&sparse), alpha, limit);
        prop_assert_eq!(&first, &again);

        // Same contents, different insertion order
        let mut entries: Vec<(u32, f32)> = dense.iter().map(|(&k, &v)| (k, v)).collect();
        entries.sort_by_key(|(k, _)| std::cmp::Reverse(*k));
        let rebuilt: ScoreMap = entries.into_iter().map(|(k, v)| (ChunkId(k), v)).collect();
        prop_assert_eq!(&first, &fuse(&rebuilt, &to_map(&sparse), alpha, limit));
    }

    #[test]
    fn truncation_keeps_the_best_prefix(dense in score_map(), sparse in score_map(), alpha in 0.0f32..=1.0, limit in 0usize..48) {
        let full = fuse(&to_map(&dense), &to_map(&sparse), alpha, usize::MAX);
        let cut = fuse(&to_map(&dense), &to_map(&sparse), alpha, limit);

        prop_assert_eq!(cut.len(), full.len().min(limit));
        prop_assert_eq!(&cut[..], &full[..cut.len()]);
    }
}
