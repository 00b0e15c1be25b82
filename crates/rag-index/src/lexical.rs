//! BM25 lexical index.

use std::collections::HashMap;

use tracing::debug;

use rag_core::{rank_descending, ChunkId, ScoreMap};

/// BM25 parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    /// Term frequency saturation.
    pub k1: f32,
    /// Length normalization.
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

#[derive(Debug, Clone, Copy)]
struct Posting {
    doc: u32,
    tf: u32,
}

/// Inverted index with BM25 scoring.
///
/// Postings lists are sorted by chunk id. IDF uses the non-negative form
/// `ln(1 + (N - df + 0.5) / (df + 0.5))`, so a term that occurs in most
/// chunks still scores above chunks that lack it.
#[derive(Debug, Clone)]
pub struct LexicalIndex {
    params: Bm25Params,
    postings: HashMap<String, Vec<Posting>>,
    doc_lengths: Vec<u32>,
    avg_doc_length: f32,
}

impl LexicalIndex {
    /// Build an index with the default BM25 parameters.
    pub fn build(tokens_per_chunk: &[Vec<String>]) -> Self {
        Self::with_params(tokens_per_chunk, Bm25Params::default())
    }

    /// Build an index with custom BM25 parameters.
    pub fn with_params(tokens_per_chunk: &[Vec<String>], params: Bm25Params) -> Self {
        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
        let mut doc_lengths = Vec::with_capacity(tokens_per_chunk.len());

        for (doc, tokens) in tokens_per_chunk.iter().enumerate() {
            let mut tf: HashMap<&str, u32> = HashMap::new();
            for token in tokens {
                *tf.entry(token.as_str()).or_default() += 1;
            }
            for (term, count) in tf {
                postings.entry(term.to_string()).or_default().push(Posting {
                    doc: doc as u32,
                    tf: count,
                });
            }
            doc_lengths.push(tokens.len() as u32);
        }

        // Docs were visited in order, so each list is already sorted.
        let total: u64 = doc_lengths.iter().map(|&l| u64::from(l)).sum();
        let avg_doc_length = if doc_lengths.is_empty() {
            0.0
        } else {
            total as f32 / doc_lengths.len() as f32
        };

        debug!(
            "Built lexical index: {} chunks, {} terms, avgdl={:.1}",
            doc_lengths.len(),
            postings.len(),
            avg_doc_length
        );

        Self {
            params,
            postings,
            doc_lengths,
            avg_doc_length,
        }
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.doc_lengths.len()
    }

    /// Whether the index holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.doc_lengths.is_empty()
    }

    /// Number of distinct terms.
    pub fn vocabulary_size(&self) -> usize {
        self.postings.len()
    }

    /// Inverse document frequency of a term; 0 for unknown terms.
    pub fn idf(&self, term: &str) -> f32 {
        let df = self.postings.get(term).map_or(0, Vec::len);
        if df == 0 {
            return 0.0;
        }
        let n = self.len() as f32;
        let df = df as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    fn term_weight(&self, idf: f32, tf: u32, doc: usize) -> f32 {
        let tf = tf as f32;
        let dl = self.doc_lengths[doc] as f32;
        let norm = if self.avg_doc_length > 0.0 {
            1.0 - self.params.b + self.params.b * dl / self.avg_doc_length
        } else {
            1.0
        };
        idf * tf * (self.params.k1 + 1.0) / (tf + self.params.k1 * norm)
    }

    /// BM25 score of every chunk, indexed by chunk id.
    ///
    /// Repeated query tokens contribute once per occurrence.
    pub fn scores<S: AsRef<str>>(&self, query_tokens: &[S]) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.len()];

        for token in query_tokens {
            let Some(postings) = self.postings.get(token.as_ref()) else {
                continue;
            };
            let idf = self.idf(token.as_ref());
            for posting in postings {
                let doc = posting.doc as usize;
                scores[doc] += self.term_weight(idf, posting.tf, doc);
            }
        }

        scores
    }

    /// Score map over the whole corpus.
    pub fn score<S: AsRef<str>>(&self, query_tokens: &[S]) -> ScoreMap {
        self.scores(query_tokens)
            .into_iter()
            .enumerate()
            .map(|(i, s)| (ChunkId::from_index(i), s))
            .collect()
    }

    /// Score map restricted to the given chunks. Unknown ids are skipped.
    pub fn score_subset<S: AsRef<str>>(&self, query_tokens: &[S], ids: &[ChunkId]) -> ScoreMap {
        let mut scores = ScoreMap::with_capacity(ids.len());

        for &id in ids {
            if id.index() >= self.len() {
                continue;
            }
            let mut total = 0.0f32;
            for token in query_tokens {
                let Some(postings) = self.postings.get(token.as_ref()) else {
                    continue;
                };
                if let Ok(pos) = postings.binary_search_by_key(&id.0, |p| p.doc) {
                    total += self.term_weight(self.idf(token.as_ref()), postings[pos].tf, id.index());
                }
            }
            scores.insert(id, total);
        }

        scores
    }

    /// The `k` best chunks, best first, ties by ascending id.
    ///
    /// Returns every chunk when the corpus is smaller than `k`, including
    /// chunks that score zero. An empty query yields an empty result.
    pub fn top_k<S: AsRef<str>>(&self, query_tokens: &[S], k: usize) -> Vec<(ChunkId, f32)> {
        if query_tokens.is_empty() || k == 0 || self.is_empty() {
            return Vec::new();
        }

        let mut entries: Vec<(ChunkId, f32)> = self
            .scores(query_tokens)
            .into_iter()
            .enumerate()
            .map(|(i, s)| (ChunkId::from_index(i), s))
            .collect();

        if k < entries.len() {
            entries.select_nth_unstable_by(k - 1, |a, b| {
                b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
            });
            entries.truncate(k);
        }

        rank_descending(&mut entries);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(docs: &[&[&str]]) -> Vec<Vec<String>> {
        docs.iter()
            .map(|d| d.iter().map(|t| t.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_term_presence_beats_absence() {
        let index = LexicalIndex::build(&tokens(&[&["a", "b"], &["b", "c"], &["a", "c"]]));
        let scores = index.scores(&["a"]);

        assert!(scores[0] > scores[1]);
        assert!(scores[2] > scores[1]);
        assert_eq!(scores[1], 0.0);
        assert_eq!(scores[0], scores[2]);
    }

    #[test]
    fn test_score_map_covers_corpus() {
        let index = LexicalIndex::build(&tokens(&[&["a"], &["b"], &["c"]]));
        let map = index.score(&["a"]);
        assert_eq!(map.len(), 3);
        assert!(map[&ChunkId(0)] > 0.0);
        assert_eq!(map[&ChunkId(2)], 0.0);
    }

    #[test]
    fn test_score_subset_matches_full() {
        let index = LexicalIndex::build(&tokens(&[
            &["rust", "search", "engine"],
            &["search", "search", "index"],
            &["python", "script"],
        ]));
        let query = ["search", "rust"];
        let full = index.scores(&query);
        let subset = index.score_subset(&query, &[ChunkId(0), ChunkId(1), ChunkId(9)]);

        assert_eq!(subset.len(), 2);
        assert_eq!(subset[&ChunkId(0)], full[0]);
        assert_eq!(subset[&ChunkId(1)], full[1]);
    }

    #[test]
    fn test_term_frequency_and_length() {
        let index = LexicalIndex::build(&tokens(&[
            &["x", "x", "y"],
            &["x", "y", "z"],
            &["w"],
        ]));
        let scores = index.scores(&["x"]);
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn test_top_k_order_and_ties() {
        let index = LexicalIndex::build(&tokens(&[
            &["b"],
            &["a", "q"],
            &["a", "q"],
            &["a", "a"],
            &["c"],
        ]));
        let top = index.top_k(&["a"], 3);
        let ids: Vec<u32> = top.iter().map(|(id, _)| id.0).collect();
        assert_eq!(ids, vec![3, 1, 2]);
        assert!(top[0].1 > top[1].1);
        assert_eq!(top[1].1, top[2].1);
    }

    #[test]
    fn test_top_k_small_corpus_returns_all() {
        let index = LexicalIndex::build(&tokens(&[&["a"], &["b"]]));
        let top = index.top_k(&["a"], 10);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0, ChunkId(0));
        assert_eq!(top[1], (ChunkId(1), 0.0));
    }

    #[test]
    fn test_empty_query_and_empty_index() {
        let index = LexicalIndex::build(&tokens(&[&["a"], &["b"]]));
        let empty: [&str; 0] = [];
        assert!(index.top_k(&empty, 5).is_empty());
        assert!(index.scores(&empty).iter().all(|&s| s == 0.0));

        let empty_index = LexicalIndex::build(&[]);
        assert!(empty_index.is_empty());
        assert!(empty_index.top_k(&["a"], 5).is_empty());
    }

    #[test]
    fn test_idf_positive() {
        let index = LexicalIndex::build(&tokens(&[&["a"], &["a"], &["a", "b"]]));
        assert!(index.idf("a") > 0.0);
        assert!(index.idf("b") > index.idf("a"));
        assert_eq!(index.idf("missing"), 0.0);
        assert_eq!(index.vocabulary_size(), 2);
    }
}
