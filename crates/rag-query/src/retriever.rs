//! Hybrid retriever: dense + lexical first stage, fusion, reranking.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use tokio::time::timeout;
use tracing::{debug, info};

use rag_core::{
    Chunk, ChunkId, ChunkMetadata, Embedder, Generation, PairwiseScorer, RagError, Result,
    RetrieverConfig, SearchHit, SearchResults, TextTokenizer,
};
use rag_index::{DenseIndex, LexicalIndex};

use crate::fusion::{fuse, to_score_map};
use crate::rerank::Reranker;

/// External capabilities a retriever is built with.
///
/// Shared across generations: a reload builds a new retriever with the same
/// capabilities over a new generation.
#[derive(Clone)]
pub struct Capabilities {
    pub embedder: Arc<dyn Embedder>,
    pub tokenizer: Arc<dyn TextTokenizer>,
    pub scorer: Option<Arc<dyn PairwiseScorer>>,
}

/// One loaded generation with its indices. Immutable after construction.
pub struct HybridRetriever {
    texts: Vec<String>,
    metadata: Vec<ChunkMetadata>,
    lexical: Arc<LexicalIndex>,
    dense: Arc<DenseIndex>,
    embedder: Arc<dyn Embedder>,
    tokenizer: Arc<dyn TextTokenizer>,
    reranker: Reranker,
    config: RetrieverConfig,
}

impl HybridRetriever {
    /// Build both indices over a generation.
    ///
    /// Fails with `CorpusInconsistent` if the generation is misaligned and
    /// with `DimensionMismatch` if its vectors do not match the embedder.
    pub fn new(
        generation: Generation,
        capabilities: &Capabilities,
        config: RetrieverConfig,
    ) -> Result<Self> {
        generation.validate()?;

        let dimension = capabilities.embedder.dimension();
        if !generation.is_empty() && generation.dimension != dimension {
            return Err(RagError::DimensionMismatch {
                expected: dimension,
                actual: generation.dimension,
            });
        }

        let lexical = LexicalIndex::build(&generation.tokens);
        let dense = DenseIndex::build(dimension, &generation.embeddings)?;

        let reranker = Reranker::new(capabilities.scorer.clone(), config.rerank_timeout());

        info!(
            "Retriever ready: {} chunks, {} terms, dim={}, reranker={}",
            generation.len(),
            lexical.vocabulary_size(),
            dimension,
            reranker.is_available()
        );

        Ok(Self {
            texts: generation.texts,
            metadata: generation.metadata,
            lexical: Arc::new(lexical),
            dense: Arc::new(dense),
            embedder: Arc::clone(&capabilities.embedder),
            tokenizer: Arc::clone(&capabilities.tokenizer),
            reranker,
            config,
        })
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Look up one chunk by id.
    pub fn chunk(&self, id: ChunkId) -> Option<Chunk> {
        let text = self.texts.get(id.index())?;
        let metadata = self.metadata.get(id.index())?;
        Some(Chunk {
            id,
            text: text.clone(),
            metadata: metadata.clone(),
        })
    }

    /// Answer a query with at most `topk` hits, best first.
    ///
    /// The lexical stage starts on the blocking pool right away; the dense
    /// stage embeds the query and then searches on the blocking pool too.
    pub async fn search(&self, query: &str, topk: NonZeroUsize) -> Result<SearchResults> {
        let start = Instant::now();

        let lexical_stage = {
            let lexical = Arc::clone(&self.lexical);
            let tokenizer = Arc::clone(&self.tokenizer);
            let query = query.to_string();
            let k = self.config.sparse_topk();
            tokio::task::spawn_blocking(move || {
                let tokens = tokenizer.tokenize(&query);
                let hits = lexical.top_k(&tokens, k);
                (tokens.len(), hits)
            })
        };

        let dense_stage = async {
            let embed_timeout = self.config.embed_timeout();
            let vector = timeout(embed_timeout, self.embedder.embed_query(query))
                .await
                .map_err(|_| RagError::EmbedTimeout {
                    timeout_ms: embed_timeout.as_millis() as u64,
                })??;

            let dense = Arc::clone(&self.dense);
            let k = self.config.dense_topk();
            tokio::task::spawn_blocking(move || dense.search(&vector, k))
                .await
                .map_err(stage_failed)?
        };

        let (dense_hits, lexical_hits) = tokio::join!(dense_stage, lexical_stage);
        let dense_hits = dense_hits?;
        let (query_tokens, lexical_hits) = lexical_hits.map_err(stage_failed)?;

        let candidates = fuse(
            &to_score_map(&dense_hits),
            &to_score_map(&lexical_hits),
            self.config.alpha(),
            self.config.rerank_cand(),
        );

        debug!(
            "First stage: {} dense, {} lexical ({} query tokens), {} fused candidates",
            dense_hits.len(),
            lexical_hits.len(),
            query_tokens,
            candidates.len()
        );

        let candidate_texts: Vec<&str> = candidates
            .iter()
            .map(|(id, _)| self.texts[id.index()].as_str())
            .collect();

        let outcome = self
            .reranker
            .rerank(query, &candidate_texts, topk.get())
            .await;

        let results: Vec<SearchHit> = outcome
            .order
            .iter()
            .enumerate()
            .map(|(rank, &local)| {
                let (id, score) = candidates[local];
                SearchHit {
                    rank: rank as u32 + 1,
                    id,
                    score,
                    rerank_score: outcome.scores.as_ref().map(|s| s[local]),
                    text: self.texts[id.index()].clone(),
                    metadata: self.metadata[id.index()].clone(),
                }
            })
            .collect();

        let latency_ms = start.elapsed().as_millis() as u64;

        info!(
            "Search complete: {} results in {}ms (rerank: {:?})",
            results.len(),
            latency_ms,
            outcome.mode
        );

        Ok(SearchResults {
            query: query.to_string(),
            total_results: results.len(),
            latency_ms,
            rerank: outcome.mode,
            results,
        })
    }
}

fn stage_failed(e: tokio::task::JoinError) -> RagError {
    RagError::internal(format!("Search stage failed: {}", e))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use rag_core::{ExecutionMode, FallbackReason, RerankMode, SearchConfig};

    /// Returns a fixed query vector, optionally after a delay.
    pub(crate) struct FixedEmbedder {
        pub query: Vec<f32>,
        pub delay: Duration,
    }

    impl FixedEmbedder {
        pub(crate) fn new(query: Vec<f32>) -> Self {
            Self {
                query,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| self.query.clone()).collect())
        }

        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.query.clone())
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    pub(crate) struct WhitespaceTokenizer;

    impl TextTokenizer for WhitespaceTokenizer {
        fn tokenize(&self, text: &str) -> Vec<String> {
            text.split_whitespace().map(str::to_lowercase).collect()
        }
    }

    /// Scores local index `i` as `i`, reversing the fused order.
    struct ReverseScorer;

    #[async_trait]
    impl PairwiseScorer for ReverseScorer {
        async fn score(&self, _query: &str, texts: &[&str], _mode: ExecutionMode) -> Result<Vec<f32>> {
            Ok((0..texts.len()).map(|i| i as f32).collect())
        }

        fn name(&self) -> &str {
            "reverse"
        }
    }

    /// Tokenizer that waits for the embedder before tokenizing.
    struct RendezvousTokenizer {
        embedded: std::sync::Mutex<mpsc::Receiver<()>>,
        overlapped: AtomicBool,
    }

    impl TextTokenizer for RendezvousTokenizer {
        fn tokenize(&self, text: &str) -> Vec<String> {
            let seen = self
                .embedded
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5))
                .is_ok();
            self.overlapped.store(seen, Ordering::SeqCst);
            WhitespaceTokenizer.tokenize(text)
        }
    }

    /// Signals the tokenizer as soon as the query is embedded.
    struct SignallingEmbedder {
        embedded: mpsc::Sender<()>,
    }

    #[async_trait]
    impl Embedder for SignallingEmbedder {
        async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            let _ = self.embedded.send(());
            Ok(vec![1.0, 0.0])
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    struct FailingScorer;

    #[async_trait]
    impl PairwiseScorer for FailingScorer {
        async fn score(&self, _query: &str, _texts: &[&str], _mode: ExecutionMode) -> Result<Vec<f32>> {
            Err(RagError::scorer("inference failed"))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    pub(crate) fn generation(texts: &[&str], embeddings: &[[f32; 2]]) -> Generation {
        let tokenizer = WhitespaceTokenizer;
        Generation {
            dimension: 2,
            texts: texts.iter().map(|t| t.to_string()).collect(),
            metadata: texts
                .iter()
                .enumerate()
                .map(|(i, t)| ChunkMetadata::new("doc.txt", "doc.txt", i as u32, t))
                .collect(),
            tokens: texts.iter().map(|t| tokenizer.tokenize(t)).collect(),
            embeddings: embeddings.iter().map(|e| e.to_vec()).collect(),
        }
    }

    fn five_chunks() -> Generation {
        generation(
            &["alpha", "beta", "gamma", "x marks", "x x"],
            &[[1.0, 0.0], [0.8, 0.6], [0.6, 0.8], [0.0, 1.0], [0.0, 1.0]],
        )
    }

    fn capabilities(scorer: Option<Arc<dyn PairwiseScorer>>) -> Capabilities {
        Capabilities {
            embedder: Arc::new(FixedEmbedder::new(vec![1.0, 0.0])),
            tokenizer: Arc::new(WhitespaceTokenizer),
            scorer,
        }
    }

    fn config(dense_topk: usize, sparse_topk: usize, rerank_cand: usize) -> RetrieverConfig {
        SearchConfig {
            alpha: 0.6,
            dense_topk,
            sparse_topk,
            rerank_cand,
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    fn topk(k: usize) -> NonZeroUsize {
        NonZeroUsize::new(k).unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_reversed_rerank() {
        let generation = five_chunks();

        // Expected candidates from the public index and fusion APIs
        let dense = DenseIndex::build(2, &generation.embeddings).unwrap();
        let lexical = LexicalIndex::build(&generation.tokens);
        let candidates = fuse(
            &to_score_map(&dense.search(&[1.0, 0.0], 3).unwrap()),
            &to_score_map(&lexical.top_k(&["x"], 3)),
            0.6,
            4,
        );
        assert_eq!(candidates.len(), 4);

        let retriever = HybridRetriever::new(
            generation.clone(),
            &capabilities(Some(Arc::new(ReverseScorer))),
            config(3, 3, 4),
        )
        .unwrap();

        let results = retriever.search("x", topk(2)).await.unwrap();
        let ids: Vec<ChunkId> = results.results.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![candidates[3].0, candidates[2].0]);
        assert_eq!(results.rerank, RerankMode::Scored);
        assert_eq!(results.results[0].rank, 1);
        assert_eq!(
            results.results[0].text,
            generation.texts[candidates[3].0.index()]
        );
        assert_eq!(results.results[1].score, candidates[2].1);

        let pairs = results.pairs();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, generation.texts[candidates[3].0.index()]);
        assert_eq!(pairs[1].1, &generation.metadata[candidates[2].0.index()]);
    }

    #[tokio::test]
    async fn test_lexical_stage_overlaps_embedding() {
        let (tx, rx) = mpsc::channel();
        let tokenizer = Arc::new(RendezvousTokenizer {
            embedded: std::sync::Mutex::new(rx),
            overlapped: AtomicBool::new(false),
        });
        let caps = Capabilities {
            embedder: Arc::new(SignallingEmbedder { embedded: tx }),
            tokenizer: tokenizer.clone(),
            scorer: None,
        };

        let retriever = HybridRetriever::new(five_chunks(), &caps, config(3, 3, 4)).unwrap();
        let results = retriever.search("x", topk(3)).await.unwrap();

        // The lexical stage was already running when the query got embedded
        assert!(tokenizer.overlapped.load(Ordering::SeqCst));
        assert_eq!(results.results.len(), 3);
    }

    #[tokio::test]
    async fn test_corpus_smaller_than_topk() {
        let generation = generation(&["one", "two", "three"], &[[1.0, 0.0], [0.0, 1.0], [0.6, 0.8]]);
        let retriever =
            HybridRetriever::new(generation, &capabilities(None), config(50, 50, 100)).unwrap();

        let results = retriever.search("two", topk(10)).await.unwrap();
        assert_eq!(results.total_results, 3);
        assert_eq!(results.results.len(), 3);
    }

    #[tokio::test]
    async fn test_failing_scorer_keeps_fused_order() {
        let generation = five_chunks();
        let fused_order = HybridRetriever::new(generation.clone(), &capabilities(None), config(3, 3, 4))
            .unwrap()
            .search("x", topk(3))
            .await
            .unwrap();

        let retriever = HybridRetriever::new(
            generation,
            &capabilities(Some(Arc::new(FailingScorer))),
            config(3, 3, 4),
        )
        .unwrap();
        let degraded = retriever.search("x", topk(3)).await.unwrap();

        assert_eq!(degraded.results.len(), 3);
        assert_eq!(degraded.rerank, RerankMode::Identity(FallbackReason::Failed));
        assert_eq!(
            fused_order.rerank,
            RerankMode::Identity(FallbackReason::Unavailable)
        );
        let a: Vec<ChunkId> = degraded.results.iter().map(|h| h.id).collect();
        let b: Vec<ChunkId> = fused_order.results.iter().map(|h| h.id).collect();
        assert_eq!(a, b);
        assert!(degraded.results.iter().all(|h| h.rerank_score.is_none()));
    }

    #[tokio::test]
    async fn test_deterministic_results() {
        let retriever =
            HybridRetriever::new(five_chunks(), &capabilities(None), config(5, 5, 5)).unwrap();
        let a = retriever.search("x marks", topk(5)).await.unwrap();
        let b = retriever.search("x marks", topk(5)).await.unwrap();
        let ids_a: Vec<ChunkId> = a.results.iter().map(|h| h.id).collect();
        let ids_b: Vec<ChunkId> = b.results.iter().map(|h| h.id).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[tokio::test]
    async fn test_query_dimension_mismatch() {
        let caps = Capabilities {
            embedder: Arc::new(FixedEmbedder::new(vec![1.0, 0.0, 0.0])),
            tokenizer: Arc::new(WhitespaceTokenizer),
            scorer: None,
        };
        let retriever = HybridRetriever::new(five_chunks(), &caps, config(3, 3, 4)).unwrap();
        let err = retriever.search("x", topk(2)).await.unwrap_err();
        assert_eq!(err.error_code(), "DIMENSION_MISMATCH");
    }

    #[tokio::test]
    async fn test_embed_timeout_fails_query() {
        let caps = Capabilities {
            embedder: Arc::new(FixedEmbedder {
                query: vec![1.0, 0.0],
                delay: Duration::from_secs(5),
            }),
            tokenizer: Arc::new(WhitespaceTokenizer),
            scorer: None,
        };
        let config = SearchConfig {
            embed_timeout_ms: 20,
            ..Default::default()
        }
        .validate()
        .unwrap();

        let retriever = HybridRetriever::new(five_chunks(), &caps, config).unwrap();
        let err = retriever.search("x", topk(2)).await.unwrap_err();
        assert!(matches!(err, RagError::EmbedTimeout { timeout_ms: 20 }));
    }

    #[tokio::test]
    async fn test_generation_dimension_must_match_embedder() {
        let mut generation = five_chunks();
        generation.dimension = 3;
        generation.embeddings = vec![vec![0.0; 3]; 5];
        let err = HybridRetriever::new(generation, &capabilities(None), config(3, 3, 4))
            .err()
            .unwrap();
        assert_eq!(err.error_code(), "DIMENSION_MISMATCH");
    }

    #[tokio::test]
    async fn test_empty_generation_answers_empty() {
        let retriever =
            HybridRetriever::new(Generation::empty(2), &capabilities(None), config(3, 3, 4))
                .unwrap();
        let results = retriever.search("anything", topk(5)).await.unwrap();
        assert!(results.results.is_empty());
    }

    #[test]
    fn test_chunk_lookup() {
        let retriever =
            HybridRetriever::new(five_chunks(), &capabilities(None), config(3, 3, 4)).unwrap();
        assert_eq!(retriever.chunk(ChunkId(3)).unwrap().text, "x marks");
        assert!(retriever.chunk(ChunkId(9)).is_none());
        assert_eq!(retriever.len(), 5);
    }
}
