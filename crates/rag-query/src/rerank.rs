//! Bounded pairwise reranking with graceful degradation.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use rag_core::{ExecutionMode, FallbackReason, PairwiseScorer, RagError, RerankMode};

/// Result of the reranking stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankOutcome {
    /// Local candidate indices, best first, at most `topk` long.
    pub order: Vec<usize>,

    /// Pairwise score per candidate (input order), when scoring succeeded.
    pub scores: Option<Vec<f32>>,

    /// How `order` was produced.
    pub mode: RerankMode,
}

impl RerankOutcome {
    fn identity(len: usize, topk: usize, reason: FallbackReason) -> Self {
        Self {
            order: (0..len.min(topk)).collect(),
            scores: None,
            mode: RerankMode::Identity(reason),
        }
    }

    fn scored(scores: Vec<f32>, topk: usize, mode: RerankMode) -> Self {
        let mut order: Vec<usize> = (0..scores.len()).collect();
        // Stable sort keeps fused order among equal scores
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        order.truncate(topk);
        Self {
            order,
            scores: Some(scores),
            mode,
        }
    }
}

enum Attempt {
    Scores(Vec<f32>),
    Resource,
    Fallback(FallbackReason),
}

/// Reranking stage over an optional pairwise scorer.
///
/// Never fails: every scorer problem becomes an identity ordering tagged with
/// the reason. A resource error gets exactly one retry in safe mode.
#[derive(Clone)]
pub struct Reranker {
    scorer: Option<Arc<dyn PairwiseScorer>>,
    timeout: Duration,
}

impl Reranker {
    pub fn new(scorer: Option<Arc<dyn PairwiseScorer>>, timeout: Duration) -> Self {
        Self { scorer, timeout }
    }

    /// Whether a scorer is configured.
    pub fn is_available(&self) -> bool {
        self.scorer.is_some()
    }

    /// Order `texts` by pairwise relevance to `query`, keeping `topk`.
    pub async fn rerank(&self, query: &str, texts: &[&str], topk: usize) -> RerankOutcome {
        let Some(scorer) = self.scorer.as_deref() else {
            return RerankOutcome::identity(texts.len(), topk, FallbackReason::Unavailable);
        };

        if texts.is_empty() {
            return RerankOutcome {
                order: Vec::new(),
                scores: Some(Vec::new()),
                mode: RerankMode::Scored,
            };
        }

        match self.attempt(scorer, query, texts, ExecutionMode::Preferred).await {
            Attempt::Scores(scores) => RerankOutcome::scored(scores, topk, RerankMode::Scored),
            Attempt::Fallback(reason) => RerankOutcome::identity(texts.len(), topk, reason),
            Attempt::Resource => {
                warn!("Reranker resource error, retrying in safe mode");
                match self.attempt(scorer, query, texts, ExecutionMode::Safe).await {
                    Attempt::Scores(scores) => {
                        RerankOutcome::scored(scores, topk, RerankMode::SafeMode)
                    }
                    Attempt::Resource => RerankOutcome::identity(
                        texts.len(),
                        topk,
                        FallbackReason::ResourceExhausted,
                    ),
                    Attempt::Fallback(reason) => RerankOutcome::identity(texts.len(), topk, reason),
                }
            }
        }
    }

    async fn attempt(
        &self,
        scorer: &dyn PairwiseScorer,
        query: &str,
        texts: &[&str],
        mode: ExecutionMode,
    ) -> Attempt {
        let result = match timeout(self.timeout, scorer.score(query, texts, mode)).await {
            Ok(result) => result,
            Err(_) => {
                let err = RagError::RerankTimeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                };
                warn!("{}: keeping fusion order", err);
                return Attempt::Fallback(FallbackReason::Timeout);
            }
        };

        match result {
            Ok(scores) if scores.len() == texts.len() => {
                debug!("{} scored {} candidates ({:?})", scorer.name(), texts.len(), mode);
                Attempt::Scores(scores)
            }
            Ok(scores) => {
                warn!(
                    "{} returned {} scores for {} candidates, keeping fusion order",
                    scorer.name(),
                    scores.len(),
                    texts.len()
                );
                Attempt::Fallback(FallbackReason::Failed)
            }
            Err(RagError::ScorerResource { message }) => {
                warn!("{} resource error: {}", scorer.name(), message);
                Attempt::Resource
            }
            Err(RagError::ScorerUnavailable { reason }) => {
                warn!("{} unavailable: {}", scorer.name(), reason);
                Attempt::Fallback(FallbackReason::Unavailable)
            }
            Err(e) => {
                warn!("{} failed, keeping fusion order: {}", scorer.name(), e);
                Attempt::Fallback(FallbackReason::Failed)
            }
        }
    }
}
