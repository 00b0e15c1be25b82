//! Core domain types for the retrieval engine.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

static PAGE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[Page\s+(\d+)\]").expect("page marker pattern is valid"));

/// Dense chunk identifier, `0..N-1` in insertion order within one generation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ChunkId(pub u32);

impl ChunkId {
    /// Build an id from a store position.
    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// Position of this chunk in the aligned stores.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ephemeral per-query mapping from chunk id to a stage score.
pub type ScoreMap = HashMap<ChunkId, f32>;

/// Sort `(id, score)` pairs best first, ties by ascending id.
///
/// Every ranked list in the engine goes through this ordering so that equal
/// scores always come out in the same order.
pub fn rank_descending(entries: &mut [(ChunkId, f32)]) {
    entries.sort_unstable_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
}

/// Per-chunk metadata record, aligned with the text store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Source document identifier (path or URI).
    pub source: String,

    /// Human readable title, usually the file name.
    pub title: String,

    /// Sequence number of the chunk within its document (0-based).
    pub chunk_index: u32,

    /// Page number recovered from a `[Page N]` marker, if any.
    #[serde(default)]
    pub page: Option<u32>,
}

impl ChunkMetadata {
    /// Create metadata for a chunk, recovering the page marker from its text.
    pub fn new(source: &str, title: &str, chunk_index: u32, text: &str) -> Self {
        Self {
            source: source.to_string(),
            title: title.to_string(),
            chunk_index,
            page: extract_page(text),
        }
    }
}

/// Find the first `[Page N]` marker in a chunk of text.
pub fn extract_page(text: &str) -> Option<u32> {
    PAGE_MARKER
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// A retrievable unit of text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Blake3 fingerprint of chunk content, used for exact-content dedup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentFingerprint([u8; 32]);

impl ContentFingerprint {
    /// Fingerprint a piece of text.
    pub fn of(text: &str) -> Self {
        Self(*blake3::hash(text.as_bytes()).as_bytes())
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// One complete, consistent snapshot of the four aligned artifacts.
///
/// Position `i` in every vector describes chunk `ChunkId(i)`.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    /// Embedding dimension shared by every vector.
    pub dimension: usize,

    /// Chunk texts.
    pub texts: Vec<String>,

    /// Chunk metadata.
    pub metadata: Vec<ChunkMetadata>,

    /// Lexical tokens per chunk.
    pub tokens: Vec<Vec<String>>,

    /// L2-normalized embeddings per chunk.
    pub embeddings: Vec<Vec<f32>>,
}

impl Generation {
    /// An empty generation for the given dimension.
    pub fn empty(dimension: usize) -> Self {
        Self {
            dimension,
            ..Default::default()
        }
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    /// Whether the generation holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Number of distinct source documents.
    pub fn document_count(&self) -> usize {
        let mut sources: Vec<&str> = self.metadata.iter().map(|m| m.source.as_str()).collect();
        sources.sort_unstable();
        sources.dedup();
        sources.len()
    }

    /// Check that all four artifacts are aligned and share one dimension.
    pub fn validate(&self) -> Result<()> {
        let n = self.texts.len();
        if self.metadata.len() != n || self.tokens.len() != n || self.embeddings.len() != n {
            return Err(RagError::corpus_inconsistent(format!(
                "artifact lengths differ: texts={}, metadata={}, tokens={}, embeddings={}",
                n,
                self.metadata.len(),
                self.tokens.len(),
                self.embeddings.len()
            )));
        }

        if n > 0 && self.dimension == 0 {
            return Err(RagError::corpus_inconsistent(
                "non-empty generation with zero embedding dimension",
            ));
        }

        if let Some(bad) = self.embeddings.iter().find(|v| v.len() != self.dimension) {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }

        Ok(())
    }
}

/// Summary of the generation currently published in a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationInfo {
    /// Number of chunks.
    pub chunks: u64,

    /// Number of distinct source documents.
    pub documents: u64,

    /// Embedding dimension.
    pub dimension: usize,

    /// Publish timestamp (Unix millis).
    pub published_at: u64,
}

/// Why the reranking stage fell back to fusion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// No scorer configured or the scorer reported itself unavailable.
    Unavailable,
    /// Resource error persisted after the safe-mode retry.
    ResourceExhausted,
    /// Scorer exceeded its time bound.
    Timeout,
    /// Scorer failed or returned a malformed answer.
    Failed,
}

/// How the final ordering was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankMode {
    /// Ordered by pairwise scores.
    Scored,
    /// Ordered by pairwise scores computed in safe execution mode.
    SafeMode,
    /// Fusion order passed through.
    Identity(FallbackReason),
}

/// A search hit with its scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Result rank (1-indexed).
    pub rank: u32,

    /// Chunk id within the generation that served the query.
    pub id: ChunkId,

    /// Fused first-stage score.
    pub score: f32,

    /// Pairwise relevance score, when reranking ran.
    pub rerank_score: Option<f32>,

    /// Chunk text.
    pub text: String,

    /// Chunk metadata.
    pub metadata: ChunkMetadata,
}

/// Search results container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    /// The original query.
    pub query: String,

    /// Total results returned.
    pub total_results: usize,

    /// Search latency in milliseconds.
    pub latency_ms: u64,

    /// How the final order was produced.
    pub rerank: RerankMode,

    /// Individual results, best first.
    pub results: Vec<SearchHit>,
}

impl SearchResults {
    /// The `(text, metadata)` pairs in final order.
    pub fn pairs(&self) -> Vec<(&str, &ChunkMetadata)> {
        self.results
            .iter()
            .map(|hit| (hit.text.as_str(), &hit.metadata))
            .collect()
    }
}
