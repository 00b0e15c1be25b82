//! Core traits defining the interfaces between components.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Generation, GenerationInfo};

/// Persistence for whole generations.
///
/// A store only ever exposes complete generations: `publish` replaces the
/// previous one atomically and `load` validates alignment before returning.
#[async_trait]
pub trait GenerationStore: Send + Sync {
    /// Load the currently published generation.
    async fn load(&self) -> Result<Generation>;

    /// Publish a new generation, replacing the current one.
    async fn publish(&self, generation: Generation) -> Result<GenerationInfo>;

    /// Summary of the published generation, `None` if nothing was published.
    async fn info(&self) -> Result<Option<GenerationInfo>>;

    /// Human readable location for logs.
    fn location(&self) -> String;
}

/// Embedding model trait.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of document texts. Outputs are L2-normalized.
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query text. Output is L2-normalized.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;
}

/// Execution mode requested from a pairwise scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Whatever the scorer was configured with, accelerators included.
    Preferred,
    /// Conservative mode with no accelerator, used after a resource error.
    Safe,
}

/// Pairwise query/document relevance model (cross-encoder).
#[async_trait]
pub trait PairwiseScorer: Send + Sync {
    /// Score every text against the query.
    ///
    /// Returns one score per text, in input order. Resource problems are
    /// reported as `RagError::ScorerResource` so callers can retry in
    /// `ExecutionMode::Safe`.
    async fn score(&self, query: &str, texts: &[&str], mode: ExecutionMode) -> Result<Vec<f32>>;

    /// Scorer name for logs.
    fn name(&self) -> &str;
}

/// Language-aware lexical tokenizer.
///
/// Must be the same at ingestion and query time so vocabularies match.
pub trait TextTokenizer: Send + Sync {
    /// Split text into ordered, case-folded tokens.
    fn tokenize(&self, text: &str) -> Vec<String>;
}

/// Chunking configuration.
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Target chunk size in characters.
    pub chunk_size: usize,

    /// Characters carried over from the end of one chunk into the next.
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 120,
        }
    }
}

/// Chunking strategy trait.
pub trait Chunker: Send + Sync {
    /// Chunk text content into pieces.
    fn chunk(&self, content: &str, config: &ChunkConfig) -> Result<Vec<ChunkData>>;
}

/// Raw chunk data before id assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkData {
    /// Chunk text content.
    pub content: String,

    /// Length in characters.
    pub char_count: usize,
}

impl ChunkData {
    pub fn new(content: String) -> Self {
        let char_count = content.chars().count();
        Self {
            content,
            char_count,
        }
    }
}
