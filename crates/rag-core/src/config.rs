//! Configuration types for the retrieval engine.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::traits::ChunkConfig;

const APP_DIR: &str = "rag-hybrid";

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagConfig {
    /// Index location configuration.
    #[serde(default)]
    pub index: IndexConfig,

    /// Embedding configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Reranker configuration.
    #[serde(default)]
    pub reranker: RerankerConfig,

    /// Chunking configuration.
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Search configuration.
    #[serde(default)]
    pub search: SearchConfig,
}

/// Where generations live and where documents come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Path to the generation store file.
    #[serde(default = "default_index_path")]
    pub path: PathBuf,

    /// Directory of source documents for ingestion.
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            source_dir: default_source_dir(),
        }
    }
}

/// Which embedder implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// ONNX transformer model.
    Onnx,
    /// Feature-hashing embedder, no model files needed.
    Hash,
}

/// How token states are pooled into one vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolingStrategy {
    /// First token state (BGE family).
    Cls,
    /// Attention-masked mean over token states.
    Mean,
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedder implementation.
    #[serde(default = "default_backend")]
    pub backend: EmbeddingBackend,

    /// Directory holding `model.onnx` and `tokenizer.json`.
    #[serde(default = "default_embed_model_path")]
    pub model_path: PathBuf,

    /// Output dimension.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Maximum tokens per input.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Pooling strategy.
    #[serde(default = "default_pooling")]
    pub pooling: PoolingStrategy,

    /// Prefix prepended to queries (asymmetric models).
    #[serde(default)]
    pub query_prefix: Option<String>,

    /// Prefix prepended to documents (asymmetric models).
    #[serde(default)]
    pub document_prefix: Option<String>,

    /// Batch size for ingestion.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Number of threads for CPU inference.
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            model_path: default_embed_model_path(),
            dimension: default_dimension(),
            max_tokens: default_max_tokens(),
            pooling: default_pooling(),
            query_prefix: None,
            document_prefix: None,
            batch_size: default_batch_size(),
            num_threads: default_num_threads(),
        }
    }
}

/// Cross-encoder reranker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    /// Load the reranker at all. When false, results keep fusion order.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding `model.onnx` and `tokenizer.json`.
    #[serde(default = "default_rerank_model_path")]
    pub model_path: PathBuf,

    /// Maximum tokens per (query, text) pair.
    #[serde(default = "default_rerank_max_length")]
    pub max_length: usize,

    /// Number of threads for the preferred session.
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_path: default_rerank_model_path(),
            max_length: default_rerank_max_length(),
            num_threads: default_num_threads(),
        }
    }
}

/// Chunking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in characters.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl ChunkingConfig {
    /// Validate into the chunker's runtime configuration.
    pub fn validate(&self) -> Result<ChunkConfig> {
        if self.chunk_size == 0 {
            return Err(RagError::invalid_config("chunking.chunk_size must be >= 1"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::invalid_config(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(ChunkConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        })
    }
}

/// Search configuration as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Dense weight in fusion (0 = lexical only, 1 = dense only).
    #[serde(default = "default_alpha")]
    pub alpha: f32,

    /// Candidates fetched from the dense index.
    #[serde(default = "default_first_stage_topk")]
    pub dense_topk: usize,

    /// Candidates fetched from the lexical index.
    #[serde(default = "default_first_stage_topk")]
    pub sparse_topk: usize,

    /// Fused candidates handed to the reranker.
    #[serde(default = "default_rerank_cand")]
    pub rerank_cand: usize,

    /// Default number of results.
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Bound on one query embedding call.
    #[serde(default = "default_embed_timeout_ms")]
    pub embed_timeout_ms: u64,

    /// Bound on one reranking call.
    #[serde(default = "default_rerank_timeout_ms")]
    pub rerank_timeout_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            dense_topk: default_first_stage_topk(),
            sparse_topk: default_first_stage_topk(),
            rerank_cand: default_rerank_cand(),
            default_top_k: default_top_k(),
            embed_timeout_ms: default_embed_timeout_ms(),
            rerank_timeout_ms: default_rerank_timeout_ms(),
        }
    }
}

impl SearchConfig {
    /// Validate into a [`RetrieverConfig`]. This is the only way to build one.
    pub fn validate(&self) -> Result<RetrieverConfig> {
        if !self.alpha.is_finite() || !(0.0..=1.0).contains(&self.alpha) {
            return Err(RagError::invalid_config(format!(
                "search.alpha must be in [0, 1], got {}",
                self.alpha
            )));
        }

        let positive = |name: &str, value: usize| {
            NonZeroUsize::new(value)
                .ok_or_else(|| RagError::invalid_config(format!("search.{name} must be >= 1")))
        };

        if self.embed_timeout_ms == 0 || self.rerank_timeout_ms == 0 {
            return Err(RagError::invalid_config("search timeouts must be > 0"));
        }

        Ok(RetrieverConfig {
            alpha: self.alpha,
            dense_topk: positive("dense_topk", self.dense_topk)?,
            sparse_topk: positive("sparse_topk", self.sparse_topk)?,
            rerank_cand: positive("rerank_cand", self.rerank_cand)?,
            default_top_k: positive("default_top_k", self.default_top_k)?,
            embed_timeout: Duration::from_millis(self.embed_timeout_ms),
            rerank_timeout: Duration::from_millis(self.rerank_timeout_ms),
        })
    }
}

/// Validated retrieval parameters.
///
/// Only obtainable through [`SearchConfig::validate`], so every instance
/// satisfies `alpha ∈ [0, 1]` and non-zero candidate budgets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrieverConfig {
    alpha: f32,
    dense_topk: NonZeroUsize,
    sparse_topk: NonZeroUsize,
    rerank_cand: NonZeroUsize,
    default_top_k: NonZeroUsize,
    embed_timeout: Duration,
    rerank_timeout: Duration,
}

impl RetrieverConfig {
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn dense_topk(&self) -> usize {
        self.dense_topk.get()
    }

    pub fn sparse_topk(&self) -> usize {
        self.sparse_topk.get()
    }

    pub fn rerank_cand(&self) -> usize {
        self.rerank_cand.get()
    }

    pub fn default_top_k(&self) -> NonZeroUsize {
        self.default_top_k
    }

    pub fn embed_timeout(&self) -> Duration {
        self.embed_timeout
    }

    pub fn rerank_timeout(&self) -> Duration {
        self.rerank_timeout
    }
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_backend() -> EmbeddingBackend {
    EmbeddingBackend::Onnx
}

fn default_dimension() -> usize {
    1024
}

fn default_max_tokens() -> usize {
    8192
}

fn default_pooling() -> PoolingStrategy {
    PoolingStrategy::Cls
}

fn default_batch_size() -> usize {
    128
}

fn default_num_threads() -> usize {
    4
}

fn default_rerank_max_length() -> usize {
    256
}

fn default_chunk_size() -> usize {
    800
}

fn default_chunk_overlap() -> usize {
    120
}

fn default_alpha() -> f32 {
    0.6
}

fn default_first_stage_topk() -> usize {
    50
}

fn default_rerank_cand() -> usize {
    100
}

fn default_top_k() -> usize {
    10
}

fn default_embed_timeout_ms() -> u64 {
    30_000
}

fn default_rerank_timeout_ms() -> u64 {
    30_000
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn default_index_path() -> PathBuf {
    data_dir().join("index").join("generation.db")
}

fn default_source_dir() -> PathBuf {
    data_dir().join("data").join("text")
}

fn default_embed_model_path() -> PathBuf {
    data_dir().join("models").join("bge-m3")
}

fn default_rerank_model_path() -> PathBuf {
    data_dir().join("models").join("bge-reranker-base")
}

impl RagConfig {
    /// Load configuration from file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| RagError::Config {
            message: format!("Failed to parse config: {}", e),
        })?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join(APP_DIR).join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        // Try local config
        let local_config = PathBuf::from("rag.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }
}
