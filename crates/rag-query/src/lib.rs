//! rag-query - Hybrid search and ranking
//!
//! This crate turns a loaded generation into ranked answers.
//!
//! # Pipeline
//!
//! 1. Dense search (query embedding vs. chunk embeddings) and BM25 lexical
//!    search run concurrently.
//! 2. [`fuse`] combines both score maps with `alpha * dense + (1 - alpha) * lexical`
//!    and keeps the best `rerank_cand` candidates.
//! 3. [`Reranker`] reorders candidates with a pairwise scorer, falling back to
//!    fusion order when the scorer is missing, slow or failing.
//!
//! [`RetrieverHandle`] owns the active [`HybridRetriever`] and replaces it
//! atomically on reload.
//!
//! # Example
//!
//! ```rust,ignore
//! use rag_query::{Capabilities, RetrieverHandle};
//! use std::sync::Arc;
//!
//! let handle = RetrieverHandle::open(Arc::new(store), capabilities, config).await?;
//! let results = handle.search_default("error handling").await?;
//! ```

mod context;
mod fusion;
mod handle;
mod rerank;
mod retriever;

pub use context::{build_context, AssembledContext, ReferenceNote, DEFAULT_CONTEXT_CHARS};
pub use fusion::{fuse, to_score_map};
pub use handle::{ReloadReport, RetrieverHandle, RetrieverState};
pub use rerank::{RerankOutcome, Reranker};
pub use retriever::{Capabilities, HybridRetriever};

// Re-export for convenience
pub use rag_core::{RerankMode, SearchHit, SearchResults};
