//! rag-embed - Embedding models and pairwise scorers
//!
//! This crate provides the models behind the dense and reranking stages.
//!
//! # Features
//!
//! - ONNX Runtime embedder with CLS or mean pooling and optional
//!   query/document prefixes (BGE-M3 by default)
//! - ONNX cross-encoder scorer with a lazily built safe-mode session
//! - Feature-hashing embedder that needs no model files
//! - L2 normalization of every output vector

mod cross_encoder;
mod hash;
mod onnx;
mod session;

use std::sync::Arc;

use tracing::warn;

pub use cross_encoder::OnnxCrossEncoder;
pub use hash::HashEmbedder;
pub use onnx::OnnxEmbedder;
pub use session::{l2_normalize, model_available};

pub use rag_core::{Embedder, PairwiseScorer};

use rag_core::{EmbeddingBackend, EmbeddingConfig, RerankerConfig, Result};

/// Build the embedder selected by the configuration.
pub fn embedder_from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.backend {
        EmbeddingBackend::Onnx => Ok(Arc::new(OnnxEmbedder::from_config(config)?)),
        EmbeddingBackend::Hash => Ok(Arc::new(HashEmbedder::new(config.dimension)?)),
    }
}

/// Build the reranking scorer, or `None` when it is disabled or cannot load.
///
/// A scorer that fails to load is not fatal: retrieval falls back to fusion
/// order.
pub fn scorer_from_config(config: &RerankerConfig) -> Option<Arc<dyn PairwiseScorer>> {
    if !config.enabled {
        return None;
    }

    match OnnxCrossEncoder::from_config(config) {
        Ok(scorer) => Some(Arc::new(scorer)),
        Err(e) => {
            warn!("Reranker not loaded, results keep fusion order: {}", e);
            None
        }
    }
}
