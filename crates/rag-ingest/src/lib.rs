//! rag-ingest - Ingestion pipeline
//!
//! Turns a directory of text documents into one published generation:
//! clean, chunk, tokenize, embed in batches, then publish all four aligned
//! artifacts through a [`rag_core::GenerationStore`].

mod pipeline;

pub use pipeline::{IngestPipeline, IngestSummary, SOURCE_EXTENSIONS};
