//! rag-chunk - Text cleaning and chunking
//!
//! This crate splits cleaned document text into overlapping, size-bounded
//! chunks for embedding and lexical indexing.
//!
//! # Chunkers
//!
//! - [`RecursiveChunker`]: Recursively splits text using progressively finer
//!   separators (headings, lines, CJK and Latin sentence ends), falling back
//!   to hard character cuts, and merges pieces back with overlap.
//!
//! # Example
//!
//! ```rust
//! use rag_chunk::{ChunkConfig, Chunker, RecursiveChunker};
//!
//! let chunker = RecursiveChunker::new();
//! let chunks = chunker.chunk("Hello world", &ChunkConfig::default()).unwrap();
//! assert_eq!(chunks.len(), 1);
//! ```

mod clean;
mod recursive;

pub use clean::clean_text;
pub use recursive::{RecursiveChunker, DEFAULT_SEPARATORS};

// Re-export types for convenience
pub use rag_core::{ChunkConfig, ChunkData, Chunker};
