//! rag-index - Lexical and dense indices
//!
//! Both indices are built once per generation from the aligned chunk stores
//! and are read-only afterwards.
//!
//! - [`LexicalIndex`]: BM25 over an inverted index of chunk tokens.
//! - [`DenseIndex`]: exact inner-product search over normalized embeddings.
//! - [`MixedScriptTokenizer`]: jieba segmentation for Han runs, Unicode word
//!   boundaries plus lowercasing for everything else.

mod dense;
mod lexical;
mod tokenize;

pub use dense::DenseIndex;
pub use lexical::{Bm25Params, LexicalIndex};
pub use tokenize::MixedScriptTokenizer;

pub use rag_core::{ChunkId, ScoreMap, TextTokenizer};
