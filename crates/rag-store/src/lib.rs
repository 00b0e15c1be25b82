//! rag-store - SQLite generation store
//!
//! A generation is the complete set of aligned chunk artifacts (texts,
//! metadata, lexical tokens, embeddings). This crate persists one generation
//! per file and replaces it atomically on publish.

mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

pub use schema::{SCHEMA, SCHEMA_VERSION};
