//! Database schema definitions.

/// Version written into every generation file.
pub const SCHEMA_VERSION: u32 = 1;

/// Schema of one generation file.
///
/// The four chunk tables are aligned by `id`: row `i` of each describes
/// chunk `i`, and ids run `0..N-1` without gaps.
pub const SCHEMA: &str = r#"
-- Generation summary (schema_version, dimension, chunks, documents, published_at)
CREATE TABLE IF NOT EXISTS generation (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Chunk texts
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY,
    text TEXT NOT NULL
);

-- Chunk metadata as JSON
CREATE TABLE IF NOT EXISTS chunk_meta (
    id INTEGER PRIMARY KEY,
    metadata TEXT NOT NULL
);

-- Lexical tokens as a JSON array
CREATE TABLE IF NOT EXISTS chunk_tokens (
    id INTEGER PRIMARY KEY,
    tokens TEXT NOT NULL
);

-- Embeddings as little-endian f32 blobs
CREATE TABLE IF NOT EXISTS embeddings (
    id INTEGER PRIMARY KEY,
    vector BLOB NOT NULL
);
"#;
