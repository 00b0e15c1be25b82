//! SQLite-backed generation store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tokio::sync::Mutex;
use tracing::{debug, info};

use rag_core::{
    ChunkMetadata, Generation, GenerationInfo, GenerationStore, RagError, Result,
};

use crate::schema::{SCHEMA, SCHEMA_VERSION};

/// Generation store backed by a single SQLite file.
///
/// Each publish writes a complete new file next to the current one and
/// renames it into place, so readers only ever open a whole generation.
/// Publishes through one store (and its clones) are serialized; every
/// publish stages into its own uniquely named file.
/// Connections are opened per operation and run on the blocking pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    publish_lock: Arc<Mutex<()>>,
}

impl SqliteStore {
    /// Store rooted at the given file path. Nothing is opened yet.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            publish_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Path of the published generation file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the generation file and its staging files.
    fn directory(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Run a blocking operation against the store on the blocking pool.
    async fn with_store<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(SqliteStore) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(store))
            .await
            .map_err(|e| RagError::internal(format!("Store task failed: {}", e)))?
    }

    fn open_read(&self) -> Result<Connection> {
        if !self.path.is_file() {
            return Err(RagError::IndexMissing {
                path: self.path.clone(),
            });
        }

        Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| RagError::database(format!("Failed to open generation: {}", e)))
    }

    fn load_blocking(&self) -> Result<Generation> {
        let conn = self.open_read()?;

        let version: u32 = read_meta(&conn, "schema_version")?;
        if version != SCHEMA_VERSION {
            return Err(RagError::corpus_inconsistent(format!(
                "unsupported schema version {} (expected {})",
                version, SCHEMA_VERSION
            )));
        }

        let dimension: usize = read_meta(&conn, "dimension")?;
        let expected: usize = read_meta(&conn, "chunks")?;

        let texts = read_column(&conn, "SELECT id, text FROM chunks ORDER BY id", |row| {
            row.get::<_, String>(1)
        })?;

        let metadata = read_column(&conn, "SELECT id, metadata FROM chunk_meta ORDER BY id", |row| {
            row.get::<_, String>(1)
        })?
        .into_iter()
        .map(|json| serde_json::from_str::<ChunkMetadata>(&json).map_err(RagError::from))
        .collect::<Result<Vec<_>>>()?;

        let tokens = read_column(&conn, "SELECT id, tokens FROM chunk_tokens ORDER BY id", |row| {
            row.get::<_, String>(1)
        })?
        .into_iter()
        .map(|json| serde_json::from_str::<Vec<String>>(&json).map_err(RagError::from))
        .collect::<Result<Vec<_>>>()?;

        let embeddings = read_column(&conn, "SELECT id, vector FROM embeddings ORDER BY id", |row| {
            row.get::<_, Vec<u8>>(1)
        })?
        .iter()
        .map(|bytes| bytes_to_vec(bytes))
        .collect::<Result<Vec<_>>>()?;

        let generation = Generation {
            dimension,
            texts,
            metadata,
            tokens,
            embeddings,
        };
        generation.validate()?;

        if generation.len() != expected {
            return Err(RagError::corpus_inconsistent(format!(
                "generation records {} chunks but holds {}",
                expected,
                generation.len()
            )));
        }

        info!(
            "Loaded generation from {:?}: {} chunks, dim={}",
            self.path,
            generation.len(),
            dimension
        );

        Ok(generation)
    }

    fn publish_blocking(&self, generation: Generation) -> Result<GenerationInfo> {
        generation.validate()?;

        let directory = self.directory();
        std::fs::create_dir_all(&directory)?;

        // Removed on drop unless persisted
        let staging = tempfile::Builder::new()
            .prefix(".generation-")
            .suffix(".tmp")
            .tempfile_in(&directory)?;

        let info = GenerationInfo {
            chunks: generation.len() as u64,
            documents: generation.document_count() as u64,
            dimension: generation.dimension,
            published_at: now_millis(),
        };

        {
            let mut conn = Connection::open(staging.path())
                .map_err(|e| RagError::database(format!("Failed to create generation: {}", e)))?;
            write_generation(&mut conn, &generation, &info)?;
        }

        staging.persist(&self.path).map_err(|e| RagError::from(e.error))?;

        info!(
            "Published generation to {:?}: {} chunks from {} documents",
            self.path, info.chunks, info.documents
        );

        Ok(info)
    }

    fn info_blocking(&self) -> Result<Option<GenerationInfo>> {
        if !self.path.is_file() {
            return Ok(None);
        }

        let conn = self.open_read()?;
        Ok(Some(GenerationInfo {
            chunks: read_meta(&conn, "chunks")?,
            documents: read_meta(&conn, "documents")?,
            dimension: read_meta(&conn, "dimension")?,
            published_at: read_meta(&conn, "published_at")?,
        }))
    }
}

#[async_trait]
impl GenerationStore for SqliteStore {
    async fn load(&self) -> Result<Generation> {
        self.with_store(|store| store.load_blocking()).await
    }

    async fn publish(&self, generation: Generation) -> Result<GenerationInfo> {
        let _guard = self.publish_lock.lock().await;
        self.with_store(move |store| store.publish_blocking(generation))
            .await
    }

    async fn info(&self) -> Result<Option<GenerationInfo>> {
        self.with_store(|store| store.info_blocking()).await
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

fn write_generation(
    conn: &mut Connection,
    generation: &Generation,
    info: &GenerationInfo,
) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = DELETE;
        PRAGMA synchronous = FULL;
        "#,
    )
    .map_err(|e| RagError::database(format!("Failed to configure connection: {}", e)))?;

    conn.execute_batch(SCHEMA)
        .map_err(|e| RagError::database(format!("Failed to initialize schema: {}", e)))?;

    let tx = conn
        .transaction()
        .map_err(|e| RagError::database(e.to_string()))?;

    {
        let mut meta = tx
            .prepare("INSERT INTO generation (key, value) VALUES (?1, ?2)")
            .map_err(|e| RagError::database(e.to_string()))?;
        for (key, value) in [
            ("schema_version", SCHEMA_VERSION.to_string()),
            ("dimension", info.dimension.to_string()),
            ("chunks", info.chunks.to_string()),
            ("documents", info.documents.to_string()),
            ("published_at", info.published_at.to_string()),
        ] {
            meta.execute(params![key, value])
                .map_err(|e| RagError::database(format!("Failed to write summary: {}", e)))?;
        }

        let mut text_stmt = tx
            .prepare("INSERT INTO chunks (id, text) VALUES (?1, ?2)")
            .map_err(|e| RagError::database(e.to_string()))?;
        let mut meta_stmt = tx
            .prepare("INSERT INTO chunk_meta (id, metadata) VALUES (?1, ?2)")
            .map_err(|e| RagError::database(e.to_string()))?;
        let mut token_stmt = tx
            .prepare("INSERT INTO chunk_tokens (id, tokens) VALUES (?1, ?2)")
            .map_err(|e| RagError::database(e.to_string()))?;
        let mut vec_stmt = tx
            .prepare("INSERT INTO embeddings (id, vector) VALUES (?1, ?2)")
            .map_err(|e| RagError::database(e.to_string()))?;

        for i in 0..generation.len() {
            let id = i as i64;
            text_stmt
                .execute(params![id, generation.texts[i]])
                .map_err(|e| RagError::database(format!("Failed to insert chunk: {}", e)))?;
            meta_stmt
                .execute(params![id, serde_json::to_string(&generation.metadata[i])?])
                .map_err(|e| RagError::database(format!("Failed to insert metadata: {}", e)))?;
            token_stmt
                .execute(params![id, serde_json::to_string(&generation.tokens[i])?])
                .map_err(|e| RagError::database(format!("Failed to insert tokens: {}", e)))?;
            vec_stmt
                .execute(params![id, vec_to_bytes(&generation.embeddings[i])])
                .map_err(|e| RagError::database(format!("Failed to insert embedding: {}", e)))?;
        }
    }

    tx.commit()
        .map_err(|e| RagError::database(format!("Failed to commit generation: {}", e)))?;

    debug!("Wrote {} chunks", generation.len());
    Ok(())
}

fn read_meta<T: std::str::FromStr>(conn: &Connection, key: &str) -> Result<T> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM generation WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| RagError::database(e.to_string()))?;

    let value =
        value.ok_or_else(|| RagError::corpus_inconsistent(format!("missing summary key {key}")))?;

    value
        .parse()
        .map_err(|_| RagError::corpus_inconsistent(format!("bad summary value {key}={value}")))
}

/// Read one aligned table, checking that ids run `0..N-1` without gaps.
fn read_column<T, F>(conn: &Connection, sql: &str, f: F) -> Result<Vec<T>>
where
    F: Fn(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| RagError::database(e.to_string()))?;

    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, f(row)?)))
        .map_err(|e| RagError::database(e.to_string()))?;

    let mut values = Vec::new();
    for (expected, row) in rows.enumerate() {
        let (id, value) = row.map_err(|e| RagError::database(e.to_string()))?;
        if id != expected as i64 {
            return Err(RagError::corpus_inconsistent(format!(
                "non-contiguous ids: expected {}, found {}",
                expected, id
            )));
        }
        values.push(value);
    }

    Ok(values)
}

fn vec_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_vec(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(RagError::corpus_inconsistent(format!(
            "embedding blob of {} bytes is not a whole number of f32",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
