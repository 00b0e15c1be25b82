//! Documents in, published generation out.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use rag_chunk::{clean_text, RecursiveChunker};
use rag_core::{
    ChunkConfig, ChunkMetadata, Chunker, Embedder, Generation, GenerationStore, RagError, Result,
    TextTokenizer,
};

/// File extensions picked up from the source directory.
pub const SOURCE_EXTENSIONS: &[&str] = &["txt", "md"];

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    /// Directory the documents were read from.
    pub source_root: PathBuf,

    /// Documents read successfully.
    pub documents: usize,

    /// Files skipped because they could not be read as UTF-8 text.
    pub skipped: usize,

    /// Chunks in the published generation.
    pub chunks: usize,

    /// Embedding dimension.
    pub dimension: usize,

    /// Where the generation was published.
    pub location: String,

    /// Whether a new generation was published.
    pub published: bool,
}

/// Ingestion pipeline.
///
/// Reads every `.txt` / `.md` file of a directory in file-name order, cleans
/// and chunks the text, tokenizes and embeds every chunk, and publishes the
/// result as one generation. Chunk ids are assigned document by document in
/// chunk order.
pub struct IngestPipeline {
    chunker: Box<dyn Chunker>,
    chunk_config: ChunkConfig,
    tokenizer: Arc<dyn TextTokenizer>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn GenerationStore>,
    batch_size: usize,
}

/// Chunks of one document before embedding.
struct DocumentChunks {
    texts: Vec<String>,
    metadata: Vec<ChunkMetadata>,
}

impl IngestPipeline {
    /// Create a pipeline with the default recursive chunker.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        tokenizer: Arc<dyn TextTokenizer>,
        store: Arc<dyn GenerationStore>,
        chunk_config: ChunkConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            chunker: Box::new(RecursiveChunker::new()),
            chunk_config,
            tokenizer,
            embedder,
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Replace the chunker.
    pub fn with_chunker(mut self, chunker: Box<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    /// List source files in a directory, sorted by path.
    pub fn collect_sources(dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(RagError::invalid_argument(format!(
                "source directory does not exist: {}",
                dir.display()
            )));
        }

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let supported = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| SOURCE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if path.is_file() && supported {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    fn chunk_document(&self, path: &Path, content: &str) -> Result<DocumentChunks> {
        let source = path.display().to_string();
        let title = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.clone());

        let cleaned = clean_text(content);
        let mut texts = Vec::new();
        let mut metadata = Vec::new();

        for (i, chunk) in self
            .chunker
            .chunk(&cleaned, &self.chunk_config)?
            .into_iter()
            .enumerate()
        {
            let text = clean_text(&chunk.content);
            if text.is_empty() {
                continue;
            }
            metadata.push(ChunkMetadata::new(&source, &title, i as u32, &text));
            texts.push(text);
        }

        Ok(DocumentChunks { texts, metadata })
    }

    async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let dimension = self.embedder.dimension();
        let mut embeddings = Vec::with_capacity(texts.len());

        for (n, batch) in texts.chunks(self.batch_size).enumerate() {
            let refs: Vec<&str> = batch.iter().map(String::as_str).collect();
            let vectors = self.embedder.embed_documents(&refs).await?;

            if vectors.len() != batch.len() {
                return Err(RagError::embedding(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
                return Err(RagError::DimensionMismatch {
                    expected: dimension,
                    actual: bad.len(),
                });
            }

            embeddings.extend(vectors);
            debug!("Embedded batch {} ({} / {})", n + 1, embeddings.len(), texts.len());
        }

        Ok(embeddings)
    }

    /// Ingest a directory and publish the resulting generation.
    ///
    /// Nothing is published when the directory yields no chunks; the previous
    /// generation stays in place.
    pub async fn run(&self, source_dir: &Path) -> Result<IngestSummary> {
        info!("Starting ingestion from {}", source_dir.display());

        let files = Self::collect_sources(source_dir)?;
        let mut summary = IngestSummary {
            source_root: source_dir.to_path_buf(),
            documents: 0,
            skipped: 0,
            chunks: 0,
            dimension: self.embedder.dimension(),
            location: self.store.location(),
            published: false,
        };

        if files.is_empty() {
            warn!("No source documents found under {}", source_dir.display());
            return Ok(summary);
        }

        let mut texts = Vec::new();
        let mut metadata = Vec::new();

        for path in &files {
            let content = match tokio::fs::read_to_string(path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    summary.skipped += 1;
                    continue;
                }
            };

            let doc = self.chunk_document(path, &content)?;
            debug!("{}: {} chunks", path.display(), doc.texts.len());
            summary.documents += 1;
            texts.extend(doc.texts);
            metadata.extend(doc.metadata);
        }

        if texts.is_empty() {
            warn!("No text chunks generated from {}", source_dir.display());
            return Ok(summary);
        }

        let tokens: Vec<Vec<String>> = texts.iter().map(|t| self.tokenizer.tokenize(t)).collect();

        info!("Embedding {} chunks", texts.len());
        let embeddings = self.embed_all(&texts).await?;

        let generation = Generation {
            dimension: self.embedder.dimension(),
            texts,
            metadata,
            tokens,
            embeddings,
        };

        let info = self.store.publish(generation).await?;
        summary.chunks = info.chunks as usize;
        summary.published = true;

        info!(
            "Ingestion complete: {} documents, {} chunks -> {}",
            summary.documents, summary.chunks, summary.location
        );

        Ok(summary)
    }
}
