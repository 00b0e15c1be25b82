//! ONNX-based embedding model implementation.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ndarray::ArrayViewD;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{Encoding, Tokenizer};
use tracing::{debug, info};

use rag_core::{Embedder, EmbeddingConfig, PoolingStrategy, RagError, Result};

use crate::session::{build_session, l2_normalize, load_tokenizer, model_files};

/// ONNX transformer embedder (BGE-M3 or any compatible encoder).
///
/// Inference runs on the blocking pool so async callers are never stalled
/// by a long batch.
pub struct OnnxEmbedder {
    inner: Arc<Inner>,
    query_prefix: String,
    document_prefix: String,
    batch_size: usize,
}

struct Inner {
    /// ONNX inference session (wrapped in Mutex for interior mutability).
    session: Mutex<Session>,

    /// Tokenizer for the model.
    tokenizer: Tokenizer,

    /// Embedding dimension.
    dimension: usize,

    /// Maximum token count.
    max_tokens: usize,

    /// Token pooling.
    pooling: PoolingStrategy,
}

impl OnnxEmbedder {
    /// Load the embedder described by the configuration.
    ///
    /// `config.model_path` is a directory holding `model.onnx` and
    /// `tokenizer.json`.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let (model_file, tokenizer_file) = model_files(&config.model_path);
        if !model_file.is_file() {
            return Err(RagError::embedding(format!(
                "Embedding model not found at {:?}",
                model_file
            )));
        }

        let session = build_session(
            &model_file,
            GraphOptimizationLevel::Level3,
            config.num_threads,
            |m| RagError::embedding(m),
        )?;
        let tokenizer = load_tokenizer(&tokenizer_file, |m| RagError::embedding(m))?;

        info!(
            "Embedder initialized: dim={}, max_tokens={}, pooling={:?}",
            config.dimension, config.max_tokens, config.pooling
        );

        Ok(Self {
            inner: Arc::new(Inner {
                session: Mutex::new(session),
                tokenizer,
                dimension: config.dimension,
                max_tokens: config.max_tokens.max(1),
                pooling: config.pooling,
            }),
            query_prefix: config.query_prefix.clone().unwrap_or_default(),
            document_prefix: config.document_prefix.clone().unwrap_or_default(),
            batch_size: config.batch_size.max(1),
        })
    }

    /// Load from a model directory with default settings.
    pub fn new(model_dir: impl AsRef<Path>) -> Result<Self> {
        Self::from_config(&EmbeddingConfig {
            model_path: model_dir.as_ref().to_path_buf(),
            ..Default::default()
        })
    }

    async fn embed_with_prefix(&self, texts: &[&str], prefix: &str) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let owned: Vec<String> = batch.iter().map(|t| format!("{}{}", prefix, t)).collect();
            let inner = Arc::clone(&self.inner);

            let vectors = tokio::task::spawn_blocking(move || inner.embed_batch(owned))
                .await
                .map_err(|e| RagError::internal(format!("Embedding task failed: {}", e)))??;

            embeddings.extend(vectors);
        }

        Ok(embeddings)
    }
}

impl Inner {
    fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts, true)
            .map_err(|e| RagError::embedding(format!("Tokenization failed: {}", e)))?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(self.max_tokens);

        let batch_size = encodings.len();

        debug!("Embedding batch: size={}, max_len={}", batch_size, max_len);

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let len = ids.len().min(max_len);

            for j in 0..len {
                input_ids[i * max_len + j] = ids[j] as i64;
                attention_mask[i * max_len + j] = mask[j] as i64;
            }
        }

        let input_ids_tensor = Tensor::from_array((vec![batch_size, max_len], input_ids))
            .map_err(|e| RagError::embedding(format!("Failed to create input tensor: {}", e)))?;

        let attention_mask_tensor =
            Tensor::from_array((vec![batch_size, max_len], attention_mask))
                .map_err(|e| RagError::embedding(format!("Failed to create mask tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| RagError::embedding(format!("Failed to lock session: {}", e)))?;

        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor
            ])
            .map_err(|e| RagError::embedding(format!("Inference failed: {}", e)))?;

        // First output is the hidden state (or an already pooled vector)
        let (_, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| RagError::embedding("No output tensor found"))?;

        let view = output
            .try_extract_array::<f32>()
            .map_err(|e| RagError::embedding(format!("Failed to extract tensor: {}", e)))?;

        let shape: Vec<usize> = view.shape().to_vec();
        debug!("Output shape: {:?}", shape);

        let hidden_dim = *shape.last().unwrap_or(&0);
        if hidden_dim != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: hidden_dim,
            });
        }

        match shape.len() {
            3 => Ok(self.pool(&view, &encodings, max_len)),
            2 => Ok((0..batch_size)
                .map(|i| l2_normalize((0..hidden_dim).map(|j| view[[i, j]]).collect()))
                .collect()),
            _ => Err(RagError::embedding(format!(
                "Unexpected output shape: {:?}",
                shape
            ))),
        }
    }

    /// Pool `[batch, seq, hidden]` token states into one normalized vector each.
    fn pool(
        &self,
        tensor: &ArrayViewD<'_, f32>,
        encodings: &[Encoding],
        max_len: usize,
    ) -> Vec<Vec<f32>> {
        let shape = tensor.shape();
        let seq_len = shape[1];
        let hidden_dim = shape[2];

        encodings
            .iter()
            .enumerate()
            .map(|(i, encoding)| {
                let pooled = match self.pooling {
                    PoolingStrategy::Cls => (0..hidden_dim).map(|k| tensor[[i, 0, k]]).collect(),
                    PoolingStrategy::Mean => {
                        let mask = encoding.get_attention_mask();
                        let limit = max_len.min(seq_len).min(mask.len());
                        let mut sum = vec![0.0f32; hidden_dim];
                        let mut count = 0usize;
                        for j in (0..limit).filter(|&j| mask[j] == 1) {
                            count += 1;
                            for (k, s) in sum.iter_mut().enumerate() {
                                *s += tensor[[i, j, k]];
                            }
                        }
                        if count > 0 {
                            sum.iter_mut().for_each(|s| *s /= count as f32);
                        }
                        sum
                    }
                };
                l2_normalize(pooled)
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for OnnxEmbedder {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.embed_with_prefix(texts, &self.document_prefix).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_prefix(&[text], &self.query_prefix)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::embedding("No embedding returned"))
    }

    fn dimension(&self) -> usize {
        self.inner.dimension
    }
}
