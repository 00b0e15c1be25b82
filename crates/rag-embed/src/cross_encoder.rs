//! ONNX cross-encoder used as the pairwise reranking scorer.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use rag_core::{ExecutionMode, PairwiseScorer, RagError, RerankerConfig, Result};

use crate::session::{build_session, load_tokenizer, model_available, model_files};

/// Substrings of runtime errors that point at exhausted or broken devices.
const RESOURCE_MARKERS: &[&str] = &["CUDA", "cuda", "device", "out of memory", "allocate"];

/// Cross-encoder scorer (bge-reranker-base or compatible).
///
/// The preferred session uses full graph optimization and the configured
/// thread count. A second, conservative session (no graph optimization, one
/// thread) is built on first use of [`ExecutionMode::Safe`].
pub struct OnnxCrossEncoder {
    inner: Arc<Inner>,
    name: String,
}

struct Inner {
    model_file: PathBuf,
    tokenizer: Tokenizer,
    max_length: usize,
    preferred: Mutex<Session>,
    safe: Mutex<Option<Session>>,
}

impl OnnxCrossEncoder {
    /// Load the scorer described by the configuration.
    ///
    /// A missing model directory is reported as `ScorerUnavailable`.
    pub fn from_config(config: &RerankerConfig) -> Result<Self> {
        if !model_available(&config.model_path) {
            return Err(RagError::ScorerUnavailable {
                reason: format!("no reranker model at {:?}", config.model_path),
            });
        }

        let (model_file, tokenizer_file) = model_files(&config.model_path);
        let preferred = build_session(
            &model_file,
            GraphOptimizationLevel::Level3,
            config.num_threads,
            |m| RagError::scorer(m),
        )?;
        let tokenizer = load_tokenizer(&tokenizer_file, |m| RagError::scorer(m))?;

        let name = config
            .model_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cross-encoder".to_string());

        info!("Reranker initialized: {} (max_length={})", name, config.max_length);

        Ok(Self {
            inner: Arc::new(Inner {
                model_file,
                tokenizer,
                max_length: config.max_length.max(2),
                preferred: Mutex::new(preferred),
                safe: Mutex::new(None),
            }),
            name,
        })
    }
}

impl Inner {
    fn score_pairs(&self, query: &str, texts: &[String], mode: ExecutionMode) -> Result<Vec<f32>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let pairs: Vec<(&str, &str)> = texts.iter().map(|t| (query, t.as_str())).collect();
        let encodings = self
            .tokenizer
            .encode_batch(pairs, true)
            .map_err(|e| RagError::scorer(format!("Tokenization failed: {}", e)))?;

        // Truncate from the document side, keeping the closing special token
        let rows: Vec<Vec<i64>> = encodings
            .iter()
            .map(|e| {
                let ids = e.get_ids();
                if ids.len() <= self.max_length {
                    ids.iter().map(|&id| id as i64).collect()
                } else {
                    let mut row: Vec<i64> = ids[..self.max_length - 1]
                        .iter()
                        .map(|&id| id as i64)
                        .collect();
                    row.push(ids[ids.len() - 1] as i64);
                    row
                }
            })
            .collect();

        let batch_size = rows.len();
        let max_len = rows.iter().map(Vec::len).max().unwrap_or(0);

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];
        for (i, row) in rows.iter().enumerate() {
            for (j, &id) in row.iter().enumerate() {
                input_ids[i * max_len + j] = id;
                attention_mask[i * max_len + j] = 1;
            }
        }

        debug!(
            "Scoring {} pairs, max_len={}, mode={:?}",
            batch_size, max_len, mode
        );

        let input_ids_tensor = Tensor::from_array((vec![batch_size, max_len], input_ids))
            .map_err(|e| classify(format!("Failed to create input tensor: {}", e)))?;
        let attention_mask_tensor =
            Tensor::from_array((vec![batch_size, max_len], attention_mask))
                .map_err(|e| classify(format!("Failed to create mask tensor: {}", e)))?;
        let inputs = ort::inputs![
            "input_ids" => input_ids_tensor,
            "attention_mask" => attention_mask_tensor
        ];

        let extract = |session: &mut Session| -> Result<Vec<f32>> {
            let outputs = session
                .run(inputs)
                .map_err(|e| classify(format!("Inference failed: {}", e)))?;
            let (_, logits) = outputs
                .iter()
                .next()
                .ok_or_else(|| RagError::scorer("No output tensor found"))?;
            let view = logits
                .try_extract_array::<f32>()
                .map_err(|e| RagError::scorer(format!("Failed to extract logits: {}", e)))?;

            // [n, 1] or [n]; one relevance logit per pair
            Ok(view.iter().copied().collect())
        };

        let scores = match mode {
            ExecutionMode::Preferred => {
                let mut session = self
                    .preferred
                    .lock()
                    .map_err(|e| RagError::scorer(format!("Failed to lock session: {}", e)))?;
                extract(&mut session)?
            }
            ExecutionMode::Safe => {
                let mut slot = self
                    .safe
                    .lock()
                    .map_err(|e| RagError::scorer(format!("Failed to lock session: {}", e)))?;
                if slot.is_none() {
                    warn!("Building safe-mode reranker session");
                    *slot = Some(build_session(
                        &self.model_file,
                        GraphOptimizationLevel::Disable,
                        1,
                        |m| RagError::scorer(m),
                    )?);
                }
                match slot.as_mut() {
                    Some(session) => extract(session)?,
                    None => return Err(RagError::scorer("Safe session unavailable")),
                }
            }
        };

        if scores.len() != batch_size {
            return Err(RagError::scorer(format!(
                "Expected {} scores, got {}",
                batch_size,
                scores.len()
            )));
        }

        Ok(scores)
    }
}

/// Map a runtime failure to a resource error when it looks device related.
fn classify(message: String) -> RagError {
    if RESOURCE_MARKERS.iter().any(|m| message.contains(m)) {
        RagError::scorer_resource(message)
    } else {
        RagError::scorer(message)
    }
}

#[async_trait]
impl PairwiseScorer for OnnxCrossEncoder {
    async fn score(&self, query: &str, texts: &[&str], mode: ExecutionMode) -> Result<Vec<f32>> {
        let inner = Arc::clone(&self.inner);
        let query = query.to_string();
        let texts: Vec<String> = texts.iter().map(|t| t.to_string()).collect();

        tokio::task::spawn_blocking(move || inner.score_pairs(&query, &texts, mode))
            .await
            .map_err(|e| RagError::internal(format!("Scoring task failed: {}", e)))?
    }

    fn name(&self) -> &str {
        &self.name
    }
}
