//! Shared ONNX Runtime plumbing.

use std::path::{Path, PathBuf};

use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use tokenizers::Tokenizer;
use tracing::info;

use rag_core::{RagError, Result};

/// Model file name inside a model directory.
pub const MODEL_FILE: &str = "model.onnx";

/// Tokenizer file name inside a model directory.
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Paths of the model and tokenizer inside a model directory.
pub fn model_files(dir: &Path) -> (PathBuf, PathBuf) {
    (dir.join(MODEL_FILE), dir.join(TOKENIZER_FILE))
}

/// Whether a model directory has everything needed to load.
pub fn model_available(dir: &Path) -> bool {
    let (model, tokenizer) = model_files(dir);
    model.is_file() && tokenizer.is_file()
}

/// Build an inference session.
///
/// `map_err` decides which error variant a failure becomes, so embedders
/// and scorers can report in their own terms.
pub fn build_session(
    model_path: &Path,
    level: GraphOptimizationLevel,
    threads: usize,
    map_err: fn(String) -> RagError,
) -> Result<Session> {
    info!("Loading ONNX model from {:?}", model_path);

    Session::builder()
        .map_err(|e| map_err(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(level)
        .map_err(|e| map_err(format!("Failed to set optimization level: {}", e)))?
        .with_intra_threads(threads.max(1))
        .map_err(|e| map_err(format!("Failed to set thread count: {}", e)))?
        .commit_from_file(model_path)
        .map_err(|e| map_err(format!("Failed to load model: {}", e)))
}

/// Load a HuggingFace `tokenizer.json`.
pub fn load_tokenizer(path: &Path, map_err: fn(String) -> RagError) -> Result<Tokenizer> {
    info!("Loading tokenizer from {:?}", path);
    Tokenizer::from_file(path).map_err(|e| map_err(format!("Failed to load tokenizer: {}", e)))
}

/// L2 normalize a vector in place. Zero vectors are left unchanged.
pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}
