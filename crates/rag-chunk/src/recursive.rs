//! Recursive text chunker.
//!
//! Splits text by trying progressively finer separators until every piece
//! fits the target size, then merges neighbouring pieces back into chunks
//! that carry a configurable overlap.

use std::collections::VecDeque;

use tracing::debug;

use rag_core::{ChunkConfig, ChunkData, Chunker, RagError, Result};

/// Default separators, coarsest first.
///
/// Markdown headings, lines, CJK sentence ends, Latin sentence ends.
pub const DEFAULT_SEPARATORS: &[&str] = &["\n## ", "\n### ", "\n", "。", "！", "？", ". "];

/// Recursive chunker that splits text by multiple separators.
///
/// Tries each separator in order until pieces are small enough:
/// 1. Markdown headings
/// 2. Newlines
/// 3. Sentence boundaries (。！？ and ". ")
/// 4. Hard character cuts (last resort)
///
/// Sizes are measured in characters, not bytes, so CJK text is split at the
/// same granularity as Latin text.
pub struct RecursiveChunker {
    separators: Vec<String>,
}

impl RecursiveChunker {
    /// Create a chunker with the default separators.
    pub fn new() -> Self {
        Self::with_separators(DEFAULT_SEPARATORS.iter().copied())
    }

    /// Create a chunker with custom separators, coarsest first.
    pub fn with_separators<I, S>(separators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            separators: separators
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        }
    }

    fn split_recursive(
        &self,
        text: &str,
        separators: &[String],
        config: &ChunkConfig,
        out: &mut Vec<String>,
    ) {
        let found = separators
            .iter()
            .enumerate()
            .find(|(_, sep)| text.contains(sep.as_str()));

        let Some((sep_idx, separator)) = found else {
            out.extend(split_by_size(text, config));
            return;
        };

        let remaining = &separators[sep_idx + 1..];
        let mut pending: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) <= config.chunk_size {
                pending.push(piece);
                continue;
            }

            // Piece too big: flush what we have, then go finer
            if !pending.is_empty() {
                out.extend(merge_pieces(&pending, config));
                pending.clear();
            }
            self.split_recursive(piece, remaining, config, out);
        }

        if !pending.is_empty() {
            out.extend(merge_pieces(&pending, config));
        }
    }
}

impl Default for RecursiveChunker {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, content: &str, config: &ChunkConfig) -> Result<Vec<ChunkData>> {
        if config.chunk_size == 0 || config.chunk_overlap >= config.chunk_size {
            return Err(RagError::chunking(format!(
                "invalid chunk geometry: size={}, overlap={}",
                config.chunk_size, config.chunk_overlap
            )));
        }

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut raw = Vec::new();
        self.split_recursive(content, &self.separators, config, &mut raw);

        let chunks: Vec<ChunkData> = raw
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .map(ChunkData::new)
            .collect();

        debug!(
            "Split {} chars into {} chunks",
            char_len(content),
            chunks.len()
        );

        Ok(chunks)
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split on a separator without losing it.
///
/// Line-leading separators (headings, newlines) start the following piece;
/// sentence terminators end the preceding one.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let attach_to_next = separator.starts_with('\n');
    let mut pieces = Vec::new();
    let mut start = 0;

    for (idx, _) in text.match_indices(separator) {
        let cut = if attach_to_next {
            idx
        } else {
            idx + separator.len()
        };
        if cut > start {
            pieces.push(&text[start..cut]);
            start = cut;
        }
    }

    if start < text.len() {
        pieces.push(&text[start..]);
    }

    pieces
}

/// Merge small pieces into chunks of at most `chunk_size` characters, keeping
/// up to `chunk_overlap` trailing characters of one chunk at the head of the next.
fn merge_pieces(pieces: &[&str], config: &ChunkConfig) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        let len = char_len(piece);

        if total + len > config.chunk_size && !window.is_empty() {
            chunks.push(window.iter().copied().collect::<String>());

            while total > config.chunk_overlap || (total + len > config.chunk_size && total > 0) {
                match window.pop_front() {
                    Some(front) => total -= char_len(front),
                    None => break,
                }
            }
        }

        window.push_back(piece);
        total += len;
    }

    if !window.is_empty() {
        chunks.push(window.iter().copied().collect::<String>());
    }

    chunks
}

/// Hard character cuts with overlap (last resort).
fn split_by_size(text: &str, config: &ChunkConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = config.chunk_size - config.chunk_overlap;
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + config.chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }

    chunks
}
