//! Context assembly for downstream answer generation.

use std::collections::HashSet;
use std::fmt;

use rag_core::{ContentFingerprint, SearchHit};

/// Default character budget for an assembled context.
pub const DEFAULT_CONTEXT_CHARS: usize = 12_000;

/// Where one numbered context block came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceNote {
    /// 1-based block number.
    pub index: usize,
    pub page: Option<u32>,
    pub title: String,
    pub chunk_index: u32,
}

impl fmt::Display for ReferenceNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.page {
            Some(page) => write!(f, "- [{}] Page {}", self.index, page)?,
            None => write!(f, "- [{}] Page ?", self.index)?,
        }
        write!(f, " · {} · chunk {}", self.title, self.chunk_index)
    }
}

/// Deduplicated, budgeted context built from search hits.
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    /// Chunk texts in hit order.
    pub blocks: Vec<String>,

    /// One note per block.
    pub references: Vec<ReferenceNote>,

    /// Hits dropped because their exact content was already included.
    pub duplicates: usize,

    /// Whether the budget cut off remaining hits.
    pub truncated: bool,
}

impl AssembledContext {
    /// Blocks joined with `[n]` labels.
    pub fn numbered(&self) -> String {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, text)| format!("[{}] {}", i + 1, text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Reference section listing every block's origin.
    pub fn reference_lines(&self) -> String {
        if self.references.is_empty() {
            return String::new();
        }
        let mut out = String::from("## References");
        for note in &self.references {
            out.push('\n');
            out.push_str(&note.to_string());
        }
        out
    }
}

/// Assemble context from hits in rank order.
///
/// Exact duplicates (same blake3 content fingerprint) are skipped. Blocks are
/// taken until the next one would exceed `max_chars` characters.
pub fn build_context(hits: &[SearchHit], max_chars: usize) -> AssembledContext {
    let mut seen: HashSet<ContentFingerprint> = HashSet::new();
    let mut context = AssembledContext::default();
    let mut total = 0usize;

    for hit in hits {
        if !seen.insert(ContentFingerprint::of(&hit.text)) {
            context.duplicates += 1;
            continue;
        }

        let len = hit.text.chars().count();
        if total + len > max_chars {
            context.truncated = true;
            break;
        }
        total += len;

        context.references.push(ReferenceNote {
            index: context.blocks.len() + 1,
            page: hit.metadata.page,
            title: hit.metadata.title.clone(),
            chunk_index: hit.metadata.chunk_index,
        });
        context.blocks.push(hit.text.clone());
    }

    context
}
