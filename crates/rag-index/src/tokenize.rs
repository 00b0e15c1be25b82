//! Mixed-script lexical tokenizer.

use jieba_rs::Jieba;
use unicode_segmentation::UnicodeSegmentation;

use rag_core::TextTokenizer;

/// Tokenizer for mixed Chinese/Latin text.
///
/// Han runs are segmented with jieba (HMM enabled for unknown words); all
/// other runs are split on Unicode word boundaries. Tokens are lowercased and
/// tokens without any alphanumeric character (punctuation) are dropped.
pub struct MixedScriptTokenizer {
    jieba: Jieba,
}

impl MixedScriptTokenizer {
    /// Create a tokenizer with jieba's bundled dictionary.
    pub fn new() -> Self {
        Self {
            jieba: Jieba::new(),
        }
    }
}

impl Default for MixedScriptTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextTokenizer for MixedScriptTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let mut tokens = Vec::new();

        for (is_han, run) in script_runs(text) {
            if is_han {
                tokens.extend(
                    self.jieba
                        .cut(run, true)
                        .into_iter()
                        .filter(|w| w.chars().any(char::is_alphanumeric))
                        .map(str::to_string),
                );
            } else {
                tokens.extend(run.unicode_words().map(str::to_lowercase));
            }
        }

        tokens
    }
}

fn is_han(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{20000}'..='\u{2A6DF}'
        | '\u{2A700}'..='\u{2EBEF}')
}

/// Split text into maximal runs of Han / non-Han characters.
fn script_runs(text: &str) -> Vec<(bool, &str)> {
    let mut runs = Vec::new();
    let mut start = 0;
    let mut current: Option<bool> = None;

    for (idx, c) in text.char_indices() {
        let han = is_han(c);
        match current {
            Some(kind) if kind != han => {
                runs.push((kind, &text[start..idx]));
                start = idx;
                current = Some(han);
            }
            None => current = Some(han),
            _ => {}
        }
    }

    if let Some(kind) = current {
        runs.push((kind, &text[start..]));
    }

    runs
}
