// Token counting seam for the chunker

use once_cell::sync::Lazy;
use regex::Regex;

static TOKEN_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+|[^\w\s]").unwrap());

/// Counts tokens the way the deployment's embedding tokenizer would,
/// closely enough for chunk budget decisions. Implementations must be
/// deterministic: the chunker's restartability depends on it.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Default counter: word runs and punctuation marks, with long words
/// weighted at roughly four characters per token to track subword
/// tokenizers. Whitespace contributes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicCounter;

impl TokenCounter for HeuristicCounter {
    fn count(&self, text: &str) -> usize {
        TOKEN_PATTERN
            .find_iter(text)
            .map(|m| (m.as_str().len() + 3) / 4)
            .sum()
    }
}

/// Adapter for a HuggingFace tokenizer file, when chunk budgets must
/// match the embedding model exactly.
#[cfg(feature = "hf-tokenizers")]
pub struct HfTokenCounter {
    tokenizer: tokenizers::Tokenizer,
}

#[cfg(feature = "hf-tokenizers")]
impl HfTokenCounter {
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::error::RagResult<Self> {
        let tokenizer = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| crate::error::RagError::Config(format!("cannot load tokenizer: {e}")))?;
        Ok(Self { tokenizer })
    }
}

#[cfg(feature = "hf-tokenizers")]
impl TokenCounter for HfTokenCounter {
    fn count(&self, text: &str) -> usize {
        match self.tokenizer.encode(text, false) {
            Ok(encoding) => encoding.get_ids().len(),
            Err(err) => {
                tracing::warn!("tokenizer failed on segment, falling back to heuristic: {err}");
                HeuristicCounter.count(text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_words_and_punctuation() {
        let counter = HeuristicCounter;
        assert_eq!(counter.count("A. B. C."), 6);
        assert_eq!(counter.count("hello world"), 2);
        assert_eq!(counter.count(""), 0);
        assert_eq!(counter.count("   \n\t "), 0);
    }

    #[test]
    fn test_long_words_weigh_more() {
        let counter = HeuristicCounter;
        // 16 chars ~ 4 subword tokens
        assert_eq!(counter.count("internationaliza"), 4);
        assert_eq!(counter.count(&"x".repeat(100)), 25);
    }
}
