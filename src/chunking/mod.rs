//! Recursive token-aware text splitting.
//!
//! A document is decomposed along the coarsest boundary that fits the
//! token budget (paragraph, then sentence, then word), with hard
//! bisection as the last resort for unbreakable runs. Boundary segments
//! are then packed greedily into chunks of at most `chunk_size_tokens`,
//! carrying a boundary-snapped overlap of up to `chunk_overlap_tokens`
//! into each following chunk. Splitting is lazy, forward-only, and
//! deterministic for a given input and configuration.

pub mod tokens;

use std::collections::VecDeque;
use std::sync::Arc;

use regex::Regex;

use crate::config::ChunkingConfig;
use crate::error::{RagError, RagResult};

pub use tokens::{HeuristicCounter, TokenCounter};
#[cfg(feature = "hf-tokenizers")]
pub use tokens::HfTokenCounter;

/// Splits extracted document text into bounded, overlapping chunks.
pub struct Chunker {
    config: ChunkingConfig,
    counter: Arc<dyn TokenCounter>,
    paragraph_pattern: Regex,
    sentence_pattern: Regex,
    word_pattern: Regex,
    whitespace_pattern: Regex,
}

impl Chunker {
    /// Builds a chunker with the default heuristic token counter.
    pub fn new(config: ChunkingConfig) -> RagResult<Self> {
        Self::with_counter(config, Arc::new(HeuristicCounter))
    }

    /// Builds a chunker with an injected token counter.
    pub fn with_counter(config: ChunkingConfig, counter: Arc<dyn TokenCounter>) -> RagResult<Self> {
        if config.chunk_size_tokens == 0 {
            return Err(RagError::Config("chunk size must be greater than zero".into()));
        }
        if config.chunk_overlap_tokens >= config.chunk_size_tokens {
            return Err(RagError::Config(format!(
                "chunk overlap ({}) must be less than chunk size ({})",
                config.chunk_overlap_tokens, config.chunk_size_tokens
            )));
        }
        Ok(Self {
            config,
            counter,
            paragraph_pattern: Regex::new(r"\n\s*\n").unwrap(),
            sentence_pattern: Regex::new(r"[.!?]+\s+").unwrap(),
            word_pattern: Regex::new(r"\s+").unwrap(),
            whitespace_pattern: Regex::new(r"\s+").unwrap(),
        })
    }

    /// Lazily splits `text` into cleaned chunk strings, in document order.
    /// Chunks that are empty after cleaning are dropped.
    pub fn split<'a>(&'a self, text: &'a str) -> SplitIter<'a> {
        let mut frontier = Vec::with_capacity(8);
        if !text.is_empty() {
            frontier.push(Segment {
                start: 0,
                end: text.len(),
                level: Level::Paragraph,
            });
        }
        SplitIter {
            chunker: self,
            text,
            frontier,
            window: VecDeque::new(),
            window_tokens: 0,
            done: false,
        }
    }

    fn clean(&self, raw: &str) -> String {
        self.whitespace_pattern
            .replace_all(raw, " ")
            .trim()
            .to_string()
    }
}

/// Boundary level a segment will be split at next, coarse to fine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Paragraph,
    Sentence,
    Word,
    Bisect,
}

impl Level {
    fn finer(self) -> Level {
        match self {
            Level::Paragraph => Level::Sentence,
            Level::Sentence => Level::Word,
            Level::Word | Level::Bisect => Level::Bisect,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    start: usize,
    end: usize,
    level: Level,
}

/// A boundary-aligned piece that fits the token budget on its own.
/// Atoms are contiguous byte ranges of the source text, produced in
/// document order, so any run of them maps back to one source slice.
#[derive(Debug, Clone, Copy)]
struct Atom {
    start: usize,
    end: usize,
    tokens: usize,
}

/// Lazy chunk iterator returned by [`Chunker::split`].
pub struct SplitIter<'a> {
    chunker: &'a Chunker,
    text: &'a str,
    // Segments still to decompose; pop order equals document order.
    frontier: Vec<Segment>,
    // Greedy merge window over contiguous atoms.
    window: VecDeque<Atom>,
    window_tokens: usize,
    done: bool,
}

impl<'a> SplitIter<'a> {
    /// Produces the next boundary atom in document order, expanding
    /// oversized segments at progressively finer levels.
    fn next_atom(&mut self) -> Option<Atom> {
        while let Some(seg) = self.frontier.pop() {
            let slice = &self.text[seg.start..seg.end];
            if slice.trim().is_empty() {
                continue;
            }
            let tokens = self.chunker.counter.count(slice);
            if tokens <= self.chunker.config.chunk_size_tokens {
                return Some(Atom {
                    start: seg.start,
                    end: seg.end,
                    tokens,
                });
            }
            if !self.expand(seg) {
                // Unsplittable run; emit oversized rather than loop.
                return Some(Atom {
                    start: seg.start,
                    end: seg.end,
                    tokens,
                });
            }
        }
        None
    }

    /// Pushes `seg`'s children onto the frontier at the next finer level.
    /// Returns false when the segment cannot be split any further.
    fn expand(&mut self, seg: Segment) -> bool {
        if seg.level == Level::Bisect {
            return self.bisect(seg);
        }
        let slice = &self.text[seg.start..seg.end];
        let pattern = match seg.level {
            Level::Paragraph => &self.chunker.paragraph_pattern,
            Level::Sentence => &self.chunker.sentence_pattern,
            _ => &self.chunker.word_pattern,
        };
        let next = seg.level.finer();
        // Cut after each separator so every child keeps its trailing
        // break characters and children tile the segment exactly.
        let mut cuts: Vec<usize> = pattern
            .find_iter(slice)
            .map(|m| seg.start + m.end())
            .filter(|&cut| cut > seg.start && cut < seg.end)
            .collect();
        if cuts.is_empty() {
            self.frontier.push(Segment { level: next, ..seg });
            return true;
        }
        cuts.push(seg.end);
        let mut children = Vec::with_capacity(cuts.len());
        let mut cursor = seg.start;
        for cut in cuts {
            if cut > cursor {
                children.push(Segment {
                    start: cursor,
                    end: cut,
                    level: next,
                });
                cursor = cut;
            }
        }
        for child in children.into_iter().rev() {
            self.frontier.push(child);
        }
        true
    }

    fn bisect(&mut self, seg: Segment) -> bool {
        let mut mid = seg.start + (seg.end - seg.start) / 2;
        while mid > seg.start && !self.text.is_char_boundary(mid) {
            mid -= 1;
        }
        if mid <= seg.start {
            mid = seg.start + 1;
            while mid < seg.end && !self.text.is_char_boundary(mid) {
                mid += 1;
            }
        }
        if mid <= seg.start || mid >= seg.end {
            return false;
        }
        self.frontier.push(Segment {
            start: mid,
            end: seg.end,
            level: Level::Bisect,
        });
        self.frontier.push(Segment {
            start: seg.start,
            end: mid,
            level: Level::Bisect,
        });
        true
    }

    fn push_atom(&mut self, atom: Atom) {
        self.window_tokens += atom.tokens;
        self.window.push_back(atom);
    }

    /// Cleans the current window into a chunk, then drops leading atoms
    /// until the retained tail fits the overlap budget and leaves room
    /// for the incoming atom. The retained tail becomes the overlap
    /// carried into the next chunk.
    fn emit_and_retain(&mut self, incoming: &Atom) -> Option<String> {
        let raw = self.window_slice()?;
        let cleaned = self.chunker.clean(raw);
        let overlap = self.chunker.config.chunk_overlap_tokens;
        let size = self.chunker.config.chunk_size_tokens;
        while self.window_tokens > overlap
            || (self.window_tokens + incoming.tokens > size && self.window_tokens > 0)
        {
            match self.window.pop_front() {
                Some(atom) => self.window_tokens -= atom.tokens,
                None => break,
            }
        }
        (!cleaned.is_empty()).then_some(cleaned)
    }

    fn window_slice(&self) -> Option<&'a str> {
        let front = self.window.front()?;
        let back = self.window.back()?;
        Some(&self.text[front.start..back.end])
    }
}

impl<'a> Iterator for SplitIter<'a> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.done {
            return None;
        }
        loop {
            match self.next_atom() {
                Some(atom) => {
                    let fits = self.window.is_empty()
                        || self.window_tokens + atom.tokens
                            <= self.chunker.config.chunk_size_tokens;
                    if fits {
                        self.push_atom(atom);
                        continue;
                    }
                    let chunk = self.emit_and_retain(&atom);
                    self.push_atom(atom);
                    if let Some(chunk) = chunk {
                        return Some(chunk);
                    }
                }
                None => {
                    self.done = true;
                    let cleaned = self.window_slice().map(|raw| self.chunker.clean(raw));
                    self.window.clear();
                    self.window_tokens = 0;
                    return cleaned.filter(|c| !c.is_empty());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkingConfig {
            chunk_size_tokens: size,
            chunk_overlap_tokens: overlap,
        })
        .unwrap()
    }

    fn token_strs(text: &str) -> Vec<String> {
        let pattern = Regex::new(r"\w+|[^\w\s]").unwrap();
        pattern
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks: Vec<String> = chunker(256, 50).split("Short text.").collect();
        assert_eq!(chunks, vec!["Short text.".to_string()]);
    }

    #[test]
    fn test_empty_and_whitespace_input_yield_nothing() {
        assert_eq!(chunker(256, 50).split("").count(), 0);
        assert_eq!(chunker(256, 50).split("   \n\n \t ").count(), 0);
    }

    #[test]
    fn test_sentence_split_with_token_overlap() {
        // Six tokens at size five forces a sentence-boundary split; the
        // two trailing tokens of the first chunk repeat in the second.
        let chunks: Vec<String> = chunker(5, 2).split("A. B. C.").collect();
        assert_eq!(chunks, vec!["A. B.".to_string(), "B. C.".to_string()]);

        let head = token_strs(&chunks[0]);
        let tail = token_strs(&chunks[1]);
        assert_eq!(head[head.len() - 2..], tail[..2]);
    }

    #[test]
    fn test_word_level_overlap_is_exact() {
        // All words weigh one token, so the overlap snaps to exactly three.
        let text = "an be cat dog elk fox gnu hen ibex jay";
        let chunks: Vec<String> = chunker(6, 3).split(text).collect();
        assert!(chunks.len() >= 2);
        for pair in chunks.windows(2) {
            let prev = token_strs(&pair[0]);
            let next = token_strs(&pair[1]);
            assert_eq!(prev[prev.len() - 3..], next[..3]);
        }
    }

    #[test]
    fn test_deterministic_output() {
        let text = "First paragraph, with a clause.\n\nSecond paragraph! It has two \
                    sentences. And a third one follows here.\n\nThird paragraph ends.";
        let chunker = chunker(12, 4);
        let first: Vec<String> = chunker.split(text).collect();
        let second: Vec<String> = chunker.split(text).collect();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn test_paragraph_boundaries_preferred() {
        let text = "one two six.\n\nten ox cat.";
        let chunks: Vec<String> = chunker(4, 0).split(text).collect();
        assert_eq!(
            chunks,
            vec!["one two six.".to_string(), "ten ox cat.".to_string()]
        );
    }

    #[test]
    fn test_unbreakable_run_is_hard_cut() {
        let text = "x".repeat(100);
        let chunker = chunker(10, 2);
        let chunks: Vec<String> = chunker.split(&text).collect();
        assert!(chunks.len() > 1);
        let counter = HeuristicCounter;
        for chunk in &chunks {
            assert!(counter.count(chunk) <= 10, "chunk over budget: {chunk}");
        }
        // Hard cuts never drop characters.
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_cleaning_collapses_whitespace() {
        let chunks: Vec<String> = chunker(256, 0).split("a \t  b\n\n\nc  ").collect();
        assert_eq!(chunks, vec!["a b c".to_string()]);
    }

    #[test]
    fn test_every_chunk_within_budget() {
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. Sed do \
                    eiusmod tempor incididunt ut labore et dolore magna aliqua. Ut enim \
                    ad minim veniam, quis nostrud exercitation ullamco laboris nisi.\n\n\
                    Duis aute irure dolor in reprehenderit in voluptate velit esse \
                    cillum dolore eu fugiat nulla pariatur. Excepteur sint occaecat \
                    cupidatat non proident, sunt in culpa qui officia deserunt.";
        let chunker = chunker(20, 5);
        let counter = HeuristicCounter;
        let chunks: Vec<String> = chunker.split(text).collect();
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(!chunk.is_empty());
            assert!(counter.count(chunk) <= 20, "chunk too large: {chunk}");
        }
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        let result = Chunker::new(ChunkingConfig {
            chunk_size_tokens: 10,
            chunk_overlap_tokens: 10,
        });
        assert!(matches!(result, Err(RagError::Config(_))));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let result = Chunker::new(ChunkingConfig {
            chunk_size_tokens: 0,
            chunk_overlap_tokens: 0,
        });
        assert!(matches!(result, Err(RagError::Config(_))));
    }

    #[test]
    fn test_iteration_is_lazy() {
        let text = "word ".repeat(10_000);
        let chunker = chunker(8, 2);
        let mut iter = chunker.split(&text);
        // First chunk is available without draining the document.
        let first = iter.next().unwrap();
        assert!(!first.is_empty());
    }
}
