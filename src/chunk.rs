//! Two-stage sentence chunker.
//!
//! Cleaned page text is first cut into overlapping fixed-length character
//! windows, which bounds the cost of segmentation and keeps some context
//! across window edges. Each window is then split into sentences on terminal
//! punctuation followed by whitespace.
//!
//! Every window is segmented, so the whole page is covered. Sentences are
//! tracked by their position in the page: one already emitted from an earlier
//! window is skipped, and the trailing piece of a window that stops short of a
//! sentence boundary is left for the next window, which sees it whole. The
//! result is always the page's own sentence sequence, with no fragments at
//! window edges.
//!
//! # Example
//!
//! ```rust
//! use docqa::chunk::Chunker;
//!
//! let chunker = Chunker::new(1000, 200).unwrap();
//! let sentences = chunker.split("the sky is blue. water boils at 100 degrees.");
//! assert_eq!(sentences, vec!["the sky is blue.", "water boils at 100 degrees."]);
//! ```

use sha2::{Digest, Sha256};
use std::ops::Range;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, ChunkMetadata};

/// Invalid window parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("window overlap {overlap} must be smaller than window size {window_size} (and size > 0)")]
pub struct ChunkerError {
    pub window_size: usize,
    pub overlap: usize,
}

#[derive(Debug, Clone)]
pub struct Chunker {
    window_size: usize,
    overlap: usize,
}

impl Chunker {
    /// Requires `0 <= overlap < window_size`.
    pub fn new(window_size: usize, overlap: usize) -> Result<Self, ChunkerError> {
        if window_size == 0 || overlap >= window_size {
            return Err(ChunkerError {
                window_size,
                overlap,
            });
        }
        Ok(Self {
            window_size,
            overlap,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self, ChunkerError> {
        Self::new(config.window_size, config.window_overlap)
    }

    /// Split text into overlapping windows of at most `window_size` characters.
    ///
    /// Windows start every `window_size - overlap` characters; the last window
    /// ends at the end of the text.
    pub fn windows<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.window_ranges(text)
            .into_iter()
            .map(|range| &text[range])
            .collect()
    }

    /// Byte ranges of [`windows`](Self::windows).
    fn window_ranges(&self, text: &str) -> Vec<Range<usize>> {
        if text.is_empty() {
            return Vec::new();
        }

        // Byte offset of every char, plus the end of the text.
        let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        bounds.push(text.len());
        let char_count = bounds.len() - 1;

        let step = self.window_size - self.overlap;
        let mut ranges = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.window_size).min(char_count);
            ranges.push(bounds[start]..bounds[end]);
            if end == char_count {
                break;
            }
            start += step;
        }
        ranges
    }

    /// Window the text, segment every window, and return the ordered sentences.
    pub fn split(&self, text: &str) -> Vec<String> {
        let mut sentences = Vec::new();
        // End of the last emitted sentence.
        let mut cursor = 0;

        for window in self.window_ranges(text) {
            for span in sentence_spans(&text[window.clone()]) {
                let end = window.start + span.end;
                if end <= cursor {
                    continue;
                }
                if !ends_sentence(text, end) {
                    break;
                }
                push_trimmed(&mut sentences, &text[cursor..end]);
                cursor = end;
            }
        }

        sentences
    }
}

/// True if a sentence of `text` ends at byte `end`.
fn ends_sentence(text: &str, end: usize) -> bool {
    let rest = &text[end..];
    if rest.trim().is_empty() {
        return true;
    }
    matches!(text[..end].chars().next_back(), Some('.' | '!' | '?'))
        && rest.starts_with(char::is_whitespace)
}

/// Split on `.`, `!`, or `?` followed by whitespace; trim and drop empty pieces.
pub fn split_sentences(text: &str) -> Vec<String> {
    sentence_spans(text)
        .into_iter()
        .map(|span| text[span].to_string())
        .collect()
}

/// Byte ranges of the trimmed, non-empty sentences of `text`.
fn sentence_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        if let Some(&(next_i, next_c)) = chars.peek() {
            if next_c.is_whitespace() {
                push_span(&mut spans, text, start..next_i);
                start = next_i;
            }
        }
    }
    push_span(&mut spans, text, start..text.len());

    spans
}

fn push_span(out: &mut Vec<Range<usize>>, text: &str, range: Range<usize>) {
    let piece = &text[range.clone()];
    let start = range.start + (piece.len() - piece.trim_start().len());
    let end = range.end - (piece.len() - piece.trim_end().len());
    if start < end {
        out.push(start..end);
    }
}

fn push_trimmed(out: &mut Vec<String>, piece: &str) {
    let trimmed = piece.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Wrap a sentence into a [`Chunk`] with its metadata and content hash.
pub fn make_chunk(
    document_id: &str,
    filename: &str,
    page_number: u32,
    sequence: u64,
    text: &str,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        text: text.to_string(),
        metadata: ChunkMetadata {
            document_id: document_id.to_string(),
            filename: filename.to_string(),
            page_number,
            sequence,
            hash,
        },
    }
}
