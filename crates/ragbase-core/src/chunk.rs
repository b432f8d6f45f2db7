//! Sliding-window text chunker.
//!
//! Splits a document's extracted text into overlapping [`TextSegment`]s of
//! at most `chunk_size` characters. Consecutive segments share roughly
//! `overlap` characters so context survives chunk boundaries.
//!
//! # Algorithm
//!
//! 1. Validate the configuration (`chunk_size > 0`, `overlap < chunk_size`).
//! 2. Return no segments for empty or whitespace-only input.
//! 3. Open a window of `chunk_size` characters at the current start.
//! 4. If the window reaches the end of the text, emit it and stop.
//! 5. Otherwise search backwards from the window end for, in order of
//!    preference, a paragraph break (`\n\n`), a sentence end (`.`, `!`, `?`
//!    followed by whitespace, or a newline), then any whitespace. Only the
//!    back half of the window is searched so chunks stay near the target
//!    size. With no candidate the window is cut hard.
//! 6. Start the next window `overlap` characters before the previous end,
//!    moved forward to the next word start when one exists in the overlap.
//!
//! Lengths are counted in characters; segment offsets are byte offsets into
//! the input so callers can slice the original text directly.
//!
//! # Example
//!
//! ```rust
//! use ragbase_core::chunk::{chunk_text, ChunkingConfig};
//!
//! let config = ChunkingConfig::new(800, 120).unwrap();
//! let segments = chunk_text("The sky is blue.", &config).unwrap();
//! assert_eq!(segments.len(), 1);
//! assert_eq!(segments[0].text, "The sky is blue.");
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 800;
pub const DEFAULT_OVERLAP: usize = 120;

/// Chunking parameters, passed explicitly into every chunking call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target maximum length of a chunk, in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        let config = Self {
            chunk_size,
            overlap,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::InvalidConfiguration(
                "chunk_size must be > 0".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(RagError::InvalidConfiguration(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// A contiguous slice of the input text. `start..end` are byte offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSegment {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Split `text` into overlapping segments.
///
/// # Guarantees
///
/// - Identical input and configuration always yield identical output.
/// - Empty or whitespace-only input yields an empty vector.
/// - Every segment holds at most `chunk_size` characters.
/// - Each segment starts no later than the previous one ends, so the
///   segments cover the text without gaps. Whitespace-only windows are
///   dropped.
///
/// # Errors
///
/// [`RagError::InvalidConfiguration`] if the configuration is invalid,
/// checked before the text is inspected.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Result<Vec<TextSegment>> {
    config.validate()?;

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let n = chars.len();
    let byte_at = |i: usize| if i < n { chars[i].0 } else { text.len() };

    let mut segments = Vec::new();
    let mut start = 0usize;

    loop {
        let hard_end = (start + config.chunk_size).min(n);
        let end = if hard_end == n {
            n
        } else {
            find_break(&chars, start, hard_end, config)
        };

        let (start_byte, end_byte) = (byte_at(start), byte_at(end));
        let piece = &text[start_byte..end_byte];
        if !piece.trim().is_empty() {
            segments.push(TextSegment {
                text: piece.to_string(),
                start: start_byte,
                end: end_byte,
            });
        }

        if end >= n {
            break;
        }
        start = next_start(&chars, end, config.overlap);
    }

    Ok(segments)
}

/// Pick the end (exclusive, in chars) of the window `[start, hard_end)`.
///
/// The result is always greater than `start + overlap`, which keeps the
/// next window start strictly after the current one.
fn find_break(chars: &[(usize, char)], start: usize, hard_end: usize, config: &ChunkingConfig) -> usize {
    let min_end = (start + (config.overlap + 1).max(config.chunk_size / 2)).min(hard_end);
    let ch = |i: usize| chars[i].1;

    let paragraph = (min_end.max(start + 2)..=hard_end)
        .rev()
        .find(|&e| ch(e - 1) == '\n' && ch(e - 2) == '\n');
    if let Some(e) = paragraph {
        return e;
    }

    let sentence = (min_end..=hard_end).rev().find(|&e| {
        let prev = ch(e - 1);
        prev == '\n' || (matches!(prev, '.' | '!' | '?') && ch(e).is_whitespace())
    });
    if let Some(e) = sentence {
        return e;
    }

    (min_end..=hard_end)
        .rev()
        .find(|&e| ch(e - 1).is_whitespace())
        .unwrap_or(hard_end)
}

fn next_start(chars: &[(usize, char)], end: usize, overlap: usize) -> usize {
    if overlap == 0 {
        return end;
    }
    let start = end - overlap;
    let mid_word = !chars[start - 1].1.is_whitespace() && !chars[start].1.is_whitespace();
    if !mid_word {
        return start;
    }
    (start + 1..end)
        .find(|&i| chars[i - 1].1.is_whitespace() && !chars[i].1.is_whitespace())
        .unwrap_or(start)
}
