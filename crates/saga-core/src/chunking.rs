//! Splitting document text into analysis windows.
//!
//! The chunker walks the text accumulating characters up to the strategy's
//! target size, then closes each window at the nearest preceding sentence or
//! paragraph boundary within a short look-back, falling back to a hard cut.
//! Consecutive windows overlap by the configured amount so no phrase is lost
//! at a window edge. All offsets are character offsets, so multi-byte text
//! never splits inside a code point.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};

/// Upper bound on how far back a window end searches for a boundary.
const MAX_BOUNDARY_LOOKBACK: usize = 200;

/// Window sizing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkMode {
    /// Small windows (hundreds of characters) for fine-grained theme and
    /// quote extraction.
    Granular,
    /// Larger windows (low thousands of characters) for broader context.
    Standard,
}

/// Chunking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkStrategy {
    /// Target window length in characters.
    pub target_size: usize,
    /// Characters of overlap between consecutive windows.
    pub overlap: usize,
    pub mode: ChunkMode,
}

impl ChunkStrategy {
    pub fn granular() -> Self {
        Self {
            target_size: 600,
            overlap: 100,
            mode: ChunkMode::Granular,
        }
    }

    pub fn standard() -> Self {
        Self {
            target_size: 2400,
            overlap: 200,
            mode: ChunkMode::Standard,
        }
    }

    /// Reject strategies that cannot make forward progress.
    pub fn validate(&self) -> Result<()> {
        if self.target_size == 0 {
            return Err(SagaError::InvalidStrategy(
                "target_size must be greater than zero".into(),
            ));
        }
        if self.overlap >= self.target_size {
            return Err(SagaError::InvalidStrategy(format!(
                "overlap ({}) must be smaller than target_size ({})",
                self.overlap, self.target_size
            )));
        }
        Ok(())
    }
}

impl Default for ChunkStrategy {
    fn default() -> Self {
        Self::standard()
    }
}

/// One contiguous span of document text, the unit of analysis and embedding.
///
/// Windows for a document are ordered by `index`, which equals reading order.
/// They are immutable once created; reprocessing supersedes them wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextWindow {
    pub document_id: String,
    /// 0-based, sequential, defines reading order.
    pub index: usize,
    pub text: String,
    /// Character offset of the first character (inclusive).
    pub start_offset: usize,
    /// Character offset one past the last character (exclusive).
    pub end_offset: usize,
    /// Whitespace-delimited token count.
    pub word_count: usize,
}

fn is_boundary(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '\n')
}

/// Split `text` into windows according to `strategy`.
///
/// Empty text yields an empty vec. Text shorter than the target size yields
/// exactly one window. Output ordering equals reading order, window end
/// offsets never decrease, and consecutive windows always overlap or touch,
/// so the concatenation of windows covers the whole input.
pub fn chunk(document_id: &str, text: &str, strategy: &ChunkStrategy) -> Result<Vec<TextWindow>> {
    strategy.validate()?;

    if text.is_empty() {
        return Ok(Vec::new());
    }

    // Byte offset of every char, so windows slice on char boundaries.
    let byte_of: Vec<usize> = text.char_indices().map(|(b, _)| b).collect();
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let byte_at = |char_idx: usize| -> usize {
        if char_idx >= total {
            text.len()
        } else {
            byte_of[char_idx]
        }
    };

    let lookback = (strategy.target_size / 4).min(MAX_BOUNDARY_LOOKBACK);

    let mut windows = Vec::new();
    let mut start = 0usize;
    let mut prev_end = 0usize;

    loop {
        let hard_end = (start + strategy.target_size).min(total);

        // Prefer to close at a sentence/paragraph boundary shortly before
        // the hard cut, but never on the final window and never so far back
        // that the window empties or end offsets go backwards.
        let mut end = hard_end;
        if hard_end < total {
            let floor = hard_end.saturating_sub(lookback).max(start + 1);
            for i in (floor..hard_end).rev() {
                if is_boundary(chars[i - 1]) {
                    end = i;
                    break;
                }
            }
        }
        let end = end.max(prev_end).max(start + 1);

        let slice = &text[byte_at(start)..byte_at(end)];
        windows.push(TextWindow {
            document_id: document_id.to_string(),
            index: windows.len(),
            text: slice.to_string(),
            start_offset: start,
            end_offset: end,
            word_count: slice.split_whitespace().count(),
        });

        if end >= total {
            break;
        }

        // Step back by the overlap, but never past this window's own start.
        start = end.saturating_sub(strategy.overlap).max(start + 1);
        prev_end = end;
    }

    tracing::debug!(
        document_id,
        windows = windows.len(),
        chars = total,
        "Chunked document text"
    );

    Ok(windows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(target_size: usize, overlap: usize) -> ChunkStrategy {
        ChunkStrategy {
            target_size,
            overlap,
            mode: ChunkMode::Granular,
        }
    }

    #[test]
    fn test_empty_text_yields_no_windows() {
        let windows = chunk("doc", "", &strategy(100, 10)).unwrap();
        assert!(windows.is_empty());
    }

    #[test]
    fn test_short_text_single_window() {
        let windows = chunk("doc", "short text", &strategy(100, 10)).unwrap();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].text, "short text");
        assert_eq!(windows[0].start_offset, 0);
        assert_eq!(windows[0].end_offset, 10);
        assert_eq!(windows[0].word_count, 2);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_target() {
        let err = chunk("doc", "anything", &strategy(50, 50)).unwrap_err();
        assert!(matches!(err, SagaError::InvalidStrategy(_)));

        let err = chunk("doc", "anything", &strategy(0, 0)).unwrap_err();
        assert!(matches!(err, SagaError::InvalidStrategy(_)));
    }

    #[test]
    fn test_windows_cover_input_without_gaps() {
        let text = "word ".repeat(400);
        let windows = chunk("doc", &text, &strategy(120, 20)).unwrap();

        assert!(windows.len() > 1);
        assert_eq!(windows[0].start_offset, 0);
        assert_eq!(windows.last().unwrap().end_offset, text.chars().count());

        for pair in windows.windows(2) {
            // Next window starts at or before the previous one ends: no gap.
            assert!(pair[1].start_offset <= pair[0].end_offset);
            // Reading order and monotone end offsets.
            assert!(pair[1].index == pair[0].index + 1);
            assert!(pair[1].end_offset >= pair[0].end_offset);
            // Overlap never reaches back past the previous window's start.
            assert!(pair[1].start_offset > pair[0].start_offset);
        }

        for w in &windows {
            assert!(w.end_offset > w.start_offset, "zero-length window");
        }
    }

    #[test]
    fn test_prefers_sentence_boundary() {
        // Period sits just inside the look-back of the hard cut at 40.
        let text = "First sentence ends right here. The second sentence keeps going on and on.";
        let windows = chunk("doc", text, &strategy(40, 5)).unwrap();

        assert!(windows.len() >= 2);
        assert!(
            windows[0].text.ends_with('.'),
            "expected boundary cut, got: {:?}",
            windows[0].text
        );
    }

    #[test]
    fn test_hard_cut_without_boundary() {
        let text = "a".repeat(250);
        let windows = chunk("doc", &text, &strategy(100, 10)).unwrap();

        assert_eq!(windows[0].end_offset, 100);
        assert_eq!(windows[1].start_offset, 90);
    }

    #[test]
    fn test_multibyte_text_does_not_split_code_points() {
        let text = "Zabezpečenie štandardnej licenčnej podpory aplikačných systémov. ".repeat(10);
        let windows = chunk("doc", &text, &strategy(80, 15)).unwrap();

        assert!(windows.len() > 1);
        let total_chars = text.chars().count();
        assert_eq!(windows.last().unwrap().end_offset, total_chars);
        for w in &windows {
            assert_eq!(w.text.chars().count(), w.end_offset - w.start_offset);
        }
    }

    #[test]
    fn test_granular_and_standard_presets() {
        assert!(ChunkStrategy::granular().target_size < ChunkStrategy::standard().target_size);
        ChunkStrategy::granular().validate().unwrap();
        ChunkStrategy::standard().validate().unwrap();
    }
}
