//! Text chunking with overlap for embedding.

use crate::models::IndexingConfig;
use crate::utils::has_meaningful_content;

/// One chunk of source text with byte offsets into that text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Splits text into overlapping, character-counted windows.
#[derive(Debug, Clone)]
pub struct TextChunker {
    /// Window length in characters
    max_chars: usize,
    /// Characters repeated at the start of the following window
    overlap: usize,
    respect_word_boundaries: bool,
}

impl TextChunker {
    pub fn new(max_chars: usize, overlap: usize, respect_word_boundaries: bool) -> Self {
        let max_chars = max_chars.max(1);
        Self {
            max_chars,
            overlap: overlap.min(max_chars - 1),
            respect_word_boundaries,
        }
    }

    pub fn from_config(config: &IndexingConfig) -> Self {
        Self::new(
            config.chunk_size as usize,
            config.chunk_overlap as usize,
            config.respect_word_boundaries,
        )
    }

    pub fn with_defaults() -> Self {
        Self::from_config(&IndexingConfig::default())
    }

    /// Chunk `text` into overlapping spans. Whitespace-only input yields nothing.
    pub fn chunk(&self, text: &str) -> Vec<TextSpan> {
        if !has_meaningful_content(text) {
            return Vec::new();
        }

        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let total = chars.len();
        let byte_at = |idx: usize| chars.get(idx).map(|(b, _)| *b).unwrap_or(text.len());

        let mut spans = Vec::new();
        let mut start = 0;

        while start < total {
            let target_end = (start + self.max_chars).min(total);
            let end = if target_end < total && self.respect_word_boundaries {
                self.find_break_point(&chars, start, target_end)
            } else {
                target_end
            };

            let (byte_start, byte_end) = (byte_at(start), byte_at(end));
            let slice = &text[byte_start..byte_end];
            if has_meaningful_content(slice) {
                spans.push(TextSpan {
                    text: slice.to_string(),
                    start: byte_start,
                    end: byte_end,
                });
            }

            if end >= total {
                break;
            }

            let next = end.saturating_sub(self.overlap);
            start = if next > start { next } else { end };
        }

        spans
    }

    /// Pull `target_end` back to a natural break inside the last fifth of the
    /// window. Falls back to a hard split when the window has no whitespace.
    fn find_break_point(&self, chars: &[(usize, char)], start: usize, target_end: usize) -> usize {
        let search_start = target_end
            .saturating_sub(self.max_chars / 5)
            .max(start + 1);
        if search_start >= target_end {
            return target_end;
        }

        let mut paragraph = None;
        let mut newline = None;
        let mut sentence = None;
        let mut space = None;

        for pos in search_start..target_end {
            let c = chars[pos].1;
            match c {
                '\n' => {
                    if pos > 0 && chars[pos - 1].1 == '\n' {
                        paragraph = Some(pos + 1);
                    }
                    newline = Some(pos + 1);
                }
                c if c.is_whitespace() => {
                    if pos > 0 && matches!(chars[pos - 1].1, '.' | '!' | '?') {
                        sentence = Some(pos + 1);
                    }
                    space = Some(pos + 1);
                }
                _ => {}
            }
        }

        paragraph
            .or(newline)
            .or(sentence)
            .or(space)
            .unwrap_or(target_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifteen_hundred_chars_make_two_chunks() {
        let chunker = TextChunker::new(1000, 200, true);
        let text = "a".repeat(1500);
        let spans = chunker.chunk(&text);

        assert_eq!(spans.len(), 2);
        assert_eq!((spans[0].start, spans[0].end), (0, 1000));
        assert_eq!((spans[1].start, spans[1].end), (800, 1500));
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunker = TextChunker::with_defaults();
        let spans = chunker.chunk("Hello, world!");

        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "Hello, world!");
        assert_eq!((spans[0].start, spans[0].end), (0, 13));
    }

    #[test]
    fn test_empty_and_whitespace_yield_nothing() {
        let chunker = TextChunker::with_defaults();
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("  \n\t  \n").is_empty());
    }

    #[test]
    fn test_does_not_split_words() {
        let chunker = TextChunker::new(25, 5, true);
        let text = vec!["word"; 50].join(" ");
        let spans = chunker.chunk(&text);

        assert!(spans.len() > 1);
        for span in &spans[..spans.len() - 1] {
            assert!(span.text.ends_with(' '), "chunk split mid-word: {:?}", span.text);
        }
        assert_eq!(spans.last().unwrap().end, text.len());
    }

    #[test]
    fn test_offsets_are_bytes() {
        let chunker = TextChunker::new(10, 2, true);
        let text = "é".repeat(30);
        let spans = chunker.chunk(&text);

        assert!(spans.len() > 1);
        for span in &spans {
            assert_eq!(&text[span.start..span.end], span.text);
            assert!(span.text.chars().count() <= 10);
        }
        assert_eq!(spans[1].start, 8 * 'é'.len_utf8());
    }

    #[test]
    fn test_prefers_paragraph_break() {
        let chunker = TextChunker::new(40, 0, true);
        let text = format!("{}\n\n{}", "x".repeat(34), "y".repeat(30));
        let spans = chunker.chunk(&text);

        assert_eq!(spans[0].end, 36);
        assert!(spans[1].text.starts_with('y'));
    }

    #[test]
    fn test_overlap_clamped_below_window() {
        let chunker = TextChunker::new(10, 50, false);
        let spans = chunker.chunk(&"b".repeat(25));
        assert!(spans.len() >= 2);
        assert_eq!(spans.last().unwrap().end, 25);
    }
}
