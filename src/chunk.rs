//! Sliding-window text chunker.
//!
//! Splits page text into fixed-width, overlapping character windows. The
//! window advances by `window - overlap` characters; each slice is trimmed
//! and dropped if what remains is too short to carry retrievable signal.
//!
//! Boundaries are counted in Unicode scalar values, never bytes, so a
//! window never splits a code point. They are not token- or
//! sentence-aware.

use crate::config::ChunkingConfig;
use crate::error::ConfigError;
use crate::models::{Chunk, Page};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    window: usize,
    overlap: usize,
    min_chars: usize,
}

/// One trimmed window. `offset` is the character index where the untrimmed
/// window started in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextWindow {
    pub offset: usize,
    pub text: String,
}

impl Chunker {
    pub fn new(window: usize, overlap: usize, min_chars: usize) -> Result<Self, ConfigError> {
        ChunkingConfig {
            window,
            overlap,
            min_chars,
        }
        .validate()?;
        Ok(Self {
            window,
            overlap,
            min_chars,
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self, ConfigError> {
        Self::new(config.window, config.overlap, config.min_chars)
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Lazily iterate the windows of `text`. Calling this again on the same
    /// input yields the same sequence.
    pub fn chunks<'a>(&self, text: &'a str) -> Windows<'a> {
        // char index -> byte index, plus the end sentinel
        let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        boundaries.push(text.len());
        Windows {
            text,
            boundaries,
            start: 0,
            step: self.window - self.overlap,
            window: self.window,
            min_chars: self.min_chars,
            done: false,
        }
    }

    /// Chunk every page, numbering chunks per document from 0.
    pub fn chunk_pages(&self, pages: &[Page]) -> Vec<Chunk> {
        let mut out = Vec::new();
        let mut seq_by_doc: std::collections::HashMap<&str, usize> =
            std::collections::HashMap::new();

        for page in pages {
            for window in self.chunks(&page.text) {
                let seq = seq_by_doc.entry(page.document_id.as_str()).or_insert(0);
                out.push(Chunk {
                    document_id: page.document_id.clone(),
                    page: page.number,
                    text: window.text,
                    seq: *seq,
                });
                *seq += 1;
            }
        }

        out
    }
}

/// Iterator returned by [`Chunker::chunks`].
pub struct Windows<'a> {
    text: &'a str,
    boundaries: Vec<usize>,
    start: usize,
    step: usize,
    window: usize,
    min_chars: usize,
    done: bool,
}

impl Windows<'_> {
    fn char_len(&self) -> usize {
        self.boundaries.len() - 1
    }
}

impl Iterator for Windows<'_> {
    type Item = TextWindow;

    fn next(&mut self) -> Option<TextWindow> {
        let len = self.char_len();

        while !self.done && self.start < len {
            let offset = self.start;
            let end = (offset + self.window).min(len);
            let slice = &self.text[self.boundaries[offset]..self.boundaries[end]];

            if end == len {
                self.done = true;
            } else {
                self.start += self.step;
            }

            let trimmed = slice.trim();
            if trimmed.chars().count() > self.min_chars {
                return Some(TextWindow {
                    offset,
                    text: trimmed.to_string(),
                });
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alphabet_text(len: usize) -> String {
        (0..len)
            .map(|i| (b'a' + (i % 26) as u8) as char)
            .collect()
    }

    #[test]
    fn rejects_overlap_not_smaller_than_window() {
        assert!(Chunker::new(80, 80, 0).is_err());
        assert!(Chunker::new(10, 50, 0).is_err());
        assert!(Chunker::new(0, 0, 0).is_err());
        assert!(Chunker::new(500, 80, 20).is_ok());
    }

    #[test]
    fn short_text_single_window() {
        let chunker = Chunker::new(500, 80, 5).unwrap();
        let windows: Vec<_> = chunker.chunks("  Hello, retrieval world!  ").collect();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].text, "Hello, retrieval world!");
        assert_eq!(windows[0].offset, 0);
    }

    #[test]
    fn empty_and_tiny_text_produce_nothing() {
        let chunker = Chunker::new(500, 80, 20).unwrap();
        assert_eq!(chunker.chunks("").count(), 0);
        assert_eq!(chunker.chunks("   \n  ").count(), 0);
        assert_eq!(chunker.chunks("page 3").count(), 0);
    }

    #[test]
    fn windows_advance_by_window_minus_overlap() {
        let chunker = Chunker::new(10, 3, 0).unwrap();
        let text = alphabet_text(30);
        let offsets: Vec<usize> = chunker.chunks(&text).map(|w| w.offset).collect();
        assert_eq!(offsets, vec![0, 7, 14, 21]);
    }

    #[test]
    fn consecutive_windows_share_overlap() {
        let chunker = Chunker::new(10, 3, 0).unwrap();
        let text = alphabet_text(40);
        let windows: Vec<_> = chunker.chunks(&text).collect();
        for pair in windows.windows(2) {
            let prev: Vec<char> = pair[0].text.chars().collect();
            let next: Vec<char> = pair[1].text.chars().collect();
            let suffix: String = prev[prev.len() - 3..].iter().collect();
            let prefix: String = next[..3].iter().collect();
            assert_eq!(suffix, prefix);
        }
    }

    #[test]
    fn windows_cover_every_character() {
        for (len, window, overlap) in [(500, 500, 80), (1000, 500, 80), (1337, 120, 30), (64, 8, 7)]
        {
            let chunker = Chunker::new(window, overlap, 0).unwrap();
            let text = alphabet_text(len);
            let mut covered = vec![false; len];
            for w in chunker.chunks(&text) {
                for slot in covered
                    .iter_mut()
                    .skip(w.offset)
                    .take(w.text.chars().count())
                {
                    *slot = true;
                }
            }
            assert!(
                covered.iter().all(|c| *c),
                "gap for len={} window={} overlap={}",
                len,
                window,
                overlap
            );
        }
    }

    #[test]
    fn trailing_fragment_inside_overlap_is_not_emitted() {
        // 920 chars, step 420: the third start (840) is entirely inside the
        // second window, which already reached the end.
        let chunker = Chunker::new(500, 80, 20).unwrap();
        let text = alphabet_text(920);
        let offsets: Vec<usize> = chunker.chunks(&text).map(|w| w.offset).collect();
        assert_eq!(offsets, vec![0, 420]);
    }

    #[test]
    fn short_trimmed_windows_are_dropped() {
        let chunker = Chunker::new(10, 2, 4).unwrap();
        // second window is mostly whitespace
        let text = "abcdefghij          xy";
        let windows: Vec<_> = chunker.chunks(text).collect();
        assert!(windows.iter().all(|w| w.text.chars().count() > 4));
        assert_eq!(windows[0].text, "abcdefghij");
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let chunker = Chunker::new(4, 1, 0).unwrap();
        let text = "äöüßéèêëïî";
        let windows: Vec<_> = chunker.chunks(text).collect();
        assert_eq!(windows[0].text, "äöüß");
        assert_eq!(windows[1].text, "ßéèê");
    }

    #[test]
    fn iteration_is_restartable() {
        let chunker = Chunker::new(50, 10, 0).unwrap();
        let text = alphabet_text(400);
        let a: Vec<_> = chunker.chunks(&text).collect();
        let b: Vec<_> = chunker.chunks(&text).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn chunk_pages_numbers_per_document() {
        let chunker = Chunker::new(10, 2, 0).unwrap();
        let page = |doc: &str, number: u32| Page {
            document_id: doc.to_string(),
            number,
            text: alphabet_text(20),
        };
        let chunks = chunker.chunk_pages(&[page("a.pdf", 1), page("a.pdf", 2), page("b.pdf", 1)]);

        let a: Vec<_> = chunks.iter().filter(|c| c.document_id == "a.pdf").collect();
        for (i, c) in a.iter().enumerate() {
            assert_eq!(c.seq, i);
        }
        assert!(a.iter().any(|c| c.page == 2));

        let b: Vec<_> = chunks.iter().filter(|c| c.document_id == "b.pdf").collect();
        assert_eq!(b[0].seq, 0);
        assert!(b.iter().all(|c| c.page == 1));
    }
}
