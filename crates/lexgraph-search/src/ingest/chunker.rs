//! Sentence-aware text chunking with overlap.
//!
//! Sentences are packed into windows of about `chunk_chars` characters;
//! consecutive windows share up to `overlap_chars` of trailing context.
//! Sentences longer than a whole window are split hard on character
//! boundaries.

use lexgraph_config::IngestConfig;

/// Text chunker for splitting normalized documents.
#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_chars: usize,
    overlap_chars: usize,
}

impl TextChunker {
    pub fn new(config: &IngestConfig) -> Self {
        Self {
            chunk_chars: config.chunk_chars.max(1),
            overlap_chars: config.overlap_chars.min(config.chunk_chars.saturating_sub(1)),
        }
    }

    /// Split normalized text into overlapping sentence-aware windows.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let sentences = split_sentences(text);
        if sentences.is_empty() {
            return Vec::new();
        }

        let mut chunks: Vec<String> = Vec::new();
        let mut window: Vec<&str> = Vec::new();
        let mut window_len = 0usize;
        let mut has_new = false;

        for sentence in &sentences {
            let sentence_len = sentence.chars().count();

            // Oversized sentence: flush the window, then hard-split
            if sentence_len > self.chunk_chars {
                if has_new && !window.is_empty() {
                    chunks.push(window.join(" "));
                }
                window.clear();
                window_len = 0;
                has_new = false;
                chunks.extend(self.hard_split(sentence));
                continue;
            }

            let extra = if window.is_empty() { 0 } else { 1 };
            if window_len + extra + sentence_len > self.chunk_chars && !window.is_empty() {
                if has_new {
                    chunks.push(window.join(" "));
                }
                let (kept, kept_len) = self.carry_overlap(&window);
                window = kept;
                window_len = kept_len;
                has_new = false;
                // Drop the carry when it would not leave room for the
                // incoming sentence
                if window_len + 1 + sentence_len > self.chunk_chars {
                    window.clear();
                    window_len = 0;
                }
            }

            if !window.is_empty() {
                window_len += 1;
            }
            window.push(sentence);
            window_len += sentence_len;
            has_new = true;
        }

        if has_new && !window.is_empty() {
            chunks.push(window.join(" "));
        }

        chunks
    }

    /// Trailing sentences of the emitted window that fit in the overlap
    /// budget, oldest first.
    fn carry_overlap<'a>(&self, window: &[&'a str]) -> (Vec<&'a str>, usize) {
        if self.overlap_chars == 0 {
            return (Vec::new(), 0);
        }
        let mut kept: Vec<&str> = Vec::new();
        let mut kept_len = 0usize;
        for sentence in window.iter().rev() {
            let sentence_len = sentence.chars().count();
            let extra = if kept.is_empty() { 0 } else { 1 };
            if kept_len + extra + sentence_len > self.overlap_chars {
                break;
            }
            kept.push(sentence);
            kept_len += extra + sentence_len;
        }
        kept.reverse();
        (kept, kept_len)
    }

    /// Character windows with overlap, for sentences larger than a chunk.
    fn hard_split(&self, sentence: &str) -> Vec<String> {
        let chars: Vec<char> = sentence.chars().collect();
        let step = self.chunk_chars.saturating_sub(self.overlap_chars).max(1);
        let mut pieces = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.chunk_chars).min(chars.len());
            pieces.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
        pieces
    }
}

/// Split text into sentences on terminal punctuation.
///
/// A terminator run (".", "!", "?", "…") ends a sentence when followed by
/// whitespace or end of text. Terminators stay attached to their sentence.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut last_was_terminator = false;

    for (idx, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?' | '…') {
            last_was_terminator = true;
            continue;
        }
        if last_was_terminator && c.is_whitespace() {
            let sentence = text[start..idx].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = idx;
        }
        last_was_terminator = false;
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}
