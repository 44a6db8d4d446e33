//! Fixed-size document chunking.
//!
//! Splits on character counts only; word and sentence boundaries are ignored,
//! so a chunk may end mid-word. Chunks never overlap and concatenate back to
//! the input text.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
    pub chunk_index: usize,
}

/// Split `text` into consecutive spans of `size` characters. The last span
/// holds the remainder. A `size` of 0 yields the whole text as one chunk.
pub fn chunk_text(text: &str, size: usize) -> Vec<TextChunk> {
    if text.is_empty() {
        return Vec::new();
    }
    if size == 0 {
        return vec![TextChunk {
            text: text.to_string(),
            chunk_index: 0,
        }];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (byte_pos, _) in text.char_indices() {
        if count == size {
            chunks.push(TextChunk {
                text: text[start..byte_pos].to_string(),
                chunk_index: chunks.len(),
            });
            start = byte_pos;
            count = 0;
        }
        count += 1;
    }

    chunks.push(TextChunk {
        text: text[start..].to_string(),
        chunk_index: chunks.len(),
    });

    chunks
}
