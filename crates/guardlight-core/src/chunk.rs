//! Paragraph-boundary text chunker.
//!
//! Splits normalized text into pieces that fit an analyzer's context window.
//! The window is measured in characters, not bytes, so multi-byte text is
//! never cut inside a code point.
//!
//! # Algorithm
//!
//! 1. Split text on `\n\n` paragraph boundaries.
//! 2. Accumulate paragraphs into a buffer until adding the next paragraph
//!    would exceed `max_chars`.
//! 3. When exceeded, flush the buffer as a chunk and start a new one.
//! 4. If a single paragraph exceeds `max_chars`, hard-split it at the last
//!    newline or space inside the window, or at the window edge if there is
//!    none.
//! 5. Always return at least one chunk (an empty text yields one empty chunk).
//!
//! # Example
//!
//! ```rust
//! use guardlight_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("Hello world.\n\nSecond paragraph.", 32000);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].index, 0);
//! ```

/// One piece of text sized for a single analyzer job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
}

/// Split text into chunks of at most `max_chars` characters.
///
/// Indices are contiguous from 0. A `max_chars` of zero is treated as one.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<TextChunk> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }
        let para_chars = trimmed.chars().count();

        let would_be = if buf.is_empty() {
            para_chars
        } else {
            buf_chars + 2 + para_chars
        };
        if would_be > max_chars && !buf.is_empty() {
            push(&mut chunks, &buf);
            buf.clear();
            buf_chars = 0;
        }

        if para_chars > max_chars {
            hard_split(&mut chunks, trimmed, max_chars);
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
                buf_chars += 2;
            }
            buf.push_str(trimmed);
            buf_chars += para_chars;
        }
    }

    if !buf.is_empty() {
        push(&mut chunks, &buf);
    }
    if chunks.is_empty() {
        push(&mut chunks, text.trim());
    }
    chunks
}

fn hard_split(chunks: &mut Vec<TextChunk>, para: &str, max_chars: usize) {
    let mut remaining = para;
    while !remaining.is_empty() {
        let limit = byte_offset(remaining, max_chars);
        let cut = if limit < remaining.len() {
            remaining[..limit]
                .rfind('\n')
                .or_else(|| remaining[..limit].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(limit)
        } else {
            limit
        };
        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            push(chunks, piece);
        }
        remaining = &remaining[cut..];
    }
}

/// Byte offset of the `n`th character, or the string length.
fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

fn push(chunks: &mut Vec<TextChunk>, text: &str) {
    chunks.push(TextChunk {
        index: chunks.len(),
        text: text.to_string(),
    });
}
