//! Transcript chunker.
//!
//! Splits transcript text into [`Chunk`]s that respect a `max_tokens` budget.
//! Paragraphs (`\n\n`) are packed greedily; a paragraph over budget is broken
//! into sentences (or transcript lines), and a single sentence over budget is
//! cut at the last whitespace before the limit. Cuts always land on UTF-8
//! character boundaries.
//!
//! Each chunk carries a SHA-256 hash of its text.

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

struct Segment<'a> {
    text: &'a str,
    new_paragraph: bool,
}

/// Split text into chunks with contiguous indices starting at 0.
///
/// Whitespace-only input produces no chunks.
pub fn chunk_text(text: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let normalized = text.replace("\r\n", "\n");

    let mut chunks = Vec::new();
    let mut buf = String::new();

    for seg in segments(&normalized, max_chars) {
        let sep = if seg.new_paragraph { "\n\n" } else { " " };
        let would_be = if buf.is_empty() {
            seg.text.len()
        } else {
            buf.len() + sep.len() + seg.text.len()
        };

        if would_be > max_chars && !buf.is_empty() {
            push_chunk(&mut chunks, &buf);
            buf.clear();
        }

        if !buf.is_empty() {
            buf.push_str(sep);
        }
        buf.push_str(seg.text);
    }

    if !buf.is_empty() {
        push_chunk(&mut chunks, &buf);
    }

    chunks
}

fn segments(text: &str, max_chars: usize) -> Vec<Segment<'_>> {
    let mut out = Vec::new();

    for para in text.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }

        if para.len() <= max_chars {
            out.push(Segment {
                text: para,
                new_paragraph: true,
            });
            continue;
        }

        let mut first = true;
        for sentence in split_sentences(para) {
            for piece in hard_split(sentence, max_chars) {
                out.push(Segment {
                    text: piece,
                    new_paragraph: first,
                });
                first = false;
            }
        }
    }

    out
}

/// Cut after `.`, `!` or `?` followed by whitespace, and at line breaks.
fn split_sentences(para: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut prev_terminal = false;

    for (i, c) in para.char_indices() {
        if c == '\n' || (prev_terminal && c.is_whitespace()) {
            let s = para[start..i].trim();
            if !s.is_empty() {
                out.push(s);
            }
            start = i + c.len_utf8();
        }
        prev_terminal = matches!(c, '.' | '!' | '?');
    }

    let tail = para[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

fn hard_split(sentence: &str, max_chars: usize) -> Vec<&str> {
    let mut out = Vec::new();
    let mut remaining = sentence;

    while remaining.len() > max_chars {
        let limit = floor_char_boundary(remaining, max_chars);
        let cut = remaining[..limit]
            .rfind(char::is_whitespace)
            .filter(|&pos| pos > 0)
            .unwrap_or(limit);
        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            out.push(piece);
        }
        remaining = remaining[cut..].trim_start();
    }

    if !remaining.is_empty() {
        out.push(remaining);
    }
    out
}

/// Largest char boundary `<= max`, but never 0 for non-empty input.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    let mut i = max.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    if i == 0 {
        s.chars().next().map(char::len_utf8).unwrap_or(0)
    } else {
        i
    }
}

fn push_chunk(chunks: &mut Vec<Chunk>, text: &str) {
    chunks.push(Chunk {
        chunk_index: chunks.len() as i64,
        text: text.to_string(),
        hash: hex::encode(Sha256::digest(text.as_bytes())),
    });
}
