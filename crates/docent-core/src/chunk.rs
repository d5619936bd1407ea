//! Recursive character splitter used by corpus builds.
//!
//! Splits a document body into overlapping passages no longer than
//! `chunk_size` characters, preferring to break on markdown structure.
//!
//! # Algorithm
//!
//! 1. Pick the first separator from [`DEFAULT_SEPARATORS`] that occurs in
//!    the text (section headings first, then paragraphs, lines, words).
//! 2. Split on it, keeping the separator at the start of each following
//!    piece so headings stay attached to their section.
//! 3. Greedily merge adjacent pieces up to `chunk_size`. When a passage is
//!    emitted, pieces are dropped from its front until at most
//!    `chunk_overlap` characters remain to seed the next passage.
//! 4. A piece that alone exceeds `chunk_size` is split recursively with
//!    the remaining separators, falling back to single characters.
//!
//! Lengths are measured in `char`s, never bytes, so multi-byte text is
//! never cut inside a code point.
//!
//! # Example
//!
//! ```rust
//! use docent_core::chunk::split_text;
//!
//! let parts = split_text("Hello world.\n\nSecond paragraph.", 1000, 200);
//! assert_eq!(parts, vec!["Hello world.\n\nSecond paragraph."]);
//! ```

use std::collections::VecDeque;

use sha2::{Digest, Sha256};

/// Separators tried in order, coarsest first.
pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n## ", "\n### ", "\n\n", "\n", " "];

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Split `text` into passages of at most `chunk_size` characters.
///
/// Passages are trimmed; empty passages are never returned. An empty or
/// whitespace-only input yields an empty vector.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    split_with(text, &DEFAULT_SEPARATORS, chunk_size, chunk_overlap)
}

fn split_with(text: &str, separators: &[&str], size: usize, overlap: usize) -> Vec<String> {
    let found = separators.iter().position(|s| text.contains(s));
    let (pieces, rest): (Vec<&str>, &[&str]) = match found {
        Some(i) => (split_keep(text, separators[i]), &separators[i + 1..]),
        None => (char_pieces(text), &[]),
    };

    let mut out = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();

    for piece in pieces {
        if char_len(piece) <= size {
            fitting.push(piece);
            continue;
        }
        if !fitting.is_empty() {
            out.extend(merge(&fitting, size, overlap));
            fitting.clear();
        }
        out.extend(split_with(piece, rest, size, overlap));
    }

    if !fitting.is_empty() {
        out.extend(merge(&fitting, size, overlap));
    }

    out
}

/// Split on `sep`, keeping it at the start of each following piece.
fn split_keep<'a>(text: &'a str, sep: &str) -> Vec<&'a str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(sep) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn char_pieces(text: &str) -> Vec<&str> {
    text.char_indices()
        .map(|(i, c)| &text[i..i + c.len_utf8()])
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn merge(pieces: &[&str], size: usize, overlap: usize) -> Vec<String> {
    let mut docs = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        let len = char_len(piece);
        if total + len > size && !window.is_empty() {
            push_joined(&mut docs, &window);
            while total > overlap || (total + len > size && total > 0) {
                match window.pop_front() {
                    Some(front) => total -= char_len(front),
                    None => break,
                }
            }
        }
        window.push_back(piece);
        total += len;
    }
    push_joined(&mut docs, &window);
    docs
}

fn push_joined(docs: &mut Vec<String>, window: &VecDeque<&str>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

/// Rewrite bare `---` lines as `***` (both are markdown thematic breaks).
///
/// Applied to document bodies before splitting so that
/// [`crate::context::BLOCK_SEPARATOR`] cannot occur inside a passage.
pub fn neutralize_block_separators(text: &str) -> String {
    text.lines()
        .map(|line| if line.trim() == "---" { "***" } else { line })
        .collect::<Vec<_>>()
        .join("\n")
}

/// SHA-256 of `text`, lowercase hex.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Passage id: `<source>_<chunk_index>_<hash prefix>`.
///
/// Stable across rebuilds exactly when the passage content is unchanged.
pub fn passage_id(source: &str, chunk_index: usize, content: &str) -> String {
    let hash = content_hash(content);
    format!("{}_{}_{}", source, chunk_index, &hash[..8])
}
