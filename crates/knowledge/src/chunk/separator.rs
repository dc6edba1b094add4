//! Separator-driven recursive splitting.
//!
//! Splits on the first separator present in the text, keeps the separator
//! at the start of the following piece, merges small pieces up to the
//! chunk size with overlap, and recurses into oversize pieces with the
//! remaining separators. Lengths are counted in chars.

use super::Piece;
use crate::text::{byte_offset, char_len};

/// Recursive splitter over an explicit separator list.
#[derive(Debug, Clone)]
pub struct SeparatorSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl SeparatorSplitter {
    /// Callers validate `chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize, separators: Vec<String>) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            separators,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split into trimmed, non-empty chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect()
    }

    /// Split and locate each chunk in the source text.
    pub fn split_with_offsets(&self, text: &str) -> Vec<Piece> {
        let mut pieces = Vec::new();
        let mut index = 0usize;
        let mut previous_len = 0usize;

        for chunk in self.split(text) {
            let from = (index + previous_len).saturating_sub(self.chunk_overlap);
            let from_byte = byte_offset(text, from);

            index = match text[from_byte..].find(&chunk) {
                Some(pos) => from + char_len(&text[from_byte..from_byte + pos]),
                None => text
                    .find(&chunk)
                    .map(|pos| char_len(&text[..pos]))
                    .unwrap_or(index),
            };
            previous_len = char_len(&chunk);

            pieces.push(Piece {
                start: index,
                text: chunk,
            });
        }

        pieces
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut remaining: &[String] = &[];

        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut small: Vec<String> = Vec::new();

        for piece in split_keep_start(text, separator) {
            if char_len(&piece) < self.chunk_size {
                small.push(piece);
                continue;
            }

            if !small.is_empty() {
                chunks.extend(self.merge(&small));
                small.clear();
            }

            if remaining.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_recursive(&piece, remaining));
            }
        }

        if !small.is_empty() {
            chunks.extend(self.merge(&small));
        }

        chunks
    }

    /// Greedy merge of small pieces into windows with overlap.
    fn merge(&self, pieces: &[String]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: std::collections::VecDeque<&str> = std::collections::VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);

            if total + len > self.chunk_size && !window.is_empty() {
                push_joined(&mut chunks, &window);

                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match window.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }

            window.push_back(piece);
            total += len;
        }

        push_joined(&mut chunks, &window);
        chunks
    }
}

fn push_joined(chunks: &mut Vec<String>, window: &std::collections::VecDeque<&str>) {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Split on `separator`, attaching it to the start of each following piece.
/// The empty separator splits into single chars.
fn split_keep_start(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }

    let mut pieces = Vec::new();
    let mut last = 0;
    for (pos, _) in text.match_indices(separator) {
        if pos > last {
            pieces.push(text[last..pos].to_string());
        }
        last = pos;
    }
    if last < text.len() {
        pieces.push(text[last..].to_string());
    }

    pieces.into_iter().filter(|p| !p.is_empty()).collect()
}
