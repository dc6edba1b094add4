//! Char-safe text helpers shared by the splitters and the RAG operators.
//!
//! All lengths are counted in Unicode scalar values so that CJK text is
//! measured the same way as ASCII.

use std::collections::HashSet;
use unicode_segmentation::UnicodeSegmentation;

/// Length in chars.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Byte offset of the `n`-th char (or the end of the string).
pub fn byte_offset(text: &str, n: usize) -> usize {
    text.char_indices()
        .nth(n)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

/// The first `n` chars.
pub fn take_chars(text: &str, n: usize) -> &str {
    &text[..byte_offset(text, n)]
}

/// Chars in `[start, end)`.
pub fn slice_chars(text: &str, start: usize, end: usize) -> &str {
    let from = byte_offset(text, start);
    let to = byte_offset(text, end.max(start));
    &text[from..to]
}

/// The first `n` chars followed by `...` when the text was longer.
pub fn truncate_with_ellipsis(text: &str, n: usize) -> String {
    let head = take_chars(text, n);
    if head.len() < text.len() {
        format!("{}...", head)
    } else {
        head.to_string()
    }
}

/// Whether a char belongs to a CJK script (ideographs, kana, hangul).
pub fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF     // Hiragana, Katakana
        | 0x3400..=0x4DBF   // CJK Extension A
        | 0x4E00..=0x9FFF   // CJK Unified Ideographs
        | 0xAC00..=0xD7AF   // Hangul syllables
        | 0xF900..=0xFAFF   // CJK Compatibility Ideographs
        | 0x20000..=0x2A6DF // CJK Extension B
    )
}

/// Lowercased word tokens; CJK runs are split into one token per char.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut tokens = Vec::new();

    for word in lower.unicode_words() {
        if !word.chars().any(is_cjk) {
            tokens.push(word.to_string());
            continue;
        }

        let mut run = String::new();
        for c in word.chars() {
            if is_cjk(c) {
                if !run.is_empty() {
                    tokens.push(std::mem::take(&mut run));
                }
                tokens.push(c.to_string());
            } else {
                run.push(c);
            }
        }
        if !run.is_empty() {
            tokens.push(run);
        }
    }

    tokens
}

/// Lowercased whitespace-separated words as a set.
pub fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity of two word sets (0 when both are empty).
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

/// Split after sentence terminators, keeping the terminator with its sentence.
pub fn split_sentences(text: &str, terminators: &[char]) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        current.push(c);
        if terminators.contains(&c) {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_chars_is_boundary_safe() {
        assert_eq!(take_chars("检索增强生成", 2), "检索");
        assert_eq!(take_chars("abc", 10), "abc");
        assert_eq!(slice_chars("héllo", 1, 3), "él");
    }

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("abcdef", 3), "abc...");
        assert_eq!(truncate_with_ellipsis("abc", 3), "abc");
    }

    #[test]
    fn test_tokenize_mixed_scripts() {
        let tokens = tokenize("RAG 检索增强 Generation");
        assert_eq!(tokens, vec!["rag", "检", "索", "增", "强", "generation"]);
    }

    #[test]
    fn test_jaccard() {
        let a = word_set("the quick fox");
        let b = word_set("The quick dog");
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-6);
        assert_eq!(jaccard(&HashSet::new(), &HashSet::new()), 0.0);
    }

    #[test]
    fn test_split_sentences_keeps_terminators() {
        let sentences = split_sentences("第一句。Second one! Third", &['。', '!', '.']);
        assert_eq!(sentences, vec!["第一句。", "Second one!", "Third"]);
    }
}
