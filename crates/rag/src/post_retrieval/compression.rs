//! Operators that shorten document content.

use super::PostOperator;
use crate::llm::StageLlm;
use async_trait::async_trait;
use modrag_core::{AppResult, Params};
use modrag_knowledge::text::{char_len, split_sentences, take_chars, truncate_with_ellipsis};
use modrag_knowledge::Document;
use regex::Regex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::OnceLock;

const SENTENCE_TERMINATORS: &[char] = &['。', '.', '!', '?', '！', '？'];

const STOPWORDS: &[&str] = &[
    "的", "了", "是", "在", "和", "与", "等", "及", "也", "都", "就", "而", "将", "被", "把", "给",
    "从", "向", "到", "为", "以", "于", "对", "着", "之", "这", "那", "有", "个",
];

fn lowercase_words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Extractive compression: keeps the sentences that share the most words
/// with the query.
pub struct ContextCompression {
    max_tokens: usize,
    compression_ratio: f32,
}

impl ContextCompression {
    pub fn new(params: &Params) -> Self {
        Self {
            max_tokens: params.usize_or("max_tokens", 200),
            compression_ratio: params.f32_or("compression_ratio", 0.5),
        }
    }

    fn compress(&self, content: &str, query: Option<&str>) -> String {
        let length = char_len(content);
        let target = ((length as f32 * self.compression_ratio) as usize).max(self.max_tokens);
        if length <= target {
            return content.to_string();
        }

        let Some(query) = query else {
            return format!("{}...", take_chars(content, target));
        };

        let query_words = lowercase_words(query);
        let mut ranked: Vec<(String, usize)> = split_sentences(content, SENTENCE_TERMINATORS)
            .into_iter()
            .map(|sentence| {
                let overlap = lowercase_words(&sentence).intersection(&query_words).count();
                (sentence, overlap)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        let mut compressed = String::new();
        for (sentence, _) in ranked {
            if char_len(&compressed) + char_len(&sentence) > target {
                break;
            }
            compressed.push_str(&sentence);
        }

        if compressed.is_empty() {
            take_chars(content, target).to_string()
        } else {
            compressed
        }
    }
}

#[async_trait]
impl PostOperator for ContextCompression {
    fn name(&self) -> &str {
        "context_compression"
    }

    async fn execute(&self, documents: Vec<Document>, query: Option<&str>) -> AppResult<Vec<Document>> {
        Ok(documents
            .into_iter()
            .map(|mut document| {
                let original_length = document.char_len();
                document.content = self.compress(&document.content, query);
                let compressed_length = document.char_len();
                document.set_meta("original_length", original_length);
                document.set_meta("compressed_length", compressed_length);
                document.set_meta(
                    "compression_ratio",
                    compressed_length as f64 / original_length.max(1) as f64,
                );
                document
            })
            .collect())
    }
}

/// Abstractive compression through an LLM summary.
pub struct SummaryCompression {
    llm: StageLlm,
    params: Params,
    max_summary_length: usize,
}

impl SummaryCompression {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            llm,
            params: params.clone(),
            max_summary_length: params.usize_or("max_summary_length", 200),
        }
    }
}

#[async_trait]
impl PostOperator for SummaryCompression {
    fn name(&self) -> &str {
        "summary_compression"
    }

    async fn execute(&self, documents: Vec<Document>, query: Option<&str>) -> AppResult<Vec<Document>> {
        let mut results = Vec::with_capacity(documents.len());

        for mut document in documents {
            let original_length = document.char_len();
            if original_length <= self.max_summary_length {
                results.push(document);
                continue;
            }

            let variables = json!({
                "query": query,
                "content": take_chars(&document.content, 2000),
                "max_length": self.max_summary_length,
            });
            let summary = match self
                .llm
                .ask("post.summary_compression", &variables, &self.params, 0.3)
                .await
            {
                Ok(summary) => summary,
                Err(e) => {
                    tracing::warn!("Summary compression failed, truncating: {}", e);
                    truncate_with_ellipsis(&document.content, self.max_summary_length)
                }
            };

            document.content = summary;
            document.set_meta("original_length", original_length);
            document.set_meta("summary_length", document.char_len());
            document.set_meta("is_summary", true);
            results.push(document);
        }

        Ok(results)
    }
}

fn token_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"[\w]+|[^\w\s]").ok())
        .as_ref()
}

/// Drops stopwords and single-char tokens the query does not mention.
pub struct TokenCompression {
    compression_ratio: f32,
}

impl TokenCompression {
    pub fn new(params: &Params) -> Self {
        Self {
            compression_ratio: params.f32_or("compression_ratio", 0.6),
        }
    }

    fn compress(&self, content: &str, query_words: &HashSet<&str>) -> String {
        let tokens: Vec<&str> = match token_pattern() {
            Some(pattern) => pattern.find_iter(content).map(|m| m.as_str()).collect(),
            None => content.split_whitespace().collect(),
        };
        let kept: String = tokens
            .into_iter()
            .filter(|token| {
                query_words.contains(token) || (!STOPWORDS.contains(token) && char_len(token) > 1)
            })
            .collect();

        let limit = (char_len(content) as f32 * self.compression_ratio) as usize;
        take_chars(&kept, limit).to_string()
    }
}

#[async_trait]
impl PostOperator for TokenCompression {
    fn name(&self) -> &str {
        "token_compression"
    }

    async fn execute(&self, documents: Vec<Document>, query: Option<&str>) -> AppResult<Vec<Document>> {
        // Query words match tokens exactly, case included.
        let query_words: HashSet<&str> = query
            .map(|q| q.split_whitespace().collect())
            .unwrap_or_default();
        Ok(documents
            .into_iter()
            .map(|mut document| {
                let original_length = document.char_len();
                document.content = self.compress(&document.content, &query_words);
                document.set_meta("original_length", original_length);
                document.set_meta("compressed_length", document.char_len());
                document
            })
            .collect())
    }
}

/// Compresses less relevant (later) documents harder.
pub struct AdaptiveCompression {
    short_threshold: usize,
    long_threshold: usize,
}

impl AdaptiveCompression {
    pub fn new(params: &Params) -> Self {
        Self {
            short_threshold: params.usize_or("short_threshold", 200),
            long_threshold: params.usize_or("long_threshold", 1000),
        }
    }
}

#[async_trait]
impl PostOperator for AdaptiveCompression {
    fn name(&self) -> &str {
        "adaptive_compression"
    }

    async fn execute(&self, documents: Vec<Document>, _query: Option<&str>) -> AppResult<Vec<Document>> {
        let highly_relevant = documents.len() as f32 * 0.3;

        Ok(documents
            .into_iter()
            .enumerate()
            .map(|(i, mut document)| {
                let length = document.char_len();
                let high = (i as f32) < highly_relevant;
                let (keep, level) = if high && length <= self.short_threshold {
                    (length, "none")
                } else if high && length > self.long_threshold {
                    (length * 7 / 10, "light")
                } else if length > self.short_threshold {
                    (length * 4 / 10, "heavy")
                } else {
                    (length * 6 / 10, "medium")
                };
                if keep < length {
                    document.content = take_chars(&document.content, keep).to_string();
                }
                document.set_meta("compression_level", level);
                document
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::scripted;

    #[tokio::test]
    async fn test_context_compression_short_content_unchanged() {
        let op = ContextCompression::new(&Params::new());
        let out = op.execute(vec![Document::new("short text")], Some("text")).await.unwrap();
        assert_eq!(out[0].content, "short text");
        assert_eq!(out[0].metadata["original_length"], 10);
    }

    #[tokio::test]
    async fn test_context_compression_keeps_relevant_sentences() {
        let op = ContextCompression::new(&Params::new().with("max_tokens", 30).with("compression_ratio", 0.1));
        let content = "Cats sleep a lot. Retrieval finds documents. Dogs bark loudly at night.";
        let out = op
            .execute(vec![Document::new(content)], Some("retrieval documents"))
            .await
            .unwrap();
        assert_eq!(out[0].content, "Retrieval finds documents.");
    }

    #[tokio::test]
    async fn test_context_compression_without_query_truncates() {
        let op = ContextCompression::new(&Params::new().with("max_tokens", 5).with("compression_ratio", 0.1));
        let out = op.execute(vec![Document::new("abcdefghij")], None).await.unwrap();
        assert_eq!(out[0].content, "abcde...");
    }

    #[tokio::test]
    async fn test_summary_compression() {
        let (llm, _) = scripted(&["compact summary"]);
        let op = SummaryCompression::new(llm, &Params::new().with("max_summary_length", 10));
        let out = op
            .execute(
                vec![Document::new("tiny"), Document::new("a much longer document body")],
                Some("q"),
            )
            .await
            .unwrap();
        assert_eq!(out[0].content, "tiny");
        assert_eq!(out[1].content, "compact summary");
        assert_eq!(out[1].metadata["is_summary"], true);
    }

    #[tokio::test]
    async fn test_summary_compression_failure_truncates() {
        let (llm, client) = scripted(&[]);
        client.push_error("offline");
        let op = SummaryCompression::new(llm, &Params::new().with("max_summary_length", 4));
        let out = op.execute(vec![Document::new("abcdefgh")], None).await.unwrap();
        assert_eq!(out[0].content, "abcd...");
    }

    #[tokio::test]
    async fn test_token_compression_drops_stopwords() {
        let op = TokenCompression::new(&Params::new().with("compression_ratio", 1.0));
        let out = op
            .execute(vec![Document::new("猫 的 尾巴 是 长 的")], Some("猫"))
            .await
            .unwrap();
        assert_eq!(out[0].content, "猫尾巴");
        assert_eq!(out[0].metadata["original_length"], 12);
    }

    #[tokio::test]
    async fn test_token_compression_query_words_are_case_sensitive() {
        let op = TokenCompression::new(&Params::new().with("compression_ratio", 1.0));
        let out = op
            .execute(vec![Document::new("Rust is a language")], Some("A"))
            .await
            .unwrap();
        assert_eq!(out[0].content, "Rustislanguage");

        let out = op
            .execute(vec![Document::new("Rust is a language")], Some("a"))
            .await
            .unwrap();
        assert_eq!(out[0].content, "Rustisalanguage");
    }

    #[tokio::test]
    async fn test_adaptive_compression_levels() {
        let op = AdaptiveCompression::new(&Params::new());
        let docs: Vec<Document> = (0..4).map(|_| Document::new("x".repeat(300))).collect();
        let out = op.execute(docs, None).await.unwrap();

        // positions 0 and 1 are below 4 * 0.3; mid-length relevant docs are still trimmed
        let lengths: Vec<usize> = out.iter().map(Document::char_len).collect();
        assert_eq!(lengths, vec![180, 180, 120, 120]);
        assert_eq!(out[1].metadata["compression_level"], "medium");
        assert_eq!(out[2].metadata["compression_level"], "heavy");
    }

    #[tokio::test]
    async fn test_adaptive_compression_relevant_extremes() {
        let op = AdaptiveCompression::new(&Params::new());
        let docs = vec![
            Document::new("s".repeat(150)),
            Document::new("l".repeat(1200)),
            Document::new("x".repeat(50)),
            Document::new("y".repeat(50)),
        ];
        let out = op.execute(docs, None).await.unwrap();

        assert_eq!(out[0].metadata["compression_level"], "none");
        assert_eq!(out[0].char_len(), 150);
        assert_eq!(out[1].metadata["compression_level"], "light");
        assert_eq!(out[1].char_len(), 840);
        assert_eq!(out[2].char_len(), 30);
    }
}
