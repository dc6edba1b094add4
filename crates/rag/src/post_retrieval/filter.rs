//! Selection and filtering operators.

use super::PostOperator;
use crate::llm::StageLlm;
use async_trait::async_trait;
use modrag_core::{AppResult, Params};
use modrag_knowledge::text::{jaccard, take_chars, word_set};
use modrag_knowledge::Document;
use serde_json::json;
use std::collections::HashSet;

const TERMINATORS: &[char] = &['.', '!', '?', '。', '！', '？'];

/// Keeps the first `top_k` documents.
pub struct Selection {
    top_k: usize,
}

impl Selection {
    pub fn new(params: &Params) -> Self {
        Self {
            top_k: params.usize_or("top_k", 5),
        }
    }
}

#[async_trait]
impl PostOperator for Selection {
    fn name(&self) -> &str {
        "selection"
    }

    async fn execute(&self, mut documents: Vec<Document>, _query: Option<&str>) -> AppResult<Vec<Document>> {
        documents.truncate(self.top_k);
        Ok(documents)
    }
}

/// Reply classification for yes/no style LLM judgements. Negative phrases
/// are checked first because they contain the positive word.
fn says_relevant(reply: &str) -> Option<bool> {
    let lower = reply.to_lowercase();
    if lower.contains("irrelevant") || lower.contains("not relevant") || lower.contains("不相关") {
        Some(false)
    } else if lower.contains("relevant") || lower.contains("相关") {
        Some(true)
    } else {
        None
    }
}

fn says_contradiction(reply: &str) -> bool {
    let lower = reply.to_lowercase();
    if lower.contains("no contradiction") || lower.contains("不矛盾") {
        return false;
    }
    lower.contains("contradict") || lower.contains("矛盾")
}

/// Drops documents the LLM judges irrelevant.
pub struct RelevanceFilter {
    llm: StageLlm,
    params: Params,
    min_docs: usize,
}

impl RelevanceFilter {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            llm,
            params: params.clone(),
            min_docs: params.usize_or("min_docs", 1),
        }
    }
}

#[async_trait]
impl PostOperator for RelevanceFilter {
    fn name(&self) -> &str {
        "relevance_filter"
    }

    async fn execute(&self, documents: Vec<Document>, query: Option<&str>) -> AppResult<Vec<Document>> {
        let Some(query) = query else {
            return Ok(documents);
        };

        let mut kept = Vec::new();
        for document in &documents {
            let variables = json!({"query": query, "document": take_chars(&document.content, 500)});
            let keep = match self
                .llm
                .ask("post.relevance_filter", &variables, &self.params, 0.0)
                .await
            {
                Ok(reply) => says_relevant(&reply) == Some(true),
                Err(e) => {
                    tracing::warn!("Relevance check failed, keeping document: {}", e);
                    true
                }
            };
            if keep {
                kept.push(document.clone());
            }
        }

        if kept.len() < self.min_docs {
            tracing::debug!("Only {} relevant documents; keeping the first {}", kept.len(), self.min_docs);
            return Ok(documents.into_iter().take(self.min_docs).collect());
        }
        Ok(kept)
    }
}

/// Drops near-duplicates by word-set Jaccard similarity.
pub struct RedundancyFilter {
    similarity_threshold: f32,
}

impl RedundancyFilter {
    pub fn new(params: &Params) -> Self {
        Self {
            similarity_threshold: params.f32_or("similarity_threshold", 0.85),
        }
    }
}

#[async_trait]
impl PostOperator for RedundancyFilter {
    fn name(&self) -> &str {
        "redundancy_filter"
    }

    async fn execute(&self, documents: Vec<Document>, _query: Option<&str>) -> AppResult<Vec<Document>> {
        let mut kept: Vec<Document> = Vec::new();
        let mut kept_words: Vec<HashSet<String>> = Vec::new();

        for document in documents {
            let words = word_set(&document.content);
            if kept_words
                .iter()
                .any(|k| jaccard(&words, k) >= self.similarity_threshold)
            {
                continue;
            }
            kept_words.push(words);
            kept.push(document);
        }
        Ok(kept)
    }
}

/// Heuristic content quality score in [0, 1].
pub fn quality_score(content: &str, min_length: usize, max_length: usize) -> f32 {
    let length = content.chars().count();
    let mut score = if length < min_length {
        0.1
    } else if length > max_length {
        0.2
    } else {
        0.3
    };

    let terminators = content.chars().filter(|c| TERMINATORS.contains(c)).count();
    if terminators > 1 {
        score += 0.3;
    } else if terminators > 0 {
        score += 0.15;
    }

    let words: Vec<&str> = content.split_whitespace().collect();
    if !words.is_empty() {
        let unique = words.iter().collect::<HashSet<_>>().len();
        let diversity = unique as f32 / words.len() as f32;
        if diversity > 0.5 {
            score += 0.2;
        } else if diversity > 0.3 {
            score += 0.1;
        }
    }

    if length > 0 {
        let special = content
            .chars()
            .filter(|c| !c.is_alphanumeric() && !c.is_whitespace() && !TERMINATORS.contains(c))
            .count();
        let ratio = special as f32 / length as f32;
        if ratio < 0.1 {
            score += 0.2;
        } else if ratio < 0.2 {
            score += 0.1;
        }
    }

    score
}

pub struct QualityFilter {
    min_length: usize,
    max_length: usize,
    min_quality_score: f32,
}

impl QualityFilter {
    pub fn new(params: &Params) -> Self {
        Self {
            min_length: params.usize_or("min_length", 50),
            max_length: params.usize_or("max_length", 5000),
            min_quality_score: params.f32_or("min_quality_score", 0.5),
        }
    }
}

#[async_trait]
impl PostOperator for QualityFilter {
    fn name(&self) -> &str {
        "quality_filter"
    }

    async fn execute(&self, documents: Vec<Document>, _query: Option<&str>) -> AppResult<Vec<Document>> {
        Ok(documents
            .into_iter()
            .filter_map(|mut document| {
                let score = quality_score(&document.content, self.min_length, self.max_length);
                document.set_meta("quality_score", score);
                (score >= self.min_quality_score).then_some(document)
            })
            .collect())
    }
}

/// Drops documents that contradict the top-ranked one.
pub struct ContradictionFilter {
    llm: StageLlm,
    params: Params,
}

impl ContradictionFilter {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            llm,
            params: params.clone(),
        }
    }
}

#[async_trait]
impl PostOperator for ContradictionFilter {
    fn name(&self) -> &str {
        "contradiction_filter"
    }

    async fn execute(&self, documents: Vec<Document>, query: Option<&str>) -> AppResult<Vec<Document>> {
        if documents.len() < 2 || query.is_none() {
            return Ok(documents);
        }

        let mut iter = documents.into_iter();
        let Some(reference) = iter.next() else {
            return Ok(Vec::new());
        };
        let reference_text = take_chars(&reference.content, 300).to_string();
        let mut kept = vec![reference];

        for document in iter {
            let variables = json!({
                "text1": reference_text,
                "text2": take_chars(&document.content, 300),
            });
            let contradicts = match self
                .llm
                .ask("post.contradiction_filter", &variables, &self.params, 0.0)
                .await
            {
                Ok(reply) => says_contradiction(&reply),
                Err(e) => {
                    tracing::warn!("Contradiction check failed, keeping document: {}", e);
                    false
                }
            };
            if contradicts {
                tracing::debug!("Dropping document that contradicts the top result");
            } else {
                kept.push(document);
            }
        }
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::scripted;

    fn docs(contents: &[&str]) -> Vec<Document> {
        contents.iter().map(|c| Document::new(*c)).collect()
    }

    #[tokio::test]
    async fn test_selection() {
        let out = Selection::new(&Params::new().with("top_k", 2))
            .execute(docs(&["a", "b", "c"]), None)
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_judgement_parsing() {
        assert_eq!(says_relevant("Irrelevant"), Some(false));
        assert_eq!(says_relevant("not relevant at all"), Some(false));
        assert_eq!(says_relevant("relevant"), Some(true));
        assert_eq!(says_relevant("不相关"), Some(false));
        assert_eq!(says_relevant("相关"), Some(true));
        assert_eq!(says_relevant("maybe"), None);

        assert!(says_contradiction("contradiction"));
        assert!(!says_contradiction("No contradiction"));
        assert!(!says_contradiction("不矛盾"));
        assert!(says_contradiction("两者矛盾"));
    }

    #[tokio::test]
    async fn test_relevance_filter() {
        let (llm, client) = scripted(&["relevant", "irrelevant", "relevant"]);
        client.push_error("timeout");
        let op = RelevanceFilter::new(llm, &Params::new());
        let out = op
            .execute(docs(&["a", "b", "c", "d"]), Some("q"))
            .await
            .unwrap();
        let contents: Vec<_> = out.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "c", "d"]);
    }

    #[tokio::test]
    async fn test_relevance_filter_min_docs() {
        let (llm, _) = scripted(&["irrelevant", "irrelevant", "irrelevant"]);
        let op = RelevanceFilter::new(llm, &Params::new().with("min_docs", 2));
        let out = op.execute(docs(&["a", "b", "c"]), Some("q")).await.unwrap();
        let contents: Vec<_> = out.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_redundancy_filter() {
        let op = RedundancyFilter::new(&Params::new());
        let out = op
            .execute(
                docs(&["rust is fast and safe", "Rust is fast and safe", "python is dynamic"]),
                None,
            )
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].content, "python is dynamic");
    }

    #[test]
    fn test_quality_score() {
        let good = "Retrieval augmented generation combines search with generation. It grounds answers in documents.";
        assert!((quality_score(good, 50, 5000) - 1.0).abs() < 1e-6);

        let junk = "#### $$$$ @@@@ ####";
        assert!(quality_score(junk, 50, 5000) < 0.5);
    }

    #[tokio::test]
    async fn test_quality_filter_annotates() {
        let op = QualityFilter::new(&Params::new());
        let good = "Retrieval augmented generation combines search with generation. It grounds answers in documents.";
        let out = op.execute(docs(&[good, "#### $$$$"]), None).await.unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].meta_f32("quality_score").unwrap() >= 0.5);
    }

    #[tokio::test]
    async fn test_contradiction_filter() {
        let (llm, client) = scripted(&["contradiction", "no contradiction"]);
        let op = ContradictionFilter::new(llm, &Params::new());
        let out = op
            .execute(docs(&["sky is blue", "sky is green", "sky is blue today"]), Some("sky"))
            .await
            .unwrap();
        let contents: Vec<_> = out.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(contents, vec!["sky is blue", "sky is blue today"]);
        assert_eq!(client.requests().len(), 2);

        let untouched = op.execute(docs(&["a", "b"]), None).await.unwrap();
        assert_eq!(untouched.len(), 2);
    }
}
