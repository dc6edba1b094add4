//! Reordering operators.

use super::PostOperator;
use crate::llm::StageLlm;
use async_trait::async_trait;
use modrag_core::{AppResult, Params};
use modrag_knowledge::text::{jaccard, take_chars, word_set};
use modrag_knowledge::Document;
use serde_json::json;

/// Keeps the first `top_n` documents; a missing or zero `top_n` keeps all.
fn truncate_opt(mut documents: Vec<Document>, top_n: Option<usize>) -> Vec<Document> {
    if let Some(n) = top_n.filter(|&n| n > 0) {
        documents.truncate(n);
    }
    documents
}

/// Moves the strongest documents to both ends of the context.
pub struct Rerank {
    top_n: Option<usize>,
    reverse_order: bool,
}

impl Rerank {
    pub fn new(params: &Params) -> Self {
        Self {
            top_n: params.opt_usize("top_n"),
            reverse_order: params.bool_or("reverse_order", false),
        }
    }
}

#[async_trait]
impl PostOperator for Rerank {
    fn name(&self) -> &str {
        "rerank"
    }

    async fn execute(&self, documents: Vec<Document>, _query: Option<&str>) -> AppResult<Vec<Document>> {
        if documents.len() <= 2 {
            return Ok(documents);
        }

        let n = documents.len();
        let mut rest = documents;
        let low = rest.split_off(2 * n / 3);
        let mid = rest.split_off(n / 3);
        let mut high = rest;
        let high_tail = high.split_off(high.len() / 2);

        let mut ordered = high;
        ordered.extend(mid);
        ordered.extend(low);
        ordered.extend(high_tail);

        let mut ordered = truncate_opt(ordered, self.top_n);
        if self.reverse_order {
            ordered.reverse();
        }
        Ok(ordered)
    }
}

/// Trades rank position against novelty.
pub struct DiversityRerank {
    diversity_weight: f32,
    top_n: Option<usize>,
}

impl DiversityRerank {
    pub fn new(params: &Params) -> Self {
        Self {
            diversity_weight: params.f32_or("diversity_weight", 0.5),
            top_n: params.opt_usize("top_n"),
        }
    }
}

#[async_trait]
impl PostOperator for DiversityRerank {
    fn name(&self) -> &str {
        "diversity_rerank"
    }

    async fn execute(&self, documents: Vec<Document>, _query: Option<&str>) -> AppResult<Vec<Document>> {
        if documents.is_empty() {
            return Ok(documents);
        }

        let w = self.diversity_weight;
        let mut remaining: Vec<Document> = documents;
        let first = remaining.remove(0);
        let mut selected_words = vec![word_set(&first.content)];
        let mut selected = vec![first];

        while !remaining.is_empty() {
            let len = remaining.len() as f32;
            let mut best_idx = 0;
            let mut best_score = f32::NEG_INFINITY;

            for (idx, candidate) in remaining.iter().enumerate() {
                let words = word_set(&candidate.content);
                // Diversity is measured against the least similar selected document.
                let min_similarity = selected_words
                    .iter()
                    .map(|s| jaccard(&words, s))
                    .fold(1.0, f32::min);
                let score = (1.0 - w) * (1.0 - idx as f32 / len) + w * (1.0 - min_similarity);
                if score > best_score {
                    best_score = score;
                    best_idx = idx;
                }
            }

            let chosen = remaining.remove(best_idx);
            selected_words.push(word_set(&chosen.content));
            selected.push(chosen);
        }

        Ok(truncate_opt(selected, self.top_n))
    }
}

/// Scores each document with the LLM and sorts by the score.
pub struct LlmRerank {
    llm: StageLlm,
    params: Params,
    top_n: Option<usize>,
}

impl LlmRerank {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            llm,
            params: params.clone(),
            top_n: params.opt_usize("top_n"),
        }
    }

    async fn score(&self, query: &str, document: &Document) -> f32 {
        let variables = json!({"query": query, "document": take_chars(&document.content, 500)});
        match self.llm.ask("post.llm_rerank", &variables, &self.params, 0.0).await {
            Ok(reply) => parse_score(&reply),
            Err(e) => {
                tracing::warn!("LLM scoring failed: {}", e);
                5.0
            }
        }
    }
}

/// First token of the reply as a 0-10 score; 5 when unparsable.
pub fn parse_score(reply: &str) -> f32 {
    reply
        .split_whitespace()
        .next()
        .and_then(|token| token.trim_end_matches(['.', ',']).parse::<f32>().ok())
        .map(|score| score.clamp(0.0, 10.0))
        .unwrap_or(5.0)
}

#[async_trait]
impl PostOperator for LlmRerank {
    fn name(&self) -> &str {
        "llm_rerank"
    }

    async fn execute(&self, documents: Vec<Document>, query: Option<&str>) -> AppResult<Vec<Document>> {
        let Some(query) = query else {
            return Ok(documents);
        };

        let mut scored = Vec::with_capacity(documents.len());
        for mut document in documents {
            let score = self.score(query, &document).await;
            document.set_meta("rerank_score", score);
            scored.push((document, score));
        }
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(truncate_opt(
            scored.into_iter().map(|(d, _)| d).collect(),
            self.top_n,
        ))
    }
}

/// Even positions first, odd positions reversed at the back, so the best
/// documents sit at the edges of the context.
pub struct LostInMiddle {
    top_n: Option<usize>,
}

impl LostInMiddle {
    pub fn new(params: &Params) -> Self {
        Self {
            top_n: params.opt_usize("top_n"),
        }
    }
}

#[async_trait]
impl PostOperator for LostInMiddle {
    fn name(&self) -> &str {
        "lost_in_middle"
    }

    async fn execute(&self, documents: Vec<Document>, _query: Option<&str>) -> AppResult<Vec<Document>> {
        if documents.len() <= 2 {
            return Ok(documents);
        }

        let mut front = Vec::new();
        let mut back = Vec::new();
        for (i, document) in documents.into_iter().enumerate() {
            if i % 2 == 0 {
                front.push(document);
            } else {
                back.push(document);
            }
        }
        back.reverse();
        front.extend(back);

        Ok(truncate_opt(front, self.top_n))
    }
}
