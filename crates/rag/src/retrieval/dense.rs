//! Retrievers backed by a vector store.

use super::Retriever;
use async_trait::async_trait;
use modrag_core::{AppResult, Params};
use modrag_knowledge::{Document, VectorStore};
use std::collections::HashMap;

/// Copy search scores into the `score` metadata key.
pub(crate) fn with_scores(hits: Vec<(Document, f32)>) -> Vec<Document> {
    hits.into_iter()
        .map(|(mut document, score)| {
            document.set_meta("score", score);
            document
        })
        .collect()
}

/// `k` from the params, also accepted under `search_kwargs`.
pub(crate) fn top_k(params: &Params, default: usize) -> usize {
    params
        .opt_usize("k")
        .or_else(|| params.section("search_kwargs").opt_usize("k"))
        .unwrap_or(default)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchType {
    Similarity,
    Mmr,
    ScoreThreshold,
}

impl SearchType {
    pub fn parse(name: &str) -> Self {
        match name {
            "mmr" => Self::Mmr,
            "similarity_score_threshold" => Self::ScoreThreshold,
            "similarity" => Self::Similarity,
            other => {
                tracing::warn!("Unknown search type '{}', using similarity", other);
                Self::Similarity
            }
        }
    }
}

/// Plain vector similarity search.
pub struct DenseRetriever {
    store: VectorStore,
    search_type: SearchType,
    k: usize,
    fetch_k: usize,
    lambda_mult: f32,
    score_threshold: f32,
}

impl DenseRetriever {
    pub fn new(store: VectorStore, params: &Params) -> Self {
        let kwargs = params.section("search_kwargs");
        Self {
            store,
            search_type: SearchType::parse(&params.str_or("search_type", "similarity")),
            k: top_k(params, 5),
            fetch_k: params.usize_or("fetch_k", kwargs.usize_or("fetch_k", 20)),
            lambda_mult: params.f32_or("lambda_mult", kwargs.f32_or("lambda_mult", 0.5)),
            score_threshold: params
                .f32_or("score_threshold", kwargs.f32_or("score_threshold", 0.5)),
        }
    }
}

#[async_trait]
impl Retriever for DenseRetriever {
    fn name(&self) -> &str {
        "dense"
    }

    async fn retrieve(&self, query: &str) -> AppResult<Vec<Document>> {
        let hits = match self.search_type {
            SearchType::Similarity => self.store.similarity_search_with_score(query, self.k).await?,
            SearchType::Mmr => {
                self.store
                    .max_marginal_relevance_search(query, self.k, self.fetch_k, self.lambda_mult)
                    .await?
            }
            SearchType::ScoreThreshold => {
                self.store
                    .similarity_search_with_threshold(query, self.k, self.score_threshold)
                    .await?
            }
        };
        Ok(with_scores(hits))
    }
}

/// Diversity-aware semantic search (MMR by default).
pub struct SemanticRetriever {
    store: VectorStore,
    k: usize,
    fetch_k: usize,
    lambda_mult: f32,
    use_mmr: bool,
    score_threshold: Option<f32>,
}

impl SemanticRetriever {
    pub fn new(store: VectorStore, params: &Params) -> Self {
        Self {
            store,
            k: top_k(params, 5),
            fetch_k: params.usize_or("fetch_k", 20),
            lambda_mult: params.f32_or("lambda_mult", 0.5),
            use_mmr: params.bool_or("use_mmr", true),
            score_threshold: params.opt_f32("score_threshold"),
        }
    }
}

#[async_trait]
impl Retriever for SemanticRetriever {
    fn name(&self) -> &str {
        "semantic"
    }

    async fn retrieve(&self, query: &str) -> AppResult<Vec<Document>> {
        let mut hits = if self.use_mmr {
            self.store
                .max_marginal_relevance_search(query, self.k, self.fetch_k, self.lambda_mult)
                .await?
        } else {
            self.store.similarity_search_with_score(query, self.k).await?
        };

        if let Some(threshold) = self.score_threshold {
            hits.retain(|(_, score)| *score >= threshold);
        }
        Ok(with_scores(hits))
    }
}

/// Queries several vector stores and merges their hits by weight.
pub struct MultiVectorRetriever {
    stores: Vec<VectorStore>,
    weights: Vec<f32>,
    k: usize,
}

impl MultiVectorRetriever {
    pub fn new(stores: Vec<VectorStore>, params: &Params) -> Self {
        let equal = 1.0 / stores.len().max(1) as f32;
        let weights = match params.f32_list("weights") {
            Some(weights) if weights.len() == stores.len() => weights,
            Some(_) => {
                tracing::warn!("Weight count does not match store count; using equal weights");
                vec![equal; stores.len()]
            }
            None => vec![equal; stores.len()],
        };
        Self {
            stores,
            weights,
            k: top_k(params, 5),
        }
    }
}

#[async_trait]
impl Retriever for MultiVectorRetriever {
    fn name(&self) -> &str {
        "multi_vector"
    }

    async fn retrieve(&self, query: &str) -> AppResult<Vec<Document>> {
        let mut merged: Vec<(Document, f32)> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for (index, (store, weight)) in self.stores.iter().zip(&self.weights).enumerate() {
            for mut document in with_scores(store.similarity_search_with_score(query, self.k).await?) {
                document.set_meta("retriever_index", index);
                document.set_meta("retriever_weight", *weight);

                match positions.get(&document.fingerprint()) {
                    Some(&pos) => merged[pos].1 += weight,
                    None => {
                        positions.insert(document.fingerprint(), merged.len());
                        merged.push((document, *weight));
                    }
                }
            }
        }

        merged.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(merged
            .into_iter()
            .take(self.k)
            .map(|(mut document, weight)| {
                document.set_meta("combined_weight", weight);
                document
            })
            .collect())
    }
}

/// Query complexity for `adaptive_k`.
pub fn retrieval_complexity(query: &str) -> f32 {
    const ANALYTIC: &[&str] = &["比较", "分析", "评估", "综合", "对比", "详细", "全面"];

    let length = query.chars().count();
    let words = query.split_whitespace().count();
    let mut score = if length > 100 {
        0.3
    } else if length > 50 {
        0.2
    } else {
        0.1
    };
    score += if words > 15 {
        0.3
    } else if words > 8 {
        0.2
    } else {
        0.1
    };
    if ANALYTIC.iter().any(|k| query.contains(k)) {
        score += 0.2;
    }
    if query.chars().filter(|c| matches!(c, '?' | '？')).count() > 1 {
        score += 0.2;
    }
    f32::min(score, 1.0)
}

/// Chooses `k` from query complexity.
pub struct AdaptiveKRetriever {
    store: VectorStore,
    min_k: usize,
    max_k: usize,
}

impl AdaptiveKRetriever {
    pub fn new(store: VectorStore, params: &Params) -> Self {
        let min_k = params.usize_or("min_k", 3);
        Self {
            store,
            min_k,
            max_k: params.usize_or("max_k", 10).max(min_k),
        }
    }

    pub fn k_for(&self, query: &str) -> usize {
        let span = (self.max_k - self.min_k) as f32;
        let k = (self.min_k as f32 + span * retrieval_complexity(query)) as usize;
        k.clamp(self.min_k, self.max_k)
    }
}

#[async_trait]
impl Retriever for AdaptiveKRetriever {
    fn name(&self) -> &str {
        "adaptive_k"
    }

    async fn retrieve(&self, query: &str) -> AppResult<Vec<Document>> {
        let k = self.k_for(query);
        tracing::debug!(k, "Adaptive k");
        Ok(with_scores(self.store.similarity_search_with_score(query, k).await?))
    }
}

/// Keeps hits above a score threshold, with a floor and a ceiling on count.
pub struct ThresholdRetriever {
    store: VectorStore,
    score_threshold: f32,
    min_docs: usize,
    max_docs: usize,
}

impl ThresholdRetriever {
    pub fn new(store: VectorStore, params: &Params) -> Self {
        Self {
            store,
            score_threshold: params.f32_or("score_threshold", 0.7),
            min_docs: params.usize_or("min_docs", 1),
            max_docs: params.usize_or("max_docs", 10),
        }
    }
}

#[async_trait]
impl Retriever for ThresholdRetriever {
    fn name(&self) -> &str {
        "threshold"
    }

    async fn retrieve(&self, query: &str) -> AppResult<Vec<Document>> {
        let mut hits = self
            .store
            .similarity_search_with_threshold(query, self.max_docs, self.score_threshold)
            .await?;

        if hits.len() < self.min_docs {
            tracing::debug!(
                "Only {} hits above {:.2}; falling back to top {}",
                hits.len(),
                self.score_threshold,
                self.min_docs
            );
            hits = self
                .store
                .similarity_search_with_score(query, self.min_docs)
                .await?;
        }

        hits.truncate(self.max_docs);
        Ok(with_scores(hits))
    }
}
