//! Retrievers that combine the results of other retrievers.

use super::Retriever;
use crate::retrieval::dense::top_k;
use async_trait::async_trait;
use modrag_core::{AppError, AppResult, Params};
use modrag_knowledge::Document;
use std::collections::HashMap;
use std::sync::Arc;

/// RRF smoothing constant.
pub const RRF_C: f32 = 60.0;

/// Weighted Reciprocal Rank Fusion.
///
/// Each list contributes `weight / (c + rank + 1)` (0-based rank) to a
/// document, keyed by content. Ties keep first-seen order.
pub fn reciprocal_rank_fusion(lists: &[Vec<Document>], weights: &[f32], c: f32) -> Vec<(Document, f32)> {
    merge_by_content(lists, weights, |rank, _len, weight| weight / (c + rank as f32 + 1.0))
}

fn merge_by_content<F>(lists: &[Vec<Document>], weights: &[f32], contribution: F) -> Vec<(Document, f32)>
where
    F: Fn(usize, usize, f32) -> f32,
{
    let mut merged: Vec<(Document, f32)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (list, weight) in lists.iter().zip(weights) {
        for (rank, document) in list.iter().enumerate() {
            let score = contribution(rank, list.len(), *weight);
            let key = document.fingerprint();
            match positions.get(&key) {
                Some(&pos) => merged[pos].1 += score,
                None => {
                    positions.insert(key, merged.len());
                    merged.push((document.clone(), score));
                }
            }
        }
    }

    merged.sort_by(|a, b| b.1.total_cmp(&a.1));
    merged
}

fn finish(fused: Vec<(Document, f32)>, k: usize, key: &str) -> Vec<Document> {
    fused
        .into_iter()
        .take(k)
        .map(|(mut document, score)| {
            document.set_meta(key, score);
            document
        })
        .collect()
}

fn weights_or_equal(params: &Params, count: usize) -> Vec<f32> {
    match params.f32_list("weights") {
        Some(weights) if weights.len() == count => weights,
        Some(_) => {
            tracing::warn!("Weight count does not match retriever count; using equal weights");
            vec![1.0 / count.max(1) as f32; count]
        }
        None => vec![1.0 / count.max(1) as f32; count],
    }
}

/// Dense plus sparse retrieval fused with weighted RRF.
pub struct HybridRetriever {
    dense: Arc<dyn Retriever>,
    sparse: Arc<dyn Retriever>,
    dense_weight: f32,
    sparse_weight: f32,
    k: usize,
}

impl HybridRetriever {
    pub fn new(dense: Arc<dyn Retriever>, sparse: Arc<dyn Retriever>, params: &Params) -> Self {
        Self {
            dense,
            sparse,
            dense_weight: params.f32_or("dense_weight", 0.5),
            sparse_weight: params.f32_or("sparse_weight", 0.5),
            k: top_k(params, 5),
        }
    }
}

#[async_trait]
impl Retriever for HybridRetriever {
    fn name(&self) -> &str {
        "hybrid"
    }

    async fn retrieve(&self, query: &str) -> AppResult<Vec<Document>> {
        let dense = self.dense.retrieve(query).await?;
        let sparse = self.sparse.retrieve(query).await?;
        tracing::debug!("Hybrid fusion of {} dense and {} sparse hits", dense.len(), sparse.len());

        let fused = reciprocal_rank_fusion(
            &[dense, sparse],
            &[self.dense_weight, self.sparse_weight],
            RRF_C,
        );
        Ok(finish(fused, self.k, "rrf_score"))
    }
}

/// Weighted RRF over any number of named retrievers.
pub struct EnsembleRetriever {
    retrievers: Vec<(String, Arc<dyn Retriever>)>,
    weights: Vec<f32>,
    k: usize,
}

impl EnsembleRetriever {
    pub fn new(retrievers: Vec<(String, Arc<dyn Retriever>)>, params: &Params) -> AppResult<Self> {
        if retrievers.is_empty() {
            return Err(AppError::Retrieval(
                "ensemble retriever needs at least one sub-retriever".to_string(),
            ));
        }
        Ok(Self {
            weights: weights_or_equal(params, retrievers.len()),
            retrievers,
            k: top_k(params, 5),
        })
    }
}

#[async_trait]
impl Retriever for EnsembleRetriever {
    fn name(&self) -> &str {
        "ensemble"
    }

    async fn retrieve(&self, query: &str) -> AppResult<Vec<Document>> {
        let mut lists = Vec::with_capacity(self.retrievers.len());
        for (_, retriever) in &self.retrievers {
            lists.push(retriever.retrieve(query).await?);
        }
        let fused = reciprocal_rank_fusion(&lists, &self.weights, RRF_C);
        Ok(finish(fused, self.k, "rrf_score"))
    }
}

/// Dense/sparse weights chosen from the shape of the query.
pub fn adaptive_weights(query: &str) -> (f32, f32) {
    const QUESTION_WORDS: &[&str] = &["什么", "为什么", "如何", "怎么", "哪些", "what", "why", "how"];

    let lower = query.to_lowercase();
    let length = query.chars().count();
    let words: Vec<&str> = query.split_whitespace().collect();
    let mean_word_len = if words.is_empty() {
        0.0
    } else {
        words.iter().map(|w| w.chars().count()).sum::<usize>() as f32 / words.len() as f32
    };

    if QUESTION_WORDS.iter().any(|w| lower.contains(w)) && length >= 20 {
        (0.7, 0.3)
    } else if length < 20 || mean_word_len > 6.0 {
        (0.3, 0.7)
    } else {
        (0.5, 0.5)
    }
}

/// Hybrid retrieval whose weights adapt to the query.
pub struct AdaptiveHybridRetriever {
    dense: Arc<dyn Retriever>,
    sparse: Arc<dyn Retriever>,
    k: usize,
}

impl AdaptiveHybridRetriever {
    pub fn new(dense: Arc<dyn Retriever>, sparse: Arc<dyn Retriever>, params: &Params) -> Self {
        Self {
            dense,
            sparse,
            k: top_k(params, 5),
        }
    }
}

#[async_trait]
impl Retriever for AdaptiveHybridRetriever {
    fn name(&self) -> &str {
        "adaptive_hybrid"
    }

    async fn retrieve(&self, query: &str) -> AppResult<Vec<Document>> {
        let (dense_weight, sparse_weight) = adaptive_weights(query);
        tracing::debug!(dense_weight, sparse_weight, "Adaptive hybrid weights");

        let dense = self.dense.retrieve(query).await?;
        let sparse = self.sparse.retrieve(query).await?;
        let fused = merge_by_content(
            &[dense, sparse],
            &[dense_weight, sparse_weight],
            |rank, len, weight| (len - rank) as f32 * weight,
        );
        Ok(finish(fused, self.k, "hybrid_score"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Semantic,
    Keyword,
    Hybrid,
}

/// Classify a query by counting indicator words.
pub fn classify_query(query: &str) -> QueryKind {
    const SEMANTIC: &[&str] = &[
        "什么", "为什么", "如何", "怎么", "解释", "描述", "说明", "what", "why", "how", "explain",
        "describe",
    ];
    const KEYWORD: &[&str] = &[
        "查找", "搜索", "列出", "包含", "匹配", "find", "search", "list", "contain", "match",
    ];

    let lower = query.to_lowercase();
    let semantic = SEMANTIC.iter().filter(|w| lower.contains(*w)).count();
    let keyword = KEYWORD.iter().filter(|w| lower.contains(*w)).count();

    if semantic > keyword {
        QueryKind::Semantic
    } else if keyword > semantic {
        QueryKind::Keyword
    } else {
        QueryKind::Hybrid
    }
}

/// Sends each query to the retriever best suited to it.
pub struct QueryRouter {
    retrievers: Vec<(String, Arc<dyn Retriever>)>,
}

impl QueryRouter {
    pub fn new(retrievers: Vec<(String, Arc<dyn Retriever>)>) -> AppResult<Self> {
        if retrievers.is_empty() {
            return Err(AppError::Retrieval(
                "query_router needs at least one retriever".to_string(),
            ));
        }
        Ok(Self { retrievers })
    }

    fn find(&self, names: &[&str]) -> Option<&(String, Arc<dyn Retriever>)> {
        names
            .iter()
            .find_map(|name| self.retrievers.iter().find(|(n, _)| n == name))
    }

    /// Name of the retriever chosen for `query`.
    pub fn route(&self, query: &str) -> &str {
        self.select(query).0.as_str()
    }

    fn select(&self, query: &str) -> &(String, Arc<dyn Retriever>) {
        let preferred: &[&str] = match classify_query(query) {
            QueryKind::Semantic => &["dense", "semantic", "vector"],
            QueryKind::Keyword => &["sparse", "bm25", "keyword"],
            QueryKind::Hybrid => &["hybrid", "ensemble"],
        };
        self.find(preferred).unwrap_or(&self.retrievers[0])
    }
}

#[async_trait]
impl Retriever for QueryRouter {
    fn name(&self) -> &str {
        "query_router"
    }

    async fn retrieve(&self, query: &str) -> AppResult<Vec<Document>> {
        let (name, retriever) = self.select(query);
        tracing::debug!("Routing query to {}", name);
        retriever.retrieve(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns fixed documents regardless of the query.
    struct Fixed(&'static str, Vec<&'static str>);

    #[async_trait]
    impl Retriever for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        async fn retrieve(&self, _query: &str) -> AppResult<Vec<Document>> {
            Ok(self.1.iter().map(|c| Document::new(*c)).collect())
        }
    }

    fn fixed(name: &'static str, contents: Vec<&'static str>) -> Arc<dyn Retriever> {
        Arc::new(Fixed(name, contents))
    }

    #[test]
    fn test_rrf_formula() {
        let a = vec![Document::new("x"), Document::new("y")];
        let b = vec![Document::new("y")];
        let fused = reciprocal_rank_fusion(&[a, b], &[0.5, 0.5], RRF_C);

        assert_eq!(fused[0].0.content, "y");
        let expected_y = 0.5 / 62.0 + 0.5 / 61.0;
        assert!((fused[0].1 - expected_y).abs() < 1e-6);
        assert!((fused[1].1 - 0.5 / 61.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_hybrid_fuses_and_truncates() {
        let hybrid = HybridRetriever::new(
            fixed("dense", vec!["a", "b", "c"]),
            fixed("bm25", vec!["c", "d"]),
            &Params::new().with("k", 2),
        );
        let docs = hybrid.retrieve("q").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].content, "c");
        assert!(docs[0].meta_f32("rrf_score").is_some());
    }

    #[tokio::test]
    async fn test_ensemble_weights() {
        let ensemble = EnsembleRetriever::new(
            vec![
                ("one".to_string(), fixed("one", vec!["a"])),
                ("two".to_string(), fixed("two", vec!["b"])),
            ],
            &Params::new().with("weights", serde_json::json!([0.2, 0.8])),
        )
        .unwrap();
        let docs = ensemble.retrieve("q").await.unwrap();
        assert_eq!(docs[0].content, "b");
        assert!(EnsembleRetriever::new(Vec::new(), &Params::new()).is_err());
    }

    #[test]
    fn test_adaptive_weights() {
        assert_eq!(adaptive_weights("what is retrieval augmented generation"), (0.7, 0.3));
        assert_eq!(adaptive_weights("BM25"), (0.3, 0.7));
        assert_eq!(adaptive_weights("internationalization frameworks"), (0.3, 0.7));
        assert_eq!(adaptive_weights("list the rag stage names"), (0.5, 0.5));
    }

    #[tokio::test]
    async fn test_adaptive_hybrid_positional_merge() {
        let retriever = AdaptiveHybridRetriever::new(
            fixed("dense", vec!["a", "b"]),
            fixed("bm25", vec!["b", "c"]),
            &Params::new(),
        );
        // short query: dense 0.3, sparse 0.7
        let docs = retriever.retrieve("rag").await.unwrap();
        let contents: Vec<_> = docs.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(contents, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_classify_query() {
        assert_eq!(classify_query("Why does RAG help?"), QueryKind::Semantic);
        assert_eq!(classify_query("find files that contain BM25"), QueryKind::Keyword);
        assert_eq!(classify_query("RAG stages"), QueryKind::Hybrid);
    }

    #[tokio::test]
    async fn test_router_routes_and_falls_back() {
        let router = QueryRouter::new(vec![
            ("bm25".to_string(), fixed("bm25", vec!["sparse hit"])),
            ("dense".to_string(), fixed("dense", vec!["dense hit"])),
        ])
        .unwrap();

        assert_eq!(router.route("explain dense retrieval"), "dense");
        assert_eq!(router.route("search for bm25"), "bm25");
        // no hybrid retriever registered
        assert_eq!(router.route("rag stages"), "bm25");
        assert_eq!(router.retrieve("why").await.unwrap()[0].content, "dense hit");
        assert!(QueryRouter::new(Vec::new()).is_err());
    }
}
