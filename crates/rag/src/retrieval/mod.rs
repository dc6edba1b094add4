//! Retrieval stage: fetch candidate documents for each query.

mod dense;
mod fusion;
mod sparse;

pub use dense::{
    retrieval_complexity, AdaptiveKRetriever, DenseRetriever, MultiVectorRetriever, SearchType,
    SemanticRetriever, ThresholdRetriever,
};
pub use fusion::{
    adaptive_weights, classify_query, reciprocal_rank_fusion, AdaptiveHybridRetriever,
    EnsembleRetriever, HybridRetriever, QueryKind, QueryRouter, RRF_C,
};
pub use sparse::{Bm25Retriever, KeywordRetriever, RegexRetriever, TfidfRetriever};

use async_trait::async_trait;
use modrag_core::{AppError, AppResult, Params};
use modrag_knowledge::{dedup_by_content, Document, VectorStore};
use serde_json::{json, Value};
use std::sync::Arc;

pub const DEFAULT_STRATEGY: &str = "dense";

/// Strategies accepted by [`create_retriever`].
pub const STRATEGIES: &[&str] = &[
    "dense",
    "semantic",
    "multi_vector",
    "bm25",
    "tfidf",
    "keyword",
    "regex",
    "hybrid",
    "ensemble",
    "adaptive_hybrid",
    "adaptive_k",
    "query_router",
    "threshold",
];

/// A retrieval technique.
#[async_trait]
pub trait Retriever: Send + Sync {
    fn name(&self) -> &str;

    async fn retrieve(&self, query: &str) -> AppResult<Vec<Document>>;

    /// Results for every query, concatenated and deduplicated by content.
    async fn retrieve_many(&self, queries: &[String]) -> AppResult<Vec<Document>> {
        let mut all = Vec::new();
        for query in queries {
            all.extend(self.retrieve(query).await?);
        }
        Ok(dedup_by_content(all))
    }
}

/// What retrievers can be built from.
#[derive(Clone, Default)]
pub struct RetrievalSources {
    pub vector_store: Option<VectorStore>,

    /// Chunk corpus for the lexical retrievers
    pub documents: Option<Vec<Document>>,

    /// Stores for `multi_vector`
    pub vector_stores: Vec<VectorStore>,

    /// Pre-built retrievers for `ensemble` and `query_router`
    pub retrievers: Vec<(String, Arc<dyn Retriever>)>,
}

impl RetrievalSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vector_store(mut self, store: VectorStore) -> Self {
        self.vector_store = Some(store);
        self
    }

    pub fn with_documents(mut self, documents: Vec<Document>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn with_vector_stores(mut self, stores: Vec<VectorStore>) -> Self {
        self.vector_stores = stores;
        self
    }

    pub fn with_retriever(mut self, name: impl Into<String>, retriever: Arc<dyn Retriever>) -> Self {
        self.retrievers.push((name.into(), retriever));
        self
    }

    fn store(&self, strategy: &str) -> AppResult<VectorStore> {
        self.vector_store.clone().ok_or_else(|| {
            AppError::Retrieval(format!("{} retriever requires a vector store", strategy))
        })
    }

    fn corpus(&self, strategy: &str) -> AppResult<Vec<Document>> {
        self.documents.clone().ok_or_else(|| {
            AppError::Retrieval(format!("{} retriever requires a document corpus", strategy))
        })
    }

    /// Sub-retrievers from `retrievers` params, the registered ones, or the
    /// given defaults.
    fn sub_retrievers(
        &self,
        params: &Params,
        defaults: &[&str],
    ) -> AppResult<Vec<(String, Arc<dyn Retriever>)>> {
        if let Some(Value::Array(entries)) = params.get("retrievers") {
            let mut built = Vec::with_capacity(entries.len());
            for entry in entries {
                let sub_params = Params::from_value(entry.clone())?;
                let strategy = sub_params.strategy_or(DEFAULT_STRATEGY);
                let name = sub_params.str_or("name", &strategy);
                built.push((name, create_retriever(&strategy, &sub_params, self)?));
            }
            return Ok(built);
        }

        if !self.retrievers.is_empty() {
            return Ok(self.retrievers.clone());
        }

        let mut built = Vec::with_capacity(defaults.len());
        for strategy in defaults {
            built.push((
                strategy.to_string(),
                create_retriever(strategy, &Params::new(), self)?,
            ));
        }
        Ok(built)
    }
}

/// Build the retriever for `strategy`. Unknown names fall back to `dense`;
/// missing sources are errors.
pub fn create_retriever(
    strategy: &str,
    params: &Params,
    sources: &RetrievalSources,
) -> AppResult<Arc<dyn Retriever>> {
    let retriever: Arc<dyn Retriever> = match strategy {
        "dense" => Arc::new(DenseRetriever::new(sources.store(strategy)?, params)),
        "semantic" => Arc::new(SemanticRetriever::new(sources.store(strategy)?, params)),
        "multi_vector" => {
            if sources.vector_stores.is_empty() {
                return Err(AppError::Retrieval(
                    "multi_vector retriever requires vector stores".to_string(),
                ));
            }
            Arc::new(MultiVectorRetriever::new(sources.vector_stores.clone(), params))
        }
        "bm25" => Arc::new(Bm25Retriever::new(sources.corpus(strategy)?, params)?),
        "tfidf" => Arc::new(TfidfRetriever::new(sources.corpus(strategy)?, params)?),
        "keyword" => Arc::new(KeywordRetriever::new(sources.corpus(strategy)?, params)),
        "regex" => Arc::new(RegexRetriever::new(sources.corpus(strategy)?, params)),
        "hybrid" | "adaptive_hybrid" => {
            let dense: Arc<dyn Retriever> =
                Arc::new(DenseRetriever::new(sources.store(strategy)?, params));
            let sparse: Arc<dyn Retriever> =
                Arc::new(Bm25Retriever::new(sources.corpus(strategy)?, params)?);
            if strategy == "hybrid" {
                Arc::new(HybridRetriever::new(dense, sparse, params))
            } else {
                Arc::new(AdaptiveHybridRetriever::new(dense, sparse, params))
            }
        }
        "ensemble" => Arc::new(EnsembleRetriever::new(
            sources.sub_retrievers(params, &["dense", "bm25"])?,
            params,
        )?),
        "query_router" => Arc::new(QueryRouter::new(
            sources.sub_retrievers(params, &["dense", "bm25", "hybrid"])?,
        )?),
        "adaptive_k" => Arc::new(AdaptiveKRetriever::new(sources.store(strategy)?, params)),
        "threshold" => Arc::new(ThresholdRetriever::new(sources.store(strategy)?, params)),
        other => {
            tracing::warn!("Unknown retrieval strategy '{}', using {}", other, DEFAULT_STRATEGY);
            Arc::new(DenseRetriever::new(sources.store(DEFAULT_STRATEGY)?, params))
        }
    };
    Ok(retriever)
}

/// One configured retriever.
pub struct RetrievalModule {
    params: Params,
    retriever: Option<Arc<dyn Retriever>>,
}

impl RetrievalModule {
    pub fn new(params: &Params) -> Self {
        Self {
            params: params.clone(),
            retriever: None,
        }
    }

    pub fn strategy(&self) -> String {
        self.params.strategy_or(DEFAULT_STRATEGY)
    }

    pub fn build(&mut self, sources: &RetrievalSources) -> AppResult<&mut Self> {
        let retriever = create_retriever(&self.strategy(), &self.params, sources)?;
        tracing::debug!("Built {} retriever", retriever.name());
        self.retriever = Some(retriever);
        Ok(self)
    }

    pub fn retriever(&self) -> AppResult<&Arc<dyn Retriever>> {
        self.retriever.as_ref().ok_or_else(|| {
            AppError::Retrieval(format!(
                "{} retriever has not been built; call build() first",
                self.strategy()
            ))
        })
    }

    pub async fn retrieve(&self, query: &str) -> AppResult<Vec<Document>> {
        self.retriever()?.retrieve(query).await
    }

    pub async fn retrieve_many(&self, queries: &[String]) -> AppResult<Vec<Document>> {
        self.retriever()?.retrieve_many(queries).await
    }

    /// Switch strategy; the module must be rebuilt before use.
    pub fn change_strategy(&mut self, strategy: &str, extra: Option<&Params>) {
        self.params.remove_strategy();
        self.params.set("strategy", strategy);
        if let Some(extra) = extra {
            self.params.merge(extra);
        }
        self.retriever = None;
        tracing::info!("Retrieval strategy changed to {}; rebuild required", strategy);
    }

    pub fn summary(&self) -> Value {
        json!({
            "module": "retrieval",
            "strategy": self.strategy(),
            "retriever": self.retriever.as_ref().map(|r| r.name().to_string()),
            "built": self.retriever.is_some(),
            "config": self.params.to_value(),
        })
    }
}

/// Several retrieval stages whose results are pooled.
#[derive(Default)]
pub struct RetrievalPipeline {
    stages: Vec<RetrievalModule>,
}

impl RetrievalPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// One built stage per parameter map; a single `dense` stage when empty.
    pub fn from_params(stages: &[Params], sources: &RetrievalSources) -> AppResult<Self> {
        let mut pipeline = Self::new();
        if stages.is_empty() {
            pipeline.add_stage(DEFAULT_STRATEGY, &Params::new(), sources)?;
        }
        for params in stages {
            let mut module = RetrievalModule::new(params);
            module.build(sources)?;
            pipeline.stages.push(module);
        }
        Ok(pipeline)
    }

    pub fn add_stage(
        &mut self,
        strategy: &str,
        params: &Params,
        sources: &RetrievalSources,
    ) -> AppResult<&mut Self> {
        let mut stage_params = params.clone();
        stage_params.remove_strategy();
        stage_params.set("strategy", strategy);
        let mut module = RetrievalModule::new(&stage_params);
        module.build(sources)?;
        self.stages.push(module);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub async fn retrieve(&self, query: &str) -> AppResult<Vec<Document>> {
        self.retrieve_many(&[query.to_string()]).await
    }

    /// Every stage over every query, pooled and deduplicated by content.
    pub async fn retrieve_many(&self, queries: &[String]) -> AppResult<Vec<Document>> {
        let mut all = Vec::new();
        for stage in &self.stages {
            all.extend(stage.retrieve_many(queries).await?);
        }
        Ok(dedup_by_content(all))
    }

    pub fn clear(&mut self) {
        self.stages.clear();
    }

    pub fn summary(&self) -> Value {
        json!({
            "type": "retrieval_pipeline",
            "num_stages": self.stages.len(),
            "stages": self.stages.iter().map(RetrievalModule::summary).collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use modrag_knowledge::embeddings::providers::MockProvider;
    use modrag_knowledge::memory_index::MemoryIndex;
    use modrag_knowledge::{Document, VectorStore};
    use std::sync::Arc;

    /// In-memory store holding one document per text.
    pub async fn store_with(texts: &[&str]) -> VectorStore {
        let store = VectorStore::new(Arc::new(MemoryIndex::new()), Arc::new(MockProvider::new(256)));
        let documents: Vec<Document> = texts
            .iter()
            .map(|t| Document::new(*t).with_meta("source", format!("{}.txt", t)))
            .collect();
        store.add_documents(&documents).await.unwrap();
        store
    }
}

#[cfg(test)]
mod tests {
    use super::testing::store_with;
    use super::*;

    async fn sources() -> RetrievalSources {
        let texts = ["rust ownership rules", "python typing hints", "rust async runtime"];
        let store = store_with(&texts).await;
        let documents = store.documents().unwrap();
        RetrievalSources::new()
            .with_vector_store(store)
            .with_documents(documents)
    }

    #[tokio::test]
    async fn test_every_strategy_builds() {
        let sources = sources().await.with_vector_stores(vec![store_with(&["x"]).await]);
        for strategy in STRATEGIES {
            let retriever = create_retriever(strategy, &Params::new(), &sources).unwrap();
            assert_eq!(retriever.name(), *strategy);
        }
    }

    #[tokio::test]
    async fn test_missing_sources_are_errors() {
        let empty = RetrievalSources::new();
        assert!(create_retriever("dense", &Params::new(), &empty).is_err());
        assert!(create_retriever("bm25", &Params::new(), &empty).is_err());
        assert!(create_retriever("multi_vector", &Params::new(), &empty).is_err());
    }

    #[tokio::test]
    async fn test_unknown_strategy_uses_dense() {
        let retriever = create_retriever("psychic", &Params::new(), &sources().await).unwrap();
        assert_eq!(retriever.name(), "dense");
    }

    #[tokio::test]
    async fn test_ensemble_from_params() {
        let params = Params::from_value(json!({
            "retrievers": [{"strategy": "bm25", "name": "sparse"}, {"strategy": "keyword"}],
            "k": 2,
        }))
        .unwrap();
        let retriever = create_retriever("ensemble", &params, &sources().await).unwrap();
        let docs = retriever.retrieve("rust").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|d| d.content.starts_with("rust")));
    }

    #[tokio::test]
    async fn test_module_requires_build() {
        let mut module = RetrievalModule::new(&Params::new().with("strategy", "bm25"));
        assert!(module.retrieve("rust").await.is_err());

        module.build(&sources().await).unwrap();
        assert_eq!(module.retriever().unwrap().name(), "bm25");
        assert_eq!(module.summary()["built"], true);

        module.change_strategy("keyword", None);
        assert!(module.retriever().is_err());
        assert_eq!(module.strategy(), "keyword");
    }

    #[tokio::test]
    async fn test_retrieve_many_dedups() {
        let mut module = RetrievalModule::new(&Params::new().with("strategy", "keyword"));
        module.build(&sources().await).unwrap();
        let docs = module
            .retrieve_many(&["rust".to_string(), "ownership".to_string()])
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[tokio::test]
    async fn test_pipeline_pools_stages() {
        let sources = sources().await;
        let mut pipeline = RetrievalPipeline::new();
        pipeline
            .add_stage("dense", &Params::new().with("k", 1), &sources)
            .unwrap()
            .add_stage("keyword", &Params::new(), &sources)
            .unwrap();

        let docs = pipeline.retrieve("python typing").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "python typing hints");
        assert_eq!(pipeline.summary()["num_stages"], 2);

        let default = RetrievalPipeline::from_params(&[], &sources).unwrap();
        assert_eq!(default.len(), 1);
    }
}
