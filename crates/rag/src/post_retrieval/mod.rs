//! Post-retrieval stage: rerank, compress and filter retrieved documents
//! before generation.

mod compression;
mod filter;
mod rerank;

pub use compression::{AdaptiveCompression, ContextCompression, SummaryCompression, TokenCompression};
pub use filter::{
    quality_score, ContradictionFilter, QualityFilter, RedundancyFilter, RelevanceFilter, Selection,
};
pub use rerank::{parse_score, DiversityRerank, LlmRerank, LostInMiddle, Rerank};

use crate::llm::StageLlm;
use async_trait::async_trait;
use modrag_core::{AppResult, Params};
use modrag_knowledge::Document;
use serde_json::{json, Value};

pub const DEFAULT_STRATEGY: &str = "rerank";

/// Strategies accepted by [`create_operator`].
pub const STRATEGIES: &[&str] = &[
    "rerank",
    "diversity_rerank",
    "llm_rerank",
    "lost_in_middle",
    "context_compression",
    "summary_compression",
    "token_compression",
    "adaptive_compression",
    "selection",
    "relevance_filter",
    "redundancy_filter",
    "quality_filter",
    "contradiction_filter",
];

/// A document-list technique. Empty input yields empty output.
#[async_trait]
pub trait PostOperator: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, documents: Vec<Document>, query: Option<&str>) -> AppResult<Vec<Document>>;
}

/// Build the operator for `strategy`. Unknown names fall back to `rerank`.
pub fn create_operator(strategy: &str, params: &Params, llm: &StageLlm) -> Box<dyn PostOperator> {
    match strategy {
        "rerank" => Box::new(Rerank::new(params)),
        "diversity_rerank" => Box::new(DiversityRerank::new(params)),
        "llm_rerank" => Box::new(LlmRerank::new(llm.clone(), params)),
        "lost_in_middle" => Box::new(LostInMiddle::new(params)),
        "context_compression" => Box::new(ContextCompression::new(params)),
        "summary_compression" => Box::new(SummaryCompression::new(llm.clone(), params)),
        "token_compression" => Box::new(TokenCompression::new(params)),
        "adaptive_compression" => Box::new(AdaptiveCompression::new(params)),
        "selection" => Box::new(Selection::new(params)),
        "relevance_filter" => Box::new(RelevanceFilter::new(llm.clone(), params)),
        "redundancy_filter" => Box::new(RedundancyFilter::new(params)),
        "quality_filter" => Box::new(QualityFilter::new(params)),
        "contradiction_filter" => Box::new(ContradictionFilter::new(llm.clone(), params)),
        other => {
            tracing::warn!(
                "Unknown post-retrieval strategy '{}', using {}",
                other,
                DEFAULT_STRATEGY
            );
            Box::new(Rerank::new(params))
        }
    }
}

/// One configured post-retrieval operator.
pub struct PostRetrievalModule {
    params: Params,
    llm: StageLlm,
    operator: Box<dyn PostOperator>,
}

impl PostRetrievalModule {
    pub fn new(params: &Params, llm: &StageLlm) -> Self {
        Self {
            params: params.clone(),
            llm: llm.clone(),
            operator: create_operator(&params.strategy_or(DEFAULT_STRATEGY), params, llm),
        }
    }

    pub fn strategy(&self) -> String {
        self.params.strategy_or(DEFAULT_STRATEGY)
    }

    pub async fn process(&self, documents: Vec<Document>, query: Option<&str>) -> AppResult<Vec<Document>> {
        if documents.is_empty() {
            return Ok(documents);
        }
        let before = documents.len();
        let processed = self.operator.execute(documents, query).await?;
        tracing::debug!(operator = self.operator.name(), "{} -> {} documents", before, processed.len());
        Ok(processed)
    }

    pub fn change_strategy(&mut self, strategy: &str, extra: Option<&Params>) {
        self.params.remove_strategy();
        self.params.set("strategy", strategy);
        if let Some(extra) = extra {
            self.params.merge(extra);
        }
        self.operator = create_operator(&self.strategy(), &self.params, &self.llm);
        tracing::info!("Post-retrieval strategy changed to {}", self.operator.name());
    }

    pub fn operator(&self) -> &dyn PostOperator {
        self.operator.as_ref()
    }

    pub fn summary(&self) -> Value {
        json!({
            "module": "post_retrieval",
            "strategy": self.strategy(),
            "operator": self.operator.name(),
            "config": self.params.to_value(),
        })
    }
}

/// Post-retrieval steps applied in order, each on the previous output.
#[derive(Default)]
pub struct PostRetrievalPipeline {
    steps: Vec<PostRetrievalModule>,
}

impl PostRetrievalPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_params(steps: &[Params], llm: &StageLlm) -> Self {
        Self {
            steps: steps.iter().map(|p| PostRetrievalModule::new(p, llm)).collect(),
        }
    }

    pub fn add_step(&mut self, strategy: &str, params: &Params, llm: &StageLlm) -> &mut Self {
        let mut step_params = params.clone();
        step_params.remove_strategy();
        step_params.set("strategy", strategy);
        self.steps.push(PostRetrievalModule::new(&step_params, llm));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub async fn process(&self, documents: Vec<Document>, query: Option<&str>) -> AppResult<Vec<Document>> {
        let mut current = documents;
        for step in &self.steps {
            if current.is_empty() {
                tracing::debug!("No documents left; skipping remaining post-retrieval steps");
                break;
            }
            current = step.process(current, query).await?;
        }
        Ok(current)
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }

    pub fn summary(&self) -> Value {
        json!({
            "type": "post_retrieval_pipeline",
            "num_steps": self.steps.len(),
            "steps": self.steps.iter().map(PostRetrievalModule::summary).collect::<Vec<_>>(),
        })
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
    async fn test_every_operator_handles_empty_input() {
        let (llm, client) = scripted(&[]);
        for strategy in STRATEGIES {
            let module = PostRetrievalModule::new(&Params::new().with("strategy", *strategy), &llm);
            assert_eq!(module.operator().name(), *strategy);
            assert!(module.process(Vec::new(), Some("q")).await.unwrap().is_empty());
        }
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_strategy_and_change() {
        let (llm, _) = scripted(&[]);
        let mut module = PostRetrievalModule::new(&Params::new().with("type", "magic"), &llm);
        assert_eq!(module.operator().name(), "rerank");

        module.change_strategy("selection", Some(&Params::new().with("top_k", 1)));
        let out = module.process(docs(&["a", "b"]), None).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(module.summary()["strategy"], "selection");
    }

    #[tokio::test]
    async fn test_pipeline_chains_and_stops_when_empty() {
        let (llm, client) = scripted(&[]);
        let mut pipeline = PostRetrievalPipeline::new();
        pipeline
            .add_step("redundancy_filter", &Params::new(), &llm)
            .add_step("selection", &Params::new().with("top_k", 2), &llm);

        let out = pipeline
            .process(docs(&["same words", "same words", "other", "third"]), Some("q"))
            .await
            .unwrap();
        let contents: Vec<_> = out.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(contents, vec!["same words", "other"]);

        pipeline.add_step("llm_rerank", &Params::new(), &llm);
        let none = pipeline.process(Vec::new(), Some("q")).await.unwrap();
        assert!(none.is_empty());
        assert!(client.requests().is_empty());
        assert_eq!(pipeline.summary()["num_steps"], 3);
    }
}
