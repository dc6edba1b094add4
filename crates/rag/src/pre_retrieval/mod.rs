//! Pre-retrieval stage: rewrite, expand or restructure the user query
//! before it reaches the retrievers.

mod construction;
mod expansion;
mod transformation;

pub use construction::{format_graph_schema, format_sql_schema, MetadataFilter, TextToCypher, TextToSql};
pub use expansion::{expansion_complexity, parse_query_lines, HybridExpansion, MultiQuery, SubQuery};
pub use transformation::{CotRewrite, Hyde, QueryRewrite, StepBack};

use crate::llm::StageLlm;
use crate::types::QueryOutput;
use async_trait::async_trait;
use modrag_core::{AppResult, Params};
use serde_json::{json, Value};

pub const DEFAULT_STRATEGY: &str = "query_rewrite";

/// Strategies accepted by [`create_operator`].
pub const STRATEGIES: &[&str] = &[
    "multi_query",
    "sub_query",
    "hybrid_expansion",
    "query_rewrite",
    "hyde",
    "step_back",
    "cot_rewrite",
    "text_to_sql",
    "text_to_cypher",
    "metadata_filter",
];

/// A query-level technique.
#[async_trait]
pub trait QueryOperator: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, query: &str) -> AppResult<QueryOutput>;
}

/// Build the operator for `strategy`. Unknown names fall back to
/// `query_rewrite`.
pub fn create_operator(strategy: &str, params: &Params, llm: &StageLlm) -> Box<dyn QueryOperator> {
    let llm = llm.clone();
    match strategy {
        "multi_query" => Box::new(MultiQuery::new(llm, params)),
        "sub_query" => Box::new(SubQuery::new(llm, params)),
        "hybrid_expansion" => Box::new(HybridExpansion::new(llm, params)),
        "query_rewrite" => Box::new(QueryRewrite::new(llm, params)),
        "hyde" => Box::new(Hyde::new(llm, params)),
        "step_back" => Box::new(StepBack::new(llm, params)),
        "cot_rewrite" => Box::new(CotRewrite::new(llm, params)),
        "text_to_sql" => Box::new(TextToSql::new(llm, params)),
        "text_to_cypher" => Box::new(TextToCypher::new(llm, params)),
        "metadata_filter" => Box::new(MetadataFilter::new(llm, params)),
        other => {
            tracing::warn!(
                "Unknown pre-retrieval strategy '{}', using {}",
                other,
                DEFAULT_STRATEGY
            );
            Box::new(QueryRewrite::new(llm, params))
        }
    }
}

/// One configured pre-retrieval operator.
pub struct PreRetrievalModule {
    params: Params,
    llm: StageLlm,
    operator: Box<dyn QueryOperator>,
}

impl PreRetrievalModule {
    pub fn new(params: &Params, llm: &StageLlm) -> Self {
        let strategy = params.strategy_or(DEFAULT_STRATEGY);
        Self {
            params: params.clone(),
            llm: llm.clone(),
            operator: create_operator(&strategy, params, llm),
        }
    }

    pub fn strategy(&self) -> String {
        self.params.strategy_or(DEFAULT_STRATEGY)
    }

    pub async fn process(&self, query: &str) -> AppResult<QueryOutput> {
        tracing::debug!(operator = self.operator.name(), "Pre-retrieval on: {}", query);
        self.operator.execute(query).await
    }

    /// Process queries one after another, keeping their order.
    pub async fn process_batch(&self, queries: &[String]) -> AppResult<Vec<QueryOutput>> {
        let mut outputs = Vec::with_capacity(queries.len());
        for query in queries {
            outputs.push(self.process(query).await?);
        }
        Ok(outputs)
    }

    /// Switch operator, overlaying `extra` on the current parameters.
    pub fn change_strategy(&mut self, strategy: &str, extra: Option<&Params>) {
        self.params.remove_strategy();
        self.params.set("strategy", strategy);
        if let Some(extra) = extra {
            self.params.merge(extra);
        }
        self.operator = create_operator(&self.strategy(), &self.params, &self.llm);
        tracing::info!("Pre-retrieval strategy changed to {}", self.operator.name());
    }

    pub fn operator(&self) -> &dyn QueryOperator {
        self.operator.as_ref()
    }

    pub fn summary(&self) -> Value {
        json!({
            "module": "pre_retrieval",
            "strategy": self.strategy(),
            "operator": self.operator.name(),
            "config": self.params.to_value(),
        })
    }
}

/// Several pre-retrieval steps applied in sequence.
#[derive(Default)]
pub struct PreRetrievalPipeline {
    steps: Vec<PreRetrievalModule>,
}

impl PreRetrievalPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one step per parameter map.
    pub fn from_params(steps: &[Params], llm: &StageLlm) -> Self {
        Self {
            steps: steps.iter().map(|p| PreRetrievalModule::new(p, llm)).collect(),
        }
    }

    pub fn add_step(&mut self, strategy: &str, params: &Params, llm: &StageLlm) -> &mut Self {
        let mut step_params = params.clone();
        step_params.remove_strategy();
        step_params.set("strategy", strategy);
        self.steps.push(PreRetrievalModule::new(&step_params, llm));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step on every current query; the flattened outputs feed
    /// the next step.
    pub async fn process(&self, query: &str) -> AppResult<QueryOutput> {
        let mut queries = vec![query.to_string()];

        for step in &self.steps {
            let mut next = Vec::new();
            for output in step.process_batch(&queries).await? {
                next.extend(output.queries());
            }
            tracing::debug!(step = step.operator().name(), "{} queries after step", next.len());
            queries = next;
        }

        if queries.len() == 1 {
            Ok(QueryOutput::Single(queries.remove(0)))
        } else {
            Ok(QueryOutput::Multiple(queries))
        }
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }

    pub fn summary(&self) -> Value {
        json!({
            "type": "pre_retrieval_pipeline",
            "num_steps": self.steps.len(),
            "steps": self.steps.iter().map(PreRetrievalModule::summary).collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::scripted;

    #[tokio::test]
    async fn test_unknown_strategy_falls_back() {
        let (llm, _) = scripted(&["better query"]);
        let module = PreRetrievalModule::new(&Params::new().with("strategy", "telepathy"), &llm);
        assert_eq!(module.operator().name(), "query_rewrite");
        assert_eq!(
            module.process("q").await.unwrap(),
            QueryOutput::Single("better query".into())
        );
    }

    #[tokio::test]
    async fn test_change_strategy_merges_params() {
        let (llm, _) = scripted(&["a\nb\nc\nd"]);
        let mut module = PreRetrievalModule::new(&Params::new(), &llm);
        module.change_strategy("multi_query", Some(&Params::new().with("num_queries", 1)));

        assert_eq!(module.operator().name(), "multi_query");
        let summary = module.summary();
        assert_eq!(summary["strategy"], "multi_query");
        assert_eq!(summary["config"]["num_queries"], 1);
        assert_eq!(module.process("q").await.unwrap().queries(), vec!["q", "a"]);
    }

    #[tokio::test]
    async fn test_process_batch_keeps_order() {
        let (llm, _) = scripted(&["one", "two"]);
        let module = PreRetrievalModule::new(&Params::new(), &llm);
        let outputs = module
            .process_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(outputs[0].queries(), vec!["one"]);
        assert_eq!(outputs[1].queries(), vec!["two"]);
    }

    #[tokio::test]
    async fn test_pipeline_chains_steps() {
        let (llm, _) = scripted(&["rewritten", "x\ny", "x2\ny2", "x3\ny3"]);
        let mut pipeline = PreRetrievalPipeline::new();
        pipeline
            .add_step("query_rewrite", &Params::new(), &llm)
            .add_step("multi_query", &Params::new().with("num_queries", 2), &llm);

        let output = pipeline.process("q").await.unwrap();
        assert_eq!(output.queries(), vec!["rewritten", "x", "y"]);
        assert_eq!(pipeline.summary()["num_steps"], 2);

        pipeline.clear();
        assert!(pipeline.is_empty());
        assert_eq!(
            pipeline.process("q").await.unwrap(),
            QueryOutput::Single("q".into())
        );
    }
}
