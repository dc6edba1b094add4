//! Query transformation: one query in, one rewritten query out.

use super::QueryOperator;
use crate::llm::StageLlm;
use crate::types::QueryOutput;
use async_trait::async_trait;
use modrag_core::{AppResult, Params};
use serde_json::json;

/// Rewrites the query into a clearer, more specific question.
pub struct QueryRewrite {
    llm: StageLlm,
    params: Params,
}

impl QueryRewrite {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            llm,
            params: params.clone(),
        }
    }
}

#[async_trait]
impl QueryOperator for QueryRewrite {
    fn name(&self) -> &str {
        "query_rewrite"
    }

    async fn execute(&self, query: &str) -> AppResult<QueryOutput> {
        let rewritten = self
            .llm
            .ask("pre.query_rewrite", &json!({"query": query}), &self.params, 0.3)
            .await?;
        Ok(QueryOutput::Single(rewritten))
    }
}

/// Hypothetical document embeddings: retrieves with a generated answer
/// instead of the question.
pub struct Hyde {
    llm: StageLlm,
    params: Params,
    doc_length: String,
}

impl Hyde {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            llm,
            params: params.clone(),
            doc_length: params.str_or("doc_length", "medium"),
        }
    }

    fn length_guide(&self) -> &'static str {
        match self.doc_length.as_str() {
            "short" => "about 100 words",
            "long" => "about 500 words",
            _ => "about 200-300 words",
        }
    }
}

#[async_trait]
impl QueryOperator for Hyde {
    fn name(&self) -> &str {
        "hyde"
    }

    async fn execute(&self, query: &str) -> AppResult<QueryOutput> {
        let document = self
            .llm
            .ask(
                "pre.hyde",
                &json!({"query": query, "length_guide": self.length_guide()}),
                &self.params,
                0.7,
            )
            .await?;
        Ok(QueryOutput::Single(document))
    }
}

/// Abstracts the query into a more general background question.
pub struct StepBack {
    llm: StageLlm,
    params: Params,
    return_both: bool,
}

impl StepBack {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            llm,
            params: params.clone(),
            return_both: params.bool_or("return_both", true),
        }
    }
}

#[async_trait]
impl QueryOperator for StepBack {
    fn name(&self) -> &str {
        "step_back"
    }

    async fn execute(&self, query: &str) -> AppResult<QueryOutput> {
        let step_back = self
            .llm
            .ask("pre.step_back", &json!({"query": query}), &self.params, 0.3)
            .await?;

        if !self.return_both {
            return Ok(QueryOutput::Single(step_back));
        }

        Ok(QueryOutput::Single(format!(
            "First answer this foundational question: {}\n\nThen answer specifically: {}",
            step_back, query
        )))
    }
}

/// Spells out the reasoning steps needed to answer the query.
pub struct CotRewrite {
    llm: StageLlm,
    params: Params,
}

impl CotRewrite {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            llm,
            params: params.clone(),
        }
    }
}

#[async_trait]
impl QueryOperator for CotRewrite {
    fn name(&self) -> &str {
        "cot_rewrite"
    }

    async fn execute(&self, query: &str) -> AppResult<QueryOutput> {
        let rewritten = self
            .llm
            .ask("pre.cot_rewrite", &json!({"query": query}), &self.params, 0.3)
            .await?;
        Ok(QueryOutput::Single(rewritten))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::scripted;

    #[tokio::test]
    async fn test_rewrite_trims_reply() {
        let (llm, client) = scripted(&["  What is retrieval augmented generation?\n"]);
        let op = QueryRewrite::new(llm, &Params::new());
        assert_eq!(
            op.execute("rag?").await.unwrap(),
            QueryOutput::Single("What is retrieval augmented generation?".into())
        );
        assert_eq!(client.requests()[0].temperature, Some(0.3));
    }

    #[tokio::test]
    async fn test_hyde_length_guide() {
        let (llm, client) = scripted(&["doc"]);
        let op = Hyde::new(llm, &Params::new().with("doc_length", "huge"));
        op.execute("q").await.unwrap();
        let system = client.requests()[0].system.clone().unwrap_or_default();
        assert!(system.contains("about 200-300 words"));
    }

    #[tokio::test]
    async fn test_step_back_combines_queries() {
        let (llm, _) = scripted(&["What is an LLM context window?", "general"]);
        let op = StepBack::new(llm.clone(), &Params::new());
        let combined = op.execute("GPT-4 token limit?").await.unwrap();
        assert_eq!(
            combined,
            QueryOutput::Single(
                "First answer this foundational question: What is an LLM context window?\n\nThen answer specifically: GPT-4 token limit?".into()
            )
        );

        let only = StepBack::new(llm, &Params::new().with("return_both", false));
        assert_eq!(only.execute("q").await.unwrap().queries(), vec!["general"]);
    }
}
