//! Query expansion: one query in, several out.

use super::QueryOperator;
use crate::llm::StageLlm;
use crate::types::QueryOutput;
use async_trait::async_trait;
use modrag_core::{AppResult, Params};
use serde_json::json;

const COMPLEX_KEYWORDS: &[&str] = &[
    "比较", "分析", "对比", "综合", "评估", "并且", "以及", "compare", "analyze", "versus",
];

/// Non-empty trimmed reply lines, keeping the text after a leading label
/// such as `Query 1:`.
pub fn parse_query_lines(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.find([':', '：']) {
            Some(pos) => {
                let delimiter_len = line[pos..].chars().next().map_or(1, char::len_utf8);
                line[pos + delimiter_len..].trim().to_string()
            }
            None => line.to_string(),
        })
        .filter(|line| !line.is_empty())
        .collect()
}

/// Rephrases the query several ways.
pub struct MultiQuery {
    llm: StageLlm,
    params: Params,
    num_queries: usize,
}

impl MultiQuery {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            llm,
            params: params.clone(),
            num_queries: params.usize_or("num_queries", 3),
        }
    }
}

#[async_trait]
impl QueryOperator for MultiQuery {
    fn name(&self) -> &str {
        "multi_query"
    }

    async fn execute(&self, query: &str) -> AppResult<QueryOutput> {
        let reply = self
            .llm
            .ask(
                "pre.multi_query",
                &json!({"query": query, "num_queries": self.num_queries}),
                &self.params,
                0.7,
            )
            .await?;

        let mut queries = parse_query_lines(&reply);
        if !queries.iter().any(|q| q == query) {
            queries.insert(0, query.to_string());
        }
        queries.truncate(self.num_queries + 1);

        tracing::debug!("Expanded into {} queries", queries.len());
        Ok(QueryOutput::Multiple(queries))
    }
}

/// Breaks a compound question into independent sub-questions.
pub struct SubQuery {
    llm: StageLlm,
    params: Params,
    max_sub_queries: usize,
}

impl SubQuery {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            llm,
            params: params.clone(),
            max_sub_queries: params.usize_or("max_sub_queries", 4),
        }
    }
}

#[async_trait]
impl QueryOperator for SubQuery {
    fn name(&self) -> &str {
        "sub_query"
    }

    async fn execute(&self, query: &str) -> AppResult<QueryOutput> {
        let reply = self
            .llm
            .ask(
                "pre.sub_query",
                &json!({"query": query, "max_sub_queries": self.max_sub_queries}),
                &self.params,
                0.3,
            )
            .await?;

        let mut sub_queries = parse_query_lines(&reply);
        sub_queries.truncate(self.max_sub_queries);
        if sub_queries.len() <= 1 {
            return Ok(QueryOutput::Multiple(vec![query.to_string()]));
        }

        Ok(QueryOutput::Multiple(sub_queries))
    }
}

/// Query complexity in [0, 1] used to choose between expansion and
/// decomposition.
pub fn expansion_complexity(query: &str) -> f32 {
    let lower = query.to_lowercase();
    let mut score = 0.0;

    score += 0.3 * COMPLEX_KEYWORDS.iter().filter(|k| lower.contains(*k)).count() as f32;
    if query.matches('?').count() > 1 || query.matches('？').count() > 1 {
        score += 0.3;
    }
    if query.chars().count() > 50 {
        score += 0.2;
    }

    f32::min(score, 1.0)
}

/// Decomposes complex queries and rephrases simple ones.
pub struct HybridExpansion {
    multi: MultiQuery,
    sub: SubQuery,
    threshold: f32,
}

impl HybridExpansion {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            multi: MultiQuery::new(llm.clone(), params),
            sub: SubQuery::new(llm, params),
            threshold: params.f32_or("complexity_threshold", 0.6),
        }
    }
}

#[async_trait]
impl QueryOperator for HybridExpansion {
    fn name(&self) -> &str {
        "hybrid_expansion"
    }

    async fn execute(&self, query: &str) -> AppResult<QueryOutput> {
        let complexity = expansion_complexity(query);
        if complexity >= self.threshold {
            tracing::debug!(complexity, "Complex query, decomposing");
            self.sub.execute(query).await
        } else {
            tracing::debug!(complexity, "Simple query, expanding");
            self.multi.execute(query).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::scripted;

    #[test]
    fn test_parse_query_lines() {
        let reply = "Query 1: What is RAG?\n\n  How does retrieval help?  \n变体：检索增强生成是什么";
        assert_eq!(
            parse_query_lines(reply),
            vec!["What is RAG?", "How does retrieval help?", "检索增强生成是什么"]
        );
    }

    #[tokio::test]
    async fn test_multi_query_inserts_original_and_truncates() {
        let (llm, _) = scripted(&["a\nb\nc\nd\ne"]);
        let op = MultiQuery::new(llm, &Params::new().with("num_queries", 2));
        let output = op.execute("What is RAG?").await.unwrap();
        assert_eq!(
            output,
            QueryOutput::Multiple(vec!["What is RAG?".into(), "a".into(), "b".into()])
        );
    }

    #[tokio::test]
    async fn test_multi_query_keeps_existing_original() {
        let (llm, _) = scripted(&["x\nWhat is RAG?"]);
        let op = MultiQuery::new(llm, &Params::new());
        let output = op.execute("What is RAG?").await.unwrap();
        assert_eq!(output.queries(), vec!["x", "What is RAG?"]);
    }

    #[tokio::test]
    async fn test_sub_query_single_line_returns_query() {
        let (llm, _) = scripted(&["only one"]);
        let op = SubQuery::new(llm, &Params::new());
        assert_eq!(op.execute("q").await.unwrap().queries(), vec!["q"]);
    }

    #[tokio::test]
    async fn test_sub_query_truncates() {
        let (llm, _) = scripted(&["1\n2\n3\n4\n5\n6"]);
        let op = SubQuery::new(llm, &Params::new().with("max_sub_queries", 3));
        assert_eq!(op.execute("q").await.unwrap().queries(), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_expansion_complexity() {
        assert!(expansion_complexity("What is RAG?") < 0.1);
        // two keywords and two question marks
        let complex = "Compare and analyze BM25 versus dense retrieval? Which wins?";
        assert!((expansion_complexity(complex) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_question_marks_counted_per_width() {
        // one ASCII and one full-width mark is not "several questions"
        assert!(expansion_complexity("a? b？") < 0.1);
        assert!((expansion_complexity("a？ b？") - 0.3).abs() < 1e-6);
        assert!((expansion_complexity("a? b?") - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_hybrid_routes_by_complexity() {
        let (llm, client) = scripted(&["a\nb", "x\ny\nz"]);
        let op = HybridExpansion::new(llm, &Params::new());

        op.execute("What is RAG?").await.unwrap();
        op.execute("比较并且分析 dense 与 sparse 检索？各自优势？")
            .await
            .unwrap();

        let requests = client.requests();
        assert!(requests[0].system.as_deref().unwrap_or("").contains("query variants"));
        assert!(requests[1].system.as_deref().unwrap_or("").contains("decomposition"));
    }
}
