//! Query construction: natural language to a structured query language.
//!
//! These operators only produce the query text; nothing is executed.

use super::QueryOperator;
use crate::llm::{strip_code_fences, StageLlm};
use crate::types::QueryOutput;
use async_trait::async_trait;
use modrag_core::{AppResult, Params};
use serde_json::{json, Value};

fn join_names(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}

/// `{table: [columns]}` as `Table t: c1, c2` lines; strings pass through.
pub fn format_sql_schema(schema: Option<&Value>) -> String {
    match schema {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Object(tables)) if !tables.is_empty() => tables
            .iter()
            .map(|(table, columns)| format!("Table {}: {}", table, join_names(Some(columns))))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => "No schema provided; infer a common database structure.".to_string(),
    }
}

/// `{nodes, relationships}` as label and relationship lines.
pub fn format_graph_schema(schema: Option<&Value>) -> String {
    match schema {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Object(graph)) if !graph.is_empty() => format!(
            "Node labels: {}\nRelationship types: {}",
            join_names(graph.get("nodes")),
            join_names(graph.get("relationships"))
        ),
        _ => "No schema provided; infer a common graph structure.".to_string(),
    }
}

pub struct TextToSql {
    llm: StageLlm,
    params: Params,
    schema_info: String,
}

impl TextToSql {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            llm,
            params: params.clone(),
            schema_info: format_sql_schema(params.get("schema")),
        }
    }
}

#[async_trait]
impl QueryOperator for TextToSql {
    fn name(&self) -> &str {
        "text_to_sql"
    }

    async fn execute(&self, query: &str) -> AppResult<QueryOutput> {
        let reply = self
            .llm
            .ask(
                "pre.text_to_sql",
                &json!({"query": query, "schema_info": self.schema_info}),
                &self.params,
                0.0,
            )
            .await?;
        Ok(QueryOutput::Single(strip_code_fences(&reply, &["sql"])))
    }
}

pub struct TextToCypher {
    llm: StageLlm,
    params: Params,
    schema_info: String,
}

impl TextToCypher {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            llm,
            params: params.clone(),
            schema_info: format_graph_schema(params.get("graph_schema")),
        }
    }
}

#[async_trait]
impl QueryOperator for TextToCypher {
    fn name(&self) -> &str {
        "text_to_cypher"
    }

    async fn execute(&self, query: &str) -> AppResult<QueryOutput> {
        let reply = self
            .llm
            .ask(
                "pre.text_to_cypher",
                &json!({"query": query, "schema_info": self.schema_info}),
                &self.params,
                0.0,
            )
            .await?;
        Ok(QueryOutput::Single(strip_code_fences(&reply, &["cypher"])))
    }
}

/// Extracts a JSON metadata filter from the query.
pub struct MetadataFilter {
    llm: StageLlm,
    params: Params,
    metadata_info: String,
}

impl MetadataFilter {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        let metadata_info = match params.str_list("available_metadata") {
            Some(fields) if !fields.is_empty() => {
                format!("Available metadata fields: {}", fields.join(", "))
            }
            _ => String::new(),
        };
        Self {
            llm,
            params: params.clone(),
            metadata_info,
        }
    }
}

#[async_trait]
impl QueryOperator for MetadataFilter {
    fn name(&self) -> &str {
        "metadata_filter"
    }

    async fn execute(&self, query: &str) -> AppResult<QueryOutput> {
        let reply = self
            .llm
            .ask(
                "pre.metadata_filter",
                &json!({"query": query, "metadata_info": self.metadata_info}),
                &self.params,
                0.0,
            )
            .await?;

        let body = strip_code_fences(&reply, &["json"]);
        let filter = serde_json::from_str::<Value>(&body).unwrap_or_else(|e| {
            tracing::warn!("Metadata filter reply is not JSON ({}); using empty filter", e);
            json!({})
        });
        Ok(QueryOutput::Structured(filter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::scripted;

    #[test]
    fn test_schema_formatting() {
        let schema = json!({"orders": ["id", "amount"]});
        assert_eq!(format_sql_schema(Some(&schema)), "Table orders: id, amount");
        assert_eq!(format_sql_schema(Some(&json!("CREATE TABLE t"))), "CREATE TABLE t");
        assert!(format_sql_schema(None).contains("infer"));

        let graph = json!({"nodes": ["Person"], "relationships": ["KNOWS", "LIKES"]});
        assert_eq!(
            format_graph_schema(Some(&graph)),
            "Node labels: Person\nRelationship types: KNOWS, LIKES"
        );
    }

    #[tokio::test]
    async fn test_text_to_sql_strips_fences() {
        let (llm, client) = scripted(&["```sql\nSELECT * FROM orders;\n```"]);
        let op = TextToSql::new(llm, &Params::new().with("schema", json!({"orders": ["id"]})));
        assert_eq!(
            op.execute("all orders").await.unwrap(),
            QueryOutput::Single("SELECT * FROM orders;".into())
        );
        let request = &client.requests()[0];
        assert_eq!(request.temperature, Some(0.0));
        assert!(request.system.as_deref().unwrap_or("").contains("Table orders: id"));
    }

    #[tokio::test]
    async fn test_text_to_cypher() {
        let (llm, _) = scripted(&["```cypher\nMATCH (p:Person) RETURN p\n```"]);
        let op = TextToCypher::new(llm, &Params::new());
        assert_eq!(
            op.execute("people").await.unwrap().queries(),
            vec!["MATCH (p:Person) RETURN p"]
        );
    }

    #[tokio::test]
    async fn test_metadata_filter_parses_or_defaults() {
        let (llm, _) = scripted(&["```json\n{\"year\": {\"eq\": 2024}}\n```", "not json"]);
        let op = MetadataFilter::new(llm, &Params::new().with("available_metadata", json!(["year"])));

        assert_eq!(
            op.execute("2024 news").await.unwrap(),
            QueryOutput::Structured(json!({"year": {"eq": 2024}}))
        );
        assert_eq!(
            op.execute("anything").await.unwrap(),
            QueryOutput::Structured(json!({}))
        );
    }
}
