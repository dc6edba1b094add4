//! Prompt types for the modular RAG workspace.
//!
//! This module defines the domain entities for the prompt system.

use serde::{Deserialize, Serialize};

/// A prompt template loaded from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Unique prompt identifier (e.g. "pre.hyde")
    pub id: String,

    /// Human-readable title
    pub title: String,

    /// API version for schema evolution
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Optional system message, rendered with the same variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// User message with Handlebars syntax
    pub template: String,
}

/// A rendered prompt ready for LLM execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedPrompt {
    /// Source prompt ID
    pub id: String,

    /// System message (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// User message (required)
    pub user: String,
}

impl RenderedPrompt {
    pub fn new(id: impl Into<String>, system: Option<String>, user: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            system,
            user: user.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_template_deserialization() {
        let yaml = r#"
id: pre.query_rewrite
title: Query rewrite
apiVersion: "1.0"
system: "You rewrite queries."
template: "{{query}}"
"#;

        let def: PromptTemplate = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.id, "pre.query_rewrite");
        assert_eq!(def.api_version, "1.0");
        assert_eq!(def.system.as_deref(), Some("You rewrite queries."));
        assert_eq!(def.template, "{{query}}");
    }

    #[test]
    fn test_system_is_optional() {
        let yaml = r#"
id: answer.refine
title: Refine
apiVersion: "1.0"
template: "Refine: {{answer}}"
"#;
        let def: PromptTemplate = serde_yaml::from_str(yaml).unwrap();
        assert!(def.system.is_none());

        let json = serde_json::to_value(&def).unwrap();
        assert!(json.get("system").is_none());
    }
}
