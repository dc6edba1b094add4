//! Values passed between the RAG stages.

use modrag_knowledge::text::truncate_with_ellipsis;
use modrag_knowledge::Document;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Answers whose best retrieval score is below this are flagged.
pub const CONFIDENCE_THRESHOLD: f32 = 0.30;

/// Chars of content kept in a source snippet.
pub const SNIPPET_CHARS: usize = 100;

/// Result of a pre-retrieval operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum QueryOutput {
    Single(String),
    Multiple(Vec<String>),
    Structured(Value),
}

impl QueryOutput {
    /// Flatten into the list of queries handed to retrieval.
    pub fn queries(&self) -> Vec<String> {
        match self {
            Self::Single(query) => vec![query.clone()],
            Self::Multiple(queries) => queries.clone(),
            Self::Structured(value) => vec![value.to_string()],
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Single(_) => "single",
            Self::Multiple(_) => "multiple",
            Self::Structured(_) => "structured",
        }
    }
}

/// Outcome of one answer check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub is_valid: bool,
    pub confidence: f32,
    pub reason: String,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl VerificationReport {
    pub fn new(is_valid: bool, confidence: f32, reason: impl Into<String>) -> Self {
        Self {
            is_valid,
            confidence,
            reason: reason.into(),
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// A document cited by an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    /// 1-based position in the generation context
    pub index: usize,
    pub source: String,
    pub snippet: String,
}

impl SourceRef {
    pub fn from_document(index: usize, document: &Document) -> Self {
        Self {
            index,
            source: document.source().unwrap_or_else(|| "unknown".to_string()),
            snippet: truncate_with_ellipsis(&document.content, SNIPPET_CHARS),
        }
    }
}

/// Final result of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagAnswer {
    pub query: String,

    /// Queries sent to retrieval after pre-retrieval
    pub queries: Vec<String>,

    pub answer: String,

    pub sources: Vec<SourceRef>,

    pub documents_retrieved: usize,

    /// Documents left after post-retrieval and given to generation
    pub documents_used: usize,

    /// Best dense similarity among retrieved documents (0 when none)
    pub max_score: f32,

    pub low_confidence: bool,

    #[serde(default)]
    pub verification: Vec<VerificationReport>,

    pub elapsed_ms: u64,
}

impl RagAnswer {
    /// Answer used when retrieval finds nothing.
    pub fn no_information(query: &str, queries: Vec<String>, documents_retrieved: usize) -> Self {
        Self {
            query: query.to_string(),
            queries,
            answer: format!(
                "I could not find information about \"{}\" in the indexed documents.",
                query
            ),
            sources: Vec::new(),
            documents_retrieved,
            documents_used: 0,
            max_score: 0.0,
            low_confidence: true,
            verification: Vec::new(),
            elapsed_ms: 0,
        }
    }
}

/// Highest `score` metadata value among documents.
pub fn max_score(documents: &[Document]) -> f32 {
    documents
        .iter()
        .filter_map(|d| d.meta_f32("score"))
        .fold(0.0, f32::max)
}
