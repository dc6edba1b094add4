//! Knowledge base records.

use crate::embeddings::EmbeddingConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted description of one knowledge base (`<base>/config.yaml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseConfig {
    /// Name of the knowledge base
    pub name: String,

    /// Embedding space the stored vectors belong to
    pub embedding: EmbeddingConfig,

    /// Store backend ("sqlite", "json")
    pub store: String,

    /// Splitter used for the last indexing run
    #[serde(default)]
    pub splitter: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl KnowledgeBaseConfig {
    pub fn new(name: impl Into<String>, embedding: EmbeddingConfig, store: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            embedding,
            store: store.into(),
            splitter: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Outcome of one indexing run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexReport {
    pub base_name: String,

    /// Documents produced by the loader
    pub documents: usize,

    /// Chunks produced by the splitter (or hierarchy nodes)
    pub splits: usize,

    /// Documents written to the vector index
    pub stored: usize,

    /// Total documents in the index after the run
    pub total: usize,

    pub elapsed_secs: f64,
}

/// Statistics for a knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseStats {
    pub base_name: String,

    pub store: String,

    pub embedding_provider: String,

    pub embedding_model: String,

    pub dimensions: usize,

    /// Distinct `source` values among stored documents
    pub sources_count: usize,

    pub documents_count: usize,

    /// Size of the index files in bytes
    pub size_bytes: u64,

    pub updated_at: DateTime<Utc>,
}
