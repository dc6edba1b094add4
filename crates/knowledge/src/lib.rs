//! Indexing stage of the modular RAG pipeline.
//!
//! Loads sources, splits them into chunks, embeds the chunks and keeps them
//! in a local vector index under `.modrag/knowledge/<base>/`.

pub mod chunk;
pub mod config;
pub mod document;
pub mod embeddings;
pub mod hierarchical;
pub mod indexing;
pub mod loaders;
pub mod memory_index;
pub mod parser;
pub mod progress;
pub mod sqlite_index;
pub mod store;
pub mod text;
pub mod types;
pub mod vector_index;

pub use chunk::{create_splitter, Splitter};
pub use config::DEFAULT_BASE;
pub use document::{dedup_by_content, Document};
pub use embeddings::{create_provider, EmbeddingConfig, EmbeddingProvider};
pub use hierarchical::{HierarchicalIndex, HierarchyNode};
pub use indexing::IndexModule;
pub use loaders::{create_loader, Loader};
pub use progress::{ProgressCallback, ProgressEvent, ProgressReporter};
pub use store::VectorStore;
pub use types::{BaseStats, IndexReport, KnowledgeBaseConfig};
pub use vector_index::{cosine_similarity, IndexKind, ScoredEntry, VectorIndex};

use modrag_core::{AppError, AppResult};
use std::collections::HashSet;
use std::path::Path;
use walkdir::WalkDir;

/// Remove a knowledge base and all of its files.
pub fn clean(workspace: &Path, base_name: &str) -> AppResult<()> {
    tracing::info!("Cleaning knowledge base '{}'", base_name);

    let base_dir = config::get_base_dir(workspace, base_name);
    if !base_dir.exists() {
        return Err(AppError::Knowledge(format!(
            "Knowledge base '{}' does not exist",
            base_name
        )));
    }

    std::fs::remove_dir_all(&base_dir)?;

    tracing::info!("Knowledge base '{}' cleaned", base_name);
    Ok(())
}

/// Get statistics for a knowledge base.
pub fn stats(workspace: &Path, base_name: &str) -> AppResult<BaseStats> {
    tracing::info!("Getting stats for knowledge base '{}'", base_name);

    let Some(saved) = config::load_config(workspace, base_name)? else {
        return Err(AppError::Knowledge(format!(
            "Knowledge base '{}' does not exist",
            base_name
        )));
    };

    let base_dir = config::get_base_dir(workspace, base_name);
    let index = vector_index::open_index(IndexKind::parse(&saved.store), &base_dir)?;
    let documents = index.documents()?;
    let sources_count = documents
        .iter()
        .filter_map(|d| d.source())
        .collect::<HashSet<_>>()
        .len();

    let size_bytes = WalkDir::new(&base_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum();

    Ok(BaseStats {
        base_name: base_name.to_string(),
        store: saved.store,
        embedding_provider: saved.embedding.provider,
        embedding_model: saved.embedding.model,
        dimensions: saved.embedding.dimensions,
        sources_count,
        documents_count: documents.len(),
        size_bytes,
        updated_at: saved.updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use modrag_core::Params;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    async fn index_sample(workspace: &Path) -> IndexReport {
        let docs = workspace.join("docs");
        fs::create_dir_all(&docs).unwrap();
        fs::write(docs.join("a.txt"), "Dense retrieval embeds queries and passages.").unwrap();
        fs::write(docs.join("b.md"), "Sparse retrieval scores exact term overlap.").unwrap();

        let params = Params::from_value(json!({
            "embedding": {"type": "mock", "dimensions": 32},
            "store": {"type": "sqlite"},
        }))
        .unwrap();
        let mut module = IndexModule::new(&params, workspace, DEFAULT_BASE).unwrap();
        module
            .index_documents(&[docs.to_string_lossy().to_string()], false)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_stats_after_indexing() {
        let temp = TempDir::new().unwrap();
        let report = index_sample(temp.path()).await;

        let stats = stats(temp.path(), DEFAULT_BASE).unwrap();
        assert_eq!(stats.store, "sqlite");
        assert_eq!(stats.embedding_provider, "mock");
        assert_eq!(stats.dimensions, 32);
        assert_eq!(stats.sources_count, 2);
        assert_eq!(stats.documents_count, report.stored);
        assert!(stats.size_bytes > 0);
    }

    #[tokio::test]
    async fn test_clean_removes_base() {
        let temp = TempDir::new().unwrap();
        index_sample(temp.path()).await;

        clean(temp.path(), DEFAULT_BASE).unwrap();
        assert!(!config::get_base_dir(temp.path(), DEFAULT_BASE).exists());
        assert!(stats(temp.path(), DEFAULT_BASE).is_err());
    }

    #[test]
    fn test_missing_base() {
        let temp = TempDir::new().unwrap();
        assert!(stats(temp.path(), "nope").is_err());
        assert!(clean(temp.path(), "nope").is_err());
    }
}
