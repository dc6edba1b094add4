//! The indexing stage module.
//!
//! `IndexModule` wires a loader, a splitter, an optional hierarchical
//! strategy, an embedding provider and a vector index together:
//! load → split → (hierarchy) → embed + store.

use crate::chunk::{create_splitter, Splitter};
use crate::config::{get_base_dir, load_config, save_config};
use crate::document::Document;
use crate::embeddings::{create_provider, EmbeddingConfig};
use crate::hierarchical::{HierarchicalIndex, DEFAULT_LEAF_SIZE};
use crate::loaders::{create_loader, Loader};
use crate::progress::ProgressReporter;
use crate::store::VectorStore;
use crate::types::{IndexReport, KnowledgeBaseConfig};
use crate::vector_index::{open_index, IndexKind};
use chrono::Utc;
use modrag_core::{AppError, AppResult, Params};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Indexing stage façade.
pub struct IndexModule {
    params: Params,
    workspace: PathBuf,
    base_name: String,
    persist_dir: PathBuf,
    loader: Box<dyn Loader>,
    splitter: Box<dyn Splitter>,
    embedding: EmbeddingConfig,
    store_kind: IndexKind,
    /// Leaf size when the hierarchical strategy is active
    hierarchical: Option<usize>,
    hierarchy: Option<HierarchicalIndex>,
    api_key: Option<String>,
    progress: ProgressReporter,
    documents: Vec<Document>,
    splits: Vec<Document>,
    vector_store: Option<VectorStore>,
}

impl IndexModule {
    /// Build from the `indexing` parameter map.
    ///
    /// Sections: `loader`, `splitter`, `embedding`, `store`, `strategy`.
    pub fn new(params: &Params, workspace: &Path, base_name: &str) -> AppResult<Self> {
        let loader = create_loader(&params.section("loader"))?;
        let splitter = create_splitter(&params.section("splitter"))?;
        let embedding = EmbeddingConfig::from_params(&params.section("embedding"))?;

        let store_params = params.section("store");
        let store_kind = IndexKind::parse(&store_params.strategy_or("sqlite"));
        let persist_dir = match store_params.opt_str("persist_directory") {
            Some(dir) if Path::new(&dir).is_absolute() => PathBuf::from(dir),
            Some(dir) => workspace.join(dir),
            None => get_base_dir(workspace, base_name),
        };

        let strategy = params.section("strategy");
        let hierarchical = match strategy.opt_str("type").as_deref() {
            Some("hierarchical") => Some(strategy.usize_or("chunk_size", DEFAULT_LEAF_SIZE)),
            Some(other) => {
                tracing::warn!("Unknown index strategy '{}', ignoring", other);
                None
            }
            None => None,
        };

        Ok(Self {
            params: params.clone(),
            workspace: workspace.to_path_buf(),
            base_name: base_name.to_string(),
            persist_dir,
            loader,
            splitter,
            embedding,
            store_kind,
            hierarchical,
            hierarchy: None,
            api_key: None,
            progress: ProgressReporter::noop(),
            documents: Vec::new(),
            splits: Vec::new(),
            vector_store: None,
        })
    }

    /// API key for key-based embedding providers.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn embedding_config(&self) -> &EmbeddingConfig {
        &self.embedding
    }

    /// Run the full pipeline over `sources` (paths or URLs).
    pub async fn index_documents(&mut self, sources: &[String], reset: bool) -> AppResult<IndexReport> {
        let start = Instant::now();
        tracing::info!(
            base = %self.base_name,
            loader = self.loader.name(),
            splitter = self.splitter.name(),
            "Indexing {} sources",
            sources.len()
        );

        let mut documents = Vec::new();
        for source in sources {
            documents.extend(self.loader.load(source).await?);
            self.progress.load(documents.len() as u64, source);
        }
        tracing::info!("Loaded {} documents", documents.len());

        if documents.is_empty() {
            tracing::warn!("No documents loaded from {:?}; nothing to index", sources);
            return Ok(IndexReport {
                base_name: self.base_name.clone(),
                elapsed_secs: start.elapsed().as_secs_f64(),
                ..Default::default()
            });
        }

        let mut splits = self.splitter.split_documents(&documents);
        self.progress.split(splits.len() as u64, self.splitter.name());
        tracing::info!("Split into {} chunks", splits.len());

        if let Some(leaf_size) = self.hierarchical {
            let mut hierarchy = HierarchicalIndex::new();
            splits = hierarchy.build(&documents, leaf_size);
            tracing::info!("Hierarchical strategy produced {} nodes", splits.len());
            self.hierarchy = Some(hierarchy);
        }

        let store = self.open_store(reset).await?;
        let stored = store
            .add_documents_with_progress(&splits, &self.progress)
            .await?;
        let total = store.len()?;

        if self.store_kind.is_persistent() {
            self.save_base_config()?;
        }

        self.documents = documents;
        self.splits = splits;
        self.vector_store = Some(store);

        let report = IndexReport {
            base_name: self.base_name.clone(),
            documents: self.documents.len(),
            splits: self.splits.len(),
            stored,
            total,
            elapsed_secs: start.elapsed().as_secs_f64(),
        };
        tracing::info!(
            "Indexed {} documents into {} chunks ({} in index) in {:.2}s",
            report.documents,
            report.splits,
            report.total,
            report.elapsed_secs
        );
        Ok(report)
    }

    /// Open a previously persisted index. Splits are restored from the
    /// stored documents.
    pub async fn load_existing(&mut self) -> AppResult<&VectorStore> {
        if !self.store_kind.is_persistent() {
            return Err(AppError::Config(
                "The memory store cannot be reopened; index documents first".to_string(),
            ));
        }

        let Some(saved) = load_config(&self.workspace, &self.base_name)? else {
            return Err(AppError::Knowledge(format!(
                "Knowledge base '{}' has not been indexed yet",
                self.base_name
            )));
        };
        if IndexKind::parse(&saved.store) != self.store_kind {
            tracing::warn!(
                "Base '{}' was indexed with the {} store; opening it with {}",
                self.base_name,
                saved.store,
                self.store_kind.as_str()
            );
        }

        let store = self.open_store(false).await?;
        self.splits = store.documents()?;
        tracing::info!(
            "Loaded existing index '{}' with {} documents",
            self.base_name,
            self.splits.len()
        );

        Ok(self.vector_store.insert(store))
    }

    async fn open_store(&self, reset: bool) -> AppResult<VectorStore> {
        if self.store_kind.is_persistent() && !reset {
            if let Some(saved) = load_config(&self.workspace, &self.base_name)? {
                saved.embedding.validate_consistency(&self.embedding)?;
            }
        }

        let provider = create_provider(&self.embedding, self.api_key.as_deref()).await?;
        let index = open_index(self.store_kind, &self.persist_dir)?;
        let store = VectorStore::new(index, provider);

        if reset {
            tracing::info!("Resetting knowledge base '{}'", self.base_name);
            store.reset()?;
        }
        Ok(store)
    }

    fn save_base_config(&self) -> AppResult<()> {
        let mut config = match load_config(&self.workspace, &self.base_name)? {
            Some(existing) => existing,
            None => KnowledgeBaseConfig::new(
                &self.base_name,
                self.embedding.clone(),
                self.store_kind.as_str(),
            ),
        };
        config.embedding = self.embedding.clone();
        config.store = self.store_kind.as_str().to_string();
        config.splitter = self.splitter.name().to_string();
        config.updated_at = Utc::now();
        save_config(&self.workspace, &config)
    }

    pub fn vector_store(&self) -> AppResult<&VectorStore> {
        self.vector_store.as_ref().ok_or_else(|| {
            AppError::Knowledge(
                "Vector store not initialized; index documents or load an existing index first"
                    .to_string(),
            )
        })
    }

    /// Chunk documents, used by sparse retrievers.
    pub fn splits(&self) -> &[Document] {
        &self.splits
    }

    /// Documents loaded by the last indexing run.
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn hierarchy(&self) -> Option<&HierarchicalIndex> {
        self.hierarchy.as_ref()
    }

    pub fn summary(&self) -> Value {
        json!({
            "loader": self.loader.name(),
            "splitter": self.splitter.name(),
            "embedding": self.embedding.provider,
            "embedding_model": self.embedding.model,
            "store": self.store_kind.as_str(),
            "strategy": self.hierarchical.map(|_| "hierarchical"),
            "documents_count": self.documents.len(),
            "splits_count": self.splits.len(),
            "vectorstore_initialized": self.vector_store.is_some(),
            "config": self.params.to_value(),
        })
    }
}
