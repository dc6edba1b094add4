//! Vector index abstraction.
//!
//! Backends store documents with their embeddings and answer top-k cosine
//! queries. Methods take `&self`; backends use interior mutability so an
//! index can be shared behind an `Arc`.

use crate::document::Document;
use crate::memory_index::MemoryIndex;
use crate::sqlite_index::SqliteIndex;
use modrag_core::{AppResult, Params};
use std::path::Path;
use std::sync::Arc;

/// File name of the SQLite backend inside the persist directory.
pub const SQLITE_FILE: &str = "index.sqlite";

/// File name of the JSON snapshot inside the persist directory.
pub const SNAPSHOT_FILE: &str = "index.json";

/// A search hit.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub document: Document,
    /// Cosine similarity in [-1, 1]
    pub score: f32,
    pub embedding: Vec<f32>,
}

/// Backend kind selected by `store.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Sqlite,
    Json,
    Memory,
}

impl IndexKind {
    /// Parse a store type. Unknown names fall back to SQLite.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "sqlite" | "chroma" => Self::Sqlite,
            "json" | "faiss" => Self::Json,
            "memory" => Self::Memory,
            other => {
                tracing::warn!("Unknown store type '{}', using sqlite", other);
                Self::Sqlite
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Json => "json",
            Self::Memory => "memory",
        }
    }

    /// Whether the backend survives the process.
    pub fn is_persistent(&self) -> bool {
        !matches!(self, Self::Memory)
    }
}

/// Trait for vector index backends.
pub trait VectorIndex: Send + Sync {
    fn kind(&self) -> IndexKind;

    /// Insert or replace a document with its embedding.
    fn upsert(&self, document: &Document, embedding: &[f32]) -> AppResult<()>;

    /// Top-k documents by descending cosine similarity.
    fn search(&self, query_embedding: &[f32], k: usize) -> AppResult<Vec<ScoredEntry>>;

    /// Every stored document in insertion order.
    fn documents(&self) -> AppResult<Vec<Document>>;

    fn count(&self) -> AppResult<usize>;

    /// Remove all documents.
    fn reset(&self) -> AppResult<()>;

    /// Commit pending changes (for backends that buffer writes).
    fn flush(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Build an index backend from the `store` parameter section.
pub fn create_index(params: &Params, persist_dir: &Path) -> AppResult<Arc<dyn VectorIndex>> {
    let kind = IndexKind::parse(&params.strategy_or("sqlite"));
    open_index(kind, persist_dir)
}

/// Open a backend of the given kind under `persist_dir`.
pub fn open_index(kind: IndexKind, persist_dir: &Path) -> AppResult<Arc<dyn VectorIndex>> {
    match kind {
        IndexKind::Sqlite => Ok(Arc::new(SqliteIndex::open(&persist_dir.join(SQLITE_FILE))?)),
        IndexKind::Json => Ok(Arc::new(MemoryIndex::with_snapshot(
            persist_dir.join(SNAPSHOT_FILE),
        )?)),
        IndexKind::Memory => Ok(Arc::new(MemoryIndex::new())),
    }
}

/// Cosine similarity; vectors of different length or zero norm score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Sort hits by descending score and keep the top `k`. Ties keep insertion order.
pub(crate) fn rank(mut entries: Vec<ScoredEntry>, k: usize) -> Vec<ScoredEntry> {
    entries.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    entries.truncate(k);
    entries
}
