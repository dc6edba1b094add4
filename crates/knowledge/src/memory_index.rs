//! In-memory vector index with an optional JSON snapshot.

use crate::document::Document;
use crate::vector_index::{cosine_similarity, rank, IndexKind, ScoredEntry, VectorIndex};
use modrag_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    document: Document,
    embedding: Vec<f32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    dimensions: Option<usize>,
    entries: Vec<Entry>,
}

/// Brute-force cosine search over vectors held in memory.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    state: RwLock<Snapshot>,
    /// Written on `flush`, read on open
    snapshot_path: Option<PathBuf>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an index persisted as a JSON snapshot. A missing file gives an
    /// empty index.
    pub fn with_snapshot(path: PathBuf) -> AppResult<Self> {
        let state = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                AppError::Knowledge(format!("Failed to read snapshot {:?}: {}", path, e))
            })?;
            let snapshot: Snapshot = serde_json::from_str(&content)?;
            tracing::debug!("Loaded {} vectors from {:?}", snapshot.entries.len(), path);
            snapshot
        } else {
            Snapshot::default()
        };

        Ok(Self {
            state: RwLock::new(state),
            snapshot_path: Some(path),
        })
    }

    fn read(&self) -> AppResult<std::sync::RwLockReadGuard<'_, Snapshot>> {
        self.state
            .read()
            .map_err(|_| AppError::Knowledge("Vector index lock poisoned".to_string()))
    }

    fn write(&self) -> AppResult<std::sync::RwLockWriteGuard<'_, Snapshot>> {
        self.state
            .write()
            .map_err(|_| AppError::Knowledge("Vector index lock poisoned".to_string()))
    }
}

impl VectorIndex for MemoryIndex {
    fn kind(&self) -> IndexKind {
        if self.snapshot_path.is_some() {
            IndexKind::Json
        } else {
            IndexKind::Memory
        }
    }

    fn upsert(&self, document: &Document, embedding: &[f32]) -> AppResult<()> {
        let mut state = self.write()?;

        match state.dimensions {
            Some(dims) if dims != embedding.len() => {
                return Err(AppError::Knowledge(format!(
                    "Embedding dimension mismatch: index holds {}, got {}",
                    dims,
                    embedding.len()
                )));
            }
            Some(_) => {}
            None => state.dimensions = Some(embedding.len()),
        }

        let entry = Entry {
            document: document.clone(),
            embedding: embedding.to_vec(),
        };
        match state
            .entries
            .iter_mut()
            .find(|e| e.document.id == document.id)
        {
            Some(existing) => *existing = entry,
            None => state.entries.push(entry),
        }
        Ok(())
    }

    fn search(&self, query_embedding: &[f32], k: usize) -> AppResult<Vec<ScoredEntry>> {
        let state = self.read()?;
        let hits = state
            .entries
            .iter()
            .map(|e| ScoredEntry {
                document: e.document.clone(),
                score: cosine_similarity(query_embedding, &e.embedding),
                embedding: e.embedding.clone(),
            })
            .collect();
        Ok(rank(hits, k))
    }

    fn documents(&self) -> AppResult<Vec<Document>> {
        Ok(self
            .read()?
            .entries
            .iter()
            .map(|e| e.document.clone())
            .collect())
    }

    fn count(&self) -> AppResult<usize> {
        Ok(self.read()?.entries.len())
    }

    fn reset(&self) -> AppResult<()> {
        let mut state = self.write()?;
        state.entries.clear();
        state.dimensions = None;
        Ok(())
    }

    fn flush(&self) -> AppResult<()> {
        let Some(ref path) = self.snapshot_path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(&*self.read()?)?;
        std::fs::write(path, json).map_err(|e| {
            AppError::Knowledge(format!("Failed to write snapshot {:?}: {}", path, e))
        })?;

        tracing::debug!("Wrote vector snapshot to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_search_orders_by_score() {
        let index = MemoryIndex::new();
        index.upsert(&Document::new("east"), &[1.0, 0.0]).unwrap();
        index.upsert(&Document::new("north"), &[0.0, 1.0]).unwrap();
        index.upsert(&Document::new("north-east"), &[0.7, 0.7]).unwrap();

        let hits = index.search(&[1.0, 0.1], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.content, "east");
        assert_eq!(hits[1].document.content, "north-east");
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_upsert_replaces_same_id() {
        let index = MemoryIndex::new();
        let mut doc = Document::new("v1");
        index.upsert(&doc, &[1.0]).unwrap();
        doc.content = "v2".to_string();
        index.upsert(&doc, &[1.0]).unwrap();

        assert_eq!(index.count().unwrap(), 1);
        assert_eq!(index.documents().unwrap()[0].content, "v2");
    }

    #[test]
    fn test_dimension_mismatch() {
        let index = MemoryIndex::new();
        index.upsert(&Document::new("a"), &[1.0, 0.0]).unwrap();
        assert!(index.upsert(&Document::new("b"), &[1.0]).is_err());

        index.reset().unwrap();
        assert!(index.upsert(&Document::new("b"), &[1.0]).is_ok());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kb").join("index.json");

        let index = MemoryIndex::with_snapshot(path.clone()).unwrap();
        assert_eq!(index.kind(), IndexKind::Json);
        index
            .upsert(&Document::new("persisted").with_meta("source", "a.md"), &[0.5, 0.5])
            .unwrap();
        index.flush().unwrap();

        let reopened = MemoryIndex::with_snapshot(path).unwrap();
        let docs = reopened.documents().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].meta_str("source"), Some("a.md"));
        assert!(reopened.upsert(&Document::new("x"), &[1.0]).is_err());
    }
}
