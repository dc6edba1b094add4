//! SQLite-backed vector index.
//!
//! Documents live in a single table; embeddings are stored as
//! little-endian f32 blobs and scored by brute-force cosine similarity.

use crate::document::Document;
use crate::vector_index::{cosine_similarity, rank, IndexKind, ScoredEntry, VectorIndex};
use modrag_core::{AppError, AppResult};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Vector index in a SQLite database file.
#[derive(Debug)]
pub struct SqliteIndex {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteIndex {
    /// Open (or create) the database and its table.
    pub fn open(db_path: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Knowledge(format!("Failed to create index directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| AppError::Knowledge(format!("Failed to open SQLite index: {}", e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL
            );
            "#,
        )
        .map_err(|e| AppError::Knowledge(format!("Failed to create tables: {}", e)))?;

        tracing::debug!("Opened SQLite index at {:?}", db_path);
        Ok(Self {
            conn: Mutex::new(conn),
            path: db_path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Knowledge("SQLite connection lock poisoned".to_string()))
    }

    /// Dimension of the stored vectors, if any are stored.
    fn stored_dimensions(conn: &Connection) -> AppResult<Option<usize>> {
        conn.query_row(
            "SELECT length(embedding) FROM documents LIMIT 1",
            [],
            |row| row.get::<_, i64>(0),
        )
        .optional()
        .map(|len| len.map(|bytes| bytes as usize / 4))
        .map_err(|e| AppError::Knowledge(format!("Failed to read index dimensions: {}", e)))
    }

    fn load_rows(conn: &Connection) -> AppResult<Vec<(Document, Vec<f32>)>> {
        let mut stmt = conn
            .prepare("SELECT id, content, metadata, embedding FROM documents ORDER BY rowid")
            .map_err(|e| AppError::Knowledge(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            })
            .map_err(|e| AppError::Knowledge(format!("Failed to query documents: {}", e)))?;

        let mut out = Vec::new();
        for row in rows {
            let (id, content, metadata_json, blob) =
                row.map_err(|e| AppError::Knowledge(format!("Failed to read row: {}", e)))?;
            let metadata: Map<String, Value> = serde_json::from_str(&metadata_json)?;
            let embedding = bytes_to_embedding(&blob)?;
            out.push((
                Document {
                    id,
                    content,
                    metadata,
                },
                embedding,
            ));
        }
        Ok(out)
    }
}

impl VectorIndex for SqliteIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Sqlite
    }

    fn upsert(&self, document: &Document, embedding: &[f32]) -> AppResult<()> {
        let conn = self.conn()?;

        if let Some(dims) = Self::stored_dimensions(&conn)? {
            if dims != embedding.len() {
                return Err(AppError::Knowledge(format!(
                    "Embedding dimension mismatch: index holds {}, got {}",
                    dims,
                    embedding.len()
                )));
            }
        }

        let metadata_json = serde_json::to_string(&document.metadata)?;
        conn.execute(
            "INSERT OR REPLACE INTO documents (id, content, metadata, embedding)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                document.id,
                document.content,
                metadata_json,
                embedding_to_bytes(embedding),
            ],
        )
        .map_err(|e| AppError::Knowledge(format!("Failed to insert document: {}", e)))?;

        Ok(())
    }

    fn search(&self, query_embedding: &[f32], k: usize) -> AppResult<Vec<ScoredEntry>> {
        let rows = Self::load_rows(&*self.conn()?)?;

        let hits = rows
            .into_iter()
            .map(|(document, embedding)| ScoredEntry {
                score: cosine_similarity(query_embedding, &embedding),
                document,
                embedding,
            })
            .collect();

        let results = rank(hits, k);
        tracing::debug!("Retrieved {} documents (requested top-{})", results.len(), k);
        Ok(results)
    }

    fn documents(&self) -> AppResult<Vec<Document>> {
        Ok(Self::load_rows(&*self.conn()?)?
            .into_iter()
            .map(|(document, _)| document)
            .collect())
    }

    fn count(&self) -> AppResult<usize> {
        self.conn()?
            .query_row("SELECT COUNT(*) FROM documents", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as usize)
            .map_err(|e| AppError::Knowledge(format!("Failed to count documents: {}", e)))
    }

    fn reset(&self) -> AppResult<()> {
        self.conn()?
            .execute("DELETE FROM documents", [])
            .map_err(|e| AppError::Knowledge(format!("Failed to delete documents: {}", e)))?;

        tracing::info!("Reset vector index at {:?}", self.path);
        Ok(())
    }
}

/// Convert an embedding vector to bytes for storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Convert stored bytes back to an embedding vector.
pub fn bytes_to_embedding(bytes: &[u8]) -> AppResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(AppError::Knowledge(
            "Invalid embedding bytes length".to_string(),
        ));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_embedding_bytes() {
        let embedding = vec![0.25, -1.5, 3.0];
        let bytes = embedding_to_bytes(&embedding);
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes_to_embedding(&bytes).unwrap(), embedding);
        assert!(bytes_to_embedding(&bytes[..5]).is_err());
    }

    #[test]
    fn test_upsert_search_and_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("base").join("index.sqlite");

        {
            let index = SqliteIndex::open(&path).unwrap();
            index
                .upsert(&Document::new("about cats").with_meta("source", "cats.md"), &[1.0, 0.0])
                .unwrap();
            index
                .upsert(&Document::new("about dogs"), &[0.0, 1.0])
                .unwrap();

            let hits = index.search(&[0.9, 0.1], 1).unwrap();
            assert_eq!(hits[0].document.content, "about cats");
            assert_eq!(hits[0].embedding, vec![1.0, 0.0]);
        }

        let reopened = SqliteIndex::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 2);
        let docs = reopened.documents().unwrap();
        assert_eq!(docs[0].content, "about cats");
        assert_eq!(docs[0].meta_str("source"), Some("cats.md"));
    }

    #[test]
    fn test_dimension_check_and_reset() {
        let temp = TempDir::new().unwrap();
        let index = SqliteIndex::open(&temp.path().join("index.sqlite")).unwrap();

        index.upsert(&Document::new("a"), &[1.0, 0.0, 0.0]).unwrap();
        assert!(index.upsert(&Document::new("b"), &[1.0]).is_err());

        index.reset().unwrap();
        assert_eq!(index.count().unwrap(), 0);
        assert!(index.upsert(&Document::new("b"), &[1.0]).is_ok());
    }
}
