//! The document type shared by every stage.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// A piece of text with free-form metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier (UUID v4)
    pub id: String,

    /// Text content
    pub content: String,

    /// Metadata (source, filename, chunk info, scores ...)
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    /// Create a document with a fresh id and no metadata.
    pub fn new(content: impl Into<String>) -> Self {
        Self::with_metadata(content, Map::new())
    }

    pub fn with_metadata(content: impl Into<String>, metadata: Map<String, Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            metadata,
        }
    }

    /// Builder-style metadata insert.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn meta_f32(&self, key: &str) -> Option<f32> {
        self.metadata.get(key).and_then(Value::as_f64).map(|v| v as f32)
    }

    /// Where the document came from: `source`, else `filename`.
    pub fn source(&self) -> Option<String> {
        self.metadata
            .get("source")
            .or_else(|| self.metadata.get("filename"))
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
    }

    /// Content length in chars.
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }

    /// SHA-256 hex digest of the content.
    pub fn fingerprint(&self) -> String {
        calculate_hash(&self.content)
    }
}

/// Calculate SHA-256 hash of text.
pub fn calculate_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Drop documents whose content was already seen, keeping first occurrences.
pub fn dedup_by_content(documents: Vec<Document>) -> Vec<Document> {
    let mut seen = HashSet::new();
    documents
        .into_iter()
        .filter(|doc| seen.insert(doc.fingerprint()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_hash() {
        let hash = calculate_hash("Hello, world!");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, calculate_hash("Hello, world!"));
        assert_ne!(hash, calculate_hash("Different text"));
    }

    #[test]
    fn test_source_falls_back_to_filename() {
        let doc = Document::new("x").with_meta("filename", "notes.md");
        assert_eq!(doc.source().as_deref(), Some("notes.md"));

        let doc = doc.with_meta("source", "/docs/notes.md");
        assert_eq!(doc.source().as_deref(), Some("/docs/notes.md"));

        assert!(Document::new("y").source().is_none());
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let docs = vec![
            Document::new("alpha").with_meta("rank", 1),
            Document::new("beta"),
            Document::new("alpha").with_meta("rank", 3),
        ];

        let unique = dedup_by_content(docs);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].metadata["rank"], 1);
        assert_eq!(unique[1].content, "beta");
    }

    #[test]
    fn test_char_len_counts_scalars() {
        assert_eq!(Document::new("检索增强").char_len(), 4);
    }

    #[test]
    fn test_fresh_ids() {
        assert_ne!(Document::new("a").id, Document::new("a").id);
    }
}
