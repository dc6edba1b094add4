//! Document splitters.
//!
//! Every splitter turns documents into chunk documents. Chunks get a fresh
//! id, inherit the parent metadata and are stamped with:
//! - `chunk_id`: running index across the whole call
//! - `chunk_size`: chunk length in chars
//! - `splitter_type`: the splitter name
//! - `start_index`: char offset of the chunk inside its parent

mod separator;
mod splitters;

pub use separator::SeparatorSplitter;
pub use splitters::{
    RecursiveSplitter, SemanticSplitter, SmallToBigSplitter, StructureAwareSplitter,
};

use crate::document::Document;
use crate::text::char_len;
use modrag_core::{AppError, AppResult, Params};

/// A chunk of text with its char offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Piece {
    pub start: usize,
    pub text: String,
}

/// Trait for document splitters.
pub trait Splitter: Send + Sync {
    /// Splitter name, stored in `splitter_type`.
    fn name(&self) -> &str;

    /// Split raw text into pieces.
    fn split_text(&self, text: &str) -> Vec<Piece>;

    /// Add splitter-specific metadata to a stamped chunk.
    fn annotate(&self, _chunk: &mut Document) {}

    /// Split documents into stamped chunk documents.
    fn split_documents(&self, documents: &[Document]) -> Vec<Document> {
        let mut chunks = Vec::new();
        for document in documents {
            for piece in self.split_text(&document.content) {
                let mut chunk = stamp(document, piece, chunks.len(), self.name());
                self.annotate(&mut chunk);
                chunks.push(chunk);
            }
        }

        tracing::debug!(
            splitter = self.name(),
            "Split {} documents into {} chunks",
            documents.len(),
            chunks.len()
        );
        chunks
    }
}

/// Build a chunk document from a parent and a piece.
pub(crate) fn stamp(
    parent: &Document,
    piece: Piece,
    chunk_id: impl Into<serde_json::Value>,
    splitter: &str,
) -> Document {
    let size = char_len(&piece.text);
    Document::with_metadata(piece.text, parent.metadata.clone())
        .with_meta("chunk_id", chunk_id)
        .with_meta("chunk_size", size)
        .with_meta("splitter_type", splitter)
        .with_meta("start_index", piece.start)
}

pub(crate) fn check_overlap(chunk_size: usize, chunk_overlap: usize) -> AppResult<()> {
    if chunk_size == 0 {
        return Err(AppError::Config("chunk_size must be positive".to_string()));
    }
    if chunk_overlap >= chunk_size {
        return Err(AppError::Config(format!(
            "chunk_overlap ({}) must be smaller than chunk_size ({})",
            chunk_overlap, chunk_size
        )));
    }
    Ok(())
}

/// Build a splitter from the `splitter` parameter section.
pub fn create_splitter(params: &Params) -> AppResult<Box<dyn Splitter>> {
    match params.strategy_or("recursive").as_str() {
        "recursive" => Ok(Box::new(RecursiveSplitter::from_params(params)?)),
        "semantic" => Ok(Box::new(SemanticSplitter::from_params(params)?)),
        "structure_aware" => Ok(Box::new(StructureAwareSplitter::from_params(params)?)),
        "small_to_big" => Ok(Box::new(SmallToBigSplitter::from_params(params)?)),
        other => {
            tracing::warn!("Unknown splitter type '{}', using recursive splitter", other);
            Ok(Box::new(RecursiveSplitter::from_params(params)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_splitter_fallback() {
        let splitter = create_splitter(&Params::new().with("type", "sentence")).unwrap();
        assert_eq!(splitter.name(), "recursive");

        let splitter = create_splitter(&Params::new().with("type", "small_to_big")).unwrap();
        assert_eq!(splitter.name(), "small_to_big");
    }

    #[test]
    fn test_overlap_must_be_smaller() {
        let params = Params::new()
            .with("chunk_size", 100)
            .with("chunk_overlap", 100);
        assert!(matches!(
            create_splitter(&params),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_chunk_ids_run_across_documents() {
        let params = Params::new()
            .with("chunk_size", 20)
            .with("chunk_overlap", 0);
        let splitter = create_splitter(&params).unwrap();

        let docs = vec![
            Document::new("First document has some words in it.").with_meta("source", "a.txt"),
            Document::new("Second one too, a few more words here.").with_meta("source", "b.txt"),
        ];
        let chunks = splitter.split_documents(&docs);

        assert!(chunks.len() >= 4);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.metadata["chunk_id"], i);
            assert_eq!(chunk.metadata["splitter_type"], "recursive");
            assert!(chunk.meta_str("source").is_some());
            assert_ne!(chunk.id, docs[0].id);
        }
        assert_eq!(chunks.last().unwrap().meta_str("source"), Some("b.txt"));
    }
}
