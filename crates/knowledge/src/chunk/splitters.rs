//! Splitter implementations.

use super::{check_overlap, stamp, Piece, SeparatorSplitter, Splitter};
use crate::document::Document;
use modrag_core::{AppError, AppResult, Params};
use text_splitter::{ChunkConfig, TextSplitter};

const SEMANTIC_SEPARATORS: [&str; 9] = ["\n\n", "\n", "。", "!", "?", ";", "；", ":", "："];

const STRUCTURE_SEPARATORS: [&str; 7] = ["\n# ", "\n## ", "\n### ", "\n\n", "\n", "。", ". "];

fn to_strings(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

enum Engine {
    /// Character-capacity splitting from the `text-splitter` crate
    Text(TextSplitter<text_splitter::Characters>),
    Separators(SeparatorSplitter),
}

impl Engine {
    fn text(chunk_size: usize, chunk_overlap: usize) -> AppResult<Self> {
        check_overlap(chunk_size, chunk_overlap)?;
        let config = ChunkConfig::new(chunk_size)
            .with_overlap(chunk_overlap)
            .map_err(|e| AppError::Config(format!("Invalid chunk configuration: {}", e)))?;
        Ok(Self::Text(TextSplitter::new(config)))
    }

    fn separators(chunk_size: usize, chunk_overlap: usize, separators: Vec<String>) -> AppResult<Self> {
        check_overlap(chunk_size, chunk_overlap)?;
        Ok(Self::Separators(SeparatorSplitter::new(
            chunk_size,
            chunk_overlap,
            separators,
        )))
    }

    fn split(&self, text: &str) -> Vec<Piece> {
        match self {
            Self::Text(splitter) => splitter
                .chunk_indices(text)
                .filter(|(_, chunk)| !chunk.trim().is_empty())
                .map(|(byte, chunk)| Piece {
                    start: text[..byte].chars().count(),
                    text: chunk.to_string(),
                })
                .collect(),
            Self::Separators(splitter) => splitter.split_with_offsets(text),
        }
    }
}

/// Sliding-window splitter (`chunk_size` 1000, `chunk_overlap` 200).
pub struct RecursiveSplitter {
    engine: Engine,
}

impl RecursiveSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> AppResult<Self> {
        Ok(Self {
            engine: Engine::text(chunk_size, chunk_overlap)?,
        })
    }

    pub fn from_params(params: &Params) -> AppResult<Self> {
        let chunk_size = params.usize_or("chunk_size", 1000);
        let chunk_overlap = params.usize_or("chunk_overlap", 200);

        let engine = match params.str_list("separators") {
            Some(separators) if !separators.is_empty() => {
                Engine::separators(chunk_size, chunk_overlap, separators)?
            }
            _ => Engine::text(chunk_size, chunk_overlap)?,
        };
        Ok(Self { engine })
    }
}

impl Splitter for RecursiveSplitter {
    fn name(&self) -> &str {
        "recursive"
    }

    fn split_text(&self, text: &str) -> Vec<Piece> {
        self.engine.split(text)
    }
}

/// Splits on paragraph and sentence boundaries.
pub struct SemanticSplitter {
    engine: SeparatorSplitter,
}

impl SemanticSplitter {
    pub fn from_params(params: &Params) -> AppResult<Self> {
        let chunk_size = params.usize_or("chunk_size", 1000);
        let chunk_overlap = params.usize_or("chunk_overlap", 100);
        check_overlap(chunk_size, chunk_overlap)?;

        Ok(Self {
            engine: SeparatorSplitter::new(
                chunk_size,
                chunk_overlap,
                to_strings(&SEMANTIC_SEPARATORS),
            ),
        })
    }
}

impl Splitter for SemanticSplitter {
    fn name(&self) -> &str {
        "semantic"
    }

    fn split_text(&self, text: &str) -> Vec<Piece> {
        self.engine.split_with_offsets(text)
    }
}

/// Prefers markdown headings, then paragraphs, then sentences.
pub struct StructureAwareSplitter {
    engine: SeparatorSplitter,
}

impl StructureAwareSplitter {
    pub fn from_params(params: &Params) -> AppResult<Self> {
        let chunk_size = params.usize_or("chunk_size", 1000);
        let chunk_overlap = params.usize_or("chunk_overlap", 100);
        check_overlap(chunk_size, chunk_overlap)?;

        Ok(Self {
            engine: SeparatorSplitter::new(
                chunk_size,
                chunk_overlap,
                to_strings(&STRUCTURE_SEPARATORS),
            ),
        })
    }
}

/// Classify a chunk by its leading markdown heading marker.
pub fn chunk_type(content: &str) -> &'static str {
    let trimmed = content.trim();
    if trimmed.starts_with("# ") {
        "heading_1"
    } else if trimmed.starts_with("## ") {
        "heading_2"
    } else if trimmed.starts_with("### ") {
        "heading_3"
    } else {
        "paragraph"
    }
}

impl Splitter for StructureAwareSplitter {
    fn name(&self) -> &str {
        "structure_aware"
    }

    fn split_text(&self, text: &str) -> Vec<Piece> {
        self.engine.split_with_offsets(text)
    }

    fn annotate(&self, chunk: &mut Document) {
        let kind = chunk_type(&chunk.content);
        chunk.set_meta("chunk_type", kind);
    }
}

/// Retrieves on small chunks while keeping their big parent chunk.
pub struct SmallToBigSplitter {
    big: Engine,
    small: Engine,
}

impl SmallToBigSplitter {
    pub fn from_params(params: &Params) -> AppResult<Self> {
        Ok(Self {
            big: Engine::text(
                params.usize_or("big_chunk_size", 2000),
                params.usize_or("big_chunk_overlap", 200),
            )?,
            small: Engine::text(
                params.usize_or("small_chunk_size", 400),
                params.usize_or("small_chunk_overlap", 50),
            )?,
        })
    }
}

impl Splitter for SmallToBigSplitter {
    fn name(&self) -> &str {
        "small_to_big"
    }

    /// Small pieces only, offsets relative to the source text.
    fn split_text(&self, text: &str) -> Vec<Piece> {
        self.big
            .split(text)
            .into_iter()
            .flat_map(|big| {
                self.small
                    .split(&big.text)
                    .into_iter()
                    .map(move |small| Piece {
                        start: big.start + small.start,
                        text: small.text,
                    })
            })
            .collect()
    }

    fn split_documents(&self, documents: &[Document]) -> Vec<Document> {
        let mut small_chunks = Vec::new();
        let mut big_id = 0usize;

        for document in documents {
            for big in self.big.split(&document.content) {
                let big_size = big.text.chars().count();

                for (small_id, small) in self.small.split(&big.text).into_iter().enumerate() {
                    let piece = Piece {
                        start: big.start + small.start,
                        text: small.text,
                    };
                    let chunk = stamp(
                        document,
                        piece,
                        format!("{}_{}", big_id, small_id),
                        self.name(),
                    )
                    .with_meta("parent_chunk_id", big_id)
                    .with_meta("parent_chunk_content", big.text.clone())
                    .with_meta("parent_chunk_size", big_size)
                    .with_meta("is_small_chunk", true);

                    small_chunks.push(chunk);
                }
                big_id += 1;
            }
        }

        tracing::info!(
            "Small-to-big split produced {} parent chunks and {} small chunks",
            big_id,
            small_chunks.len()
        );
        small_chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_text() -> String {
        (0..40)
            .map(|i| format!("Sentence number {} talks about retrieval.", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_recursive_text_splitter_respects_size() {
        let splitter = RecursiveSplitter::new(120, 20).unwrap();
        let text = long_text();
        let pieces = splitter.split_text(&text);

        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(piece.text.chars().count() <= 120);
            let located: String = text
                .chars()
                .skip(piece.start)
                .take(piece.text.chars().count())
                .collect();
            assert_eq!(located, piece.text);
        }
    }

    #[test]
    fn test_recursive_with_custom_separators() {
        let params = Params::new()
            .with("chunk_size", 30)
            .with("chunk_overlap", 0)
            .with("separators", serde_json::json!(["|"]));
        let splitter = RecursiveSplitter::from_params(&params).unwrap();
        let pieces = splitter.split_text("first part|second part|third part here");

        assert_eq!(pieces[0].text, "first part|second part");
        assert_eq!(pieces[1].text, "|third part here");
    }

    #[test]
    fn test_semantic_splits_on_chinese_sentences() {
        let params = Params::new()
            .with("chunk_size", 12)
            .with("chunk_overlap", 0);
        let splitter = SemanticSplitter::from_params(&params).unwrap();
        let docs = vec![Document::new("模块化检索增强生成。每个阶段都可替换。索引负责分块")];
        let chunks = splitter.split_documents(&docs);

        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.metadata["splitter_type"] == "semantic"));
    }

    #[test]
    fn test_structure_aware_chunk_types() {
        assert_eq!(chunk_type("  # Title"), "heading_1");
        assert_eq!(chunk_type("## Section"), "heading_2");
        assert_eq!(chunk_type("### Sub"), "heading_3");
        assert_eq!(chunk_type("#hashtag"), "paragraph");

        let params = Params::new()
            .with("chunk_size", 40)
            .with("chunk_overlap", 0);
        let splitter = StructureAwareSplitter::from_params(&params).unwrap();
        let text = "# Modular RAG\nIntro line.\n## Indexing\nLoaders and splitters live here.";
        let chunks = splitter.split_documents(&[Document::new(text)]);

        assert_eq!(chunks[0].meta_str("chunk_type"), Some("heading_1"));
        assert!(chunks
            .iter()
            .any(|c| c.meta_str("chunk_type") == Some("heading_2")));
    }

    #[test]
    fn test_small_to_big_parent_links() {
        let params = Params::new()
            .with("big_chunk_size", 300)
            .with("big_chunk_overlap", 0)
            .with("small_chunk_size", 100)
            .with("small_chunk_overlap", 0);
        let splitter = SmallToBigSplitter::from_params(&params).unwrap();
        let chunks = splitter.split_documents(&[Document::new(long_text())]);

        assert!(chunks.len() > 3);
        assert_eq!(chunks[0].meta_str("chunk_id"), Some("0_0"));
        for chunk in &chunks {
            assert_eq!(chunk.metadata["is_small_chunk"], true);
            let parent = chunk.meta_str("parent_chunk_content").unwrap();
            assert!(parent.contains(&chunk.content));
            assert!(chunk.metadata["parent_chunk_size"].as_u64().unwrap() <= 300);
        }
        assert!(chunks
            .iter()
            .any(|c| c.metadata["parent_chunk_id"] == 1));
    }
}
