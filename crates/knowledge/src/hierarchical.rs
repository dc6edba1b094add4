//! Hierarchical index strategy.
//!
//! Organises each document into a three-level tree (document, section,
//! chunk) and emits every node as a retrievable document that carries its
//! position in the tree.

use crate::document::Document;
use crate::text::{byte_offset, char_len, slice_chars, take_chars};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Default leaf chunk size in chars.
pub const DEFAULT_LEAF_SIZE: usize = 500;

/// Consecutive sections merge while their combined length stays below this.
const SECTION_MERGE_LIMIT: usize = 500;

const DOCUMENT_SUMMARY_LEN: usize = 200;
const SECTION_SUMMARY_LEN: usize = 100;

/// One node of the tree.
#[derive(Debug, Clone, Serialize)]
pub struct HierarchyNode {
    pub node_id: String,
    /// 0 = document, 1 = section, 2 = chunk
    pub level: u8,
    pub parent_id: Option<String>,
    pub children_ids: Vec<String>,
    pub content: String,
    pub summary: String,
    pub metadata: Map<String, Value>,
}

impl HierarchyNode {
    fn new(
        node_id: String,
        level: u8,
        parent_id: Option<String>,
        content: String,
        metadata: &Map<String, Value>,
    ) -> Self {
        Self {
            node_id,
            level,
            parent_id,
            children_ids: Vec::new(),
            content,
            summary: String::new(),
            metadata: metadata.clone(),
        }
    }

    /// Retrievable form: summary first when one exists.
    pub fn to_document(&self) -> Document {
        let content = if self.summary.is_empty() {
            self.content.clone()
        } else {
            format!("Summary: {}\n\nFull content: {}", self.summary, self.content)
        };

        Document::with_metadata(content, self.metadata.clone())
            .with_meta("node_id", self.node_id.clone())
            .with_meta(
                "parent_id",
                self.parent_id.clone().map(Value::String).unwrap_or(Value::Null),
            )
            .with_meta("level", self.level)
            .with_meta("children_ids", self.children_ids.clone())
            .with_meta("summary", self.summary.clone())
            .with_meta("hierarchical", true)
    }
}

/// Tree of document, section and chunk nodes.
#[derive(Debug, Clone, Default)]
pub struct HierarchicalIndex {
    nodes: HashMap<String, HierarchyNode>,
    roots: Vec<String>,
}

impl HierarchicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the tree and return its nodes as documents, ordered per
    /// document as: each section's chunks then the section, and the
    /// document node last.
    pub fn build(&mut self, documents: &[Document], chunk_size: usize) -> Vec<Document> {
        let chunk_size = chunk_size.max(1);
        let mut output = Vec::new();

        for (doc_idx, document) in documents.iter().enumerate() {
            let doc_id = format!("doc_{}", doc_idx);
            let mut doc_node = HierarchyNode::new(
                doc_id.clone(),
                0,
                None,
                document.content.clone(),
                &document.metadata,
            );
            doc_node.summary = summarize(&document.content, DOCUMENT_SUMMARY_LEN);

            for (sec_idx, section) in split_sections(&document.content).into_iter().enumerate() {
                let sec_id = format!("{}_sec_{}", doc_id, sec_idx);
                let mut sec_node = HierarchyNode::new(
                    sec_id.clone(),
                    1,
                    Some(doc_id.clone()),
                    section.clone(),
                    &document.metadata,
                );
                sec_node.summary = summarize(&section, SECTION_SUMMARY_LEN);

                for (chunk_idx, chunk) in split_windows(&section, chunk_size).into_iter().enumerate()
                {
                    let chunk_id = format!("{}_chunk_{}", sec_id, chunk_idx);
                    let chunk_node = HierarchyNode::new(
                        chunk_id.clone(),
                        2,
                        Some(sec_id.clone()),
                        chunk,
                        &document.metadata,
                    );
                    sec_node.children_ids.push(chunk_id.clone());
                    output.push(chunk_node.to_document());
                    self.nodes.insert(chunk_id, chunk_node);
                }

                doc_node.children_ids.push(sec_id.clone());
                output.push(sec_node.to_document());
                self.nodes.insert(sec_id, sec_node);
            }

            output.push(doc_node.to_document());
            self.nodes.insert(doc_id.clone(), doc_node);
            self.roots.push(doc_id);
        }

        tracing::info!(
            roots = self.roots.len(),
            nodes = self.nodes.len(),
            "Built hierarchical index with {} retrievable documents",
            output.len()
        );
        output
    }

    pub fn node(&self, node_id: &str) -> Option<&HierarchyNode> {
        self.nodes.get(node_id)
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Content of the parent node, empty for roots and unknown ids.
    pub fn parent_context(&self, node_id: &str) -> String {
        self.node(node_id)
            .and_then(|n| n.parent_id.as_deref())
            .and_then(|p| self.node(p))
            .map(|p| p.content.clone())
            .unwrap_or_default()
    }

    /// Every level from the root down to `node_id`.
    pub fn full_context(&self, node_id: &str) -> String {
        let mut contexts = Vec::new();
        let mut current = self.node(node_id);

        while let Some(node) = current {
            contexts.push(format!("[Level {}]\n{}", node.level, node.content));
            current = node.parent_id.as_deref().and_then(|p| self.node(p));
        }

        contexts.reverse();
        contexts.join("\n\n---\n\n")
    }
}

/// Paragraph sections, small neighbours merged.
fn split_sections(text: &str) -> Vec<String> {
    let paragraphs: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if paragraphs.is_empty() {
        return vec![text.to_string()];
    }

    let mut sections = Vec::new();
    let mut current = String::new();

    for paragraph in paragraphs {
        if char_len(&current) + char_len(paragraph) < SECTION_MERGE_LIMIT {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
        } else {
            if !current.is_empty() {
                sections.push(std::mem::take(&mut current));
            }
            current = paragraph.to_string();
        }
    }

    if !current.is_empty() {
        sections.push(current);
    }
    sections
}

/// Fixed char windows, whitespace-only windows skipped.
fn split_windows(text: &str, size: usize) -> Vec<String> {
    let total = char_len(text);
    let windows: Vec<String> = (0..total)
        .step_by(size)
        .map(|start| slice_chars(text, start, start + size))
        .filter(|w| !w.trim().is_empty())
        .map(str::to_string)
        .collect();

    if windows.is_empty() {
        vec![text.to_string()]
    } else {
        windows
    }
}

/// Leading text cut at a sentence end when one falls in the second half.
pub fn summarize(text: &str, max: usize) -> String {
    let text = text.trim();
    if char_len(text) <= max {
        return text.to_string();
    }

    let head = take_chars(text, max);
    let last_end = ["。", ". ", "! ", "? "]
        .iter()
        .filter_map(|p| head.rfind(p))
        .max();

    match last_end {
        Some(pos) if char_len(&head[..pos]) * 2 > max => {
            // keep the terminator's first char
            let cut = byte_offset(&head[pos..], 1) + pos;
            head[..cut].to_string()
        }
        _ => format!("{}...", head),
    }
}
