//! Answer post-processing: formatting, citations and LLM rewrites.

use crate::llm::StageLlm;
use crate::types::SNIPPET_CHARS;
use async_trait::async_trait;
use modrag_core::{AppResult, Params};
use modrag_knowledge::text::{char_len, truncate_with_ellipsis};
use modrag_knowledge::Document;
use serde_json::json;

#[async_trait]
pub trait PostProcessor: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(&self, query: &str, answer: &str, context: &[Document]) -> AppResult<String>;
}

fn source_label(document: &Document) -> String {
    document.source().unwrap_or_else(|| "unknown".to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatType {
    Markdown,
    Json,
    Structured,
    Plain,
}

impl FormatType {
    pub fn parse(name: &str) -> Self {
        match name {
            "markdown" => Self::Markdown,
            "json" => Self::Json,
            "structured" => Self::Structured,
            _ => Self::Plain,
        }
    }
}

pub struct FormatProcessor {
    format: FormatType,
    add_metadata: bool,
}

impl FormatProcessor {
    pub fn new(params: &Params) -> Self {
        Self {
            format: FormatType::parse(&params.str_or("format_type", "markdown")),
            add_metadata: params.bool_or("add_metadata", true),
        }
    }

    fn markdown(&self, query: &str, answer: &str, context: &[Document]) -> String {
        let mut text = format!("# Question\n\n{}\n\n## Answer\n\n{}\n\n", query, answer);
        if self.add_metadata && !context.is_empty() {
            text.push_str("## Sources\n\n");
            for (i, document) in context.iter().take(3).enumerate() {
                text.push_str(&format!("{}. {}\n", i + 1, source_label(document)));
            }
        }
        text
    }

    fn json(query: &str, answer: &str, context: &[Document]) -> AppResult<String> {
        let sources: Vec<_> = context
            .iter()
            .enumerate()
            .map(|(i, document)| {
                json!({
                    "index": i + 1,
                    "source": source_label(document),
                    "content": truncate_with_ellipsis(&document.content, SNIPPET_CHARS),
                })
            })
            .collect();
        Ok(serde_json::to_string_pretty(&json!({
            "query": query,
            "answer": answer,
            "sources": sources,
        }))?)
    }

    fn structured(&self, query: &str, answer: &str, context: &[Document]) -> String {
        let heavy = "=".repeat(60);
        let light = "-".repeat(60);
        let mut text = format!(
            "{heavy}\nQuestion: {query}\n{light}\nAnswer:\n{answer}\n",
            heavy = heavy,
            light = light,
            query = query,
            answer = answer
        );
        if self.add_metadata && !context.is_empty() {
            text.push_str(&format!("{}\nSources:\n", light));
            for (i, document) in context.iter().enumerate() {
                text.push_str(&format!("{}. {}\n", i + 1, source_label(document)));
            }
        }
        text.push_str(&heavy);
        text
    }
}

#[async_trait]
impl PostProcessor for FormatProcessor {
    fn name(&self) -> &str {
        "format"
    }

    async fn apply(&self, query: &str, answer: &str, context: &[Document]) -> AppResult<String> {
        match self.format {
            FormatType::Markdown => Ok(self.markdown(query, answer, context)),
            FormatType::Json => Self::json(query, answer, context),
            FormatType::Structured => Ok(self.structured(query, answer, context)),
            FormatType::Plain => Ok(answer.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CitationStyle {
    Numbered,
    Inline,
    Footnote,
}

impl CitationStyle {
    pub fn parse(name: &str) -> Self {
        match name {
            "inline" => Self::Inline,
            "footnote" => Self::Footnote,
            _ => Self::Numbered,
        }
    }
}

pub struct CitationProcessor {
    llm: StageLlm,
    params: Params,
    style: CitationStyle,
    smart: bool,
}

impl CitationProcessor {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            llm,
            style: CitationStyle::parse(&params.str_or("citation_style", "numbered")),
            smart: params.bool_or("smart", false),
            params: params.clone(),
        }
    }

    fn footnotes(context: &[Document]) -> String {
        context
            .iter()
            .enumerate()
            .map(|(i, document)| format!("[^{}]: {}", i + 1, source_label(document)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn simple(&self, answer: &str, context: &[Document]) -> String {
        if context.is_empty() {
            return answer.to_string();
        }

        match self.style {
            CitationStyle::Numbered => {
                let lines: Vec<String> = context
                    .iter()
                    .enumerate()
                    .map(|(i, document)| format!("[{}] {}", i + 1, source_label(document)))
                    .collect();
                format!("{}\n\nSources:\n{}", answer, lines.join("\n"))
            }
            CitationStyle::Inline => {
                let labels: Vec<String> = context.iter().map(source_label).collect();
                format!("{} (Sources: {})", answer, labels.join(", "))
            }
            CitationStyle::Footnote => format!("{}\n\n{}", answer, Self::footnotes(context)),
        }
    }

    async fn smart(&self, answer: &str, context: &[Document]) -> AppResult<String> {
        let sources = context
            .iter()
            .enumerate()
            .map(|(i, document)| {
                format!(
                    "[{}] {}: {}",
                    i + 1,
                    source_label(document),
                    truncate_with_ellipsis(&document.content, SNIPPET_CHARS)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let marked = self
            .llm
            .ask(
                "answer.citation",
                &json!({"answer": answer, "sources": sources}),
                &self.params,
                0.1,
            )
            .await?;

        Ok(match self.style {
            CitationStyle::Footnote => format!("{}\n\n{}", marked, Self::footnotes(context)),
            _ => marked,
        })
    }
}

#[async_trait]
impl PostProcessor for CitationProcessor {
    fn name(&self) -> &str {
        "citation"
    }

    async fn apply(&self, _query: &str, answer: &str, context: &[Document]) -> AppResult<String> {
        if self.smart && !context.is_empty() {
            match self.smart(answer, context).await {
                Ok(marked) => return Ok(marked),
                Err(e) => tracing::warn!("Smart citation failed, using simple citations: {}", e),
            }
        }
        Ok(self.simple(answer, context))
    }
}

pub struct RefineProcessor {
    llm: StageLlm,
    params: Params,
    goals: Vec<String>,
}

impl RefineProcessor {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            llm,
            goals: params
                .str_list("goals")
                .unwrap_or_else(|| vec!["clarity".to_string()]),
            params: params.clone(),
        }
    }

    /// "clearer and more concise" style phrase for the prompt.
    pub fn goal_phrase(&self) -> String {
        let phrases: Vec<&str> = self
            .goals
            .iter()
            .filter_map(|goal| match goal.as_str() {
                "clarity" => Some("clearer"),
                "conciseness" => Some("more concise"),
                "completeness" => Some("more complete"),
                _ => None,
            })
            .collect();
        if phrases.is_empty() {
            "clearer".to_string()
        } else {
            phrases.join(" and ")
        }
    }
}

#[async_trait]
impl PostProcessor for RefineProcessor {
    fn name(&self) -> &str {
        "refine"
    }

    async fn apply(&self, query: &str, answer: &str, _context: &[Document]) -> AppResult<String> {
        let variables = json!({"goals": self.goal_phrase(), "query": query, "answer": answer});
        match self.llm.ask("answer.refine", &variables, &self.params, 0.3).await {
            Ok(refined) if !refined.is_empty() => Ok(refined),
            Ok(_) => Ok(answer.to_string()),
            Err(e) => {
                tracing::warn!("Refinement failed: {}", e);
                Ok(answer.to_string())
            }
        }
    }
}

pub struct SummaryProcessor {
    llm: StageLlm,
    params: Params,
    word_limit: usize,
}

impl SummaryProcessor {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        let word_limit = match params.str_or("summary_length", "medium").as_str() {
            "short" => 50,
            "long" => 200,
            _ => 100,
        };
        Self {
            llm,
            params: params.clone(),
            word_limit,
        }
    }
}

#[async_trait]
impl PostProcessor for SummaryProcessor {
    fn name(&self) -> &str {
        "summary"
    }

    async fn apply(&self, query: &str, answer: &str, _context: &[Document]) -> AppResult<String> {
        if char_len(answer) < 200 {
            return Ok(answer.to_string());
        }

        let variables = json!({"word_limit": self.word_limit, "query": query, "answer": answer});
        match self.llm.ask("answer.summary", &variables, &self.params, 0.3).await {
            Ok(summary) => Ok(format!(
                "**Summary:**\n{}\n\n---\n\n**Full answer:**\n{}",
                summary, answer
            )),
            Err(e) => {
                tracing::warn!("Summary failed: {}", e);
                Ok(answer.to_string())
            }
        }
    }
}

pub struct StructuredProcessor {
    llm: StageLlm,
    params: Params,
    structure_type: String,
}

impl StructuredProcessor {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            llm,
            structure_type: params.str_or("structure_type", "bullet"),
            params: params.clone(),
        }
    }

    pub fn instruction(&self) -> &'static str {
        match self.structure_type.as_str() {
            "numbered" => "Reorganise the following answer as a numbered list",
            "table" => "Reorganise the following answer as a markdown table",
            _ => "Reorganise the following answer as a bulleted list",
        }
    }
}

#[async_trait]
impl PostProcessor for StructuredProcessor {
    fn name(&self) -> &str {
        "structured"
    }

    async fn apply(&self, _query: &str, answer: &str, _context: &[Document]) -> AppResult<String> {
        let variables = json!({"instruction": self.instruction(), "answer": answer});
        match self.llm.ask("answer.structured", &variables, &self.params, 0.3).await {
            Ok(structured) => Ok(structured),
            Err(e) => {
                tracing::warn!("Restructuring failed: {}", e);
                Ok(answer.to_string())
            }
        }
    }
}

/// `None` for unknown types, which the caller skips.
pub fn create_postprocessor(
    kind: &str,
    params: &Params,
    llm: &StageLlm,
) -> Option<Box<dyn PostProcessor>> {
    let llm = llm.clone();
    let processor: Box<dyn PostProcessor> = match kind {
        "format" => Box::new(FormatProcessor::new(params)),
        "citation" => Box::new(CitationProcessor::new(llm, params)),
        "refine" => Box::new(RefineProcessor::new(llm, params)),
        "summary" => Box::new(SummaryProcessor::new(llm, params)),
        "structured" => Box::new(StructuredProcessor::new(llm, params)),
        other => {
            tracing::warn!("Unknown postprocess type '{}' ignored", other);
            return None;
        }
    };
    Some(processor)
}
