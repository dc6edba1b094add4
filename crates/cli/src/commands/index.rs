//! Index command handler.
//!
//! Loads sources, splits them, embeds the chunks and stores them in the
//! active knowledge base.

use super::{index_module, print_json};
use clap::Args;
use modrag_core::{config::AppConfig, AppResult, Params};
use modrag_knowledge::ProgressReporter;
use std::sync::Arc;

/// Load, split, embed and store documents
#[derive(Args, Debug)]
pub struct IndexCommand {
    /// Files, directories or URLs to index
    #[arg(required = true)]
    pub sources: Vec<String>,

    /// Loader type (text, directory, web)
    #[arg(long)]
    pub loader: Option<String>,

    /// Splitter type (recursive, semantic, structure_aware, small_to_big)
    #[arg(long)]
    pub splitter: Option<String>,

    /// Vector store backend (sqlite, json, memory)
    #[arg(long)]
    pub store: Option<String>,

    /// Index strategy (hierarchical)
    #[arg(long)]
    pub strategy: Option<String>,

    /// Clear the knowledge base before indexing
    #[arg(long)]
    pub reset: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl IndexCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!(
            "Indexing {} source(s) into '{}'",
            self.sources.len(),
            config.base
        );

        let params = self.indexing_params(&config.pipeline.indexing);
        let mut module = index_module(config, &params)?;
        if !self.json {
            module = module.with_progress(ProgressReporter::new(Arc::new(|event| {
                eprintln!("{}", event.format_simple());
            })));
        }

        let report = module.index_documents(&self.sources, self.reset).await?;

        if self.json {
            print_json(&report)?;
        } else {
            println!(
                "Indexed {} documents into {} chunks ({} stored, {} total) in {:.2}s",
                report.documents, report.splits, report.stored, report.total, report.elapsed_secs
            );
        }

        Ok(())
    }

    /// Configured indexing settings with the command-line overrides applied.
    fn indexing_params(&self, base: &Params) -> Params {
        let mut params = base.clone();
        let overrides = [
            ("loader", &self.loader),
            ("splitter", &self.splitter),
            ("store", &self.store),
            ("strategy", &self.strategy),
        ];

        for (section, value) in overrides {
            let Some(value) = value else {
                continue;
            };
            let mut section_params = params.section(section);
            section_params.remove_strategy();
            section_params.set("type", value.as_str());
            params.set(section, section_params.to_value());
        }

        params
    }
}
