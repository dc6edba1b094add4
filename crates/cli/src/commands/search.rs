//! Search command handler.
//!
//! Runs retrieval and post-retrieval against the active knowledge base and
//! prints the selected documents.

use super::{build_llm, open_sources, print_json};
use clap::Args;
use modrag_core::{config::AppConfig, AppResult, Params};
use modrag_knowledge::text::truncate_with_ellipsis;
use modrag_knowledge::Document;
use modrag_rag::{PostRetrievalPipeline, RetrievalPipeline};
use serde_json::json;

/// Retrieve and post-process documents for a query
#[derive(Args, Debug)]
pub struct SearchCommand {
    /// The search query
    pub query: String,

    /// Retrieval strategy (overrides the configured stages)
    #[arg(short, long)]
    pub strategy: Option<String>,

    /// Number of documents per retriever
    #[arg(short)]
    pub k: Option<usize>,

    /// Post-retrieval strategies applied in order (overrides the config)
    #[arg(long = "post", value_delimiter = ',')]
    pub post: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl SearchCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let sources = open_sources(config).await?;
        let llm = build_llm(config)?;

        let retrieval = RetrievalPipeline::from_params(&self.retrieval_stages(&config.pipeline.retrieval), &sources)?;

        let post_retrieval = if self.post.is_empty() {
            PostRetrievalPipeline::from_params(&config.pipeline.post_retrieval, &llm)
        } else {
            let mut pipeline = PostRetrievalPipeline::new();
            for strategy in &self.post {
                pipeline.add_step(strategy, &Params::new(), &llm);
            }
            pipeline
        };

        let retrieved = retrieval.retrieve(&self.query).await?;
        let retrieved_count = retrieved.len();
        let documents = post_retrieval.process(retrieved, Some(&self.query)).await?;
        tracing::info!(
            "{} documents retrieved, {} after post-retrieval",
            retrieved_count,
            documents.len()
        );

        if self.json {
            print_json(&json!({
                "query": self.query,
                "retrieved": retrieved_count,
                "documents": documents,
            }))?;
        } else if documents.is_empty() {
            println!("No documents found for \"{}\"", self.query);
        } else {
            for (i, document) in documents.iter().enumerate() {
                println!("{}", format_hit(i + 1, document));
            }
        }

        Ok(())
    }

    /// Configured stages, or a single stage for `--strategy`; `-k` applies
    /// to every stage.
    fn retrieval_stages(&self, configured: &[Params]) -> Vec<Params> {
        let mut stages = match self.strategy {
            Some(ref strategy) => vec![Params::new().with("strategy", strategy.as_str())],
            None => configured.to_vec(),
        };
        if let Some(k) = self.k {
            if stages.is_empty() {
                stages.push(Params::new().with("strategy", "dense"));
            }
            for stage in &mut stages {
                stage.set("k", k);
            }
        }
        stages
    }
}

fn format_hit(index: usize, document: &Document) -> String {
    let source = document.source().unwrap_or_else(|| "unknown".to_string());
    let score = document
        .meta_f32("score")
        .map(|s| format!(" (score {:.3})", s))
        .unwrap_or_default();
    format!(
        "[{}] {}{}\n    {}",
        index,
        source,
        score,
        truncate_with_ellipsis(&document.content.replace('\n', " "), 200)
    )
}
