//! Rewrite command handler.
//!
//! Runs only the pre-retrieval stage so query transformations can be
//! inspected without an index.

use super::{build_llm, print_json};
use clap::Args;
use modrag_core::{config::AppConfig, AppResult, Params};
use modrag_rag::pre_retrieval::{PreRetrievalModule, PreRetrievalPipeline, DEFAULT_STRATEGY};
use modrag_rag::QueryOutput;
use serde_json::json;

/// Run pre-retrieval on a query and show the result
#[derive(Args, Debug)]
pub struct RewriteCommand {
    /// The query to transform
    pub query: String,

    /// Pre-retrieval strategy (overrides the configured pipeline)
    #[arg(short, long)]
    pub strategy: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl RewriteCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let llm = build_llm(config)?;

        let output = match self.strategy {
            // A single module keeps structured outputs intact
            Some(ref strategy) => {
                let module = PreRetrievalModule::new(&Params::new().with("strategy", strategy.as_str()), &llm);
                tracing::info!("Running pre-retrieval strategy {}", module.operator().name());
                module.process(&self.query).await?
            }
            None => {
                let mut pipeline = PreRetrievalPipeline::from_params(&config.pipeline.pre_retrieval, &llm);
                if pipeline.is_empty() {
                    pipeline.add_step(DEFAULT_STRATEGY, &Params::new(), &llm);
                }
                tracing::info!("Running {} pre-retrieval step(s)", pipeline.len());
                pipeline.process(&self.query).await?
            }
        };

        if self.json {
            print_json(&json!({
                "query": self.query,
                "kind": output.kind(),
                "output": output,
                "queries": output.queries(),
            }))?;
        } else {
            match output {
                QueryOutput::Structured(ref value) => {
                    println!("{}", serde_json::to_string_pretty(value)?)
                }
                _ => {
                    for query in output.queries() {
                        println!("{}", query);
                    }
                }
            }
        }

        Ok(())
    }
}
