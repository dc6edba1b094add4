//! Ask command handler.
//!
//! Answers a question with the full configured pipeline, streaming the
//! answer to stdout unless `--no-stream` or `--json` is given.

use super::{build_llm, open_sources, print_json};
use clap::Args;
use modrag_core::{config::AppConfig, AppResult};
use modrag_rag::{ChunkSink, RagAnswer, RagPipeline};
use std::io::Write;
use std::sync::Arc;

/// Answer a question with the full pipeline
#[derive(Args, Debug)]
pub struct AskCommand {
    /// The question to ask
    pub query: String,

    /// Print the answer only once it is complete
    #[arg(long)]
    pub no_stream: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl AskCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let llm = build_llm(config)?;
        let sources = open_sources(config).await?;
        let pipeline = RagPipeline::from_config(&config.pipeline, llm, sources)?;
        tracing::debug!("Pipeline: {}", pipeline.summary());

        let answer = if self.is_streaming() {
            let sink: ChunkSink = Arc::new(|piece: &str| {
                print!("{}", piece);
                std::io::stdout().flush().ok();
            });
            let answer = pipeline.run_stream(&self.query, &sink).await?;
            println!();
            answer
        } else {
            pipeline.run(&self.query).await?
        };

        tracing::debug!(
            "RAG response: max_score={:.3}, low_confidence={}, sources_count={}",
            answer.max_score,
            answer.low_confidence,
            answer.sources.len()
        );

        if self.json {
            print_json(&answer)?;
        } else {
            self.print_answer(&answer);
        }

        Ok(())
    }

    fn is_streaming(&self) -> bool {
        !self.no_stream && !self.json
    }

    fn print_answer(&self, answer: &RagAnswer) {
        if !self.is_streaming() {
            println!("{}", answer.answer);
        }

        println!();
        if answer.sources.is_empty() {
            println!("Sources: (no sources available)");
        } else {
            println!("Sources:");
            for source in &answer.sources {
                println!("- [{}] {}", source.index, source.source);
            }
        }

        if answer.low_confidence {
            eprintln!(
                "Note: low retrieval confidence (best score {:.2}); the answer may be unreliable.",
                answer.max_score
            );
        }
        for report in answer.verification.iter().filter(|r| !r.is_valid) {
            eprintln!(
                "Verification warning: {} (confidence {:.2})",
                report.reason, report.confidence
            );
        }
    }
}
