//! Stats command handler.

use super::print_json;
use clap::Args;
use modrag_core::{config::AppConfig, AppResult};

/// Show knowledge base statistics
#[derive(Args, Debug)]
pub struct StatsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatsCommand {
    pub fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let stats = modrag_knowledge::stats(&config.workspace, &config.base)?;

        if self.json {
            print_json(&stats)?;
        } else {
            println!("Knowledge base: {}", stats.base_name);
            println!("Store:          {}", stats.store);
            println!(
                "Embeddings:     {} / {} ({} dims)",
                stats.embedding_provider, stats.embedding_model, stats.dimensions
            );
            println!("Sources:        {}", stats.sources_count);
            println!("Chunks:         {}", stats.documents_count);
            println!("Size:           {} bytes", stats.size_bytes);
            println!("Updated:        {}", stats.updated_at.to_rfc3339());
        }

        Ok(())
    }
}
