//! Clean command handler.

use clap::Args;
use modrag_core::{config::AppConfig, AppResult};

/// Delete a knowledge base
#[derive(Args, Debug)]
pub struct CleanCommand {}

impl CleanCommand {
    pub fn execute(&self, config: &AppConfig) -> AppResult<()> {
        modrag_knowledge::clean(&config.workspace, &config.base)?;
        println!("Knowledge base '{}' cleaned", config.base);
        Ok(())
    }
}
