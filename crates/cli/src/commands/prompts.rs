//! Prompts command handler.
//!
//! Lists the prompt library: built-in templates plus workspace overrides
//! from `.modrag/prompts/`.

use super::print_json;
use clap::Args;
use modrag_core::{config::AppConfig, AppResult};
use modrag_prompt::PromptLibrary;
use serde_json::json;

/// List available prompt templates
#[derive(Args, Debug)]
pub struct PromptsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl PromptsCommand {
    pub fn execute(&self, config: &AppConfig) -> AppResult<()> {
        let library = PromptLibrary::load(&config.workspace)?;
        let mut templates: Vec<_> = library.templates().collect();
        templates.sort_by(|a, b| a.id.cmp(&b.id));

        if self.json {
            let prompts: Vec<_> = templates
                .iter()
                .map(|t| json!({"id": t.id, "title": t.title, "apiVersion": t.api_version}))
                .collect();
            print_json(&prompts)?;
        } else {
            for template in templates {
                println!("{:<28} {}", template.id, template.title);
            }
        }

        Ok(())
    }
}
