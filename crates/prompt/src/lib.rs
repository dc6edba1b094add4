//! Prompt system for the modular RAG workspace.
//!
//! This crate provides structured prompt management with:
//! - YAML-based prompt templates, with a built-in library embedded at compile time
//! - Workspace overrides from `.modrag/prompts/`
//! - Handlebars template rendering

pub mod builder;
pub mod loader;
pub mod types;

// Re-export main types
pub use builder::render_template;
pub use loader::{load_prompt_file, PromptLibrary, PROMPTS_DIR};
pub use types::{PromptTemplate, RenderedPrompt};
