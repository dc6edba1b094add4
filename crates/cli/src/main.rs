//! modrag CLI
//!
//! Main entry point for the modular RAG command-line tool: index documents,
//! inspect query rewriting and retrieval, and ask questions end to end.

mod commands;

use clap::{Parser, Subcommand};
use commands::{
    AskCommand, CleanCommand, IndexCommand, PromptsCommand, RewriteCommand, SearchCommand,
    StatsCommand,
};
use modrag_core::{config::AppConfig, logging, AppResult};
use std::path::PathBuf;
use tracing::Instrument;

/// Modular RAG - configurable retrieval-augmented generation pipelines
#[derive(Parser, Debug)]
#[command(name = "modrag")]
#[command(about = "Configurable retrieval-augmented generation pipelines", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "MODRAG_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file (default: .modrag/config.yaml)
    #[arg(short, long, global = true, env = "MODRAG_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "MODRAG_LOG_JSON")]
    log_json: bool,

    /// LLM provider (ollama, openai, dashscope, mock)
    #[arg(short, long, global = true, env = "MODRAG_PROVIDER")]
    provider: Option<String>,

    /// Model identifier
    #[arg(short, long, global = true, env = "MODRAG_MODEL")]
    model: Option<String>,

    /// Knowledge base name
    #[arg(short, long, global = true, env = "MODRAG_BASE")]
    base: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load, split, embed and store documents
    Index(IndexCommand),

    /// Run pre-retrieval on a query and show the result
    Rewrite(RewriteCommand),

    /// Retrieve and post-process documents for a query
    Search(SearchCommand),

    /// Answer a question with the full pipeline
    Ask(AskCommand),

    /// Show knowledge base statistics
    Stats(StatsCommand),

    /// Delete a knowledge base
    Clean(CleanCommand),

    /// List available prompt templates
    Prompts(PromptsCommand),
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Index(_) => "index",
            Commands::Rewrite(_) => "rewrite",
            Commands::Search(_) => "search",
            Commands::Ask(_) => "ask",
            Commands::Stats(_) => "stats",
            Commands::Clean(_) => "clean",
            Commands::Prompts(_) => "prompts",
        }
    }
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    let config = AppConfig::load_from(cli.workspace.clone(), cli.config.clone())?.with_overrides(
        cli.workspace,
        cli.config,
        cli.provider,
        cli.model,
        cli.base,
        cli.log_level,
        cli.verbose,
        cli.no_color,
        cli.log_json,
    );

    // Initialize logging with final configuration
    logging::init_logging(config.log_level.as_deref(), config.no_color, config.log_json)?;

    tracing::debug!("Workspace: {:?}", config.workspace);
    tracing::debug!("Provider: {}", config.provider);
    tracing::debug!("Model: {}", config.model);
    tracing::debug!("Knowledge base: {}", config.base);

    config.ensure_modrag_dir()?;

    let span = tracing::info_span!("command", name = cli.command.name());

    let result = async {
        match cli.command {
            Commands::Index(cmd) => cmd.execute(&config).await,
            Commands::Rewrite(cmd) => cmd.execute(&config).await,
            Commands::Search(cmd) => cmd.execute(&config).await,
            Commands::Ask(cmd) => cmd.execute(&config).await,
            Commands::Stats(cmd) => cmd.execute(&config),
            Commands::Clean(cmd) => cmd.execute(&config),
            Commands::Prompts(cmd) => cmd.execute(&config),
        }
    }
    .instrument(span)
    .await;

    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result
}
