//! Command handlers for the modrag CLI.
//!
//! Each subcommand lives in its own module; the helpers below build the
//! shared pieces (LLM access, knowledge base sources) from `AppConfig`.

pub mod ask;
pub mod clean;
pub mod index;
pub mod prompts;
pub mod rewrite;
pub mod search;
pub mod stats;

pub use ask::AskCommand;
pub use clean::CleanCommand;
pub use index::IndexCommand;
pub use prompts::PromptsCommand;
pub use rewrite::RewriteCommand;
pub use search::SearchCommand;
pub use stats::StatsCommand;

use modrag_core::{config::AppConfig, AppError, AppResult, Params};
use modrag_knowledge::IndexModule;
use modrag_llm::create_client;
use modrag_prompt::PromptLibrary;
use modrag_rag::{RetrievalSources, StageLlm};
use serde::Serialize;
use std::sync::Arc;

/// LLM client for the configured provider plus the workspace prompt library.
pub fn build_llm(config: &AppConfig) -> AppResult<StageLlm> {
    config.validate()?;

    let endpoint = config.provider_endpoint(&config.provider);
    let api_key = config.resolve_api_key(&config.provider);
    let client = create_client(&config.provider, endpoint.as_deref(), api_key.as_deref())
        .map_err(AppError::Config)?;
    let prompts = PromptLibrary::load(&config.workspace)?;

    tracing::debug!(
        provider = client.provider_name(),
        prompts = prompts.len(),
        "LLM client ready"
    );
    Ok(StageLlm::new(client, config.model.clone(), Arc::new(prompts)))
}

/// Indexing module for the active knowledge base, keyed for its embedding
/// provider.
pub fn index_module(config: &AppConfig, params: &Params) -> AppResult<IndexModule> {
    let module = IndexModule::new(params, &config.workspace, &config.base)?;
    let api_key = config.resolve_api_key(&module.embedding_config().provider);
    Ok(module.with_api_key(api_key))
}

/// Open the configured knowledge base as retrieval sources: its vector
/// store plus the stored chunks for the sparse retrievers.
pub async fn open_sources(config: &AppConfig) -> AppResult<RetrievalSources> {
    let mut module = index_module(config, &config.pipeline.indexing)?;
    let store = module.load_existing().await?.clone();
    let documents = store.documents()?;

    tracing::info!(
        "Opened knowledge base '{}' with {} chunks",
        config.base,
        documents.len()
    );
    Ok(RetrievalSources::new()
        .with_vector_store(store)
        .with_documents(documents))
}

/// Pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use modrag_rag::RagPipeline;
    use serde_json::json;
    use std::path::Path;
    use tempfile::TempDir;

    fn mock_config(workspace: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.workspace = workspace.to_path_buf();
        config.provider = "mock".to_string();
        config.pipeline.indexing = Params::from_value(json!({
            "loader": {"type": "directory"},
            "embedding": {"type": "mock", "dimensions": 64},
            "store": {"type": "json"},
        }))
        .unwrap();
        config
    }

    #[test]
    fn test_build_llm_validates_provider() {
        let temp = TempDir::new().unwrap();
        let mut config = mock_config(temp.path());
        let llm = build_llm(&config).unwrap();
        assert_eq!(llm.client().provider_name(), "mock");
        assert!(llm.prompts().get("gen.template").is_some());

        config.provider = "claude".to_string();
        assert!(build_llm(&config).is_err());
    }

    #[tokio::test]
    async fn test_open_sources_requires_index() {
        let temp = TempDir::new().unwrap();
        assert!(open_sources(&mock_config(temp.path())).await.is_err());
    }

    #[tokio::test]
    async fn test_index_then_ask() {
        let temp = TempDir::new().unwrap();
        let corpus = temp.path().join("docs");
        std::fs::create_dir_all(&corpus).unwrap();
        std::fs::write(
            corpus.join("rag.md"),
            "Modular RAG splits retrieval augmented generation into stages.",
        )
        .unwrap();

        let config = mock_config(temp.path());
        let mut module = index_module(&config, &config.pipeline.indexing).unwrap();
        let report = module
            .index_documents(&[corpus.to_string_lossy().to_string()], false)
            .await
            .unwrap();
        assert!(report.stored > 0);

        let sources = open_sources(&config).await.unwrap();
        let pipeline = RagPipeline::from_config(&config.pipeline, build_llm(&config).unwrap(), sources).unwrap();
        let answer = pipeline
            .run("Modular RAG splits retrieval augmented generation into stages.")
            .await
            .unwrap();

        assert!(answer.answer.starts_with("[mock]"));
        assert_eq!(answer.documents_used, 1);
        assert!(answer.sources[0].source.ends_with("rag.md"));
    }
}
