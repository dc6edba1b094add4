//! Embedding provider trait and factory.

use crate::embeddings::config::EmbeddingConfig;
use crate::embeddings::providers::{MockProvider, OllamaProvider, OpenAiCompatibleProvider};
use modrag_core::{AppError, AppResult};
use std::sync::Arc;

/// Trait for embedding providers.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    /// Get provider name (e.g., "mock", "dashscope", "ollama")
    fn provider_name(&self) -> &str;

    /// Get model identifier
    fn model_name(&self) -> &str;

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;

    /// Preferred number of texts per `embed_batch` call.
    fn batch_size(&self) -> usize {
        100
    }

    /// Generate embeddings for multiple texts in a batch.
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>>;

    /// Generate embedding for a single text (convenience method).
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let mut results = self.embed_batch(&[text.to_string()]).await?;
        results
            .pop()
            .ok_or_else(|| AppError::Knowledge("No embedding returned".to_string()))
    }
}

/// Create an embedding provider based on configuration.
///
/// Key-based providers take `api_key` first, then their environment
/// variable (`DASHSCOPE_API_KEY`, `OPENAI_API_KEY`).
pub async fn create_provider(
    config: &EmbeddingConfig,
    api_key: Option<&str>,
) -> AppResult<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "mock" => Ok(Arc::new(MockProvider::new(config.dimensions))),

        "ollama" => Ok(Arc::new(OllamaProvider::new(config).await?)),

        "dashscope" | "openai" => {
            let key = api_key
                .map(str::to_string)
                .or_else(|| {
                    config
                        .api_key_env()
                        .and_then(|var| std::env::var(var).ok())
                })
                .filter(|k| !k.is_empty())
                .ok_or_else(|| {
                    AppError::Config(format!(
                        "{} embeddings require an API key (set {} or configure one)",
                        config.provider,
                        config.api_key_env().unwrap_or("an API key")
                    ))
                })?;
            Ok(Arc::new(OpenAiCompatibleProvider::new(config, key)?))
        }

        other => Err(AppError::Config(format!(
            "Unknown embedding provider: '{}'. Supported providers: dashscope, openai, ollama, mock",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_mock_provider() {
        let config = EmbeddingConfig::for_provider("mock");
        let provider = create_provider(&config, None).await.unwrap();

        assert_eq!(provider.provider_name(), "mock");
        assert_eq!(provider.model_name(), "trigram-v1");
        assert_eq!(provider.dimensions(), 384);

        let embedding = provider.embed("test text").await.unwrap();
        assert_eq!(embedding.len(), 384);
    }

    #[tokio::test]
    async fn test_openai_with_explicit_key() {
        let config = EmbeddingConfig::for_provider("openai");
        let provider = create_provider(&config, Some("sk-test")).await.unwrap();
        assert_eq!(provider.provider_name(), "openai");
        assert_eq!(provider.dimensions(), 1536);
    }

    #[tokio::test]
    async fn test_unknown_provider_rejected() {
        let config = EmbeddingConfig {
            provider: "gguf".to_string(),
            ..EmbeddingConfig::for_provider("mock")
        };
        let err = create_provider(&config, None).await.unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }
}
