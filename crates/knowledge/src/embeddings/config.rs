//! Embedding configuration and per-provider defaults.

use modrag_core::{AppError, AppResult, Params};
use modrag_llm::ProviderType;
use serde::{Deserialize, Serialize};

/// Embedding settings for one knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    /// Provider name: "dashscope", "openai", "ollama", "mock"
    pub provider: String,

    /// Model identifier (provider-specific)
    pub model: String,

    /// Embedding vector dimensions
    pub dimensions: usize,

    /// Whether to normalize embeddings to unit length
    #[serde(default = "default_normalize")]
    pub normalize: bool,

    /// Maximum number of texts per request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// API base URL; provider default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

fn default_normalize() -> bool {
    true
}

fn default_batch_size() -> usize {
    100
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self::for_provider("dashscope")
    }
}

impl EmbeddingConfig {
    /// Defaults for a provider. Unknown names fall back to DashScope.
    pub fn for_provider(provider: &str) -> Self {
        let (provider, model, dimensions, batch_size) = match provider.to_lowercase().as_str() {
            "dashscope" | "qwen" => ("dashscope", "text-embedding-v4", 1024, 10),
            "openai" => ("openai", "text-embedding-3-small", 1536, 100),
            "ollama" => ("ollama", "nomic-embed-text", 768, 100),
            "mock" | "trigram" => ("mock", "trigram-v1", 384, 100),
            other => {
                tracing::warn!("Unknown embedding type '{}', using dashscope", other);
                ("dashscope", "text-embedding-v4", 1024, 10)
            }
        };

        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            dimensions,
            normalize: true,
            batch_size,
            endpoint: None,
        }
    }

    /// Build from the `embedding` parameter section (`type` or `provider`).
    pub fn from_params(params: &Params) -> AppResult<Self> {
        let provider = params
            .opt_str("type")
            .or_else(|| params.opt_str("provider"))
            .unwrap_or_else(|| "dashscope".to_string());

        let mut config = Self::for_provider(&provider);
        if let Some(model) = params.opt_str("model") {
            config.model = model;
        }
        if let Some(dimensions) = params.opt_usize("dimensions") {
            config.dimensions = dimensions;
        }
        config.normalize = params.bool_or("normalize", config.normalize);
        config.batch_size = params.usize_or("batch_size", config.batch_size);
        config.endpoint = params.opt_str("endpoint");

        if config.dimensions == 0 {
            return Err(AppError::Config(
                "Embedding dimensions must be positive".to_string(),
            ));
        }
        if config.batch_size == 0 {
            return Err(AppError::Config(
                "Embedding batch_size must be positive".to_string(),
            ));
        }

        Ok(config)
    }

    /// The API base URL to call.
    pub fn resolved_endpoint(&self) -> String {
        if let Some(ref endpoint) = self.endpoint {
            return endpoint.trim_end_matches('/').to_string();
        }
        ProviderType::parse(&self.provider)
            .map(|p| p.default_endpoint().to_string())
            .unwrap_or_default()
    }

    /// Environment variable holding the API key for this provider.
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self.provider.as_str() {
            "dashscope" => Some("DASHSCOPE_API_KEY"),
            "openai" => Some("OPENAI_API_KEY"),
            _ => None,
        }
    }

    /// An index built with one embedding space cannot be searched with another.
    pub fn validate_consistency(&self, other: &Self) -> AppResult<()> {
        if self.provider != other.provider {
            return Err(AppError::Knowledge(format!(
                "Provider mismatch: index uses '{}', configuration asks for '{}'",
                self.provider, other.provider
            )));
        }

        if self.model != other.model {
            return Err(AppError::Knowledge(format!(
                "Model mismatch: index uses '{}', configuration asks for '{}'",
                self.model, other.model
            )));
        }

        if self.dimensions != other.dimensions {
            return Err(AppError::Knowledge(format!(
                "Dimension mismatch: index uses {}, configuration asks for {}",
                self.dimensions, other.dimensions
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_dashscope() {
        let config = EmbeddingConfig::default();
        assert_eq!(config.provider, "dashscope");
        assert_eq!(config.model, "text-embedding-v4");
        assert_eq!(config.dimensions, 1024);
        assert_eq!(config.batch_size, 10);
        assert_eq!(
            config.resolved_endpoint(),
            "https://dashscope.aliyuncs.com/compatible-mode/v1"
        );
        assert_eq!(config.api_key_env(), Some("DASHSCOPE_API_KEY"));
    }

    #[test]
    fn test_from_params_overrides() {
        let params = Params::new()
            .with("type", "ollama")
            .with("model", "bge-m3")
            .with("dimensions", 1024)
            .with("endpoint", "http://gpu-box:11434/");
        let config = EmbeddingConfig::from_params(&params).unwrap();

        assert_eq!(config.provider, "ollama");
        assert_eq!(config.model, "bge-m3");
        assert_eq!(config.dimensions, 1024);
        assert_eq!(config.resolved_endpoint(), "http://gpu-box:11434");
        assert!(config.api_key_env().is_none());
    }

    #[test]
    fn test_unknown_provider_falls_back() {
        let config = EmbeddingConfig::from_params(&Params::new().with("type", "huggingface")).unwrap();
        assert_eq!(config.provider, "dashscope");
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        let params = Params::new().with("type", "mock").with("dimensions", 0);
        assert!(EmbeddingConfig::from_params(&params).is_err());
    }

    #[test]
    fn test_validate_consistency() {
        let base = EmbeddingConfig::for_provider("mock");
        assert!(base.validate_consistency(&base.clone()).is_ok());

        let other = EmbeddingConfig {
            provider: "openai".to_string(),
            ..base.clone()
        };
        let err = base.validate_consistency(&other).unwrap_err();
        assert!(err.to_string().contains("Provider mismatch"));

        let other = EmbeddingConfig {
            dimensions: 1536,
            ..base.clone()
        };
        let err = base.validate_consistency(&other).unwrap_err();
        assert!(err.to_string().contains("Dimension mismatch"));
    }
}
