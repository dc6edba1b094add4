//! OpenAI-compatible embeddings (OpenAI and DashScope compatible mode).

use crate::embeddings::{EmbeddingConfig, EmbeddingProvider};
use modrag_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Calls `POST {endpoint}/embeddings` with bearer authentication.
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    provider: String,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
    /// Send `dimensions` in the request (models with adjustable output size)
    send_dimensions: bool,
}

impl std::fmt::Debug for OpenAiCompatibleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleProvider")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl OpenAiCompatibleProvider {
    pub fn new(config: &EmbeddingConfig, api_key: impl Into<String>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::Knowledge(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            provider: config.provider.clone(),
            endpoint: config.resolved_endpoint(),
            api_key: api_key.into(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            batch_size: config.batch_size,
            send_dimensions: config.model.starts_with("text-embedding-v")
                || config.model.starts_with("text-embedding-3"),
        })
    }

    fn request_body<'a>(&'a self, texts: &'a [String]) -> EmbeddingRequest<'a> {
        EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.send_dimensions.then_some(self.dimensions),
        }
    }
}

/// Order results by `index` and check the count.
fn collect_ordered(mut data: Vec<EmbeddingData>, expected: usize) -> AppResult<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(AppError::Knowledge(format!(
            "Embedding response count mismatch: sent {}, received {}",
            expected,
            data.len()
        )));
    }
    data.sort_by_key(|d| d.index);
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait::async_trait]
impl EmbeddingProvider for OpenAiCompatibleProvider {
    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embeddings", self.endpoint);
        tracing::debug!(provider = %self.provider, model = %self.model, count = texts.len(), "Requesting embeddings");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(texts))
            .send()
            .await
            .map_err(|e| {
                AppError::Knowledge(format!("Failed to send embedding request: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::Knowledge(format!(
                "{} embedding API error ({}): {}",
                self.provider, status, error_text
            )));
        }

        let body: EmbeddingResponse = response.json().await.map_err(|e| {
            AppError::Knowledge(format!("Failed to parse embedding response: {}", e))
        })?;

        collect_ordered(body.data, texts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_includes_dimensions_for_v4() {
        let config = EmbeddingConfig::for_provider("dashscope");
        let provider = OpenAiCompatibleProvider::new(&config, "sk-test").unwrap();
        let texts = vec!["a".to_string(), "b".to_string()];

        let json = serde_json::to_value(provider.request_body(&texts)).unwrap();
        assert_eq!(json["model"], "text-embedding-v4");
        assert_eq!(json["input"].as_array().unwrap().len(), 2);
        assert_eq!(json["dimensions"], 1024);
        assert_eq!(provider.batch_size(), 10);
    }

    #[test]
    fn test_request_body_omits_dimensions_for_fixed_models() {
        let config = EmbeddingConfig {
            model: "text-embedding-ada-002".to_string(),
            ..EmbeddingConfig::for_provider("openai")
        };
        let provider = OpenAiCompatibleProvider::new(&config, "sk-test").unwrap();
        let texts = vec!["a".to_string()];

        let json = serde_json::to_value(provider.request_body(&texts)).unwrap();
        assert!(json.get("dimensions").is_none());
    }

    #[test]
    fn test_results_sorted_by_index() {
        let data = vec![
            EmbeddingData { index: 1, embedding: vec![1.0] },
            EmbeddingData { index: 0, embedding: vec![0.0] },
        ];
        let ordered = collect_ordered(data, 2).unwrap();
        assert_eq!(ordered, vec![vec![0.0], vec![1.0]]);
    }

    #[test]
    fn test_count_mismatch_is_error() {
        let data = vec![EmbeddingData { index: 0, embedding: vec![0.0] }];
        assert!(collect_ordered(data, 2).is_err());
    }
}
