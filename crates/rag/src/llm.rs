//! LLM access shared by the stage operators.

use modrag_core::{AppResult, Params};
use modrag_llm::{LlmClient, LlmRequest};
use modrag_prompt::{PromptLibrary, RenderedPrompt};
use serde_json::Value;
use std::sync::Arc;

/// A chat client, its default model and the prompt library.
#[derive(Clone)]
pub struct StageLlm {
    client: Arc<dyn LlmClient>,
    model: String,
    prompts: Arc<PromptLibrary>,
}

impl std::fmt::Debug for StageLlm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageLlm")
            .field("provider", &self.client.provider_name())
            .field("model", &self.model)
            .field("prompts", &self.prompts.len())
            .finish()
    }
}

impl StageLlm {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>, prompts: Arc<PromptLibrary>) -> Self {
        Self {
            client,
            model: model.into(),
            prompts,
        }
    }

    /// Client plus the built-in prompt library.
    pub fn with_builtin_prompts(client: Arc<dyn LlmClient>, model: impl Into<String>) -> AppResult<Self> {
        Ok(Self::new(client, model, Arc::new(PromptLibrary::builtin()?)))
    }

    pub fn client(&self) -> &Arc<dyn LlmClient> {
        &self.client
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn prompts(&self) -> &PromptLibrary {
        &self.prompts
    }

    pub fn render(&self, prompt_id: &str, variables: &Value) -> AppResult<RenderedPrompt> {
        self.prompts.render(prompt_id, variables)
    }

    /// Request for a rendered prompt. `model` and `temperature` in `params`
    /// override the defaults.
    pub fn request(&self, prompt: &RenderedPrompt, params: &Params, temperature: f32) -> LlmRequest {
        let model = params.str_or("model", &self.model);
        let mut request = LlmRequest::new(prompt.user.clone(), model)
            .with_temperature(params.f32_or("temperature", temperature));
        if let Some(ref system) = prompt.system {
            request = request.with_system(system.clone());
        }
        if let Some(max_tokens) = params.opt_usize("max_tokens") {
            request = request.with_max_tokens(max_tokens as u32);
        }
        request
    }

    /// Render a library prompt and return the trimmed reply.
    pub async fn ask(
        &self,
        prompt_id: &str,
        variables: &Value,
        params: &Params,
        temperature: f32,
    ) -> AppResult<String> {
        let prompt = self.render(prompt_id, variables)?;
        let request = self.request(&prompt, params, temperature);
        tracing::debug!(prompt = prompt_id, model = %request.model, "Calling LLM");
        self.client.complete_text(&request).await
    }
}

/// Remove a surrounding markdown code fence (```lang ... ```).
pub fn strip_code_fences(text: &str, languages: &[&str]) -> String {
    let mut body = text.trim();
    for language in languages {
        let fence = format!("```{}", language);
        if let Some(rest) = body.strip_prefix(fence.as_str()) {
            body = rest;
            break;
        }
    }
    if let Some(rest) = body.strip_prefix("```") {
        body = rest;
    }
    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }
    body.trim().to_string()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use modrag_llm::ScriptedClient;

    /// A scripted client with queued replies plus a handle for inspection.
    pub fn scripted(replies: &[&str]) -> (StageLlm, Arc<ScriptedClient>) {
        let client = Arc::new(ScriptedClient::with_responses(replies.iter().copied()));
        let llm = StageLlm::with_builtin_prompts(client.clone(), "test-model").unwrap();
        (llm, client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(
            strip_code_fences("```sql\nSELECT 1;\n```", &["sql"]),
            "SELECT 1;"
        );
        assert_eq!(strip_code_fences("```\nMATCH (n)\n```", &["cypher"]), "MATCH (n)");
        assert_eq!(strip_code_fences("plain", &["sql"]), "plain");
    }

    #[tokio::test]
    async fn test_ask_applies_overrides() {
        let (llm, client) = testing::scripted(&["  rewritten  "]);
        let params = Params::new().with("model", "other").with("temperature", 0.1);
        let reply = llm
            .ask("pre.query_rewrite", &json!({"query": "rag?"}), &params, 0.3)
            .await
            .unwrap();
        assert_eq!(reply, "rewritten");

        let requests = client.requests();
        assert_eq!(requests[0].model, "other");
        assert_eq!(requests[0].temperature, Some(0.1));
        assert_eq!(requests[0].prompt.trim(), "rag?");
        assert!(requests[0].system.is_some());
    }
}
