//! Scripted provider for offline runs and tests.
//!
//! Replies are served from a queue in order. Once the queue is drained the
//! client answers with a deterministic echo of the prompt so pipelines still
//! run end to end without a model.

use crate::client::{LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, LlmUsage};
use modrag_core::{AppError, AppResult};
use std::collections::VecDeque;
use std::sync::Mutex;

const ECHO_CHARS: usize = 200;

enum Scripted {
    Reply(String),
    Fail(String),
}

/// An LLM client that replays queued replies.
#[derive(Default)]
pub struct ScriptedClient {
    queue: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client that answers with `responses` in order.
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue = responses
            .into_iter()
            .map(|r| Scripted::Reply(r.into()))
            .collect();
        Self {
            queue: Mutex::new(queue),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_response(&self, response: impl Into<String>) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(Scripted::Reply(response.into()));
        }
    }

    /// Queue a failure; the next call returns `AppError::Llm(message)`.
    pub fn push_error(&self, message: impl Into<String>) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(Scripted::Fail(message.into()));
        }
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn next_reply(&self, request: &LlmRequest) -> AppResult<String> {
        self.requests
            .lock()
            .map_err(|_| AppError::Llm("Scripted client lock poisoned".to_string()))?
            .push(request.clone());

        let next = self
            .queue
            .lock()
            .map_err(|_| AppError::Llm("Scripted client lock poisoned".to_string()))?
            .pop_front();

        match next {
            Some(Scripted::Reply(text)) => Ok(text),
            Some(Scripted::Fail(message)) => Err(AppError::Llm(message)),
            None => {
                let echo: String = request.prompt.chars().take(ECHO_CHARS).collect();
                Ok(format!("[mock] {}", echo))
            }
        }
    }
}

fn word_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

#[async_trait::async_trait]
impl LlmClient for ScriptedClient {
    fn provider_name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        let content = self.next_reply(request)?;
        tracing::debug!(model = %request.model, chars = content.len(), "Scripted completion");

        Ok(LlmResponse {
            usage: LlmUsage::new(word_count(&request.prompt), word_count(&content)),
            content,
            model: request.model.clone(),
            done: true,
        })
    }

    async fn stream(&self, request: &LlmRequest) -> AppResult<LlmStream> {
        let content = self.next_reply(request)?;
        let model = request.model.clone();

        // Word-sized pieces that keep their trailing whitespace
        let mut chunks: Vec<AppResult<LlmStreamChunk>> = content
            .split_inclusive(char::is_whitespace)
            .map(|piece| {
                Ok(LlmStreamChunk {
                    content: piece.to_string(),
                    model: model.clone(),
                    done: false,
                    usage: None,
                })
            })
            .collect();
        chunks.push(Ok(LlmStreamChunk {
            content: String::new(),
            model,
            done: true,
            usage: Some(LlmUsage::new(
                word_count(&request.prompt),
                word_count(&content),
            )),
        }));

        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_replies_in_order_then_echo() {
        let client = ScriptedClient::with_responses(["first", "second"]);
        let request = LlmRequest::new("hello world", "mock-model");

        assert_eq!(client.complete_text(&request).await.unwrap(), "first");
        assert_eq!(client.complete_text(&request).await.unwrap(), "second");
        assert_eq!(
            client.complete_text(&request).await.unwrap(),
            "[mock] hello world"
        );
        assert_eq!(client.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_queued_error() {
        let client = ScriptedClient::new();
        client.push_error("rate limited");
        client.push_response("ok");

        let request = LlmRequest::new("q", "m");
        let err = client.complete(&request).await.unwrap_err();
        assert!(err.to_string().contains("rate limited"));
        assert_eq!(client.complete_text(&request).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_stream_reassembles() {
        let client = ScriptedClient::with_responses(["RAG combines retrieval and generation."]);
        let mut stream = client.stream(&LlmRequest::new("q", "m")).await.unwrap();

        let mut text = String::new();
        let mut saw_done = false;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            text.push_str(&chunk.content);
            saw_done |= chunk.done;
        }

        assert_eq!(text, "RAG combines retrieval and generation.");
        assert!(saw_done);
    }
}
