//! Answer generators: single call, streaming, multi-model and complexity routed.

use crate::llm::StageLlm;
use async_trait::async_trait;
use futures::StreamExt;
use modrag_core::{AppResult, Params};
use modrag_knowledge::text::char_len;
use modrag_knowledge::Document;
use modrag_llm::LlmRequest;
use modrag_prompt::RenderedPrompt;
use std::sync::Arc;

pub const DEFAULT_SYSTEM: &str = "You are a professional AI assistant.";

/// Receives streamed answer pieces as they arrive.
pub type ChunkSink = Arc<dyn Fn(&str) + Send + Sync>;

pub fn apology(error: impl std::fmt::Display) -> String {
    format!("Sorry, an error occurred while generating the answer: {}", error)
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        query: &str,
        context: &[Document],
        prompt: &RenderedPrompt,
    ) -> AppResult<String>;

    /// Generators that cannot stream hand the whole answer to the sink.
    async fn generate_stream(
        &self,
        query: &str,
        context: &[Document],
        prompt: &RenderedPrompt,
        sink: &ChunkSink,
    ) -> AppResult<String> {
        let answer = self.generate(query, context, prompt).await?;
        sink(&answer);
        Ok(answer)
    }
}

/// Sampling settings shared by the LLM-backed generators.
#[derive(Debug, Clone)]
struct Sampling {
    temperature: f32,
    max_tokens: usize,
    top_p: f32,
}

impl Sampling {
    fn from_params(params: &Params) -> Self {
        Self {
            temperature: params.f32_or("temperature", 0.7),
            max_tokens: params.usize_or("max_tokens", 2000),
            top_p: params.f32_or("top_p", 0.9),
        }
    }

    fn request(&self, prompt: &RenderedPrompt, model: &str) -> LlmRequest {
        LlmRequest::new(prompt.user.clone(), model)
            .with_system(prompt.system.clone().unwrap_or_else(|| DEFAULT_SYSTEM.to_string()))
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens as u32)
            .with_top_p(self.top_p)
    }
}

async fn stream_text(llm: &StageLlm, request: LlmRequest, sink: Option<&ChunkSink>) -> AppResult<String> {
    let mut stream = llm.client().stream(&request.with_streaming()).await?;
    let mut answer = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if chunk.content.is_empty() {
            continue;
        }
        if let Some(sink) = sink {
            sink(&chunk.content);
        }
        answer.push_str(&chunk.content);
    }
    Ok(answer.trim().to_string())
}

/// One completion call.
pub struct LlmGenerator {
    llm: StageLlm,
    model: String,
    sampling: Sampling,
}

impl LlmGenerator {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            model: params.str_or("model", llm.model()),
            sampling: Sampling::from_params(params),
            llm,
        }
    }
}

#[async_trait]
impl Generator for LlmGenerator {
    fn name(&self) -> &str {
        "llm"
    }

    async fn generate(&self, _query: &str, _context: &[Document], prompt: &RenderedPrompt) -> AppResult<String> {
        let request = self.sampling.request(prompt, &self.model);
        match self.llm.client().complete_text(&request).await {
            Ok(answer) => Ok(answer),
            Err(e) => {
                tracing::error!("Generation failed: {}", e);
                Ok(apology(e))
            }
        }
    }

    async fn generate_stream(
        &self,
        _query: &str,
        _context: &[Document],
        prompt: &RenderedPrompt,
        sink: &ChunkSink,
    ) -> AppResult<String> {
        let request = self.sampling.request(prompt, &self.model);
        match stream_text(&self.llm, request, Some(sink)).await {
            Ok(answer) => Ok(answer),
            Err(e) => {
                tracing::error!("Streaming generation failed: {}", e);
                let answer = apology(e);
                sink(&answer);
                Ok(answer)
            }
        }
    }
}

/// Always streams, even without a sink.
pub struct StreamGenerator {
    inner: LlmGenerator,
}

impl StreamGenerator {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            inner: LlmGenerator::new(llm, params),
        }
    }
}

#[async_trait]
impl Generator for StreamGenerator {
    fn name(&self) -> &str {
        "stream"
    }

    async fn generate(&self, _query: &str, _context: &[Document], prompt: &RenderedPrompt) -> AppResult<String> {
        let request = self.inner.sampling.request(prompt, &self.inner.model);
        match stream_text(&self.inner.llm, request, None).await {
            Ok(answer) => Ok(answer),
            Err(e) => {
                tracing::error!("Streaming generation failed: {}", e);
                Ok(apology(e))
            }
        }
    }

    async fn generate_stream(
        &self,
        query: &str,
        context: &[Document],
        prompt: &RenderedPrompt,
        sink: &ChunkSink,
    ) -> AppResult<String> {
        self.inner.generate_stream(query, context, prompt, sink).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fusion {
    Voting,
    Concatenate,
    First,
}

impl Fusion {
    pub fn parse(name: &str) -> Self {
        match name {
            "voting" => Self::Voting,
            "concatenate" => Self::Concatenate,
            _ => Self::First,
        }
    }
}

/// Asks several models and fuses their answers.
pub struct EnsembleGenerator {
    llm: StageLlm,
    models: Vec<String>,
    fusion: Fusion,
    sampling: Sampling,
}

impl EnsembleGenerator {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        let models = params
            .str_list("models")
            .filter(|models| !models.is_empty())
            .unwrap_or_else(|| vec![llm.model().to_string()]);
        Self {
            models,
            fusion: Fusion::parse(&params.str_or("fusion_strategy", "voting")),
            sampling: Sampling::from_params(params),
            llm,
        }
    }

    pub fn fuse(&self, answers: &[(String, String)]) -> String {
        // First of the longest answers wins ties.
        let longest = || {
            answers
                .iter()
                .fold(None::<&String>, |best, (_, answer)| match best {
                    Some(current) if char_len(current) >= char_len(answer) => Some(current),
                    _ => Some(answer),
                })
                .cloned()
                .unwrap_or_default()
        };

        match self.fusion {
            Fusion::Voting => longest(),
            Fusion::Concatenate => {
                let mut text: String = answers
                    .iter()
                    .map(|(model, answer)| format!("Model {}:\n{}\n\n", model, answer))
                    .collect();
                text.push_str(&format!("Conclusion:\n{}", longest()));
                text
            }
            Fusion::First => answers
                .first()
                .map(|(_, answer)| answer.clone())
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Generator for EnsembleGenerator {
    fn name(&self) -> &str {
        "ensemble"
    }

    async fn generate(&self, _query: &str, _context: &[Document], prompt: &RenderedPrompt) -> AppResult<String> {
        let mut answers = Vec::new();
        for model in &self.models {
            let request = self.sampling.request(prompt, model);
            match self.llm.client().complete_text(&request).await {
                Ok(answer) => answers.push((model.clone(), answer)),
                Err(e) => tracing::warn!(model = %model, "Ensemble member failed: {}", e),
            }
        }

        if answers.is_empty() {
            return Ok("Sorry, all models failed to generate an answer.".to_string());
        }
        Ok(self.fuse(&answers))
    }
}

const COMPLEX_MARKERS: &[&str] = &[
    "比较", "分析", "评估", "综合", "详细", "解释", "为什么", "compare", "analyze", "explain", "why",
];

/// Query plus context complexity in [0, 1].
pub fn generation_complexity(query: &str, context_count: usize) -> f32 {
    let length = char_len(query);
    let mut score: f32 = if length > 100 {
        0.3
    } else if length > 50 {
        0.2
    } else {
        0.1
    };

    score += if context_count > 5 {
        0.3
    } else if context_count > 2 {
        0.2
    } else {
        0.1
    };

    let lowered = query.to_lowercase();
    if COMPLEX_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        score += 0.3;
    }

    score.min(1.0)
}

/// Picks a cheaper or a stronger model by complexity.
pub struct AdaptiveGenerator {
    llm: StageLlm,
    simple_model: String,
    complex_model: String,
    threshold: f32,
    sampling: Sampling,
}

impl AdaptiveGenerator {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            simple_model: params.str_or("simple_model", llm.model()),
            complex_model: params.str_or("complex_model", llm.model()),
            threshold: params.f32_or("complexity_threshold", 0.6),
            sampling: Sampling::from_params(params),
            llm,
        }
    }

    pub fn select_model(&self, query: &str, context_count: usize) -> &str {
        let complexity = generation_complexity(query, context_count);
        if complexity >= self.threshold {
            &self.complex_model
        } else {
            &self.simple_model
        }
    }
}

#[async_trait]
impl Generator for AdaptiveGenerator {
    fn name(&self) -> &str {
        "adaptive"
    }

    async fn generate(&self, query: &str, context: &[Document], prompt: &RenderedPrompt) -> AppResult<String> {
        let model = self.select_model(query, context.len());
        tracing::debug!(model = %model, "Adaptive generator selected model");
        let request = self.sampling.request(prompt, model);
        match self.llm.client().complete_text(&request).await {
            Ok(answer) => Ok(answer),
            Err(e) => {
                tracing::error!("Adaptive generation failed: {}", e);
                Ok(apology(e))
            }
        }
    }
}

pub const DEFAULT_GENERATOR: &str = "llm";

pub fn create_generator(name: &str, params: &Params, llm: &StageLlm) -> Box<dyn Generator> {
    let llm = llm.clone();
    match name {
        "llm" => Box::new(LlmGenerator::new(llm, params)),
        "stream" => Box::new(StreamGenerator::new(llm, params)),
        "ensemble" => Box::new(EnsembleGenerator::new(llm, params)),
        "adaptive" => Box::new(AdaptiveGenerator::new(llm, params)),
        other => {
            tracing::warn!("Unknown generator '{}', using {}", other, DEFAULT_GENERATOR);
            Box::new(LlmGenerator::new(llm, params))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::scripted;
    use std::sync::Mutex;

    fn prompt() -> RenderedPrompt {
        RenderedPrompt::new("gen.template", None, "Context: ...\nQuestion: What is RAG?")
    }

    #[tokio::test]
    async fn test_llm_generator_request_settings() {
        let (llm, client) = scripted(&["  RAG is retrieval plus generation.  "]);
        let generator = LlmGenerator::new(llm, &Params::new());
        let answer = generator.generate("q", &[], &prompt()).await.unwrap();
        assert_eq!(answer, "RAG is retrieval plus generation.");

        let request = &client.requests()[0];
        assert_eq!(request.system.as_deref(), Some(DEFAULT_SYSTEM));
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.max_tokens, Some(2000));
        assert_eq!(request.top_p, Some(0.9));
        assert_eq!(request.model, "test-model");
    }

    #[tokio::test]
    async fn test_llm_generator_keeps_prompt_system_and_apologises() {
        let (llm, client) = scripted(&[]);
        client.push_error("connection refused");
        let generator = LlmGenerator::new(llm, &Params::new());
        let with_system = RenderedPrompt::new("x", Some("Be strict.".to_string()), "u");

        let answer = generator.generate("q", &[], &with_system).await.unwrap();
        assert!(answer.starts_with("Sorry"));
        assert!(answer.contains("connection refused"));
        assert_eq!(client.requests()[0].system.as_deref(), Some("Be strict."));
    }

    #[tokio::test]
    async fn test_stream_generator_feeds_sink() {
        let (llm, client) = scripted(&["Streaming answer arrives in pieces."]);
        let generator = StreamGenerator::new(llm, &Params::new());
        let pieces = Arc::new(Mutex::new(Vec::<String>::new()));
        let collected = pieces.clone();
        let sink: ChunkSink = Arc::new(move |piece: &str| collected.lock().unwrap().push(piece.to_string()));

        let answer = generator.generate_stream("q", &[], &prompt(), &sink).await.unwrap();
        assert_eq!(answer, "Streaming answer arrives in pieces.");
        assert!(pieces.lock().unwrap().len() > 1);
        assert!(client.requests()[0].stream);
    }

    #[tokio::test]
    async fn test_default_stream_hands_whole_answer() {
        let (llm, _) = scripted(&["short"]);
        let generator = EnsembleGenerator::new(llm, &Params::new());
        let pieces = Arc::new(Mutex::new(Vec::<String>::new()));
        let collected = pieces.clone();
        let sink: ChunkSink = Arc::new(move |piece: &str| collected.lock().unwrap().push(piece.to_string()));

        generator.generate_stream("q", &[], &prompt(), &sink).await.unwrap();
        assert_eq!(*pieces.lock().unwrap(), vec!["short".to_string()]);
    }

    #[tokio::test]
    async fn test_ensemble_fusion() {
        let (llm, client) = scripted(&["short", "a much longer answer"]);
        let params = Params::new().with("models", serde_json::json!(["m1", "m2"]));
        let voting = EnsembleGenerator::new(llm.clone(), &params);
        assert_eq!(voting.generate("q", &[], &prompt()).await.unwrap(), "a much longer answer");
        let models: Vec<String> = client.requests().iter().map(|r| r.model.clone()).collect();
        assert_eq!(models, vec!["m1", "m2"]);

        let concat = EnsembleGenerator::new(llm.clone(), &params.clone().with("fusion_strategy", "concatenate"));
        let fused = concat.fuse(&[("m1".into(), "one".into()), ("m2".into(), "three".into())]);
        assert_eq!(fused, "Model m1:\none\n\nModel m2:\nthree\n\nConclusion:\nthree");

        let first = EnsembleGenerator::new(llm, &params.with("fusion_strategy", "other"));
        assert_eq!(first.fuse(&[("m1".into(), "one".into()), ("m2".into(), "three".into())]), "one");
    }

    #[test]
    fn test_voting_keeps_first_of_equal_length() {
        let (llm, _) = scripted(&[]);
        let voting = EnsembleGenerator::new(llm, &Params::new());
        let fused = voting.fuse(&[
            ("m1".into(), "first".into()),
            ("m2".into(), "secnd".into()),
            ("m3".into(), "thrd".into()),
        ]);
        assert_eq!(fused, "first");
    }

    #[tokio::test]
    async fn test_ensemble_all_failing() {
        let (llm, client) = scripted(&[]);
        client.push_error("down");
        let generator = EnsembleGenerator::new(llm, &Params::new());
        let answer = generator.generate("q", &[], &prompt()).await.unwrap();
        assert!(answer.contains("all models failed"));
    }

    #[test]
    fn test_generation_complexity() {
        assert!((generation_complexity("hi", 1) - 0.2).abs() < 1e-6);
        assert!((generation_complexity("Why does BM25 work?", 3) - 0.6).abs() < 1e-6);
        assert!((generation_complexity("为什么", 6) - 0.7).abs() < 1e-6);
        assert!(generation_complexity(&"explain ".repeat(20), 10) <= 1.0);
    }

    #[tokio::test]
    async fn test_adaptive_model_selection() {
        let (llm, client) = scripted(&["ok"]);
        let generator = AdaptiveGenerator::new(
            llm,
            &Params::new().with("simple_model", "small").with("complex_model", "large"),
        );
        assert_eq!(generator.select_model("hi", 1), "small");
        assert_eq!(generator.select_model("Explain and compare dense and sparse retrieval", 6), "large");

        generator.generate("hi", &[], &prompt()).await.unwrap();
        assert_eq!(client.requests()[0].model, "small");
    }

    #[test]
    fn test_adaptive_threshold_is_inclusive() {
        let (llm, _) = scripted(&[]);
        let generator = AdaptiveGenerator::new(
            llm,
            &Params::new().with("simple_model", "s").with("complex_model", "c"),
        );
        let query = "a".repeat(120);
        assert!((generation_complexity(&query, 6) - 0.6).abs() < 1e-6);
        assert_eq!(generator.select_model(&query, 6), "c");
        assert_eq!(generator.select_model(&query, 1), "s");
    }

    #[test]
    fn test_factory() {
        let (llm, _) = scripted(&[]);
        assert_eq!(create_generator("stream", &Params::new(), &llm).name(), "stream");
        assert_eq!(create_generator("nope", &Params::new(), &llm).name(), "llm");
    }
}
