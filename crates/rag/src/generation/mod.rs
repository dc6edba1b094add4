//! Generation stage: build the prompt, produce the answer, then verify and
//! post-process it.

mod generators;
mod postprocess;
mod prompts;
mod verification;

pub use generators::{
    apology, create_generator, generation_complexity, AdaptiveGenerator, ChunkSink, EnsembleGenerator,
    Fusion, Generator, LlmGenerator, StreamGenerator, DEFAULT_GENERATOR, DEFAULT_SYSTEM,
};
pub use postprocess::{
    create_postprocessor, CitationProcessor, CitationStyle, FormatProcessor, FormatType, PostProcessor,
    RefineProcessor, StructuredProcessor, SummaryProcessor,
};
pub use prompts::{
    create_prompt_builder, format_context, ChainOfThoughtPrompt, ContextualPrompt, FewShotPrompt,
    InstructPrompt, PromptBuilder, TemplatePrompt, DEFAULT_PROMPT_STRATEGY, NO_CONTEXT,
};
pub use verification::{
    create_verifier, extract_json_object, ConsistencyCheck, FactCheck, HallucinationDetection,
    HeuristicVerifier, Verifier,
};

use crate::llm::StageLlm;
use crate::types::VerificationReport;
use modrag_core::{AppResult, Params};
use modrag_knowledge::Document;
use serde_json::{json, Value};

/// Prompt operator plus generator, with optional verifiers and
/// post-processors.
///
/// `params` carries `prompt_strategy` and `generator` alongside the
/// operator settings, which both share.
pub struct GenerationModule {
    params: Params,
    llm: StageLlm,
    prompt: Box<dyn PromptBuilder>,
    generator: Box<dyn Generator>,
    verifiers: Vec<Box<dyn Verifier>>,
    postprocessors: Vec<Box<dyn PostProcessor>>,
}

impl GenerationModule {
    pub fn new(params: &Params, llm: &StageLlm) -> Self {
        let prompt = create_prompt_builder(
            &params.str_or("prompt_strategy", DEFAULT_PROMPT_STRATEGY),
            params,
            llm,
        );
        let generator = create_generator(&params.str_or("generator", DEFAULT_GENERATOR), params, llm);
        Self {
            params: params.clone(),
            llm: llm.clone(),
            prompt,
            generator,
            verifiers: Vec::new(),
            postprocessors: Vec::new(),
        }
    }

    /// Verifiers keyed by `strategy`/`type`.
    pub fn with_verifiers(mut self, steps: &[Params]) -> Self {
        self.verifiers = steps
            .iter()
            .map(|p| create_verifier(&p.strategy_or("verification"), p, &self.llm))
            .collect();
        self
    }

    /// Post-processors keyed by `type`/`strategy`; unknown kinds are skipped.
    pub fn with_postprocessors(mut self, steps: &[Params]) -> Self {
        self.postprocessors = steps
            .iter()
            .filter_map(|p| create_postprocessor(&p.strategy_or("format"), p, &self.llm))
            .collect();
        self
    }

    pub fn prompt_strategy(&self) -> &str {
        self.prompt.name()
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    pub async fn generate(&self, query: &str, context: &[Document]) -> AppResult<String> {
        let prompt = self.prompt.build(query, context)?;
        tracing::debug!(prompt = self.prompt.name(), generator = self.generator.name(), "Generating answer");
        self.generator.generate(query, context, &prompt).await
    }

    pub async fn generate_stream(&self, query: &str, context: &[Document], sink: &ChunkSink) -> AppResult<String> {
        let prompt = self.prompt.build(query, context)?;
        self.generator.generate_stream(query, context, &prompt, sink).await
    }

    /// Run every verifier; reports never change the answer.
    pub async fn verify(&self, query: &str, answer: &str, context: &[Document]) -> AppResult<Vec<VerificationReport>> {
        let mut reports = Vec::with_capacity(self.verifiers.len());
        for verifier in &self.verifiers {
            let report = verifier.verify(query, answer, context).await?;
            tracing::debug!(
                verifier = verifier.name(),
                valid = report.is_valid,
                confidence = report.confidence,
                "Verification finished"
            );
            reports.push(report);
        }
        Ok(reports)
    }

    pub async fn postprocess(&self, query: &str, answer: &str, context: &[Document]) -> AppResult<String> {
        let mut current = answer.to_string();
        for processor in &self.postprocessors {
            current = processor.apply(query, &current, context).await?;
        }
        Ok(current)
    }

    pub fn has_verifiers(&self) -> bool {
        !self.verifiers.is_empty()
    }

    pub fn has_postprocessors(&self) -> bool {
        !self.postprocessors.is_empty()
    }

    /// Swap the prompt operator and/or generator; `extra` is merged into
    /// the settings first.
    pub fn change_strategy(&mut self, prompt_strategy: Option<&str>, generator: Option<&str>, extra: Option<&Params>) {
        if let Some(extra) = extra {
            self.params.merge(extra);
        }
        if let Some(strategy) = prompt_strategy {
            self.params.set("prompt_strategy", strategy);
        }
        if let Some(name) = generator {
            self.params.set("generator", name);
        }

        self.prompt = create_prompt_builder(
            &self.params.str_or("prompt_strategy", DEFAULT_PROMPT_STRATEGY),
            &self.params,
            &self.llm,
        );
        self.generator = create_generator(
            &self.params.str_or("generator", DEFAULT_GENERATOR),
            &self.params,
            &self.llm,
        );
        tracing::info!(
            "Generation strategy changed to {} / {}",
            self.prompt.name(),
            self.generator.name()
        );
    }

    pub fn summary(&self) -> Value {
        json!({
            "module": "generation",
            "prompt_strategy": self.prompt.name(),
            "generator": self.generator.name(),
            "verifiers": self.verifiers.iter().map(|v| v.name()).collect::<Vec<_>>(),
            "postprocessors": self.postprocessors.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "model": self.llm.model(),
            "config": self.params.to_value(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::scripted;
    use std::sync::{Arc, Mutex};

    fn context() -> Vec<Document> {
        vec![Document::new("RAG combines retrieval with generation.").with_meta("source", "rag.md")]
    }

    #[tokio::test]
    async fn test_generate_uses_prompt_and_generator() {
        let (llm, client) = scripted(&["RAG combines retrieval with generation."]);
        let module = GenerationModule::new(&Params::new(), &llm);
        assert_eq!(module.prompt_strategy(), "template");
        assert_eq!(module.generator_name(), "llm");

        let answer = module.generate("What is RAG?", &context()).await.unwrap();
        assert_eq!(answer, "RAG combines retrieval with generation.");
        let request = &client.requests()[0];
        assert!(request.prompt.contains("[Document 1]"));
        assert!(request.prompt.contains("Question: What is RAG?"));
    }

    #[tokio::test]
    async fn test_generate_stream() {
        let (llm, _) = scripted(&["one two three"]);
        let module = GenerationModule::new(&Params::new(), &llm);
        let pieces = Arc::new(Mutex::new(String::new()));
        let collected = pieces.clone();
        let sink: ChunkSink = Arc::new(move |piece: &str| collected.lock().unwrap().push_str(piece));

        let answer = module.generate_stream("q", &context(), &sink).await.unwrap();
        assert_eq!(answer, "one two three");
        assert_eq!(pieces.lock().unwrap().trim(), "one two three");
    }

    #[tokio::test]
    async fn test_verify_and_postprocess_chain() {
        let (llm, _) = scripted(&[]);
        let module = GenerationModule::new(&Params::new(), &llm)
            .with_verifiers(&[
                Params::new().with("type", "verification"),
                Params::new().with("type", "hallucination_detection"),
            ])
            .with_postprocessors(&[
                Params::new().with("type", "citation"),
                Params::new().with("type", "bogus"),
                Params::new().with("type", "format").with("format_type", "plain"),
            ]);
        assert!(module.has_verifiers());
        assert_eq!(module.summary()["postprocessors"], json!(["citation", "format"]));

        let answer = "RAG combines retrieval with generation.";
        let reports = module.verify("q", answer, &context()).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.is_valid));

        let processed = module.postprocess("q", answer, &context()).await.unwrap();
        assert_eq!(processed, "RAG combines retrieval with generation.\n\nSources:\n[1] rag.md");
    }

    #[test]
    fn test_change_strategy() {
        let (llm, _) = scripted(&[]);
        let mut module = GenerationModule::new(&Params::new(), &llm);
        module.change_strategy(Some("cot"), Some("ensemble"), Some(&Params::new().with("models", json!(["a"]))));

        let summary = module.summary();
        assert_eq!(summary["prompt_strategy"], "cot");
        assert_eq!(summary["generator"], "ensemble");
        assert_eq!(summary["config"]["models"], json!(["a"]));

        module.change_strategy(Some("few_shot"), None, None);
        assert_eq!(module.prompt_strategy(), "few_shot");
        assert_eq!(module.generator_name(), "ensemble");
    }
}
