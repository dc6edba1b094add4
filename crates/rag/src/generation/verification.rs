//! Answer verification against the query and the generation context.

use super::prompts::format_context;
use crate::llm::StageLlm;
use crate::types::VerificationReport;
use async_trait::async_trait;
use modrag_core::{AppResult, Params};
use modrag_knowledge::text::{char_len, split_sentences, tokenize};
use modrag_knowledge::Document;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::OnceLock;

const STATEMENT_TERMINATORS: &[char] = &['。', '！', '？', '.', '!', '?'];

#[async_trait]
pub trait Verifier: Send + Sync {
    fn name(&self) -> &str;

    async fn verify(
        &self,
        query: &str,
        answer: &str,
        context: &[Document],
    ) -> AppResult<VerificationReport>;
}

fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

fn context_tokens(context: &[Document]) -> HashSet<String> {
    context
        .iter()
        .flat_map(|document| tokenize(&document.content))
        .collect()
}

/// Share of `words` also present in `reference`.
fn coverage(words: &HashSet<String>, reference: &HashSet<String>) -> f32 {
    if words.is_empty() {
        return 0.0;
    }
    words.intersection(reference).count() as f32 / words.len() as f32
}

fn json_object_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\{[^}]+\}").ok())
        .as_ref()
}

/// First flat JSON object in an LLM reply.
pub fn extract_json_object(reply: &str) -> Option<Value> {
    let found = json_object_pattern()?.find(reply)?;
    serde_json::from_str(found.as_str()).ok()
}

/// Length and word-overlap checks without an LLM.
pub struct HeuristicVerifier {
    threshold: f32,
}

impl HeuristicVerifier {
    pub fn new(params: &Params) -> Self {
        Self {
            threshold: params.f32_or("threshold", 0.7),
        }
    }
}

#[async_trait]
impl Verifier for HeuristicVerifier {
    fn name(&self) -> &str {
        "verification"
    }

    async fn verify(&self, _query: &str, answer: &str, context: &[Document]) -> AppResult<VerificationReport> {
        let answer = answer.trim();
        if answer.is_empty() {
            return Ok(VerificationReport::new(false, 0.0, "No answer provided"));
        }
        if char_len(answer) < 10 {
            return Ok(VerificationReport::new(false, 0.3, "Answer too short"));
        }
        if context.is_empty() {
            return Ok(VerificationReport::new(true, 0.5, "No context to verify against"));
        }

        let relevance = coverage(&token_set(answer), &context_tokens(context));
        Ok(VerificationReport::new(
            relevance > self.threshold,
            relevance,
            format!("Context overlap {:.2}", relevance),
        )
        .with_detail("relevance", relevance))
    }
}

/// LLM judgement of whether the answer is supported by the context.
pub struct FactCheck {
    llm: StageLlm,
    params: Params,
}

impl FactCheck {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            llm,
            params: params.clone(),
        }
    }
}

#[async_trait]
impl Verifier for FactCheck {
    fn name(&self) -> &str {
        "fact_check"
    }

    async fn verify(&self, _query: &str, answer: &str, context: &[Document]) -> AppResult<VerificationReport> {
        if context.is_empty() {
            return Ok(VerificationReport::new(true, 0.5, "No context to check facts against"));
        }

        let context_text = format_context(&context[..context.len().min(3)], false);
        let reply = match self
            .llm
            .ask(
                "verify.fact_check",
                &json!({"context": context_text, "answer": answer}),
                &self.params,
                0.0,
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Fact check failed: {}", e);
                return Ok(VerificationReport::new(true, 0.5, format!("Fact check failed: {}", e)));
            }
        };

        let Some(parsed) = extract_json_object(&reply) else {
            return Ok(VerificationReport::new(true, 0.7, "Could not parse fact check result"));
        };

        let is_factual = parsed.get("is_factual").and_then(Value::as_bool).unwrap_or(true);
        let confidence = parsed.get("confidence").and_then(Value::as_f64).unwrap_or(0.7) as f32;
        let violations = parsed.get("violations").cloned().unwrap_or_else(|| json!([]));
        let reason = if is_factual {
            "Answer is supported by the context"
        } else {
            "Answer contains unsupported statements"
        };

        Ok(VerificationReport::new(is_factual, confidence, reason).with_detail("violations", violations))
    }
}

/// LLM judgement of internal consistency.
pub struct ConsistencyCheck {
    llm: StageLlm,
    params: Params,
}

impl ConsistencyCheck {
    pub fn new(llm: StageLlm, params: &Params) -> Self {
        Self {
            llm,
            params: params.clone(),
        }
    }
}

#[async_trait]
impl Verifier for ConsistencyCheck {
    fn name(&self) -> &str {
        "consistency_check"
    }

    async fn verify(&self, query: &str, answer: &str, _context: &[Document]) -> AppResult<VerificationReport> {
        let reply = match self
            .llm
            .ask(
                "verify.consistency",
                &json!({"query": query, "answer": answer}),
                &self.params,
                0.0,
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Consistency check failed: {}", e);
                return Ok(VerificationReport::new(true, 0.5, format!("Consistency check failed: {}", e)));
            }
        };

        let Some(parsed) = extract_json_object(&reply) else {
            return Ok(VerificationReport::new(true, 0.7, "Could not parse consistency result"));
        };

        let is_consistent = parsed.get("is_consistent").and_then(Value::as_bool).unwrap_or(true);
        let confidence = parsed.get("confidence").and_then(Value::as_f64).unwrap_or(0.7) as f32;
        let issues = parsed.get("issues").cloned().unwrap_or_else(|| json!([]));
        let reason = if is_consistent {
            "Answer is internally consistent"
        } else {
            "Answer has consistency issues"
        };

        Ok(VerificationReport::new(is_consistent, confidence, reason).with_detail("issues", issues))
    }
}

/// Flags statements whose words are mostly absent from the context.
pub struct HallucinationDetection {
    threshold: f32,
}

impl HallucinationDetection {
    pub fn new(params: &Params) -> Self {
        Self {
            threshold: params.f32_or("threshold", 0.7),
        }
    }

    pub fn unsupported_statements(&self, answer: &str, context: &[Document]) -> (usize, Vec<String>) {
        let reference = context_tokens(context);
        let statements: Vec<String> = split_sentences(answer, STATEMENT_TERMINATORS)
            .iter()
            .map(|sentence| sentence.trim_end_matches(STATEMENT_TERMINATORS).trim().to_string())
            .filter(|statement| char_len(statement) > 10)
            .collect();

        let unsupported = statements
            .iter()
            .filter(|statement| coverage(&token_set(statement), &reference) < self.threshold)
            .cloned()
            .collect();
        (statements.len(), unsupported)
    }
}

#[async_trait]
impl Verifier for HallucinationDetection {
    fn name(&self) -> &str {
        "hallucination_detection"
    }

    async fn verify(&self, _query: &str, answer: &str, context: &[Document]) -> AppResult<VerificationReport> {
        if context.is_empty() || answer.trim().is_empty() {
            return Ok(VerificationReport::new(true, 0.5, "Nothing to check for hallucinations")
                .with_detail("unsupported_statements", Vec::<String>::new()));
        }

        let (total, unsupported) = self.unsupported_statements(answer, context);
        let confidence = 1.0 - unsupported.len() as f32 / total.max(1) as f32;
        let reason = if unsupported.is_empty() {
            "All statements are supported by the context".to_string()
        } else {
            format!("{} of {} statements are unsupported", unsupported.len(), total)
        };

        Ok(VerificationReport::new(unsupported.is_empty(), confidence, reason)
            .with_detail("unsupported_statements", unsupported))
    }
}

pub fn create_verifier(strategy: &str, params: &Params, llm: &StageLlm) -> Box<dyn Verifier> {
    match strategy {
        "verification" => Box::new(HeuristicVerifier::new(params)),
        "fact_check" => Box::new(FactCheck::new(llm.clone(), params)),
        "consistency_check" => Box::new(ConsistencyCheck::new(llm.clone(), params)),
        "hallucination_detection" => Box::new(HallucinationDetection::new(params)),
        other => {
            tracing::warn!("Unknown verification '{}', using verification", other);
            Box::new(HeuristicVerifier::new(params))
        }
    }
}
