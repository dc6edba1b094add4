//! End-to-end pipeline: pre-retrieval, retrieval, post-retrieval and
//! generation wired from a [`PipelineConfig`].

use crate::generation::{ChunkSink, GenerationModule};
use crate::llm::StageLlm;
use crate::post_retrieval::PostRetrievalPipeline;
use crate::pre_retrieval::PreRetrievalPipeline;
use crate::retrieval::{RetrievalPipeline, RetrievalSources};
use crate::types::{max_score, RagAnswer, SourceRef, CONFIDENCE_THRESHOLD};
use modrag_core::{AppResult, PipelineConfig};
use modrag_knowledge::Document;
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{info_span, Instrument};

/// Documents selected for a query, before generation.
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    pub queries: Vec<String>,
    pub documents_retrieved: usize,
    pub max_score: f32,
    pub documents: Vec<Document>,
}

pub struct RagPipeline {
    pre_retrieval: PreRetrievalPipeline,
    retrieval: RetrievalPipeline,
    post_retrieval: PostRetrievalPipeline,
    generation: GenerationModule,
}

impl RagPipeline {
    pub fn from_config(config: &PipelineConfig, llm: StageLlm, sources: RetrievalSources) -> AppResult<Self> {
        let retrieval = RetrievalPipeline::from_params(&config.retrieval, &sources)?;
        let generation = GenerationModule::new(&config.generation, &llm)
            .with_verifiers(&config.verification)
            .with_postprocessors(&config.postprocess);

        Ok(Self {
            pre_retrieval: PreRetrievalPipeline::from_params(&config.pre_retrieval, &llm),
            retrieval,
            post_retrieval: PostRetrievalPipeline::from_params(&config.post_retrieval, &llm),
            generation,
        })
    }

    pub fn generation(&self) -> &GenerationModule {
        &self.generation
    }

    pub fn generation_mut(&mut self) -> &mut GenerationModule {
        &mut self.generation
    }

    /// Query rewriting, retrieval over every query and post-retrieval.
    pub async fn retrieve_context(&self, query: &str) -> AppResult<RetrievedContext> {
        let queries = async {
            let queries = self.pre_retrieval.process(query).await?.queries();
            tracing::info!("{} queries after pre-retrieval", queries.len());
            AppResult::Ok(queries)
        }
        .instrument(info_span!("stage", stage = "pre_retrieval", steps = self.pre_retrieval.len()))
        .await?;

        let retrieved = async {
            let documents = self.retrieval.retrieve_many(&queries).await?;
            tracing::info!("{} documents retrieved", documents.len());
            AppResult::Ok(documents)
        }
        .instrument(info_span!("stage", stage = "retrieval", stages = self.retrieval.len()))
        .await?;

        let documents_retrieved = retrieved.len();
        let best = max_score(&retrieved);

        let documents = async {
            let documents = self.post_retrieval.process(retrieved, Some(query)).await?;
            tracing::info!("{} documents after post-retrieval", documents.len());
            AppResult::Ok(documents)
        }
        .instrument(info_span!("stage", stage = "post_retrieval", steps = self.post_retrieval.len()))
        .await?;

        Ok(RetrievedContext {
            queries,
            documents_retrieved,
            max_score: best,
            documents,
        })
    }

    pub async fn run(&self, query: &str) -> AppResult<RagAnswer> {
        self.execute(query, None).await
    }

    /// Like [`run`](Self::run) but generation pieces go to `sink` as they
    /// arrive. The no-information answer is also sent to the sink.
    pub async fn run_stream(&self, query: &str, sink: &ChunkSink) -> AppResult<RagAnswer> {
        self.execute(query, Some(sink)).await
    }

    async fn execute(&self, query: &str, sink: Option<&ChunkSink>) -> AppResult<RagAnswer> {
        let started = Instant::now();
        let context = self.retrieve_context(query).await?;

        if context.documents.is_empty() {
            tracing::warn!("No documents left for generation");
            let mut answer = RagAnswer::no_information(query, context.queries, context.documents_retrieved);
            answer.max_score = context.max_score;
            answer.elapsed_ms = started.elapsed().as_millis() as u64;
            if let Some(sink) = sink {
                sink(&answer.answer);
            }
            return Ok(answer);
        }

        let documents = &context.documents;
        let generated = async {
            let answer = match sink {
                Some(sink) => self.generation.generate_stream(query, documents, sink).await?,
                None => self.generation.generate(query, documents).await?,
            };
            tracing::info!("Generated answer of {} chars", answer.chars().count());
            AppResult::Ok(answer)
        }
        .instrument(info_span!("stage", stage = "generation", documents = documents.len()))
        .await?;

        let verification = if self.generation.has_verifiers() {
            self.generation
                .verify(query, &generated, documents)
                .instrument(info_span!("stage", stage = "verification"))
                .await?
        } else {
            Vec::new()
        };

        let answer = if self.generation.has_postprocessors() {
            self.generation
                .postprocess(query, &generated, documents)
                .instrument(info_span!("stage", stage = "postprocess"))
                .await?
        } else {
            generated
        };

        let low_confidence = context.max_score < CONFIDENCE_THRESHOLD;
        if low_confidence {
            tracing::warn!(max_score = context.max_score, "Low retrieval confidence");
        }

        Ok(RagAnswer {
            query: query.to_string(),
            queries: context.queries,
            answer,
            sources: documents
                .iter()
                .enumerate()
                .map(|(i, document)| SourceRef::from_document(i + 1, document))
                .collect(),
            documents_retrieved: context.documents_retrieved,
            documents_used: documents.len(),
            max_score: context.max_score,
            low_confidence,
            verification,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    pub fn summary(&self) -> Value {
        json!({
            "pre_retrieval": self.pre_retrieval.summary(),
            "retrieval": self.retrieval.summary(),
            "post_retrieval": self.post_retrieval.summary(),
            "generation": self.generation.summary(),
        })
    }
}
