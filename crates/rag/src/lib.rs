//! Modular RAG stages and their orchestration.
//!
//! Each stage is a set of interchangeable operators chosen by a `strategy`
//! name and configured from [`modrag_core::Params`]:
//! - [`pre_retrieval`]: query rewriting, expansion and construction
//! - [`retrieval`]: dense, sparse, hybrid and routed retrievers
//! - [`post_retrieval`]: reranking, compression and filtering
//! - [`generation`]: prompt building, answer generation, verification and
//!   post-processing
//!
//! [`RagPipeline`] chains them from a [`modrag_core::PipelineConfig`].

pub mod generation;
pub mod llm;
pub mod orchestration;
pub mod post_retrieval;
pub mod pre_retrieval;
pub mod retrieval;
pub mod types;

pub use generation::{ChunkSink, GenerationModule};
pub use llm::StageLlm;
pub use orchestration::{RagPipeline, RetrievedContext};
pub use post_retrieval::{PostRetrievalModule, PostRetrievalPipeline};
pub use pre_retrieval::{PreRetrievalModule, PreRetrievalPipeline};
pub use retrieval::{RetrievalModule, RetrievalPipeline, RetrievalSources, Retriever};
pub use types::{QueryOutput, RagAnswer, SourceRef, VerificationReport};
