//! Modular RAG core library.
//!
//! Shared foundations for every stage crate and the CLI:
//! - Error handling (`AppError`, `AppResult`)
//! - Logging infrastructure
//! - Configuration management, including the per-stage pipeline settings
//! - `Params`, the parameter map every operator is configured from

pub mod config;
pub mod error;
pub mod logging;
pub mod params;

// Re-export commonly used types
pub use config::{AppConfig, PipelineConfig};
pub use error::{AppError, AppResult};
pub use params::Params;
