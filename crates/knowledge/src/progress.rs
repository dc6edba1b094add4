//! Progress reporting for indexing runs.
//!
//! `IndexModule` emits one event per phase step (load, split, embed, store)
//! so a caller can render progress without parsing log lines.

use std::sync::Arc;
use std::time::Instant;

/// Progress event emitted while indexing.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Phase of the run: "load", "split", "embed", "store"
    pub phase: &'static str,

    /// Work done so far (documents, chunks, batches)
    pub current: u64,

    /// Total expected work (if known)
    pub total: Option<u64>,

    /// Human-readable message
    pub message: String,

    /// Seconds since the reporter was created
    pub elapsed_secs: f64,
}

impl ProgressEvent {
    /// Percentage complete when the total is known.
    pub fn percentage(&self) -> Option<f64> {
        self.total.map(|t| {
            if t > 0 {
                (self.current as f64 / t as f64) * 100.0
            } else {
                0.0
            }
        })
    }

    /// Format as a simple user-facing line.
    pub fn format_simple(&self) -> String {
        let progress = match self.total {
            Some(total) => format!("{}/{}", self.current, total),
            None => self.current.to_string(),
        };
        let pct = self
            .percentage()
            .map(|p| format!(" ({:.0}%)", p))
            .unwrap_or_default();

        format!("[{}] {}{} - {}", self.phase, progress, pct, self.message)
    }
}

/// Callback for progress events.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Progress reporter that emits events through a callback.
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    start_time: Instant,
}

impl ProgressReporter {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
            start_time: Instant::now(),
        }
    }

    /// A reporter that drops every event.
    pub fn noop() -> Self {
        Self {
            callback: None,
            start_time: Instant::now(),
        }
    }

    fn emit(&self, phase: &'static str, current: u64, total: Option<u64>, message: String) {
        let Some(callback) = &self.callback else {
            return;
        };

        let event = ProgressEvent {
            phase,
            current,
            total,
            message,
            elapsed_secs: self.start_time.elapsed().as_secs_f64(),
        };
        tracing::debug!(
            phase = event.phase,
            current = event.current,
            total = ?event.total,
            "{}",
            event.message
        );
        callback(event);
    }

    pub fn load(&self, documents: u64, source: &str) {
        self.emit("load", documents, None, format!("loaded {}", source));
    }

    pub fn split(&self, chunks: u64, splitter: &str) {
        self.emit("split", chunks, None, format!("{} chunks via {}", chunks, splitter));
    }

    pub fn embed(&self, current: u64, total: u64, model: &str) {
        self.emit("embed", current, Some(total), format!("model={}", model));
    }

    pub fn store(&self, total: u64, backend: &str) {
        self.emit("store", total, Some(total), format!("written to {}", backend));
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::noop()
    }
}
