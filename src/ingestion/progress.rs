//! Progress events emitted once per ingestion batch.
//!
//! The pipeline only produces events; delivery is a synchronous callback the
//! caller provides, and the core never blocks on consumption beyond the
//! callback's own execution.

use std::sync::Arc;

use serde::Serialize;

/// One per-batch notification.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    BatchStarted {
        file_id: String,
        total_chunks: usize,
        total_batches: usize,
        current_batch: usize,
        chunks_processed: usize,
        batch_size: usize,
    },
    BatchCompleted {
        file_id: String,
        total_chunks: usize,
        total_batches: usize,
        current_batch: usize,
        chunks_processed: usize,
        batch_size: usize,
        duration_seconds: f64,
        chunks_per_second: f64,
    },
    BatchFailed {
        file_id: String,
        batch_index: usize,
        error: String,
    },
}

impl ProgressEvent {
    pub fn file_id(&self) -> &str {
        match self {
            ProgressEvent::BatchStarted { file_id, .. }
            | ProgressEvent::BatchCompleted { file_id, .. }
            | ProgressEvent::BatchFailed { file_id, .. } => file_id,
        }
    }

    pub fn is_completion(&self) -> bool {
        matches!(self, ProgressEvent::BatchCompleted { .. })
    }
}

/// Callback receiving progress events.
pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Sink that drops every event.
pub fn null_sink() -> ProgressSink {
    Arc::new(|_event| {})
}
