//! Crate-wide error taxonomy.
//!
//! Every fallible operation in ragweave returns [`RagError`]. The variants map
//! onto how callers are expected to react:
//!
//! * [`RagError::Provider`] / [`RagError::Storage`] / [`RagError::Graph`]:
//!   transient backend failures; load-bearing call sites wrap these in
//!   [`crate::retry::with_backoff`].
//! * [`RagError::Extraction`] / [`RagError::Parse`]: best-effort enrichment
//!   failures; callers log and continue degraded.
//! * [`RagError::Validation`]: malformed data that is defaulted or skipped,
//!   never fatal.
//! * [`RagError::Configuration`]: missing credentials or wiring, surfaced at
//!   startup or first use.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// The embedding provider rejected or failed a request.
    #[error("provider request failed: {0}")]
    Provider(String),

    /// The chat-completion provider rejected or failed a request.
    #[error("completion request failed: {0}")]
    Completion(String),

    /// Vector store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Graph store failure.
    #[error("graph store error: {0}")]
    Graph(String),

    /// A best-effort enrichment step (triplets, SQL snippets) failed.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Model output could not be parsed into the expected shape.
    #[error("unparseable model output: {0}")]
    Parse(String),

    /// Input data failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Missing or inconsistent configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Filesystem failure while reading source documents.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for RagError {
    fn from(err: std::io::Error) -> Self {
        RagError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for RagError {
    fn from(err: reqwest::Error) -> Self {
        RagError::Provider(err.to_string())
    }
}

impl From<tokio_rusqlite::Error> for RagError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        RagError::Storage(err.to_string())
    }
}

impl From<neo4rs::Error> for RagError {
    fn from(err: neo4rs::Error) -> Self {
        RagError::Graph(err.to_string())
    }
}
