//! ```text
//! Files ──► ingestion::IngestionPipeline ─┬─► provider::embeddings (cache + batch)
//!                                         ├─► stores::SqliteVectorStore
//!                                         ├─► stores::Neo4jGraphStore (triplets)
//!                                         └─► stores::QueryEmbeddingStore (SQL side channel)
//!
//! Query ──► search::HybridSearchEngine ─┬─► provider::embeddings ──► vector search
//!                                       ├─► search::EntityExtractor ──► graph traversal
//!                                       └─► provider::ProviderClient ──► grounded answer
//! ```
//!
//! Hybrid retrieval-augmented generation over two stores: a cosine-distance
//! vector index of embedded document chunks and a property graph of entities
//! extracted from those chunks. Outbound text passes the PII scrub stage, and
//! load-bearing backend calls retry with bounded backoff.

pub mod admin;
pub mod cache;
pub mod config;
pub mod ingestion;
pub mod provider;
pub mod retry;
pub mod scrub;
pub mod search;
pub mod stores;
pub mod types;

pub use admin::{AdminSurface, StoreStats};
pub use config::Settings;
pub use ingestion::{FileReport, FileStatus, IngestionPipeline, PairIngestor, ProgressEvent};
pub use provider::embeddings::{EmbeddingBackend, EmbeddingClient, MockEmbeddingBackend};
pub use provider::{CompletionOptions, ProviderClient};
pub use retry::RetryPolicy;
pub use scrub::PiiScrubber;
pub use search::{HybridSearchEngine, SearchResponse};
pub use stores::{
    GraphBackend, GraphFact, Neo4jGraphStore, QueryEmbeddingStore, SecondHopPolicy,
    SqliteVectorStore, Triplet, VectorBackend, VectorRecord,
};
pub use types::RagError;
