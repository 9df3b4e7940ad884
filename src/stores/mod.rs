//! Storage backends for vectors and the entity graph.
//!
//! The [`VectorBackend`] and [`GraphBackend`] traits abstract the two stores
//! so the ingestion pipeline and hybrid search engine never depend on a
//! specific database. Production uses [`sqlite::SqliteVectorStore`] and
//! [`graph::Neo4jGraphStore`]; tests substitute in-memory fakes.

pub mod graph;
pub mod query_embeddings;
pub mod sqlite;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::RagError;

pub use graph::{GraphSearchConfig, Neo4jGraphStore, SecondHopPolicy};
pub use query_embeddings::QueryEmbeddingStore;
pub use sqlite::SqliteVectorStore;

/// One persisted chunk: text, JSON metadata, and its embedding.
///
/// Rows are append-only; the store offers no per-row delete, only
/// [`VectorBackend::truncate`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub embedding: Option<Vec<f32>>,
}

impl VectorRecord {
    pub fn new(content: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            metadata,
            embedding: None,
        }
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// A validated (subject, predicate, object) fact bound for the graph store.
///
/// Use [`Triplet::normalize`] to build one from raw model output; it enforces
/// the non-empty-after-trim rule and canonicalizes the predicate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triplet {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl Triplet {
    /// Trims all three fields, uppercases and underscore-joins the predicate,
    /// and rejects the triplet when any field ends up empty.
    pub fn normalize(subject: &str, predicate: &str, object: &str) -> Option<Self> {
        let subject = subject.trim();
        let object = object.trim();
        let predicate = predicate.trim().to_uppercase().replace(' ', "_");
        if subject.is_empty() || predicate.is_empty() || object.is_empty() {
            return None;
        }
        Some(Self {
            subject: subject.to_string(),
            predicate,
            object: object.to_string(),
        })
    }
}

/// One relationship surfaced by a graph traversal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphFact {
    pub subject: String,
    pub subject_label: String,
    pub relationship: String,
    pub object: String,
    pub object_label: String,
}

impl fmt::Display for GraphFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}:{}) -[{}]-> ({}:{})",
            self.subject, self.subject_label, self.relationship, self.object, self.object_label
        )
    }
}

/// Node/edge listing for dashboard visualization.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<SnapshotNode>,
    pub edges: Vec<SnapshotEdge>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub id: String,
    pub label: String,
    pub kind: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotEdge {
    pub source: String,
    pub label: String,
    pub target: String,
}

/// Node and relationship totals.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct GraphCounts {
    pub nodes: usize,
    pub relationships: usize,
}

/// Cosine-distance nearest-neighbor store over fixed-dimension vectors.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Persists all records in one atomic transaction: either every row in
    /// the batch lands or none do.
    async fn insert_batch(&self, records: Vec<VectorRecord>) -> Result<(), RagError>;

    /// Returns up to `top_k` records ordered by ascending cosine distance.
    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<(VectorRecord, f32)>, RagError>;

    /// Removes every stored record. The only supported delete.
    async fn truncate(&self) -> Result<(), RagError>;

    /// Total stored records.
    async fn count(&self) -> Result<usize, RagError>;
}

/// Label/relationship property graph with idempotent merge semantics.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// Ensures uniqueness constraints and the full-text name index exist.
    async fn ensure_schema(&self) -> Result<(), RagError>;

    /// Merges subject node, object node, and the typed relationship between
    /// them. Safe to repeat; merges are commutative across tasks.
    async fn merge_triplet(&self, triplet: &Triplet) -> Result<(), RagError>;

    /// Merges a labeled node identified by `id`, setting `properties` on it.
    async fn merge_node(
        &self,
        label: &str,
        id: &str,
        properties: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), RagError>;

    /// Merges a typed relationship between two previously merged nodes.
    async fn merge_edge(&self, from: &str, to: &str, rel_type: &str) -> Result<(), RagError>;

    /// Hybrid entity lookup (full-text union exact identifier) expanded one
    /// hop, plus the configured optional second hop.
    async fn neighborhood(&self, entity: &str) -> Result<Vec<GraphFact>, RagError>;

    /// Bounded node/edge listing for visualization.
    async fn snapshot(&self, limit: usize) -> Result<GraphSnapshot, RagError>;

    /// Detach-deletes every node. The only supported delete.
    async fn wipe(&self) -> Result<(), RagError>;

    /// Node and relationship totals.
    async fn counts(&self) -> Result<GraphCounts, RagError>;

    /// Cheap connectivity probe.
    async fn ping(&self) -> Result<(), RagError>;
}
