//! Shared in-memory store fakes for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use ragweave::stores::{
    GraphBackend, GraphCounts, GraphFact, GraphSnapshot, SnapshotEdge, SnapshotNode, Triplet,
    VectorBackend, VectorRecord,
};
use ragweave::types::RagError;

/// Vector store fake: keeps rows in memory, supports a one-shot injected
/// failure on the Nth `insert_batch` call (1-based).
#[derive(Default)]
pub struct InMemoryVectorStore {
    pub records: Mutex<Vec<VectorRecord>>,
    pub insert_calls: AtomicUsize,
    pub fail_on_insert_call: Mutex<Option<usize>>,
    pub fail_search: Mutex<bool>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(&self) -> Vec<VectorRecord> {
        self.records.lock().clone()
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorBackend for InMemoryVectorStore {
    async fn insert_batch(&self, records: Vec<VectorRecord>) -> Result<(), RagError> {
        let call = self.insert_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if *self.fail_on_insert_call.lock() == Some(call) {
            return Err(RagError::Storage(format!(
                "injected failure on insert call {call}"
            )));
        }
        self.records.lock().extend(records);
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<(VectorRecord, f32)>, RagError> {
        if *self.fail_search.lock() {
            return Err(RagError::Storage("injected search failure".into()));
        }
        let mut scored: Vec<(VectorRecord, f32)> = self
            .records
            .lock()
            .iter()
            .map(|record| {
                let distance = record
                    .embedding
                    .as_deref()
                    .map(|stored| cosine_distance(stored, embedding))
                    .unwrap_or(1.0);
                (record.clone(), distance)
            })
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn truncate(&self) -> Result<(), RagError> {
        self.records.lock().clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize, RagError> {
        Ok(self.records.lock().len())
    }
}

/// Graph store fake with merge semantics: node names and (s, p, o) triples
/// are sets, so repeated merges stay idempotent like the real store.
#[derive(Default)]
pub struct RecordingGraphStore {
    pub nodes: Mutex<HashSet<String>>,
    pub relationships: Mutex<HashSet<(String, String, String)>>,
    pub merged_pair_nodes: Mutex<Vec<(String, String)>>,
    pub merged_pair_edges: Mutex<Vec<(String, String, String)>>,
    pub neighborhoods: Mutex<HashMap<String, Vec<GraphFact>>>,
    pub failing_entities: Mutex<HashSet<String>>,
}

impl RecordingGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_neighborhood(self, entity: &str, facts: Vec<GraphFact>) -> Self {
        self.neighborhoods.lock().insert(entity.to_string(), facts);
        self
    }

    pub fn failing_for(self, entity: &str) -> Self {
        self.failing_entities.lock().insert(entity.to_string());
        self
    }

    pub fn node_count(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.lock().len()
    }
}

pub fn fact(subject: &str, relationship: &str, object: &str) -> GraphFact {
    GraphFact {
        subject: subject.to_string(),
        subject_label: "Entity".to_string(),
        relationship: relationship.to_string(),
        object: object.to_string(),
        object_label: "Entity".to_string(),
    }
}

#[async_trait]
impl GraphBackend for RecordingGraphStore {
    async fn ensure_schema(&self) -> Result<(), RagError> {
        Ok(())
    }

    async fn merge_triplet(&self, triplet: &Triplet) -> Result<(), RagError> {
        self.nodes.lock().insert(triplet.subject.clone());
        self.nodes.lock().insert(triplet.object.clone());
        self.relationships.lock().insert((
            triplet.subject.clone(),
            triplet.predicate.clone(),
            triplet.object.clone(),
        ));
        Ok(())
    }

    async fn merge_node(
        &self,
        label: &str,
        id: &str,
        _properties: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), RagError> {
        self.merged_pair_nodes
            .lock()
            .push((label.to_string(), id.to_string()));
        Ok(())
    }

    async fn merge_edge(&self, from: &str, to: &str, rel_type: &str) -> Result<(), RagError> {
        self.merged_pair_edges
            .lock()
            .push((from.to_string(), to.to_string(), rel_type.to_string()));
        Ok(())
    }

    async fn neighborhood(&self, entity: &str) -> Result<Vec<GraphFact>, RagError> {
        if self.failing_entities.lock().contains(entity) {
            return Err(RagError::Graph(format!(
                "injected traversal failure for {entity}"
            )));
        }
        Ok(self
            .neighborhoods
            .lock()
            .get(entity)
            .cloned()
            .unwrap_or_default())
    }

    async fn snapshot(&self, limit: usize) -> Result<GraphSnapshot, RagError> {
        let nodes = self
            .nodes
            .lock()
            .iter()
            .take(limit)
            .map(|name| SnapshotNode {
                id: name.clone(),
                label: name.clone(),
                kind: "Entity".to_string(),
            })
            .collect();
        let edges = self
            .relationships
            .lock()
            .iter()
            .take(limit)
            .map(|(subject, relationship, object)| SnapshotEdge {
                source: subject.clone(),
                label: relationship.clone(),
                target: object.clone(),
            })
            .collect();
        Ok(GraphSnapshot { nodes, edges })
    }

    async fn wipe(&self) -> Result<(), RagError> {
        self.nodes.lock().clear();
        self.relationships.lock().clear();
        Ok(())
    }

    async fn counts(&self) -> Result<GraphCounts, RagError> {
        Ok(GraphCounts {
            nodes: self.node_count(),
            relationships: self.relationship_count(),
        })
    }

    async fn ping(&self) -> Result<(), RagError> {
        Ok(())
    }
}
