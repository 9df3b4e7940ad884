//! Hybrid retrieval engine.
//!
//! One search fans out twice: first query embedding and entity extraction run
//! concurrently, then vector search and graph traversal run concurrently.
//! Vector and per-entity graph failures degrade to partial context; the
//! query-embedding, entity-extraction, and answer-generation calls are
//! load-bearing and retried before an error reaches the caller.

pub mod entities;

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::provider::embeddings::EmbeddingClient;
use crate::provider::{CompletionOptions, ProviderClient};
use crate::retry::{self, RetryPolicy};
use crate::stores::{GraphBackend, GraphFact, GraphSnapshot, VectorBackend};
use crate::types::RagError;

pub use entities::EntityExtractor;

const ANSWER_SYSTEM_PROMPT: &str = "\
You are a helpful assistant.
Use the provided context to answer the user query accurately.
If the context is insufficient, state that clearly.
Maintain data privacy and a professional tone.";

/// Outcome of one hybrid search, with source counts for auditability.
#[derive(Clone, Debug, Serialize)]
pub struct SearchResponse {
    pub answer: String,
    pub vector_count: usize,
    pub graph_count: usize,
    pub entities: Vec<String>,
}

pub struct HybridSearchEngine {
    provider: Arc<ProviderClient>,
    embeddings: Arc<EmbeddingClient>,
    vectors: Arc<dyn VectorBackend>,
    graph: Arc<dyn GraphBackend>,
    entities: EntityExtractor,
    top_k: usize,
    retry: RetryPolicy,
}

impl HybridSearchEngine {
    pub fn new(
        settings: &Settings,
        provider: Arc<ProviderClient>,
        embeddings: Arc<EmbeddingClient>,
        vectors: Arc<dyn VectorBackend>,
        graph: Arc<dyn GraphBackend>,
    ) -> Self {
        let entities = EntityExtractor::new(
            provider.clone(),
            settings.cache_capacity,
            settings.retry,
        );
        Self {
            provider,
            embeddings,
            vectors,
            graph,
            entities,
            top_k: settings.vector_top_k,
            retry: settings.retry,
        }
    }

    /// Answers `query` from the configured default `top_k`.
    pub async fn search_default(&self, query: &str) -> Result<SearchResponse, RagError> {
        self.search(query, self.top_k).await
    }

    /// Answers a natural-language query by combining vector similarity with
    /// graph traversal, then synthesizing over the assembled context.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<SearchResponse, RagError> {
        let (embedding, entities) = tokio::join!(
            retry::with_backoff(self.retry, "query embedding", || {
                let embeddings = self.embeddings.clone();
                let query = query.to_string();
                async move { embeddings.embed_one(&query).await }
            }),
            self.entities.extract(query),
        );
        let embedding = embedding?;
        let entities = entities?;

        let (vector_hits, graph_facts) = tokio::join!(
            self.vector_search(&embedding, top_k),
            self.graph_search(&entities),
        );

        info!(
            vector_count = vector_hits.len(),
            graph_count = graph_facts.len(),
            entity_count = entities.len(),
            "assembling answer context"
        );

        let context = build_context(&vector_hits, &graph_facts);
        let answer = retry::with_backoff(self.retry, "answer generation", || {
            let provider = self.provider.clone();
            let prompt = format!("Context:\n{context}\n\nUser Query: {query}");
            async move {
                provider
                    .complete(
                        &prompt,
                        &CompletionOptions::with_system_prompt(ANSWER_SYSTEM_PROMPT),
                    )
                    .await
            }
        })
        .await?;

        Ok(SearchResponse {
            answer,
            vector_count: vector_hits.len(),
            graph_count: graph_facts.len(),
            entities,
        })
    }

    /// Nearest stored chunks by cosine distance. Degrades to empty on
    /// failure so the answer can still proceed on graph context.
    async fn vector_search(&self, embedding: &[f32], top_k: usize) -> Vec<String> {
        match self.vectors.search(embedding, top_k).await {
            Ok(hits) => hits.into_iter().map(|(record, _)| record.content).collect(),
            Err(err) => {
                warn!(error = %err, "vector search failed, continuing without vector context");
                Vec::new()
            }
        }
    }

    /// One traversal per entity, concurrently; failures are isolated per
    /// entity and the surviving facts are deduplicated across the whole call.
    async fn graph_search(&self, entities: &[String]) -> Vec<GraphFact> {
        let lookups = entities.iter().map(|entity| {
            let graph = self.graph.clone();
            let entity = entity.clone();
            async move {
                let result = graph.neighborhood(&entity).await;
                (entity, result)
            }
        });

        let mut seen = HashSet::new();
        let mut facts = Vec::new();
        for (entity, result) in join_all(lookups).await {
            match result {
                Ok(entity_facts) => {
                    debug!(entity = %entity, count = entity_facts.len(), "graph facts found");
                    for fact in entity_facts {
                        if seen.insert(fact.to_string()) {
                            facts.push(fact);
                        }
                    }
                }
                Err(err) => {
                    warn!(entity = %entity, error = %err, "graph search failed for entity");
                }
            }
        }
        facts
    }

    /// Bounded node/edge listing for the dashboard.
    pub async fn graph_snapshot(&self, limit: usize) -> Result<GraphSnapshot, RagError> {
        self.graph.snapshot(limit).await
    }
}

/// Assembles the grounded-answering context: raw chunk texts first, graph
/// facts second.
fn build_context(vector_hits: &[String], graph_facts: &[GraphFact]) -> String {
    let mut context = String::from("### Vector Context:\n");
    for hit in vector_hits {
        context.push_str("- ");
        context.push_str(hit);
        context.push('\n');
    }
    context.push_str("\n### Graph Context:\n");
    for fact in graph_facts {
        context.push_str("- ");
        context.push_str(&fact.to_string());
        context.push('\n');
    }
    context
}
