//! CSV ingestor for natural-language/SQL query pairs.
//!
//! Each `id,query,sql` row is transformed by the completion model into a
//! vector record and a graph record under a fixed system prompt, then stored
//! in the query-embedding store and merged into the graph. Row failures are
//! isolated: one bad row is logged and the rest of the file proceeds.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tokio::fs;
use tracing::{info, warn};

use super::extract::strip_markdown_fences;
use crate::provider::embeddings::EmbeddingClient;
use crate::provider::{CompletionOptions, ProviderClient};
use crate::retry::{self, RetryPolicy};
use crate::stores::GraphBackend;
use crate::stores::query_embeddings::{NewQueryEmbedding, QueryEmbeddingStore};
use crate::types::RagError;

const TRANSFORM_SYSTEM_PROMPT: &str = "\
You are a Data Ingestion Engine for a Hybrid RAG System. Your goal is to transform CSV data into structured JSON for dual-storage.

Output Requirements:

Vector Store Object: A flattened text chunk containing the semantic intent of the query and the SQL logic for embedding.

Graph Store Object: Atomic entities (Queries, Tables, Columns) and their relationships (ACCESSES, FILTERS_BY).

Constraints:

Output ONLY valid JSON.
No conversational filler.
Maintain strict data types (Strings for IDs, ISO 8601 for dates).
IDs for Query nodes should be the provided ID from input.

JSON Schema Template:

{
  \"vector_record\": {
    \"id\": \"string\",
    \"content\": \"Query: [QueryText] | SQL: [GeneratedSQL]\",
    \"metadata\": { \"source\": \"training_set\", \"table_refs\": [\"list\"], \"type\": \"string\" }
  },
  \"graph_record\": {
    \"nodes\": [
      {\"id\": \"Q1\", \"label\": \"Query\", \"properties\": {\"text\": \"...\"}},
      {\"id\": \"tblInvoices\", \"label\": \"Table\", \"properties\": {\"name\": \"...\"}}
    ],
    \"edges\": [
      {\"from\": \"Q1\", \"to\": \"tblInvoices\", \"type\": \"ACCESSES\"}
    ]
  }
}";

#[derive(Debug, Deserialize)]
struct PairRow {
    id: String,
    query: String,
    sql: String,
}

#[derive(Debug, Deserialize)]
struct PairTransform {
    vector_record: Option<PairVectorRecord>,
    graph_record: Option<PairGraphRecord>,
}

#[derive(Debug, Deserialize)]
struct PairVectorRecord {
    content: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct PairGraphRecord {
    #[serde(default)]
    nodes: Vec<PairNode>,
    #[serde(default)]
    edges: Vec<PairEdge>,
}

#[derive(Debug, Deserialize)]
struct PairNode {
    id: String,
    #[serde(default = "default_node_label")]
    label: String,
    #[serde(default)]
    properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct PairEdge {
    from: String,
    to: String,
    #[serde(rename = "type", default = "default_edge_type")]
    rel_type: String,
}

fn default_node_label() -> String {
    "Entity".to_string()
}

fn default_edge_type() -> String {
    "RELATED_TO".to_string()
}

/// Outcome of one CSV run.
#[derive(Clone, Copy, Debug, Default)]
pub struct PairReport {
    pub processed: usize,
    pub failed: usize,
}

/// Ingestor for query/SQL training pairs.
pub struct PairIngestor {
    provider: Arc<ProviderClient>,
    embeddings: Arc<EmbeddingClient>,
    graph: Arc<dyn GraphBackend>,
    queries: Arc<QueryEmbeddingStore>,
    retry: RetryPolicy,
}

impl PairIngestor {
    pub fn new(
        provider: Arc<ProviderClient>,
        embeddings: Arc<EmbeddingClient>,
        graph: Arc<dyn GraphBackend>,
        queries: Arc<QueryEmbeddingStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            embeddings,
            graph,
            queries,
            retry,
        }
    }

    /// Processes a CSV with `id,query,sql` headers, one row at a time.
    pub async fn ingest_csv(&self, path: &Path) -> Result<PairReport, RagError> {
        let content = fs::read_to_string(path).await?;
        let mut reader = csv::Reader::from_reader(content.as_bytes());
        let rows: Vec<PairRow> = reader
            .deserialize()
            .collect::<Result<_, _>>()
            .map_err(|err| RagError::Validation(format!("malformed CSV: {err}")))?;

        info!(file = %path.display(), rows = rows.len(), "processing query/SQL pairs");

        let mut report = PairReport::default();
        for (index, row) in rows.iter().enumerate() {
            match self.ingest_row(row).await {
                Ok(()) => report.processed += 1,
                Err(err) => {
                    warn!(row = index, id = %row.id, error = %err, "failed to ingest pair row");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn ingest_row(&self, row: &PairRow) -> Result<(), RagError> {
        let user_prompt = format!(
            "Process this data row:\nID: {}\nQuery: {}\nSQL: {}",
            row.id, row.query, row.sql
        );

        let response = retry::with_backoff(self.retry, "pair transformation", || {
            let provider = self.provider.clone();
            let prompt = user_prompt.clone();
            async move {
                provider
                    .complete(
                        &prompt,
                        &CompletionOptions::with_system_prompt(TRANSFORM_SYSTEM_PROMPT),
                    )
                    .await
            }
        })
        .await?;

        let cleaned = strip_markdown_fences(&response);
        let transform: PairTransform = serde_json::from_str(&cleaned)
            .map_err(|err| RagError::Parse(format!("pair transformation output: {err}")))?;

        if let Some(vector_record) = transform.vector_record {
            self.store_vector_record(vector_record).await?;
        }
        if let Some(graph_record) = transform.graph_record {
            self.store_graph_record(graph_record).await?;
        }
        Ok(())
    }

    async fn store_vector_record(&self, record: PairVectorRecord) -> Result<(), RagError> {
        let content = record.content;
        let (question, sql_query) = match content.split_once("| SQL:") {
            Some((question, sql)) => (
                question.replace("Query:", "").trim().to_string(),
                sql.trim().to_string(),
            ),
            None => (content.trim().to_string(), String::new()),
        };

        let embedding = self.embeddings.embed_one(&content).await?;

        let query_type = record
            .metadata
            .get("type")
            .and_then(|value| value.as_str())
            .map(str::to_string);
        let tables = record
            .metadata
            .get("table_refs")
            .and_then(|value| value.as_array())
            .map(|refs| {
                refs.iter()
                    .filter_map(|value| value.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let id = self
            .queries
            .insert(NewQueryEmbedding {
                question: question.clone(),
                sql_query,
                description: Some(content),
                query_type,
                tables,
                joins: None,
                columns: Vec::new(),
                database_schema: None,
                embedding,
            })
            .await?;
        info!(id = %id, question = %question, "stored pair vector record");
        Ok(())
    }

    async fn store_graph_record(&self, record: PairGraphRecord) -> Result<(), RagError> {
        for node in &record.nodes {
            self.graph
                .merge_node(&node.label, &node.id, &node.properties)
                .await?;
        }
        for edge in &record.edges {
            self.graph
                .merge_edge(&edge.from, &edge.to, &edge.rel_type)
                .await?;
        }
        info!(
            nodes = record.nodes.len(),
            edges = record.edges.len(),
            "stored pair graph record"
        );
        Ok(())
    }
}
