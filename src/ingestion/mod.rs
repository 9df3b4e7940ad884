//! Ingestion pipeline: file → chunks → batches → {vectors, graph facts}.
//!
//! Per file the pipeline runs `received → parsed → chunked → batched →
//! {embedded, graph-extracted} → persisted → done`. A parse failure marks the
//! file failed and the run moves to the next file. Within a file, batches run
//! sequentially; inside a batch the embedding/storage path is load-bearing
//! (retried, and a failure aborts the file's remaining batches) while triplet
//! and SQL-snippet enrichment is best-effort and never fails a batch.
//! Batches already committed stay persisted.

pub mod chunking;
pub mod extract;
pub mod pairs;
pub mod progress;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::provider::ProviderClient;
use crate::provider::embeddings::EmbeddingClient;
use crate::retry::{self, RetryPolicy};
use crate::stores::query_embeddings::{NewQueryEmbedding, QueryEmbeddingStore};
use crate::stores::{GraphBackend, VectorBackend, VectorRecord};
use crate::types::RagError;

pub use chunking::{DocumentChunk, DocumentParser, ParsedDocument};
pub use extract::Extractor;
pub use pairs::PairIngestor;
pub use progress::{ProgressEvent, ProgressSink};

/// Sizing of a successfully ingested file.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileOutcome {
    pub total_chunks: usize,
    pub total_batches: usize,
}

/// Per-file result of a multi-file run; failures are isolated per file.
#[derive(Clone, Debug)]
pub struct FileReport {
    pub file_id: String,
    pub status: FileStatus,
}

#[derive(Clone, Debug)]
pub enum FileStatus {
    Done(FileOutcome),
    Failed { error: String },
}

/// Orchestrates parsing, batching, embedding, persistence, and enrichment.
pub struct IngestionPipeline {
    embeddings: Arc<EmbeddingClient>,
    vectors: Arc<dyn VectorBackend>,
    graph: Arc<dyn GraphBackend>,
    queries: Arc<QueryEmbeddingStore>,
    extractor: Extractor,
    parser: Option<Arc<dyn DocumentParser>>,
    batch_size: usize,
    allowed_extensions: Vec<String>,
    retry: RetryPolicy,
}

impl IngestionPipeline {
    pub fn new(
        settings: &Settings,
        provider: Arc<ProviderClient>,
        embeddings: Arc<EmbeddingClient>,
        vectors: Arc<dyn VectorBackend>,
        graph: Arc<dyn GraphBackend>,
        queries: Arc<QueryEmbeddingStore>,
    ) -> Self {
        Self {
            embeddings,
            vectors,
            graph,
            queries,
            extractor: Extractor::new(provider),
            parser: None,
            batch_size: settings.batch_size_embeddings.max(1),
            allowed_extensions: settings.allowed_extensions.clone(),
            retry: settings.retry,
        }
    }

    /// Registers the external structural parser for complex formats.
    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn DocumentParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Ingests each file independently, reporting per-file success/failure.
    pub async fn ingest_files(
        &self,
        paths: &[PathBuf],
        sink: Option<&ProgressSink>,
    ) -> Vec<FileReport> {
        let mut reports = Vec::with_capacity(paths.len());
        for path in paths {
            let file_id = path.display().to_string();
            match self.ingest_file(path, sink).await {
                Ok(outcome) => {
                    info!(
                        file = %file_id,
                        chunks = outcome.total_chunks,
                        batches = outcome.total_batches,
                        "file ingested"
                    );
                    reports.push(FileReport {
                        file_id,
                        status: FileStatus::Done(outcome),
                    });
                }
                Err(err) => {
                    error!(file = %file_id, error = %err, "file ingestion failed");
                    reports.push(FileReport {
                        file_id,
                        status: FileStatus::Failed {
                            error: err.to_string(),
                        },
                    });
                }
            }
        }
        reports
    }

    /// Ingests a single file.
    ///
    /// A core failure in batch N leaves batches `1..N` persisted and never
    /// attempts batches `N+1..`.
    pub async fn ingest_file(
        &self,
        path: &Path,
        sink: Option<&ProgressSink>,
    ) -> Result<FileOutcome, RagError> {
        let file_id = path.display().to_string();
        info!(file = %file_id, "processing file");

        let extension = chunking::extension_of(path);
        if !self.allowed_extensions.iter().any(|allowed| allowed == &extension) {
            return Err(RagError::Validation(format!(
                "file extension `.{extension}` is not allowed"
            )));
        }

        let parsed = match chunking::classify(path) {
            chunking::FileKind::PlainText => {
                let text = chunking::read_text_with_fallback(path).await?;
                ParsedDocument {
                    chunks: chunking::split_paragraphs(&text, &file_id),
                    full_text: Some(text),
                }
            }
            chunking::FileKind::Structured => {
                let parser = self.parser.as_ref().ok_or_else(|| {
                    RagError::Configuration(format!(
                        "no structural parser configured for `.{extension}` files"
                    ))
                })?;
                parser.parse(path).await?
            }
        };

        // Independent side channel; its failure must not abort ingestion.
        if let Some(full_text) = parsed.full_text.as_deref() {
            if !full_text.trim().is_empty() {
                if let Err(err) = self.extract_and_store_sql(full_text, &file_id).await {
                    warn!(file = %file_id, error = %err, "SQL snippet extraction failed");
                }
            }
        }

        let total_chunks = parsed.chunks.len();
        let total_batches = total_chunks.div_ceil(self.batch_size);
        info!(file = %file_id, total_chunks, total_batches, "ingesting chunks");

        for (batch_index, batch) in parsed.chunks.chunks(self.batch_size).enumerate() {
            emit(
                sink,
                ProgressEvent::BatchStarted {
                    file_id: file_id.clone(),
                    total_chunks,
                    total_batches,
                    current_batch: batch_index + 1,
                    chunks_processed: batch_index * self.batch_size,
                    batch_size: batch.len(),
                },
            );

            if let Err(err) = self
                .process_batch(batch, batch_index, total_chunks, total_batches, &file_id, sink)
                .await
            {
                error!(file = %file_id, batch = batch_index, error = %err, "batch failed, aborting file");
                emit(
                    sink,
                    ProgressEvent::BatchFailed {
                        file_id: file_id.clone(),
                        batch_index,
                        error: err.to_string(),
                    },
                );
                return Err(err);
            }
        }

        Ok(FileOutcome {
            total_chunks,
            total_batches,
        })
    }

    async fn process_batch(
        &self,
        batch: &[DocumentChunk],
        batch_index: usize,
        total_chunks: usize,
        total_batches: usize,
        file_id: &str,
        sink: Option<&ProgressSink>,
    ) -> Result<(), RagError> {
        // Drop empty chunks but keep their original indices in the metadata.
        let mut texts = Vec::with_capacity(batch.len());
        let mut indices = Vec::with_capacity(batch.len());
        for chunk in batch {
            let text = chunk.text.trim();
            if !text.is_empty() {
                texts.push(text.to_string());
                indices.push(chunk.chunk_index);
            }
        }
        if texts.is_empty() {
            return Ok(());
        }

        let started = Instant::now();

        let embeddings = retry::with_backoff(self.retry, "batch embedding", || {
            let client = self.embeddings.clone();
            let texts = texts.clone();
            async move { client.embed(&texts).await }
        })
        .await?;

        let records: Vec<VectorRecord> = texts
            .iter()
            .zip(embeddings)
            .zip(&indices)
            .map(|((text, embedding), chunk_index)| {
                VectorRecord::new(
                    text.clone(),
                    json!({"source": file_id, "chunk_id": chunk_index}),
                )
                .with_embedding(embedding)
            })
            .collect();

        retry::with_backoff(self.retry, "batch vector storage", || {
            let vectors = self.vectors.clone();
            let records = records.clone();
            async move { vectors.insert_batch(records).await }
        })
        .await?;

        // One best-effort enrichment task per chunk, joined before the batch
        // is reported complete.
        let triplet_tasks = texts
            .iter()
            .map(|text| self.extract_and_store_triplets(text.clone()));
        join_all(triplet_tasks).await;

        let duration_seconds = started.elapsed().as_secs_f64();
        let chunks_per_second = if duration_seconds > 0.0 {
            texts.len() as f64 / duration_seconds
        } else {
            0.0
        };
        info!(
            file = %file_id,
            batch = batch_index,
            chunks = texts.len(),
            duration_seconds,
            "batch processed"
        );

        emit(
            sink,
            ProgressEvent::BatchCompleted {
                file_id: file_id.to_string(),
                total_chunks,
                total_batches,
                current_batch: batch_index + 1,
                chunks_processed: batch_index * self.batch_size + batch.len(),
                batch_size: texts.len(),
                duration_seconds,
                chunks_per_second,
            },
        );

        Ok(())
    }

    /// Best-effort triplet enrichment for one chunk; all failures are logged
    /// and swallowed here.
    async fn extract_and_store_triplets(&self, text: String) {
        match self.extractor.triplets(&text).await {
            Ok(triplets) => {
                for triplet in triplets {
                    if let Err(err) = self.graph.merge_triplet(&triplet).await {
                        warn!(
                            error = %err,
                            subject = %triplet.subject,
                            predicate = %triplet.predicate,
                            "failed to store triplet, skipping"
                        );
                    }
                }
            }
            Err(err) => warn!(error = %err, "triplet extraction failed for chunk"),
        }
    }

    /// SQL-snippet side channel: each extracted query becomes a fresh
    /// version-1 record in the query-embedding store.
    async fn extract_and_store_sql(&self, full_text: &str, source: &str) -> Result<(), RagError> {
        let snippets = self.extractor.sql_snippets(full_text).await?;
        for snippet in snippets {
            let sql = snippet.sql_query.trim().to_string();
            if sql.is_empty() {
                continue;
            }
            let embedding = self.embeddings.embed_one(&sql).await?;
            let joins = (!snippet.joins.is_empty()).then(|| json!({"joins": snippet.joins}));
            let record = NewQueryEmbedding {
                question: sql.clone(),
                sql_query: sql,
                description: Some(format!("SQL query extracted from {source}")),
                query_type: snippet.query_type.clone(),
                tables: snippet.tables.clone(),
                joins,
                columns: snippet.columns.clone(),
                database_schema: Some("public".to_string()),
                embedding,
            };
            let tables = record.tables.len();
            let id = self.queries.insert(record).await?;
            info!(
                id = %id,
                query_type = snippet.query_type.as_deref().unwrap_or("unknown"),
                tables,
                "stored extracted SQL query"
            );
        }
        Ok(())
    }
}

fn emit(sink: Option<&ProgressSink>, event: ProgressEvent) {
    if let Some(sink) = sink {
        sink(event);
    }
}
