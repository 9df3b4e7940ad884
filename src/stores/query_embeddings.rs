//! Versioned store of natural-language/SQL query pairs.
//!
//! Records are never hard-deleted in normal operation. Updates happen by
//! supersession: a new row is appended with a bumped version and the old row
//! is flipped inactive with a pointer to its successor, keeping the lineage
//! auditable. Within one lineage exactly one record is active and its version
//! is the chain maximum.

use std::path::Path;

use chrono::Utc;
use tokio_rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::types::RagError;

/// Fields for a fresh (version 1, active) record.
#[derive(Clone, Debug, Default)]
pub struct NewQueryEmbedding {
    pub question: String,
    pub sql_query: String,
    pub description: Option<String>,
    pub query_type: Option<String>,
    pub tables: Vec<String>,
    pub joins: Option<serde_json::Value>,
    pub columns: Vec<String>,
    pub database_schema: Option<String>,
    pub embedding: Vec<f32>,
}

/// A stored row of the lineage.
#[derive(Clone, Debug)]
pub struct QueryEmbeddingRecord {
    pub id: String,
    pub question: String,
    pub sql_query: String,
    pub description: Option<String>,
    pub query_type: Option<String>,
    pub tables: Vec<String>,
    pub joins: Option<serde_json::Value>,
    pub columns: Vec<String>,
    pub database_schema: Option<String>,
    pub embedding: Vec<f32>,
    pub version: i64,
    pub is_active: bool,
    pub superseded_by: Option<String>,
    pub created_at: String,
}

/// Field overrides for [`QueryEmbeddingStore::supersede`]; `None` inherits
/// the superseded record's value.
#[derive(Clone, Debug, Default)]
pub struct SupersedeChanges {
    pub question: Option<String>,
    pub sql_query: Option<String>,
    pub description: Option<String>,
    pub query_type: Option<String>,
    pub tables: Option<Vec<String>>,
    pub joins: Option<serde_json::Value>,
    pub columns: Option<Vec<String>>,
    pub embedding: Option<Vec<f32>>,
}

/// Search filters; the default searches active rows with no type or table
/// restriction.
#[derive(Clone, Debug, Default)]
pub struct QueryFilters {
    /// Exact match on `query_type`.
    pub query_type: Option<String>,
    /// Keep rows whose table list intersects this one.
    pub tables_overlap: Vec<String>,
    /// Include superseded rows.
    pub include_inactive: bool,
}

const RECORD_COLUMNS: &str = "id, question, sql_query, description, query_type, \
     associated_tables, table_links, used_columns, database_schema, embedding, \
     version, is_active, superseded_by, created_at";

pub struct QueryEmbeddingStore {
    conn: Connection,
}

impl QueryEmbeddingStore {
    /// Opens the store at `path`, creating the schema if needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RagError> {
        super::sqlite::register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| RagError::Storage(err.to_string()))?;
        Self::with_connection(conn).await
    }

    /// Builds the store over an existing connection (e.g. the vector store's
    /// database file).
    pub async fn with_connection(conn: Connection) -> Result<Self, RagError> {
        conn.call(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS query_embeddings (
                    id TEXT PRIMARY KEY,
                    question TEXT NOT NULL,
                    sql_query TEXT NOT NULL,
                    description TEXT,
                    query_type TEXT,
                    associated_tables TEXT NOT NULL DEFAULT '[]',
                    table_links TEXT,
                    used_columns TEXT NOT NULL DEFAULT '[]',
                    database_schema TEXT,
                    embedding TEXT NOT NULL,
                    version INTEGER NOT NULL DEFAULT 1,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    superseded_by TEXT,
                    created_at TEXT NOT NULL
                )",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_query_embeddings_active
                 ON query_embeddings(is_active)",
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_query_embeddings_type
                 ON query_embeddings(query_type)",
                [],
            )?;
            Ok(())
        })
        .await
        .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))?;

        Ok(Self { conn })
    }

    /// Inserts a fresh record and returns its id.
    pub async fn insert(&self, record: NewQueryEmbedding) -> Result<String, RagError> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339();
        let tables_json = serde_json::to_string(&record.tables)
            .map_err(|err| RagError::Storage(err.to_string()))?;
        let columns_json = serde_json::to_string(&record.columns)
            .map_err(|err| RagError::Storage(err.to_string()))?;
        let joins_json = record.joins.as_ref().map(|value| value.to_string());
        let embedding_json = serde_json::to_string(&record.embedding)
            .map_err(|err| RagError::Storage(err.to_string()))?;

        let inserted_id = id.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO query_embeddings (
                        id, question, sql_query, description, query_type,
                        associated_tables, table_links, used_columns, database_schema,
                        embedding, version, is_active, created_at
                     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, 1, ?)",
                    (
                        &inserted_id,
                        &record.question,
                        &record.sql_query,
                        &record.description,
                        &record.query_type,
                        &tables_json,
                        &joins_json,
                        &columns_json,
                        &record.database_schema,
                        &embedding_json,
                        &created_at,
                    ),
                )?;
                Ok(())
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))?;

        Ok(id)
    }

    /// Fetches one record by id.
    pub async fn get(&self, id: &str) -> Result<Option<QueryEmbeddingRecord>, RagError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let record = conn
                    .query_row(
                        &format!("SELECT {RECORD_COLUMNS} FROM query_embeddings WHERE id = ?"),
                        [&id],
                        |row| {
                            Ok(RawRecord {
                                id: row.get(0)?,
                                question: row.get(1)?,
                                sql_query: row.get(2)?,
                                description: row.get(3)?,
                                query_type: row.get(4)?,
                                tables_json: row.get(5)?,
                                joins_json: row.get(6)?,
                                columns_json: row.get(7)?,
                                database_schema: row.get(8)?,
                                embedding_json: row.get(9)?,
                                version: row.get(10)?,
                                is_active: row.get(11)?,
                                superseded_by: row.get(12)?,
                                created_at: row.get(13)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(record)
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
            .map(|raw| raw.map(RawRecord::into_record))
    }

    /// Ranks records by ascending cosine distance to `embedding`.
    pub async fn search(
        &self,
        embedding: &[f32],
        limit: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<(QueryEmbeddingRecord, f32)>, RagError> {
        let embedding_json =
            serde_json::to_string(embedding).map_err(|err| RagError::Storage(err.to_string()))?;
        let type_filter = filters.query_type.clone().unwrap_or_default();
        let tables_json = serde_json::to_string(&filters.tables_overlap)
            .map_err(|err| RagError::Storage(err.to_string()))?;
        let include_inactive = i64::from(filters.include_inactive);

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RECORD_COLUMNS},
                            vec_distance_cosine(vec_f32(embedding), vec_f32(?1)) AS distance
                     FROM query_embeddings
                     WHERE (is_active = 1 OR ?4 = 1)
                       AND (?2 = '' OR query_type = ?2)
                       AND (?3 = '[]' OR EXISTS (
                            SELECT 1 FROM json_each(query_embeddings.associated_tables) AS jt
                            WHERE jt.value IN (SELECT value FROM json_each(?3))))
                     ORDER BY distance ASC
                     LIMIT {limit}"
                ))?;

                let rows = stmt.query_map(
                    (&embedding_json, &type_filter, &tables_json, include_inactive),
                    |row| {
                        let raw = RawRecord {
                            id: row.get(0)?,
                            question: row.get(1)?,
                            sql_query: row.get(2)?,
                            description: row.get(3)?,
                            query_type: row.get(4)?,
                            tables_json: row.get(5)?,
                            joins_json: row.get(6)?,
                            columns_json: row.get(7)?,
                            database_schema: row.get(8)?,
                            embedding_json: row.get(9)?,
                            version: row.get(10)?,
                            is_active: row.get(11)?,
                            superseded_by: row.get(12)?,
                            created_at: row.get(13)?,
                        };
                        let distance: f32 = row.get(14)?;
                        Ok((raw, distance))
                    },
                )?;

                let mut results = Vec::new();
                for row in rows {
                    let (raw, distance) = row?;
                    results.push((raw.into_record(), distance));
                }
                Ok(results)
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }

    /// Atomically replaces the active record `old_id` with a successor.
    ///
    /// The new row inherits any field not overridden in `changes`, carries
    /// `version = old.version + 1`, and becomes the lineage's single active
    /// record; the old row is flipped inactive and points at the new id.
    pub async fn supersede(
        &self,
        old_id: &str,
        changes: SupersedeChanges,
    ) -> Result<String, RagError> {
        let requested_id = old_id.to_string();
        let old_id = old_id.to_string();
        let new_id = Uuid::new_v4().to_string();
        let created_at = Utc::now().to_rfc3339();

        let tables_json = match &changes.tables {
            Some(tables) => Some(
                serde_json::to_string(tables).map_err(|err| RagError::Storage(err.to_string()))?,
            ),
            None => None,
        };
        let columns_json = match &changes.columns {
            Some(columns) => Some(
                serde_json::to_string(columns).map_err(|err| RagError::Storage(err.to_string()))?,
            ),
            None => None,
        };
        let embedding_json = match &changes.embedding {
            Some(embedding) => Some(
                serde_json::to_string(embedding)
                    .map_err(|err| RagError::Storage(err.to_string()))?,
            ),
            None => None,
        };
        let joins_json = changes.joins.as_ref().map(|value| value.to_string());

        let returned_id = new_id.clone();
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let old = tx
                    .query_row(
                        &format!("SELECT {RECORD_COLUMNS} FROM query_embeddings WHERE id = ?"),
                        [&old_id],
                        |row| {
                            Ok(RawRecord {
                                id: row.get(0)?,
                                question: row.get(1)?,
                                sql_query: row.get(2)?,
                                description: row.get(3)?,
                                query_type: row.get(4)?,
                                tables_json: row.get(5)?,
                                joins_json: row.get(6)?,
                                columns_json: row.get(7)?,
                                database_schema: row.get(8)?,
                                embedding_json: row.get(9)?,
                                version: row.get(10)?,
                                is_active: row.get(11)?,
                                superseded_by: row.get(12)?,
                                created_at: row.get(13)?,
                            })
                        },
                    )
                    .optional()?;

                let Some(old) = old else {
                    return Ok(None);
                };

                tx.execute(
                    "INSERT INTO query_embeddings (
                        id, question, sql_query, description, query_type,
                        associated_tables, table_links, used_columns, database_schema,
                        embedding, version, is_active, created_at
                     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
                    (
                        &new_id,
                        changes.question.as_ref().unwrap_or(&old.question),
                        changes.sql_query.as_ref().unwrap_or(&old.sql_query),
                        changes.description.as_ref().or(old.description.as_ref()),
                        changes.query_type.as_ref().or(old.query_type.as_ref()),
                        tables_json.as_ref().unwrap_or(&old.tables_json),
                        joins_json.as_ref().or(old.joins_json.as_ref()),
                        columns_json.as_ref().unwrap_or(&old.columns_json),
                        &old.database_schema,
                        embedding_json.as_ref().unwrap_or(&old.embedding_json),
                        old.version + 1,
                        &created_at,
                    ),
                )?;

                tx.execute(
                    "UPDATE query_embeddings SET is_active = 0, superseded_by = ? WHERE id = ?",
                    (&new_id, &old_id),
                )?;

                tx.commit()?;
                Ok(Some(()))
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))?;

        match outcome {
            Some(()) => Ok(returned_id),
            None => Err(RagError::Validation(format!(
                "cannot supersede unknown record {requested_id}"
            ))),
        }
    }

    /// Marks one record inactive without appending a successor.
    pub async fn deactivate(&self, id: &str) -> Result<(), RagError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE query_embeddings SET is_active = 0 WHERE id = ?",
                    [&id],
                )?;
                Ok(())
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }

    /// Total stored records, active and superseded.
    pub async fn count(&self) -> Result<usize, RagError> {
        self.conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM query_embeddings", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }
}

/// Row image with JSON columns still serialized, shared by reads and the
/// supersession inherit step.
struct RawRecord {
    id: String,
    question: String,
    sql_query: String,
    description: Option<String>,
    query_type: Option<String>,
    tables_json: String,
    joins_json: Option<String>,
    columns_json: String,
    database_schema: Option<String>,
    embedding_json: String,
    version: i64,
    is_active: bool,
    superseded_by: Option<String>,
    created_at: String,
}

impl RawRecord {
    fn into_record(self) -> QueryEmbeddingRecord {
        QueryEmbeddingRecord {
            id: self.id,
            question: self.question,
            sql_query: self.sql_query,
            description: self.description,
            query_type: self.query_type,
            tables: serde_json::from_str(&self.tables_json).unwrap_or_default(),
            joins: self
                .joins_json
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok()),
            columns: serde_json::from_str(&self.columns_json).unwrap_or_default(),
            database_schema: self.database_schema,
            embedding: serde_json::from_str(&self.embedding_json).unwrap_or_default(),
            version: self.version,
            is_active: self.is_active,
            superseded_by: self.superseded_by,
            created_at: self.created_at,
        }
    }
}
