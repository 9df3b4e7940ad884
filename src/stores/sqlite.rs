//! SQLite vector store backed by the `sqlite-vec` extension.
//!
//! Chunk rows live in a plain `chunks` table; their embeddings live in a
//! `vec0` virtual table joined by rowid. Batch inserts run inside a single
//! transaction so a batch is all-or-nothing, and similarity search orders by
//! `vec_distance_cosine` ascending.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use async_trait::async_trait;
use tokio_rusqlite::{Connection, ffi};

use super::{VectorBackend, VectorRecord};
use crate::types::RagError;

pub struct SqliteVectorStore {
    conn: Connection,
    dimension: usize,
}

impl SqliteVectorStore {
    /// Opens (creating if needed) the store at `path` for vectors of the
    /// given dimension.
    pub async fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self, RagError> {
        register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| RagError::Storage(err.to_string()))?;

        // Fail fast if the extension did not load.
        conn.call(|conn| {
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))?;
            Ok(())
        })
        .await
        .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))?;

        let store = Self { conn, dimension };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), RagError> {
        let dimension = self.dimension;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS chunks (
                        id TEXT PRIMARY KEY,
                        content TEXT NOT NULL,
                        metadata TEXT NOT NULL DEFAULT '{}'
                    )",
                    [],
                )?;
                conn.execute(
                    &format!(
                        "CREATE VIRTUAL TABLE IF NOT EXISTS chunks_embeddings
                         USING vec0(embedding float[{dimension}])"
                    ),
                    [],
                )?;
                Ok(())
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }

    /// Shared connection handle for queries outside the [`VectorBackend`]
    /// surface (e.g. the query-embedding store on the same database file).
    pub fn connection(&self) -> Connection {
        self.conn.clone()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

#[async_trait]
impl VectorBackend for SqliteVectorStore {
    async fn insert_batch(&self, records: Vec<VectorRecord>) -> Result<(), RagError> {
        if records.is_empty() {
            return Ok(());
        }
        let dimension = self.dimension;
        // Serialize rows up front so the transaction closure stays pure SQL.
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let embedding = record.embedding.ok_or_else(|| {
                RagError::Validation(format!("record {} has no embedding", record.id))
            })?;
            if embedding.len() != dimension {
                return Err(RagError::Validation(format!(
                    "record {} has dimension {} (store expects {dimension})",
                    record.id,
                    embedding.len()
                )));
            }
            let embedding_json = serde_json::to_string(&embedding)
                .map_err(|err| RagError::Storage(err.to_string()))?;
            rows.push((record.id, record.content, record.metadata.to_string(), embedding_json));
        }

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for (id, content, metadata, embedding_json) in rows {
                    tx.execute(
                        "INSERT INTO chunks (id, content, metadata) VALUES (?, ?, ?)",
                        (&id, &content, &metadata),
                    )?;
                    let rowid = tx.last_insert_rowid();
                    tx.execute(
                        "INSERT INTO chunks_embeddings (rowid, embedding) VALUES (?, vec_f32(?))",
                        (rowid, &embedding_json),
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }

    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<(VectorRecord, f32)>, RagError> {
        let embedding_json =
            serde_json::to_string(embedding).map_err(|err| RagError::Storage(err.to_string()))?;

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT c.id, c.content, c.metadata,
                            vec_distance_cosine(e.embedding, vec_f32(?)) AS distance
                     FROM chunks c
                     JOIN chunks_embeddings e ON e.rowid = c.rowid
                     ORDER BY distance ASC
                     LIMIT {top_k}"
                ))?;

                let rows = stmt.query_map([&embedding_json], |row| {
                    let metadata: String = row.get(2)?;
                    let record = VectorRecord {
                        id: row.get(0)?,
                        content: row.get(1)?,
                        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
                        embedding: None,
                    };
                    let distance: f32 = row.get(3)?;
                    Ok((record, distance))
                })?;

                let mut results = Vec::new();
                for row in rows {
                    results.push(row?);
                }
                Ok(results)
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }

    async fn truncate(&self) -> Result<(), RagError> {
        self.conn
            .call(|conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM chunks", [])?;
                tx.execute("DELETE FROM chunks_embeddings", [])?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }

    async fn count(&self) -> Result<usize, RagError> {
        self.conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| RagError::Storage(err.to_string()))
    }
}

/// Registers sqlite-vec as an auto extension, once per process.
pub(crate) fn register_sqlite_vec() -> Result<(), RagError> {
    use std::sync::Mutex;

    static INIT: Once = Once::new();
    static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

    INIT.call_once(|| {
        let result = unsafe {
            type SqliteExtensionInit = unsafe extern "C" fn(
                *mut ffi::sqlite3,
                *mut *mut c_char,
                *const ffi::sqlite3_api_routines,
            ) -> i32;

            let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
            let init_fn: SqliteExtensionInit =
                transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
            let rc = ffi::sqlite3_auto_extension(Some(init_fn));
            if rc != 0 {
                Err(format!("failed to register sqlite-vec extension (code {rc})"))
            } else {
                Ok(())
            }
        };
        *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
    });

    INIT_RESULT
        .lock()
        .expect("init result mutex poisoned")
        .clone()
        .expect("init was called but result not set")
        .map_err(RagError::Storage)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    async fn open_store(dimension: usize) -> (SqliteVectorStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SqliteVectorStore::open(dir.path().join("vectors.sqlite"), dimension)
            .await
            .unwrap();
        (store, dir)
    }

    fn record(content: &str, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord::new(content, json!({"source": "test"})).with_embedding(embedding)
    }

    #[tokio::test]
    async fn insert_count_and_truncate() {
        let (store, _dir) = open_store(3).await;
        store
            .insert_batch(vec![
                record("a", vec![1.0, 0.0, 0.0]),
                record("b", vec![0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        store.truncate().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn search_orders_by_ascending_cosine_distance() {
        let (store, _dir) = open_store(3).await;
        store
            .insert_batch(vec![
                record("east", vec![1.0, 0.0, 0.0]),
                record("north", vec![0.0, 1.0, 0.0]),
                record("northeast", vec![0.7071, 0.7071, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.content, "east");
        assert_eq!(hits[1].0.content, "northeast");
        assert!(hits[0].1 <= hits[1].1);
    }

    #[tokio::test]
    async fn batch_with_invalid_row_persists_nothing() {
        let (store, _dir) = open_store(3).await;
        let result = store
            .insert_batch(vec![
                record("good", vec![1.0, 0.0, 0.0]),
                VectorRecord::new("missing embedding", json!({})),
            ])
            .await;

        assert!(matches!(result, Err(RagError::Validation(_))));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_content_creates_distinct_rows() {
        let (store, _dir) = open_store(3).await;
        store
            .insert_batch(vec![record("same", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();
        store
            .insert_batch(vec![record("same", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }
}
