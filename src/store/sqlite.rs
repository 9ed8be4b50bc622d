//! SQLite-backed incident chunk store with vector search via `sqlite-vec`.
//!
//! Layout: a plain `chunks` table carries the business columns and a `vec0`
//! virtual table (`chunks_vec`) carries the embeddings, joined on the chunk
//! rowid. The embedding dimension is recorded in `store_meta` at bootstrap
//! and verified on every [`VectorStore::ensure_schema`] call; a store is
//! bound to exactly one dimension for its lifetime.

use std::collections::HashSet;
use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use tokio_rusqlite::{Connection, OptionalExtension, ffi, params};

use super::{ChunkHit, NewChunk, StoredChunk, VectorStore};
use crate::types::{RetrievalError, Result};

/// Display snippet length computed in SQL for search hits.
///
/// Derived from `text_chunk` at query time so rows inserted without a stored
/// snippet (reconciled tickets) still render a preview.
const HIT_SNIPPET_CHARS: usize = 300;

/// Incident chunk store on a single SQLite database file.
#[derive(Clone)]
pub struct SqliteIncidentStore {
    conn: Connection,
    dimension: usize,
}

impl SqliteIncidentStore {
    /// Opens (or creates) the store at `path` and bootstraps the schema for
    /// the given embedding dimension.
    ///
    /// Registers the `sqlite-vec` extension process-wide on first use and
    /// verifies it loaded by querying `vec_version()`.
    pub async fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| RetrievalError::Store(err.to_string()))?;
        conn.call(|conn| {
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))?;
            Ok::<_, tokio_rusqlite::Error>(())
        })
        .await
        .map_err(|err| RetrievalError::Store(err.to_string()))?;

        let store = Self { conn, dimension };
        store.ensure_schema(dimension).await?;
        Ok(store)
    }

    /// Embedding dimension this store was opened with.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Underlying connection, for diagnostics and ad-hoc queries.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn register_sqlite_vec() -> Result<()> {
        use std::sync::Mutex;

        static INIT: Once = Once::new();
        static INIT_RESULT: Mutex<Option<std::result::Result<(), String>>> = Mutex::new(None);

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
                    Err(format!(
                        "failed to register sqlite-vec extension (code {rc})"
                    ))
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
            .map_err(RetrievalError::Store)
    }
}

fn embedding_json(embedding: &[f32]) -> Result<String> {
    serde_json::to_string(embedding).map_err(|err| RetrievalError::Store(err.to_string()))
}

#[async_trait::async_trait]
impl VectorStore for SqliteIncidentStore {
    async fn ensure_schema(&self, dimension: usize) -> Result<()> {
        let stored = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS store_meta (
                        key   TEXT PRIMARY KEY,
                        value TEXT NOT NULL
                    )",
                    [],
                )?;
                let stored: Option<String> = conn
                    .query_row(
                        "SELECT value FROM store_meta WHERE key = 'embedding_dim'",
                        [],
                        |row| row.get(0),
                    )
                    .optional()?;

                let compatible = stored
                    .as_deref()
                    .and_then(|value| value.parse::<usize>().ok())
                    .is_none_or(|existing| existing == dimension);
                if compatible {
                    conn.execute_batch(&format!(
                        "CREATE TABLE IF NOT EXISTS chunks (
                            id         INTEGER PRIMARY KEY,
                            issue_key  TEXT NOT NULL,
                            service    TEXT,
                            snippet    TEXT,
                            text_chunk TEXT NOT NULL,
                            text_hash  TEXT UNIQUE,
                            created_at TEXT NOT NULL DEFAULT (datetime('now'))
                        );
                        CREATE INDEX IF NOT EXISTS idx_chunks_issue_key
                            ON chunks(issue_key);
                        CREATE VIRTUAL TABLE IF NOT EXISTS chunks_vec
                            USING vec0(embedding float[{dimension}]);"
                    ))?;
                    conn.execute(
                        "INSERT OR IGNORE INTO store_meta(key, value)
                         VALUES ('embedding_dim', ?1)",
                        [dimension.to_string()],
                    )?;
                }
                Ok(stored)
            })
            .await?;

        if let Some(existing) = stored.and_then(|value| value.parse::<usize>().ok()) {
            if existing != dimension {
                return Err(RetrievalError::Schema(format!(
                    "store is bound to embedding dimension {existing}, provider produces \
                     {dimension}; recreate the store for the new model"
                )));
            }
        }
        Ok(())
    }

    async fn count_rows(&self) -> Result<u64> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count as u64)
    }

    async fn upsert_chunk(&self, chunk: NewChunk) -> Result<bool> {
        let embedding = embedding_json(&chunk.embedding)?;
        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let changed = tx.execute(
                    "INSERT OR IGNORE INTO chunks
                         (issue_key, service, snippet, text_chunk, text_hash)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        chunk.issue_key,
                        chunk.service,
                        chunk.snippet,
                        chunk.text_chunk,
                        chunk.text_hash,
                    ],
                )?;
                if changed == 0 {
                    // Duplicate content hash: silent no-op by contract.
                    return Ok(false);
                }
                let rowid = tx.last_insert_rowid();
                tx.execute(
                    "INSERT INTO chunks_vec(rowid, embedding) VALUES (?1, ?2)",
                    params![rowid, embedding],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;
        Ok(inserted)
    }

    async fn existing_issue_keys(&self) -> Result<HashSet<String>> {
        let keys = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT DISTINCT issue_key FROM chunks")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                let mut keys = HashSet::new();
                for key in rows {
                    keys.insert(key?);
                }
                Ok(keys)
            })
            .await?;
        Ok(keys)
    }

    async fn all_chunks(&self) -> Result<Vec<StoredChunk>> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT issue_key, service, snippet, text_chunk, text_hash
                     FROM chunks ORDER BY id",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(StoredChunk {
                        issue_key: row.get(0)?,
                        service: row.get(1)?,
                        snippet: row.get(2)?,
                        text_chunk: row.get(3)?,
                        text_hash: row.get(4)?,
                    })
                })?;
                let mut chunks = Vec::new();
                for chunk in rows {
                    chunks.push(chunk?);
                }
                Ok(chunks)
            })
            .await?;
        Ok(rows)
    }

    async fn nearest_neighbors(
        &self,
        query: &[f32],
        limit: usize,
        service_filter: Option<&str>,
    ) -> Result<Vec<ChunkHit>> {
        let query_json = embedding_json(query)?;
        let service = service_filter.map(str::to_owned);
        let hits = self
            .conn
            .call(move |conn| {
                // Per issue_key keep only its closest chunk. With a bare
                // column next to MIN(), SQLite evaluates the snippet on the
                // same row that produced the minimum distance.
                let mut stmt = conn.prepare(&format!(
                    "SELECT c.issue_key,
                            substr(replace(c.text_chunk, char(10), ' '), 1, {HIT_SNIPPET_CHARS})
                                AS snippet,
                            MIN(vec_distance_cosine(v.embedding, vec_f32(?1))) AS distance
                     FROM chunks AS c
                     JOIN chunks_vec AS v ON v.rowid = c.id
                     WHERE ?2 IS NULL OR c.service = ?2
                     GROUP BY c.issue_key
                     ORDER BY distance ASC
                     LIMIT ?3"
                ))?;
                let rows = stmt.query_map(
                    params![query_json, service, limit as i64],
                    |row| {
                        let issue_key: String = row.get(0)?;
                        let snippet: String = row.get(1)?;
                        let distance: f64 = row.get(2)?;
                        Ok(ChunkHit {
                            issue_key,
                            snippet,
                            // Cosine distance in [0, 2]; flip so higher is
                            // better and identical vectors score 1.0.
                            score: (1.0 - distance) as f32,
                        })
                    },
                )?;
                let mut hits = Vec::new();
                for hit in rows {
                    hits.push(hit?);
                }
                Ok(hits)
            })
            .await?;
        Ok(hits)
    }

    async fn insert_raw(&self, issue_key: &str, text: &str, embedding: &[f32]) -> Result<()> {
        let embedding = embedding_json(embedding)?;
        let issue_key = issue_key.to_owned();
        let text = text.to_owned();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO chunks (issue_key, text_chunk) VALUES (?1, ?2)",
                    params![issue_key, text],
                )?;
                let rowid = tx.last_insert_rowid();
                tx.execute(
                    "INSERT INTO chunks_vec(rowid, embedding) VALUES (?1, ?2)",
                    params![rowid, embedding],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn chunk(issue_key: &str, text: &str, hash: &str, embedding: Vec<f32>) -> NewChunk {
        NewChunk {
            issue_key: issue_key.to_string(),
            service: None,
            snippet: text.to_string(),
            text_chunk: text.to_string(),
            text_hash: hash.to_string(),
            embedding,
        }
    }

    #[tokio::test]
    async fn schema_bootstrap_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = SqliteIncidentStore::open(dir.path().join("idx.sqlite"), 3)
            .await
            .unwrap();
        store.ensure_schema(3).await.unwrap();
        store.ensure_schema(3).await.unwrap();
        assert_eq!(store.count_rows().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_a_schema_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx.sqlite");
        let store = SqliteIncidentStore::open(&path, 3).await.unwrap();
        drop(store);

        let err = match SqliteIncidentStore::open(&path, 4).await {
            Ok(_) => panic!("open accepted a mismatched embedding dimension"),
            Err(err) => err,
        };
        assert!(matches!(err, RetrievalError::Schema(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn duplicate_hash_is_a_silent_noop() {
        let dir = tempdir().unwrap();
        let store = SqliteIncidentStore::open(dir.path().join("idx.sqlite"), 3)
            .await
            .unwrap();

        let first = store
            .upsert_chunk(chunk("SD-1", "disk full", "h1", vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        let second = store
            .upsert_chunk(chunk("SD-1", "disk full", "h1", vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(store.count_rows().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn neighbors_collapse_to_one_hit_per_ticket() {
        let dir = tempdir().unwrap();
        let store = SqliteIncidentStore::open(dir.path().join("idx.sqlite"), 3)
            .await
            .unwrap();

        // Two chunks for SD-1, one of them an exact match for the query.
        store
            .upsert_chunk(chunk("SD-1", "vpn drops hourly", "h1", vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        store
            .upsert_chunk(chunk("SD-1", "client retries fail", "h2", vec![0.8, 0.6, 0.0]))
            .await
            .unwrap();
        store
            .upsert_chunk(chunk("SD-2", "printer jam", "h3", vec![0.0, 1.0, 0.0]))
            .await
            .unwrap();

        let hits = store
            .nearest_neighbors(&[1.0, 0.0, 0.0], 10, None)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].issue_key, "SD-1");
        assert_eq!(hits[0].snippet, "vpn drops hourly");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].issue_key, "SD-2");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn service_filter_restricts_hits() {
        let dir = tempdir().unwrap();
        let store = SqliteIncidentStore::open(dir.path().join("idx.sqlite"), 3)
            .await
            .unwrap();

        let mut network = chunk("SD-1", "vpn drops hourly", "h1", vec![1.0, 0.0, 0.0]);
        network.service = Some("network".to_string());
        let mut desktop = chunk("SD-2", "printer jam", "h2", vec![0.9, 0.1, 0.0]);
        desktop.service = Some("desktop".to_string());
        store.upsert_chunk(network).await.unwrap();
        store.upsert_chunk(desktop).await.unwrap();

        let hits = store
            .nearest_neighbors(&[1.0, 0.0, 0.0], 10, Some("desktop"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].issue_key, "SD-2");
    }

    #[tokio::test]
    async fn raw_inserts_are_searchable_without_snippet() {
        let dir = tempdir().unwrap();
        let store = SqliteIncidentStore::open(dir.path().join("idx.sqlite"), 3)
            .await
            .unwrap();

        store
            .insert_raw("SD-9", "mail relay rejects outbound", &[0.0, 0.0, 1.0])
            .await
            .unwrap();

        let keys = store.existing_issue_keys().await.unwrap();
        assert!(keys.contains("SD-9"));

        let hits = store
            .nearest_neighbors(&[0.0, 0.0, 1.0], 5, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].snippet, "mail relay rejects outbound");
    }
}
