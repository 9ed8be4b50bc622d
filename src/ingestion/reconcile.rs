//! Reconciliation of staged ticket batches into the vector store.
//!
//! Reconciliation dedups at ticket granularity, coarser than the
//! content-hash dedup of the chunking pipeline: an issue key that is already
//! present is never re-embedded, even if its text has changed since. The
//! operation is safely re-runnable rather than atomic; rows inserted before
//! a mid-batch failure remain and the next run skips them.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::embedding::EmbeddingProvider;
use crate::store::VectorStore;
use crate::types::{RetrievalError, Result};

/// Longest accepted issue key; anything longer is treated as malformed.
const MAX_ISSUE_KEY_CHARS: usize = 128;

/// One staged `(issue_key, text)` pair awaiting reconciliation.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct StagedTicket {
    pub issue_key: String,
    pub text: String,
}

impl StagedTicket {
    fn normalized(mut self) -> Option<Self> {
        self.issue_key = self.issue_key.trim().to_string();
        self.text = self.text.trim().to_string();
        if self.issue_key.is_empty()
            || self.text.is_empty()
            || self.issue_key.chars().count() > MAX_ISSUE_KEY_CHARS
        {
            return None;
        }
        Some(self)
    }
}

/// Source of staged ticket batches (file drops, webhook spools, queues).
#[async_trait]
pub trait BatchSource: Send + Sync {
    /// Returns all currently staged tickets. Malformed records are dropped
    /// by the implementation, never surfaced as batch errors.
    async fn staged_tickets(&self) -> Result<Vec<StagedTicket>>;
}

/// Reads staged tickets from every `*.jsonl` file in a drop directory.
///
/// One JSON object per line, `{"issue_key": "...", "text": "..."}`. Lines
/// that fail to parse are logged and skipped; a missing directory is an
/// empty batch, not an error.
#[derive(Clone, Debug)]
pub struct JsonLinesDirSource {
    dir: PathBuf,
}

impl JsonLinesDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl BatchSource for JsonLinesDirSource {
    async fn staged_tickets(&self) -> Result<Vec<StagedTicket>> {
        let mut tickets = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(tickets),
            Err(err) => return Err(err.into()),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let data = tokio::fs::read_to_string(&path).await?;
            for (line_no, line) in data.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<StagedTicket>(line) {
                    Ok(ticket) => {
                        if let Some(ticket) = ticket.normalized() {
                            tickets.push(ticket);
                        } else {
                            tracing::warn!(
                                file = %path.display(),
                                line = line_no + 1,
                                "dropping staged ticket with empty or oversized fields"
                            );
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            file = %path.display(),
                            line = line_no + 1,
                            error = %err,
                            "dropping malformed staged record"
                        );
                    }
                }
            }
        }
        Ok(tickets)
    }
}

/// Merges staged ticket batches into the store, skipping present tickets.
pub struct ReconcileIngestor<S> {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    source: S,
}

impl<S: BatchSource> ReconcileIngestor<S> {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>, source: S) -> Self {
        Self {
            embedder,
            store,
            source,
        }
    }

    /// Runs one reconciliation pass and returns the number of rows added.
    ///
    /// Returns 0 (not an error) when the staging area is empty or every
    /// staged key is already indexed. Provider and store failures abort the
    /// remaining batch and propagate; there is no compensating rollback.
    pub async fn reconcile_batch(&self) -> Result<usize> {
        let staged = self.source.staged_tickets().await?;
        if staged.is_empty() {
            return Ok(0);
        }

        let existing = self.store.existing_issue_keys().await?;
        let mut seen_in_batch = HashSet::new();
        let to_insert: Vec<StagedTicket> = staged
            .into_iter()
            .filter(|ticket| {
                !existing.contains(&ticket.issue_key)
                    && seen_in_batch.insert(ticket.issue_key.clone())
            })
            .collect();
        if to_insert.is_empty() {
            tracing::debug!("reconcile batch: every staged ticket already present");
            return Ok(0);
        }

        // One provider round-trip for the whole batch.
        let texts: Vec<String> = to_insert.iter().map(|ticket| ticket.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != to_insert.len() {
            return Err(RetrievalError::Embedding(format!(
                "provider returned {} vectors for {} staged tickets",
                embeddings.len(),
                to_insert.len()
            )));
        }

        let mut inserted = 0;
        for (ticket, embedding) in to_insert.iter().zip(embeddings) {
            self.store
                .insert_raw(&ticket.issue_key, &ticket.text, &embedding)
                .await?;
            inserted += 1;
        }
        tracing::info!(inserted, "reconcile batch complete");
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::store::{ChunkHit, NewChunk, StoredChunk};

    struct StaticSource(Vec<StagedTicket>);

    #[async_trait]
    impl BatchSource for StaticSource {
        async fn staged_tickets(&self) -> Result<Vec<StagedTicket>> {
            Ok(self.0.clone())
        }
    }

    /// Buggy provider that drops the last vector of every batch.
    struct TruncatingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for TruncatingEmbedder {
        fn id(&self) -> &str {
            "truncating"
        }

        fn dimension(&self) -> usize {
            3
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().skip(1).map(|_| vec![1.0, 0.0, 0.0]).collect())
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        inserted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl VectorStore for RecordingStore {
        async fn ensure_schema(&self, _dimension: usize) -> Result<()> {
            Ok(())
        }

        async fn count_rows(&self) -> Result<u64> {
            Ok(self.inserted.lock().unwrap().len() as u64)
        }

        async fn upsert_chunk(&self, _chunk: NewChunk) -> Result<bool> {
            Ok(true)
        }

        async fn existing_issue_keys(&self) -> Result<HashSet<String>> {
            Ok(self.inserted.lock().unwrap().iter().cloned().collect())
        }

        async fn all_chunks(&self) -> Result<Vec<StoredChunk>> {
            Ok(Vec::new())
        }

        async fn nearest_neighbors(
            &self,
            _query: &[f32],
            _limit: usize,
            _service_filter: Option<&str>,
        ) -> Result<Vec<ChunkHit>> {
            Ok(Vec::new())
        }

        async fn insert_raw(&self, issue_key: &str, _text: &str, _embedding: &[f32]) -> Result<()> {
            self.inserted.lock().unwrap().push(issue_key.to_string());
            Ok(())
        }
    }

    fn ticket(issue_key: &str, text: &str) -> StagedTicket {
        StagedTicket {
            issue_key: issue_key.to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn short_embedding_batch_aborts_instead_of_dropping_tickets() {
        let store = Arc::new(RecordingStore::default());
        let ingestor = ReconcileIngestor::new(
            Arc::new(TruncatingEmbedder),
            store.clone(),
            StaticSource(vec![
                ticket("SD-1", "database connections exhausted"),
                ticket("SD-2", "certificate expired on the proxy"),
            ]),
        );

        let err = match ingestor.reconcile_batch().await {
            Ok(count) => panic!("expected an error, inserted {count} rows"),
            Err(err) => err,
        };
        assert!(matches!(err, RetrievalError::Embedding(_)), "got {err:?}");
        // Nothing was written: no ticket is silently lost or half-applied.
        assert!(store.inserted.lock().unwrap().is_empty());
    }

    #[test]
    fn normalization_drops_empty_and_oversized_records() {
        let ok = StagedTicket {
            issue_key: " SD-1 ".into(),
            text: " vpn drops ".into(),
        }
        .normalized()
        .unwrap();
        assert_eq!(ok.issue_key, "SD-1");
        assert_eq!(ok.text, "vpn drops");

        assert!(
            StagedTicket {
                issue_key: "  ".into(),
                text: "x".into()
            }
            .normalized()
            .is_none()
        );
        assert!(
            StagedTicket {
                issue_key: "SD-2".into(),
                text: "\n".into()
            }
            .normalized()
            .is_none()
        );
        assert!(
            StagedTicket {
                issue_key: "K".repeat(129),
                text: "x".into()
            }
            .normalized()
            .is_none()
        );
    }

    #[tokio::test]
    async fn missing_drop_dir_is_an_empty_batch() {
        let source = JsonLinesDirSource::new("/nonexistent/staging/dir");
        assert!(source.staged_tickets().await.unwrap().is_empty());
    }
}
