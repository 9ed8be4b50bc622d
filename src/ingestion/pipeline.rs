//! Content-addressed chunking and embedding pipeline.
//!
//! Turns raw incident documents into deduplicated, embedded chunk rows.
//! The pipeline is safe to re-run over the same corpus: identical chunk text
//! hashes to an identical digest and the store no-ops on the collision, so
//! the second run inserts nothing. Changed text gets a new digest and lands
//! as a new row; stale rows from a previous version of a ticket are never
//! deleted here.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::ChunkingConfig;
use crate::embedding::EmbeddingProvider;
use crate::ingestion::chunk::{content_digest, make_snippet, word_windows};
use crate::store::{NewChunk, VectorStore};
use crate::types::{RetrievalError, Result};

/// One incident record as delivered by an upstream exporter.
///
/// Which fields carry text varies by source; [`combined_text`](Self::combined_text)
/// concatenates whatever is present, in a fixed order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IncidentDocument {
    pub issue_key: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
}

impl IncidentDocument {
    /// Concatenates the non-empty free-text fields into one blob.
    pub fn combined_text(&self) -> String {
        let mut parts = Vec::new();
        for field in [&self.text, &self.summary, &self.description, &self.resolution] {
            if let Some(value) = field {
                if !value.trim().is_empty() {
                    parts.push(value.trim());
                }
            }
        }
        parts.join(" ")
    }
}

/// Aggregate outcome of one ingestion run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub documents_seen: usize,
    /// Documents skipped because they carried no text.
    pub documents_skipped: usize,
    pub chunks_inserted: usize,
    /// Chunks whose digest was already present in the store.
    pub chunks_deduplicated: usize,
}

/// Chunks, embeds, and upserts incident documents into a [`VectorStore`].
pub struct IngestionPipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    config: ChunkingConfig,
}

impl IngestionPipeline {
    /// Creates a pipeline; the chunking configuration is validated up front
    /// so a zero-stride window fails here rather than mid-corpus.
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        config: ChunkingConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            embedder,
            store,
            config,
        })
    }

    /// Ingests a single document; returns `(inserted, deduplicated)` chunk
    /// counts, or `(0, 0)` for a document with no text.
    pub async fn ingest_document(&self, document: &IncidentDocument) -> Result<(usize, usize)> {
        let text = document.combined_text();
        if text.is_empty() {
            tracing::debug!(issue_key = %document.issue_key, "skipping document without text");
            return Ok((0, 0));
        }

        let snippet = make_snippet(&text, self.config.snippet_len);
        let chunks = word_windows(&text, &self.config);
        let embeddings = self.embedder.embed_batch(&chunks).await?;
        if embeddings.len() != chunks.len() {
            return Err(RetrievalError::Embedding(format!(
                "provider returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        let mut inserted = 0;
        let mut deduplicated = 0;
        for (chunk_text, embedding) in chunks.into_iter().zip(embeddings) {
            let written = self
                .store
                .upsert_chunk(NewChunk {
                    issue_key: document.issue_key.clone(),
                    service: document.service.clone(),
                    snippet: snippet.clone(),
                    text_hash: content_digest(&chunk_text),
                    text_chunk: chunk_text,
                    embedding,
                })
                .await?;
            if written {
                inserted += 1;
            } else {
                deduplicated += 1;
            }
        }
        tracing::debug!(
            issue_key = %document.issue_key,
            inserted,
            deduplicated,
            "document ingested"
        );
        Ok((inserted, deduplicated))
    }

    /// Ingests a batch of documents, aggregating per-document counts.
    pub async fn ingest_all(&self, documents: &[IncidentDocument]) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        for document in documents {
            report.documents_seen += 1;
            let (inserted, deduplicated) = self.ingest_document(document).await?;
            if inserted == 0 && deduplicated == 0 {
                report.documents_skipped += 1;
            }
            report.chunks_inserted += inserted;
            report.chunks_deduplicated += deduplicated;
        }
        tracing::info!(
            documents = report.documents_seen,
            skipped = report.documents_skipped,
            inserted = report.chunks_inserted,
            deduplicated = report.chunks_deduplicated,
            "ingestion run complete"
        );
        Ok(report)
    }
}

/// Loads incident documents from every `*.json` file in a directory.
///
/// Each file holds a JSON array of documents, matching the export format of
/// the upstream anonymizer. Files that fail to parse surface an error; this
/// loader is for curated corpus drops, not arbitrary input.
pub async fn load_documents(dir: impl AsRef<Path>) -> Result<Vec<IncidentDocument>> {
    let dir = dir.as_ref();
    let mut documents = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    for path in paths {
        let data = tokio::fs::read_to_string(&path).await?;
        let batch: Vec<IncidentDocument> = serde_json::from_str(&data).map_err(|err| {
            RetrievalError::Io(format!("{}: {err}", path.display()))
        })?;
        tracing::debug!(file = %path.display(), records = batch.len(), "loaded document file");
        documents.extend(batch);
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_text_joins_nonempty_fields_in_order() {
        let document = IncidentDocument {
            issue_key: "SD-1".into(),
            summary: Some("VPN unstable".into()),
            description: Some("drops every hour".into()),
            resolution: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(document.combined_text(), "VPN unstable drops every hour");
    }

    #[test]
    fn combined_text_is_empty_for_blank_documents() {
        let document = IncidentDocument {
            issue_key: "SD-2".into(),
            description: Some("   \n ".into()),
            ..Default::default()
        };
        assert!(document.combined_text().is_empty());
    }
}
