//! Corpus reindexing for embedding-model migrations.
//!
//! A store is bound to one embedding dimension for its lifetime, so switching
//! models means building a fresh store rather than mutating the old one.
//! [`reindex_corpus`] reads every chunk row back from the source store,
//! re-embeds its text with the new provider, and writes into a freshly
//! bootstrapped target. The source is never modified; the operator swaps the
//! stores once the run completes.

use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::store::{NewChunk, VectorStore};
use crate::types::{RetrievalError, Result};

/// Rows re-embedded per provider round-trip.
const REINDEX_BATCH_ROWS: usize = 100;

/// Re-embeds every chunk of `source` into `target` and returns the number of
/// rows written.
///
/// Safe to re-run after a partial failure: content-addressed rows dedup on
/// their hash and hashless reconciled rows are skipped when their issue key
/// already exists in the target. Provider and store failures abort the
/// remaining batches and propagate.
pub async fn reindex_corpus(
    embedder: Arc<dyn EmbeddingProvider>,
    source: Arc<dyn VectorStore>,
    target: Arc<dyn VectorStore>,
) -> Result<usize> {
    target.ensure_schema(embedder.dimension()).await?;
    let rows = source.all_chunks().await?;
    let target_keys = target.existing_issue_keys().await?;
    tracing::info!(
        rows = rows.len(),
        model = embedder.id(),
        "reindexing corpus"
    );

    let mut written = 0;
    for batch in rows.chunks(REINDEX_BATCH_ROWS) {
        let texts: Vec<String> = batch.iter().map(|row| row.text_chunk.clone()).collect();
        let embeddings = embedder.embed_batch(&texts).await?;
        if embeddings.len() != batch.len() {
            return Err(RetrievalError::Embedding(format!(
                "provider returned {} vectors for {} chunks",
                embeddings.len(),
                batch.len()
            )));
        }

        for (row, embedding) in batch.iter().zip(embeddings) {
            match &row.text_hash {
                Some(hash) => {
                    let inserted = target
                        .upsert_chunk(NewChunk {
                            issue_key: row.issue_key.clone(),
                            service: row.service.clone(),
                            snippet: row.snippet.clone().unwrap_or_default(),
                            text_chunk: row.text_chunk.clone(),
                            text_hash: hash.clone(),
                            embedding,
                        })
                        .await?;
                    if inserted {
                        written += 1;
                    }
                }
                None => {
                    if target_keys.contains(&row.issue_key) {
                        continue;
                    }
                    target
                        .insert_raw(&row.issue_key, &row.text_chunk, &embedding)
                        .await?;
                    written += 1;
                }
            }
        }
        tracing::debug!(written, "reindex batch committed");
    }
    tracing::info!(written, "reindex complete");
    Ok(written)
}
