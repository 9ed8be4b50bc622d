//! Core result and error types shared across the retrieval engine.
//!
//! The error taxonomy mirrors how failures are handled rather than where they
//! originate:
//!
//! - [`RetrievalError::Config`] is fatal at startup and never retried.
//! - [`RetrievalError::Store`] marks transient connectivity problems; the
//!   store layer never retries internally, callers own the retry policy.
//! - [`RetrievalError::Schema`] means the persisted table is bound to a
//!   different embedding dimension and requires an operator migration.
//! - [`RetrievalError::NoDocuments`] distinguishes "the corpus was never
//!   indexed" from an ordinary zero-match search result.
//!
//! Rephrase-provider failures are deliberately absent: they are absorbed at
//! the call site and degrade the search to a single channel (see
//! [`crate::rephrase`]).

use thiserror::Error;

/// Convenience alias used by every fallible operation in this crate.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors surfaced by the ingestion pipelines, the vector store, and the
/// hybrid search engine.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Invalid static configuration (e.g. chunk overlap >= window size).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The vector store could not be reached or a statement failed.
    ///
    /// Transient by nature; candidates for caller-level retry with backoff.
    #[error("vector store unavailable: {0}")]
    Store(String),

    /// The persisted schema is bound to an incompatible embedding dimension.
    #[error("incompatible store schema: {0}")]
    Schema(String),

    /// The store is reachable but holds no rows; index the corpus first.
    #[error("no documents indexed; run ingestion before searching")]
    NoDocuments,

    /// The embedding provider failed to produce vectors.
    #[error("embedding provider error: {0}")]
    Embedding(String),

    /// Filesystem error while loading documents or staged batches.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for RetrievalError {
    fn from(err: std::io::Error) -> Self {
        RetrievalError::Io(err.to_string())
    }
}

impl From<tokio_rusqlite::Error> for RetrievalError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        RetrievalError::Store(err.to_string())
    }
}
