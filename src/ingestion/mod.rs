//! Ingestion paths that populate the vector store.
//!
//! Two writers with different dedup granularity:
//!
//! * [`pipeline`] — content-addressed chunking of full incident documents;
//!   re-running over the same corpus is a no-op per chunk.
//! * [`reconcile`] — ticket-granularity merge of staged batches; an already
//!   indexed issue key is never re-embedded.
//!
//! [`chunk`] holds the windowing and digest primitives both build on.
//! [`reindex`] rebuilds a store for a new embedding model from the chunk
//! texts already persisted.

pub mod chunk;
pub mod pipeline;
pub mod reconcile;
pub mod reindex;

pub use chunk::{content_digest, make_snippet, word_windows};
pub use pipeline::{IncidentDocument, IngestReport, IngestionPipeline, load_documents};
pub use reconcile::{BatchSource, JsonLinesDirSource, ReconcileIngestor, StagedTicket};
pub use reindex::reindex_corpus;
