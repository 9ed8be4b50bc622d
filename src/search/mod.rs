//! Hybrid query execution and score fusion.

pub mod engine;
pub mod fusion;

pub use engine::{HybridSearchEngine, SearchRequest};
pub use fusion::{TicketMatch, fuse_channels};
