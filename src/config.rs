//! Configuration surface for the retrieval and ingestion engine.
//!
//! All knobs carry defaults matching the production service; [`RetrieverConfig::from_env`]
//! overlays environment variables (loading a local `.env` first when present)
//! and [`RetrieverConfig::validate`] rejects combinations that would make the
//! chunker or the ranker misbehave before any provider or store is touched.

use std::time::Duration;

use crate::types::{RetrievalError, Result};

/// Default embedding model identifier.
pub const DEFAULT_EMBEDDING_MODEL: &str = "intfloat/multilingual-e5-small";

/// How text documents are split into embeddable word windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Maximum number of words per chunk.
    pub window_words: usize,
    /// Number of words shared between consecutive chunks.
    pub overlap_words: usize,
    /// Maximum length in characters of the display snippet.
    pub snippet_len: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_words: 1800,
            overlap_words: 250,
            snippet_len: 220,
        }
    }
}

impl ChunkingConfig {
    /// Word distance between the starts of consecutive windows.
    ///
    /// Clamped to at least 1, so even a degenerate overlap that slipped past
    /// [`validate`](Self::validate) cannot stall the chunker.
    pub fn stride(&self) -> usize {
        self.window_words.saturating_sub(self.overlap_words).max(1)
    }

    /// Rejects configurations that would produce zero or negative stride.
    pub fn validate(&self) -> Result<()> {
        if self.window_words == 0 {
            return Err(RetrievalError::Config(
                "chunk window size must be at least one word".into(),
            ));
        }
        if self.overlap_words >= self.window_words {
            return Err(RetrievalError::Config(format!(
                "chunk overlap ({}) must be smaller than the window size ({})",
                self.overlap_words, self.window_words
            )));
        }
        Ok(())
    }
}

/// Per-channel weights applied when fusing raw and rephrased scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub raw: f32,
    pub rephrased: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        // Heuristic defaults carried over from the original service; treat as
        // a tunable, not a contract.
        Self {
            raw: 0.6,
            rephrased: 0.4,
        }
    }
}

/// Top-level configuration for the engine and both ingestion paths.
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Embedding model identifier passed to the provider adapter.
    pub embedding_model: String,
    pub chunking: ChunkingConfig,
    /// Result count when the caller does not specify one.
    pub default_top_k: usize,
    pub fusion: FusionWeights,
    /// Whether search runs the rephrased channel at all.
    pub use_rephrase: bool,
    /// Deadline for the optional rephrase call; expiry degrades the search
    /// to the raw channel only.
    pub rephrase_timeout: Duration,
    /// Per-channel over-fetch multiplier applied to top-k.
    pub overfetch_multiplier: usize,
    /// Minimum over-fetch headroom added to top-k.
    pub overfetch_floor: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            chunking: ChunkingConfig::default(),
            default_top_k: 5,
            fusion: FusionWeights::default(),
            use_rephrase: true,
            rephrase_timeout: Duration::from_secs(10),
            overfetch_multiplier: 2,
            overfetch_floor: 5,
        }
    }
}

impl RetrieverConfig {
    /// Builds a configuration from the process environment.
    ///
    /// A `.env` file next to the process is honored when present. Unset or
    /// unparsable variables fall back to their defaults; the result is still
    /// passed through [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            if !model.trim().is_empty() {
                config.embedding_model = model;
            }
        }
        if let Some(top_k) = read_env_usize("TOP_K") {
            config.default_top_k = top_k;
        }
        if let Some(window) = read_env_usize("CHUNK_WINDOW_WORDS") {
            config.chunking.window_words = window;
        }
        if let Some(overlap) = read_env_usize("CHUNK_OVERLAP_WORDS") {
            config.chunking.overlap_words = overlap;
        }
        if let Some(raw) = read_env_f32("FUSION_WEIGHT_RAW") {
            config.fusion.raw = raw;
        }
        if let Some(rephrased) = read_env_f32("FUSION_WEIGHT_REPHRASED") {
            config.fusion.rephrased = rephrased;
        }
        if let Ok(flag) = std::env::var("USE_REPHRASE") {
            config.use_rephrase = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        if let Some(secs) = read_env_usize("REPHRASE_TIMEOUT_SECS") {
            config.rephrase_timeout = Duration::from_secs(secs as u64);
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field invariants; fatal at startup, never retried.
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        if self.default_top_k == 0 {
            return Err(RetrievalError::Config(
                "default top-k must be at least 1".into(),
            ));
        }
        if self.fusion.raw <= 0.0 {
            return Err(RetrievalError::Config(
                "raw channel fusion weight must be positive".into(),
            ));
        }
        if self.fusion.rephrased < 0.0 {
            return Err(RetrievalError::Config(
                "rephrased channel fusion weight must not be negative".into(),
            ));
        }
        Ok(())
    }

    /// Per-channel fetch size for a clamped top-k.
    ///
    /// Over-fetching compensates for the cross-channel collapse by issue key:
    /// several chunk hits from one ticket consume result slots that fusion
    /// later merges into a single candidate.
    pub fn overfetch(&self, top_k: usize) -> usize {
        (self.overfetch_multiplier * top_k).max(top_k + self.overfetch_floor)
    }
}

fn read_env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.trim().parse().ok()
}

fn read_env_f32(key: &str) -> Option<f32> {
    std::env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        RetrieverConfig::default().validate().unwrap();
    }

    #[test]
    fn overlap_must_be_smaller_than_window() {
        let config = ChunkingConfig {
            window_words: 4,
            overlap_words: 4,
            snippet_len: 220,
        };
        assert!(matches!(
            config.validate(),
            Err(RetrievalError::Config(_))
        ));

        let config = ChunkingConfig {
            window_words: 4,
            overlap_words: 6,
            snippet_len: 220,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_window_rejected() {
        let config = ChunkingConfig {
            window_words: 0,
            overlap_words: 0,
            snippet_len: 220,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn overfetch_keeps_headroom_for_small_k() {
        let config = RetrieverConfig::default();
        assert_eq!(config.overfetch(1), 6);
        assert_eq!(config.overfetch(5), 10);
        assert_eq!(config.overfetch(50), 100);
    }
}
