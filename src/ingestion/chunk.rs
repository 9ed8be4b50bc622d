//! Word-window chunking and content addressing.
//!
//! Long incident texts are split into overlapping word windows so each
//! embedding input stays bounded while context survives across chunk
//! boundaries. Every chunk is keyed by a SHA-256 digest of its exact text;
//! the store treats that digest as a uniqueness constraint, which is what
//! makes re-ingestion of unchanged content a no-op.

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;

/// Splits `text` into overlapping word windows.
///
/// Windows are `window_words` long and consecutive windows share
/// `overlap_words` words. Emission stops with the first window whose end
/// reaches the last word, so an `N`-word text yields
/// `ceil((N - W) / stride) + 1` chunks and the final window may be shorter
/// than `W`. The stride is clamped to at least 1, so the loop terminates for
/// any configuration, validated or not.
pub fn word_windows(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let stride = config.stride();
    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + config.window_words).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += stride;
    }
    chunks
}

/// Builds the display snippet: whitespace-normalized prefix of at most
/// `max_chars` characters. Computed once per document, not per chunk.
pub fn make_snippet(text: &str, max_chars: usize) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    normalized.chars().take(max_chars).collect()
}

/// SHA-256 hex digest over the exact chunk text; the content-addressing key.
pub fn content_digest(chunk_text: &str) -> String {
    use std::fmt::Write;

    let digest = Sha256::digest(chunk_text.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(window: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            window_words: window,
            overlap_words: overlap,
            snippet_len: 220,
        }
    }

    #[test]
    fn ten_words_with_window_four_overlap_one_yield_three_chunks() {
        let text = "w1 w2 w3 w4 w5 w6 w7 w8 w9 w10";
        let chunks = word_windows(text, &config(4, 1));

        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(chunk.split_whitespace().count() <= 4);
        }
        // Consecutive chunks share exactly one boundary word.
        assert_eq!(chunks[0], "w1 w2 w3 w4");
        assert_eq!(chunks[1], "w4 w5 w6 w7");
        assert_eq!(chunks[2], "w7 w8 w9 w10");
    }

    #[test]
    fn seven_words_with_window_three_overlap_one() {
        let chunks = word_windows("A B C D E F G", &config(3, 1));
        assert_eq!(chunks, vec!["A B C", "C D E", "E F G"]);
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = word_windows("only two", &config(1800, 250));
        assert_eq!(chunks, vec!["only two"]);
    }

    #[test]
    fn degenerate_overlap_advances_one_word_at_a_time() {
        // overlap == window would be rejected by validation, but calling the
        // chunker directly must still terminate.
        let chunks = word_windows("A B C D", &config(3, 3));
        assert_eq!(chunks, vec!["A B C", "B C D"]);

        // overlap > window must not underflow the stride.
        let chunks = word_windows("A B C D", &config(3, 5));
        assert_eq!(chunks, vec!["A B C", "B C D"]);
    }

    #[test]
    fn whitespace_only_text_yields_no_chunks() {
        assert!(word_windows("   \n\t  ", &config(4, 1)).is_empty());
        assert!(word_windows("", &config(4, 1)).is_empty());
    }

    #[test]
    fn snippet_is_normalized_and_bounded() {
        let snippet = make_snippet("  broken\n\nprinter   on floor 3  ", 15);
        assert_eq!(snippet, "broken printer ");
    }

    #[test]
    fn digest_changes_with_content() {
        let a = content_digest("E F G");
        let b = content_digest("E F H");
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(a, content_digest("E F G"));
    }
}
