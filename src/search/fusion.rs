//! Cross-channel score fusion.
//!
//! Both retrieval channels return per-ticket hits; fusion merges them into
//! one ranking. The merge is a commutative fold per issue key (max score per
//! channel, longest snippet), so channel order does not matter. Ties in the
//! final score keep first-seen order, which is the original retrieval order
//! of the raw channel followed by the rephrased channel.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::FusionWeights;
use crate::store::ChunkHit;

/// A ranked ticket produced by the hybrid search.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TicketMatch {
    pub issue_key: String,
    pub snippet: String,
    pub score: f32,
}

#[derive(Debug)]
struct Candidate {
    issue_key: String,
    snippet: String,
    raw_score: f32,
    rephrased_score: f32,
}

/// Merges raw- and rephrased-channel hits and returns the top `top_k`
/// tickets by fused score.
///
/// A ticket absent from a channel contributes 0 for that channel's term;
/// this deliberately favors tickets that match strongly on one channel over
/// tickets that match weakly on both.
pub fn fuse_channels(
    raw_hits: Vec<ChunkHit>,
    rephrased_hits: Vec<ChunkHit>,
    weights: FusionWeights,
    top_k: usize,
) -> Vec<TicketMatch> {
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    let mut merge = |hits: Vec<ChunkHit>, rephrased: bool| {
        for hit in hits {
            let slot = *index.entry(hit.issue_key.clone()).or_insert_with(|| {
                candidates.push(Candidate {
                    issue_key: hit.issue_key.clone(),
                    snippet: String::new(),
                    raw_score: 0.0,
                    rephrased_score: 0.0,
                });
                candidates.len() - 1
            });
            let candidate = &mut candidates[slot];
            // Longest snippet is assumed the most informative for display.
            if hit.snippet.len() > candidate.snippet.len() {
                candidate.snippet = hit.snippet;
            }
            // A ticket matched several times in one channel keeps only its
            // best score for that channel.
            if rephrased {
                candidate.rephrased_score = candidate.rephrased_score.max(hit.score);
            } else {
                candidate.raw_score = candidate.raw_score.max(hit.score);
            }
        }
    };
    merge(raw_hits, false);
    merge(rephrased_hits, true);

    let mut results: Vec<TicketMatch> = candidates
        .into_iter()
        .map(|candidate| TicketMatch {
            issue_key: candidate.issue_key,
            snippet: candidate.snippet,
            score: weights.raw * candidate.raw_score
                + weights.rephrased * candidate.rephrased_score,
        })
        .collect();

    // Stable sort: equal scores keep insertion (retrieval) order.
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(top_k);
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(issue_key: &str, snippet: &str, score: f32) -> ChunkHit {
        ChunkHit {
            issue_key: issue_key.to_string(),
            snippet: snippet.to_string(),
            score,
        }
    }

    #[test]
    fn raw_only_candidate_scores_exactly_weighted_raw() {
        let results = fuse_channels(
            vec![hit("SD-1", "vpn drops", 0.8)],
            Vec::new(),
            FusionWeights::default(),
            10,
        );
        assert_eq!(results.len(), 1);
        assert!((results[0].score - 0.6 * 0.8).abs() < 1e-6);
    }

    #[test]
    fn per_channel_max_and_longest_snippet_win() {
        let results = fuse_channels(
            vec![hit("SD-1", "short", 0.5), hit("SD-1", "a much longer snippet", 0.3)],
            vec![hit("SD-1", "mid length", 0.9)],
            FusionWeights::default(),
            10,
        );
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].snippet, "a much longer snippet");
        let expected = 0.6 * 0.5 + 0.4 * 0.9;
        assert!((results[0].score - expected).abs() < 1e-6);
    }

    #[test]
    fn fusion_is_channel_order_independent_per_ticket() {
        let raw = vec![hit("SD-1", "alpha snippet", 0.7), hit("SD-2", "beta", 0.4)];
        let rephrased = vec![hit("SD-2", "beta but longer", 0.6)];

        let results = fuse_channels(raw, rephrased, FusionWeights::default(), 10);
        let sd2 = results.iter().find(|m| m.issue_key == "SD-2").unwrap();
        assert_eq!(sd2.snippet, "beta but longer");
        let expected = 0.6 * 0.4 + 0.4 * 0.6;
        assert!((sd2.score - expected).abs() < 1e-6);
    }

    #[test]
    fn results_are_sorted_and_truncated() {
        let raw = vec![
            hit("SD-1", "one", 0.2),
            hit("SD-2", "two", 0.9),
            hit("SD-3", "three", 0.5),
        ];
        let results = fuse_channels(raw, Vec::new(), FusionWeights::default(), 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].issue_key, "SD-2");
        assert_eq!(results[1].issue_key, "SD-3");
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let raw = vec![hit("SD-A", "a", 0.5), hit("SD-B", "b", 0.5)];
        let results = fuse_channels(raw, Vec::new(), FusionWeights::default(), 10);
        assert_eq!(results[0].issue_key, "SD-A");
        assert_eq!(results[1].issue_key, "SD-B");
    }
}
