//! Match scoring between a sheet row and a search candidate.
//!
//! Similarity is a token-set ratio on normalized strings: order-independent,
//! duplicate-collapsing, 0-100. The verdict applies title primacy: a strong
//! title match wins regardless of artist, because title search is the
//! stronger signal and artist attribution on source platforms is noisy.

use std::collections::BTreeSet;

use anyhow::bail;

use crate::normalize::{normalize_artist, normalize_title};

// ============================================================================
// Thresholds
// ============================================================================

/// Score thresholds (0-100 each, exact >= high). Configuration, not constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchThresholds {
    pub exact: u32,
    pub high: u32,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        MatchThresholds { exact: 90, high: 75 }
    }
}

impl MatchThresholds {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.exact > 100 || self.high > 100 {
            bail!("match thresholds must be within 0-100 (got exact={}, high={})", self.exact, self.high);
        }
        if self.exact < self.high {
            bail!("exact threshold ({}) must be >= high threshold ({})", self.exact, self.high);
        }
        Ok(())
    }
}

// ============================================================================
// Verdicts
// ============================================================================

/// Match confidence tier. Ordering is meaningful: None < HighProbability < Exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchTier {
    None,
    HighProbability,
    Exact,
}

/// Scorer output: the tier plus the scores that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchVerdict {
    pub tier: MatchTier,
    pub artist_score: u32,
    pub title_score: u32,
}

// ============================================================================
// Token-set similarity
// ============================================================================

/// Token-set ratio between two strings, 0-100.
///
/// Tokens are deduplicated and sorted; the sorted intersection is compared
/// against each side's intersection-plus-remainder with a normalized
/// Levenshtein ratio, and the best of the three pairings wins. A string whose
/// tokens are a subset of the other's scores 100.
pub fn token_set_ratio(a: &str, b: &str) -> u32 {
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0;
    }

    let intersection: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let only_a: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let only_b: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();

    let base = intersection.join(" ");
    let joined = |rest: &[&str]| -> String {
        if rest.is_empty() {
            base.clone()
        } else if base.is_empty() {
            rest.join(" ")
        } else {
            format!("{} {}", base, rest.join(" "))
        }
    };
    let with_a = joined(&only_a);
    let with_b = joined(&only_b);

    let pct = |x: &str, y: &str| (strsim::normalized_levenshtein(x, y) * 100.0).round() as u32;
    pct(&base, &with_a)
        .max(pct(&base, &with_b))
        .max(pct(&with_a, &with_b))
}

// ============================================================================
// Classification
// ============================================================================

/// Apply the title-primacy decision order to a pair of scores.
pub fn classify(title_score: u32, artist_score: u32, thresholds: MatchThresholds) -> MatchTier {
    if title_score >= thresholds.exact {
        MatchTier::Exact
    } else if title_score >= thresholds.high && artist_score >= thresholds.high {
        MatchTier::HighProbability
    } else {
        MatchTier::None
    }
}

/// Score a candidate against a row. Pure function of its inputs and the
/// thresholds; no external state.
pub fn score_match(
    row_artist: &str,
    row_title: &str,
    candidate_artist: &str,
    candidate_title: &str,
    thresholds: MatchThresholds,
) -> MatchVerdict {
    let artist_score = token_set_ratio(
        &normalize_artist(row_artist),
        &normalize_artist(candidate_artist),
    );
    let title_score = token_set_ratio(
        &normalize_title(row_title),
        &normalize_title(candidate_title),
    );
    MatchVerdict {
        tier: classify(title_score, artist_score, thresholds),
        artist_score,
        title_score,
    }
}
