use strsim::normalized_levenshtein;
use tracing::debug;

use crate::search::normalize;
use crate::types::{Entity, MatchResult};

/// Candidates scoring below this are dropped as noise.
pub const DEFAULT_MIN_SCORE: f64 = 0.3;

/// Weight applied to the best partial (word window) match, so that a
/// partial hit never outranks an equally close full-name hit.
pub const PARTIAL_MATCH_WEIGHT: f64 = 0.9;

/// Scores candidate entities against a normalized query.
#[derive(Debug, Clone)]
pub struct SimilarityRanker {
    min_score: f64,
}

impl Default for SimilarityRanker {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SCORE)
    }
}

impl SimilarityRanker {
    /// Creates a ranker with the given inclusion threshold, clamped to `[0, 1]`.
    pub fn new(min_score: f64) -> Self {
        Self {
            min_score: min_score.clamp(0.0, 1.0),
        }
    }

    pub fn min_score(&self) -> f64 {
        self.min_score
    }

    /// Ranks `candidates` against an already-normalized query.
    ///
    /// Output is sorted by descending score with the tie-break of
    /// [`MatchResult::ranking_cmp`]. An empty query or an empty candidate
    /// list yields an empty vector.
    pub fn rank(&self, normalized_query: &str, candidates: &[Entity]) -> Vec<MatchResult> {
        if normalized_query.is_empty() || candidates.is_empty() {
            return Vec::new();
        }

        let mut results: Vec<MatchResult> = candidates
            .iter()
            .filter_map(|entity| {
                let score = similarity(normalized_query, &normalize(&entity.name));
                (score >= self.min_score && score > 0.0).then(|| MatchResult {
                    entity: entity.clone(),
                    score,
                })
            })
            .collect();

        results.sort_by(MatchResult::ranking_cmp);
        debug!(
            query = normalized_query,
            candidates = candidates.len(),
            kept = results.len(),
            "ranked candidates"
        );
        results
    }
}

/// Similarity between a normalized query and a normalized name, in `[0, 1]`.
///
/// The base score is the length-normalized Levenshtein similarity of the two
/// strings. When the name has more words than the query, each contiguous
/// window of the name with the query's word count is scored too, weighted by
/// [`PARTIAL_MATCH_WEIGHT`]; the highest value wins.
///
/// The window term deliberately breaks monotonicity across whole names:
/// "vader" scores 0.9 against "darth vader" but about 0.83 against "vaderx".
pub fn similarity(query: &str, name: &str) -> f64 {
    if query.is_empty() || name.is_empty() {
        return if query == name { 1.0 } else { 0.0 };
    }

    let whole = normalized_levenshtein(query, name);
    let query_words = query.split(' ').count();
    let name_words: Vec<&str> = name.split(' ').collect();
    if name_words.len() <= query_words {
        return whole;
    }

    let best_window = name_words
        .windows(query_words)
        .map(|window| normalized_levenshtein(query, &window.join(" ")))
        .fold(0.0_f64, f64::max);

    whole.max(best_window * PARTIAL_MATCH_WEIGHT).clamp(0.0, 1.0)
}
