//! Weighted fusion of vector and lexical rankings.

use std::collections::HashMap;

use jobmatch_core::config::FusionConfig;
use jobmatch_core::types::ScoredId;
use serde::{Deserialize, Serialize};

/// Weights applied when combining the two signal sources.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    /// Weight of the vector similarity for IDs found by both sources.
    pub vector: f32,
    /// Weight of the lexical score, whether or not the vector side found the ID.
    pub lexical: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: 0.6,
            lexical: 0.4,
        }
    }
}

impl From<&FusionConfig> for FusionWeights {
    fn from(config: &FusionConfig) -> Self {
        Self {
            vector: config.vector_weight,
            lexical: config.lexical_weight,
        }
    }
}

/// Merge two ranked lists into one.
///
/// - found by both: `vector·v + lexical·l`
/// - vector only: `v` unchanged
/// - lexical only: `lexical·l`
///
/// The result is sorted by descending fused score and truncated to `top_k`.
/// Equal scores are ordered by ID. When an ID appears more than once in one
/// source, its first (best-ranked) occurrence counts.
pub fn fuse(
    vector_hits: &[ScoredId],
    lexical_hits: &[ScoredId],
    weights: FusionWeights,
    top_k: usize,
) -> Vec<ScoredId> {
    let mut vector_scores: HashMap<&str, f32> = HashMap::new();
    for hit in vector_hits {
        vector_scores.entry(hit.id.as_str()).or_insert(hit.score);
    }
    let mut lexical_scores: HashMap<&str, f32> = HashMap::new();
    for hit in lexical_hits {
        lexical_scores.entry(hit.id.as_str()).or_insert(hit.score);
    }

    let mut fused: Vec<ScoredId> = vector_scores
        .iter()
        .map(|(id, v)| {
            let score = match lexical_scores.get(id) {
                Some(l) => weights.vector * v + weights.lexical * l,
                None => *v,
            };
            ScoredId::new(*id, score)
        })
        .chain(
            lexical_scores
                .iter()
                .filter(|(id, _)| !vector_scores.contains_key(*id))
                .map(|(id, l)| ScoredId::new(*id, weights.lexical * l)),
        )
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    fused.truncate(top_k);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits(list: &[(&str, f32)]) -> Vec<ScoredId> {
        list.iter().map(|(id, s)| ScoredId::new(*id, *s)).collect()
    }

    fn score_of(results: &[ScoredId], id: &str) -> f32 {
        results
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.score)
            .unwrap()
    }

    #[test]
    fn test_fusion_formula_per_source() {
        let vector = hits(&[("both", 0.8), ("vec_only", 0.5)]);
        let lexical = hits(&[("both", 10.0), ("lex_only", 2.0)]);
        let fused = fuse(&vector, &lexical, FusionWeights::default(), 10);

        assert_eq!(fused.len(), 3);
        assert!((score_of(&fused, "both") - (0.6 * 0.8 + 0.4 * 10.0)).abs() < 1e-5);
        assert!((score_of(&fused, "vec_only") - 0.5).abs() < 1e-6);
        assert!((score_of(&fused, "lex_only") - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_sorted_descending_and_truncated() {
        let vector = hits(&[("a", 0.9), ("b", 0.7), ("c", 0.3)]);
        let lexical = hits(&[("d", 5.0)]);
        let fused = fuse(&vector, &lexical, FusionWeights::default(), 2);
        let ids: Vec<&str> = fused.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["d", "a"]);
    }

    #[test]
    fn test_vector_only_ranking_unchanged_without_lexical() {
        let vector = hits(&[("x", 0.9), ("y", 0.4), ("z", 0.1)]);
        let fused = fuse(&vector, &[], FusionWeights::default(), 10);
        assert_eq!(fused, vector);
    }

    #[test]
    fn test_custom_weights() {
        let weights = FusionWeights {
            vector: 1.0,
            lexical: 0.0,
        };
        let fused = fuse(&hits(&[("a", 0.5)]), &hits(&[("a", 3.0), ("b", 9.0)]), weights, 10);
        assert!((score_of(&fused, "a") - 0.5).abs() < 1e-6);
        assert_eq!(score_of(&fused, "b"), 0.0);
    }

    #[test]
    fn test_duplicate_ids_use_first_occurrence() {
        let lexical = hits(&[("a", 4.0), ("a", 1.0)]);
        let fused = fuse(&[], &lexical, FusionWeights::default(), 10);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 1.6).abs() < 1e-6);
    }

    #[test]
    fn test_weights_from_config() {
        let config = FusionConfig {
            vector_weight: 0.7,
            lexical_weight: 0.3,
            ..Default::default()
        };
        let weights = FusionWeights::from(&config);
        assert_eq!(weights.vector, 0.7);
        assert_eq!(weights.lexical, 0.3);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(fuse(&[], &[], FusionWeights::default(), 10).is_empty());
        assert!(fuse(&hits(&[("a", 1.0)]), &[], FusionWeights::default(), 0).is_empty());
    }
}
