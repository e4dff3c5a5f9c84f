//! Weighted scoring and ranking of normalized feature vectors.
//!
//! Six category weights combine normalized features into a single score in
//! [0, 1]. Categories draw from fixed feature sets; a category contributes the
//! mean of its available features, and the final score is renormalized by the
//! weights that actually contributed. Ties are broken deterministically by
//! `in_cycle` then `fan_in`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::config::WeightsConfig;
use crate::core::entities::EntityId;
use crate::core::featureset::FeatureVector;

/// Scoring categories, in weight order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreCategory {
    /// Cyclomatic/cognitive complexity signals
    Complexity,
    /// Duplication signals
    CloneMass,
    /// Graph centrality signals
    Centrality,
    /// Cyclic coupling signals
    Cycles,
    /// Type-system friction signals
    TypeFriction,
    /// Structural smell signals
    SmellPrior,
}

impl ScoreCategory {
    /// All categories in canonical order
    pub const ALL: [ScoreCategory; 6] = [
        Self::Complexity,
        Self::CloneMass,
        Self::Centrality,
        Self::Cycles,
        Self::TypeFriction,
        Self::SmellPrior,
    ];

    /// Wire name of the category
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Complexity => "complexity",
            Self::CloneMass => "clone_mass",
            Self::Centrality => "centrality",
            Self::Cycles => "cycles",
            Self::TypeFriction => "type_friction",
            Self::SmellPrior => "smell_prior",
        }
    }

    /// Features mapped into this category.
    pub fn features(self) -> &'static [&'static str] {
        match self {
            Self::Complexity => &[
                "cyclomatic",
                "cognitive",
                "max_nesting",
                "param_count",
                "branch_fanout",
            ],
            Self::CloneMass => &["clone_mass", "clone_groups_count", "max_clone_similarity"],
            Self::Centrality => &[
                "betweenness_approx",
                "fan_in",
                "fan_out",
                "closeness",
                "eigenvector",
            ],
            Self::Cycles => &["in_cycle", "cycle_size"],
            Self::TypeFriction => &[
                "typed_coverage_ratio",
                "any_ratio",
                "casts_per_kloc",
                "non_null_bang_ratio",
                "unsafe_blocks_per_kloc",
            ],
            Self::SmellPrior => &[
                "smell_score",
                "god_class_score",
                "long_method_score",
                "feature_envy_score",
            ],
        }
    }
}

/// Scorer that combines normalized features with category weights.
#[derive(Debug, Clone)]
pub struct WeightedScorer {
    normalized_weights: BTreeMap<ScoreCategory, f64>,
}

impl WeightedScorer {
    /// Create a scorer; weights are re-normalized to sum to 1, with equal
    /// weights substituted when the total is not positive.
    pub fn new(weights: &WeightsConfig) -> Self {
        let raw = [
            (ScoreCategory::Complexity, weights.complexity),
            (ScoreCategory::CloneMass, weights.clone_mass),
            (ScoreCategory::Centrality, weights.centrality),
            (ScoreCategory::Cycles, weights.cycles),
            (ScoreCategory::TypeFriction, weights.type_friction),
            (ScoreCategory::SmellPrior, weights.smell_prior),
        ];

        let total: f64 = raw.iter().map(|(_, w)| w).sum();
        let normalized_weights = if total <= 0.0 {
            warn!("total weight is zero, using equal weights");
            raw.iter()
                .map(|(c, _)| (*c, 1.0 / raw.len() as f64))
                .collect()
        } else {
            raw.iter().map(|(c, w)| (*c, w / total)).collect()
        };

        Self { normalized_weights }
    }

    /// Normalized weight for a category
    pub fn weight(&self, category: ScoreCategory) -> f64 {
        self.normalized_weights.get(&category).copied().unwrap_or(0.0)
    }

    /// Mean of the available normalized features in a category, when any.
    pub fn category_score(&self, vector: &FeatureVector, category: ScoreCategory) -> Option<f64> {
        let mut sum = 0.0;
        let mut count = 0usize;
        for feature in category.features() {
            if let Some(value) = vector.get_normalized(feature) {
                sum += value;
                count += 1;
            }
        }
        (count > 0).then(|| sum / count as f64)
    }

    /// Weighted score for a vector, clipped to [0, 1]. Categories with no
    /// available features are excluded and the result renormalized by the
    /// weights that contributed.
    pub fn score(&self, vector: &FeatureVector) -> f64 {
        if vector.normalized_features.is_empty() {
            return 0.0;
        }

        let mut total = 0.0;
        let mut used_weight = 0.0;
        for (&category, &weight) in &self.normalized_weights {
            if weight <= 0.0 {
                continue;
            }
            if let Some(category_score) = self.category_score(vector, category) {
                total += weight * category_score;
                used_weight += weight;
            }
        }

        if used_weight > 0.0 {
            (total / used_weight).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Human-readable explanations for the top contributing categories, with
    /// special cases for duplication, cycles, and inbound centrality.
    /// Explanations are metadata only; they never change the score.
    pub fn explain(&self, vector: &FeatureVector) -> Vec<String> {
        let mut contributions: Vec<(ScoreCategory, &str, f64, f64)> = Vec::new();

        for (&category, &weight) in &self.normalized_weights {
            if weight <= 0.0 {
                continue;
            }
            let mut best: Option<(&str, f64)> = None;
            for feature in category.features() {
                if let Some(value) = vector.get_normalized(feature) {
                    if best.map_or(true, |(_, v)| value > v) {
                        best = Some((feature, value));
                    }
                }
            }
            if let Some((feature, value)) = best {
                contributions.push((category, feature, value, weight * value));
            }
        }

        contributions.sort_by(|a, b| {
            b.3.partial_cmp(&a.3)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut explanations = Vec::new();
        for (category, feature, value, contribution) in contributions.iter().take(3) {
            if *value > 0.7 {
                explanations.push(feature_explanation(feature, *value));
            } else if *contribution > 0.1 {
                explanations.push(format!(
                    "{} score: {value:.2}",
                    title_case(category.as_str())
                ));
            }
        }

        if let Some(clone_mass) = vector.get_normalized("clone_mass") {
            if clone_mass > 0.5 {
                explanations.push(format!("High duplication (clone_mass {clone_mass:.2})"));
            }
        }
        if vector.get_normalized("in_cycle").unwrap_or(0.0) > 0.5 {
            let cycle_size = vector.get_normalized("cycle_size").unwrap_or(0.0);
            explanations.push(format!(
                "Participates in dependency cycle (size {cycle_size:.2})"
            ));
        }
        if vector.get_normalized("fan_in").unwrap_or(0.0) > 0.7 {
            explanations.push("High inbound centrality; risky change surface".to_string());
        }

        explanations.truncate(5);
        explanations
    }
}

fn feature_explanation(feature: &str, value: f64) -> String {
    match feature {
        "cyclomatic" => format!("High cyclomatic complexity ({value:.2})"),
        "cognitive" => format!("High cognitive complexity ({value:.2})"),
        "max_nesting" => format!("Deep nesting levels ({value:.2})"),
        "param_count" => format!("Many parameters ({value:.2})"),
        "clone_mass" => format!("High duplication ratio ({value:.2})"),
        "clone_groups_count" => format!("Multiple clone instances ({value:.2})"),
        "betweenness_approx" => format!("High betweenness centrality ({value:.2})"),
        "fan_in" => format!("Many incoming dependencies ({value:.2})"),
        "fan_out" => format!("Many outgoing dependencies ({value:.2})"),
        _ => format!("High {} ({value:.2})", feature.replace('_', " ")),
    }
}

fn title_case(snake: &str) -> String {
    snake
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// One ranked entity: its feature vector, score, and explanations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedEntity {
    /// Entity id (duplicated from the vector for convenience)
    pub entity_id: EntityId,
    /// Feature vector after normalization
    pub vector: FeatureVector,
    /// Weighted score in [0, 1]
    pub score: f64,
    /// Score explanations
    pub explanations: Vec<String>,
}

/// Ranks entities by score with deterministic tie-breaking.
#[derive(Debug, Clone)]
pub struct RankingSystem {
    scorer: WeightedScorer,
}

impl RankingSystem {
    /// Create a ranking system over the configured weights
    pub fn new(weights: &WeightsConfig) -> Self {
        Self {
            scorer: WeightedScorer::new(weights),
        }
    }

    /// Borrow the underlying scorer
    pub fn scorer(&self) -> &WeightedScorer {
        &self.scorer
    }

    /// Rank all vectors descending by (score, in_cycle, fan_in). The returned
    /// list is the full ranking; callers slice the top-K.
    pub fn rank_entities(&self, feature_vectors: &[FeatureVector]) -> Vec<RankedEntity> {
        let mut ranked: Vec<RankedEntity> = feature_vectors
            .iter()
            .map(|vector| RankedEntity {
                entity_id: vector.entity_id.clone(),
                score: self.scorer.score(vector),
                explanations: self.scorer.explain(vector),
                vector: vector.clone(),
            })
            .collect();

        ranked.sort_by(|a, b| {
            let key_a = sort_key(a);
            let key_b = sort_key(b);
            key_b
                .partial_cmp(&key_a)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        ranked
    }
}

fn sort_key(entity: &RankedEntity) -> (f64, f64, f64) {
    (
        entity.score,
        entity.vector.get_normalized("in_cycle").unwrap_or(0.0),
        entity.vector.get_normalized("fan_in").unwrap_or(0.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector_with(entity_id: &str, features: &[(&str, f64)]) -> FeatureVector {
        let mut vector = FeatureVector::new(entity_id);
        for (name, value) in features {
            vector
                .normalized_features
                .insert((*name).to_string(), *value);
        }
        vector
    }

    #[test]
    fn weights_renormalize_to_one() {
        let scorer = WeightedScorer::new(&WeightsConfig::default());
        let total: f64 = ScoreCategory::ALL.iter().map(|&c| scorer.weight(c)).sum();
        approx::assert_relative_eq!(total, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_weights_fall_back_to_equal() {
        let weights = WeightsConfig {
            complexity: 0.0,
            clone_mass: 0.0,
            centrality: 0.0,
            cycles: 0.0,
            type_friction: 0.0,
            smell_prior: 0.0,
        };
        let scorer = WeightedScorer::new(&weights);
        approx::assert_relative_eq!(scorer.weight(ScoreCategory::Cycles), 1.0 / 6.0);
    }

    #[test]
    fn score_renormalizes_by_contributing_weights() {
        // Only complexity features present: the score equals the category mean.
        let vector = vector_with("e", &[("cyclomatic", 0.8), ("cognitive", 0.4)]);
        let scorer = WeightedScorer::new(&WeightsConfig::default());
        approx::assert_relative_eq!(scorer.score(&vector), 0.6, epsilon = 1e-12);
    }

    #[test]
    fn empty_vector_scores_zero() {
        let vector = FeatureVector::new("e");
        let scorer = WeightedScorer::new(&WeightsConfig::default());
        assert_eq!(scorer.score(&vector), 0.0);
    }

    #[test]
    fn ranking_breaks_ties_by_cycle_then_fan_in() {
        let a = vector_with("a", &[("cyclomatic", 0.5)]);
        let b = vector_with("b", &[("cyclomatic", 0.5), ("in_cycle", 1.0)]);
        let c = vector_with(
            "c",
            &[("cyclomatic", 0.5), ("in_cycle", 1.0), ("fan_in", 0.9)],
        );

        // Neutralize the score differences the tie-breaker features introduce
        // by weighting only complexity.
        let weights = WeightsConfig {
            complexity: 1.0,
            clone_mass: 0.0,
            centrality: 0.0,
            cycles: 0.0,
            type_friction: 0.0,
            smell_prior: 0.0,
        };
        let ranking = RankingSystem::new(&weights);
        let ranked = ranking.rank_entities(&[a, b, c]);

        let order: Vec<&str> = ranked.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn explanations_flag_cycles_and_duplication() {
        let vector = vector_with(
            "e",
            &[("clone_mass", 0.8), ("in_cycle", 1.0), ("cycle_size", 0.5)],
        );
        let scorer = WeightedScorer::new(&WeightsConfig::default());
        let explanations = scorer.explain(&vector);
        assert!(explanations.iter().any(|e| e.contains("duplication")));
        assert!(explanations.iter().any(|e| e.contains("dependency cycle")));
        assert!(explanations.len() <= 5);
    }
}
