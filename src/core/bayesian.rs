//! Bayesian priors and zero-variance fallbacks for feature normalization.
//!
//! Empirical statistics are fused with domain priors so that features with
//! little or no variance still produce informative normalized values. The
//! fallback offset is fully deterministic: it is derived from a seeded hash of
//! the feature name and entity id, never from an RNG, so two runs over the
//! same corpus are byte-identical.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::config::NormalizationScheme;
use crate::core::entities::splitmix64;
use crate::core::errors::Result;
use crate::core::featureset::FeatureVector;

/// Default seed for deterministic fallback offsets and sampling.
pub const DEFAULT_SEED: u64 = 0x5EED;

/// Confidence in a feature's empirical variance estimate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VarianceConfidence {
    /// n ≥ 10 with variance above the feature threshold
    High,
    /// 5–10 samples with variance above the threshold
    Medium,
    /// n ≥ 10 but variance below the threshold (confidently low variance)
    Low,
    /// 2–5 samples, or 5–10 samples with sub-threshold variance
    VeryLow,
    /// Fewer than 2 samples
    Insufficient,
}

impl VarianceConfidence {
    /// Classify a sample set. Rules are evaluated in order so every tier is
    /// reachable.
    pub fn from_samples(n_samples: usize, variance: f64, threshold: f64) -> Self {
        if n_samples < 2 {
            Self::Insufficient
        } else if n_samples < 5 {
            Self::VeryLow
        } else if variance < threshold && n_samples < 10 {
            Self::VeryLow
        } else if variance < threshold {
            Self::Low
        } else if n_samples < 10 {
            Self::Medium
        } else {
            Self::High
        }
    }

    /// Weight given to the prior when fusing with empirical statistics.
    pub fn prior_weight(self) -> f64 {
        match self {
            Self::Insufficient => 1.0,
            Self::VeryLow => 0.8,
            Self::Low => 0.6,
            Self::Medium => 0.3,
            Self::High => 0.1,
        }
    }

    /// Magnitude of the deterministic offset used by the zero-variance
    /// fallback.
    pub fn noise_factor(self) -> f64 {
        match self {
            Self::High => 0.02,
            Self::Medium => 0.05,
            Self::Low => 0.1,
            Self::VeryLow | Self::Insufficient => 0.15,
        }
    }

    /// Wire name of the tier
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::VeryLow => "very_low",
            Self::Insufficient => "insufficient",
        }
    }
}

/// Domain prior for one feature, expressed as a Beta distribution scaled to
/// an expected range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeaturePrior {
    /// Feature name
    pub name: String,
    /// Beta shape parameter (success count + 1)
    pub alpha: f64,
    /// Beta shape parameter (failure count + 1)
    pub beta: f64,
    /// Expected minimum from domain knowledge
    pub expected_min: f64,
    /// Expected maximum from domain knowledge
    pub expected_max: f64,
    /// Expected mean from domain knowledge
    pub expected_mean: f64,
    /// Variance below this threshold is treated as "low variance"
    pub variance_threshold: f64,
    /// Feature family (complexity, centrality, cycles, clones, generic)
    pub feature_type: String,
    /// Distributional shape hint
    pub typical_distribution: String,
}

impl FeaturePrior {
    /// Create an uninformative prior over [0, 1]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alpha: 1.0,
            beta: 1.0,
            expected_min: 0.0,
            expected_max: 1.0,
            expected_mean: 0.5,
            variance_threshold: 0.01,
            feature_type: "generic".to_string(),
            typical_distribution: "normal".to_string(),
        }
    }

    /// Set Beta shape parameters
    pub fn with_beta_params(mut self, alpha: f64, beta: f64) -> Self {
        self.alpha = alpha;
        self.beta = beta;
        self
    }

    /// Set expected range and mean
    pub fn with_range(mut self, min: f64, max: f64, mean: f64) -> Self {
        self.expected_min = min;
        self.expected_max = max;
        self.expected_mean = mean;
        self
    }

    /// Set the variance threshold for confidence classification
    pub fn with_variance_threshold(mut self, threshold: f64) -> Self {
        self.variance_threshold = threshold;
        self
    }

    /// Set family and distribution hint
    pub fn with_type(
        mut self,
        feature_type: impl Into<String>,
        distribution: impl Into<String>,
    ) -> Self {
        self.feature_type = feature_type.into();
        self.typical_distribution = distribution.into();
        self
    }

    /// Variance of the Beta(α, β) distribution
    pub fn beta_variance(&self) -> f64 {
        let ab = self.alpha + self.beta;
        (self.alpha * self.beta) / (ab * ab * (ab + 1.0))
    }

    /// Prior variance scaled to the expected feature range
    pub fn prior_variance_estimate(&self) -> f64 {
        let range = self.expected_max - self.expected_min;
        self.beta_variance() * range * range
    }
}

/// Built-in prior library covering the features with known distributional
/// shape, plus a generic right-biased prior for everything else.
#[derive(Debug, Clone)]
pub struct PriorLibrary {
    priors: BTreeMap<String, FeaturePrior>,
}

impl Default for PriorLibrary {
    fn default() -> Self {
        let mut priors = BTreeMap::new();

        // Complexity features: right-skewed, most functions are simple.
        let complexity: &[(&str, f64, f64, f64, &str)] = &[
            ("cyclomatic", 1.0, 20.0, 3.0, "right_skewed"),
            ("cognitive", 0.0, 50.0, 5.0, "right_skewed"),
            ("max_nesting", 0.0, 10.0, 2.0, "right_skewed"),
            ("param_count", 0.0, 15.0, 3.0, "right_skewed"),
            ("branch_fanout", 0.0, 10.0, 2.0, "right_skewed"),
        ];
        for &(name, min, max, mean, dist) in complexity {
            priors.insert(
                name.to_string(),
                FeaturePrior::new(name)
                    .with_beta_params(2.0, 5.0)
                    .with_range(min, max, mean)
                    .with_variance_threshold(0.1)
                    .with_type("complexity", dist),
            );
        }

        // Centrality features: mostly zero with occasional spikes.
        let centrality: &[(&str, f64, f64, f64, &str)] = &[
            ("betweenness_approx", 0.0, 1.0, 0.1, "highly_skewed"),
            ("fan_in", 0.0, 50.0, 2.0, "right_skewed"),
            ("fan_out", 0.0, 20.0, 3.0, "right_skewed"),
            ("closeness", 0.0, 1.0, 0.3, "bimodal"),
            ("eigenvector", 0.0, 1.0, 0.2, "highly_skewed"),
        ];
        for &(name, min, max, mean, dist) in centrality {
            priors.insert(
                name.to_string(),
                FeaturePrior::new(name)
                    .with_beta_params(1.0, 10.0)
                    .with_range(min, max, mean)
                    .with_variance_threshold(0.05)
                    .with_type("centrality", dist),
            );
        }

        // Cycle features: Bernoulli or small integers.
        let cycles: &[(&str, f64, f64, f64, &str)] = &[
            ("in_cycle", 0.0, 1.0, 0.2, "bernoulli"),
            ("cycle_size", 0.0, 20.0, 0.5, "right_skewed"),
        ];
        for &(name, min, max, mean, dist) in cycles {
            priors.insert(
                name.to_string(),
                FeaturePrior::new(name)
                    .with_beta_params(1.0, 4.0)
                    .with_range(min, max, mean)
                    .with_variance_threshold(0.02)
                    .with_type("cycles", dist),
            );
        }

        // Clone features: most code has low duplication.
        let clones: &[(&str, f64, f64, f64, &str)] = &[
            ("clone_mass", 0.0, 1.0, 0.1, "right_skewed"),
            ("max_clone_similarity", 0.0, 1.0, 0.3, "bimodal"),
        ];
        for &(name, min, max, mean, dist) in clones {
            priors.insert(
                name.to_string(),
                FeaturePrior::new(name)
                    .with_beta_params(1.0, 8.0)
                    .with_range(min, max, mean)
                    .with_variance_threshold(0.1)
                    .with_type("clones", dist),
            );
        }

        Self { priors }
    }
}

impl PriorLibrary {
    /// Prior for a feature, falling back to the generic right-biased prior.
    pub fn prior_for(&self, feature_name: &str) -> FeaturePrior {
        self.priors
            .get(feature_name)
            .cloned()
            .unwrap_or_else(|| Self::generic_prior(feature_name))
    }

    /// Register or replace a custom prior
    pub fn insert(&mut self, prior: FeaturePrior) {
        self.priors.insert(prior.name.clone(), prior);
    }

    /// Generic prior for unknown features: expected mean ≈ 0.3 over [0, 1].
    pub fn generic_prior(feature_name: &str) -> FeaturePrior {
        FeaturePrior::new(feature_name)
            .with_beta_params(1.0, 1.0)
            .with_range(0.0, 1.0, 0.3)
            .with_type("generic", "right_skewed")
    }
}

/// Fused empirical + posterior statistics for one feature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureStatistics {
    /// Sample count
    pub n_samples: usize,
    /// Empirical mean
    pub mean: f64,
    /// Empirical variance (population)
    pub variance: f64,
    /// Empirical standard deviation
    pub std_dev: f64,
    /// Empirical minimum
    pub min: f64,
    /// Empirical maximum
    pub max: f64,
    /// Empirical median
    pub median: f64,
    /// Empirical interquartile range
    pub iqr: f64,
    /// Empirical range
    pub range: f64,
    /// Variance confidence tier
    pub confidence: VarianceConfidence,
    /// Weight given to the prior
    pub prior_weight: f64,
    /// Posterior mean
    pub posterior_mean: f64,
    /// Posterior variance
    pub posterior_variance: f64,
    /// Posterior standard deviation
    pub posterior_std: f64,
    /// Posterior minimum (min of empirical and prior)
    pub posterior_min: f64,
    /// Posterior maximum (max of empirical and prior)
    pub posterior_max: f64,
    /// Posterior range
    pub posterior_range: f64,
    /// Posterior interquartile range
    pub posterior_iqr: f64,
    /// Posterior median (approximated by the posterior mean)
    pub posterior_median: f64,
}

/// Empirical statistics over a value slice.
pub(crate) fn empirical_stats(values: &[f64]) -> (f64, f64, f64, f64, f64, f64) {
    let n = values.len();
    if n == 0 {
        return (0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let min = sorted[0];
    let max = sorted[n - 1];
    let median = percentile(&sorted, 0.5);
    let iqr = percentile(&sorted, 0.75) - percentile(&sorted, 0.25);
    (mean, variance, min, max, median, iqr)
}

/// Linear-interpolated percentile over sorted values.
pub(crate) fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let index = p * (n - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;
    if lower == upper || upper >= n {
        sorted[lower.min(n - 1)]
    } else {
        let weight = index - lower as f64;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}

/// Deterministic unit noise in [-1, 1] keyed by seed, feature, and entity.
fn unit_noise(seed: u64, feature: &str, entity_id: &str) -> f64 {
    let mut hash = seed;
    for chunk in [feature, entity_id] {
        for byte in chunk.as_bytes() {
            hash = splitmix64(hash ^ u64::from(*byte));
        }
    }
    (hash as f64 / u64::MAX as f64) * 2.0 - 1.0
}

/// Per-feature diagnostic snapshot of the fit.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureDiagnostics {
    /// Confidence tier
    pub confidence: &'static str,
    /// Sample count
    pub n_samples: usize,
    /// Empirical variance
    pub empirical_variance: f64,
    /// Posterior variance
    pub posterior_variance: f64,
    /// Prior weight used
    pub prior_weight: f64,
    /// "informative" when the posterior variance can drive a useful fallback
    pub fallback_quality: &'static str,
}

/// Normalizer that fuses empirical statistics with domain priors.
#[derive(Debug)]
pub struct BayesianNormalizer {
    /// Active normalization scheme
    pub scheme: NormalizationScheme,
    clip_bounds: (f64, f64),
    seed: u64,
    statistics: BTreeMap<String, FeatureStatistics>,
    priors: PriorLibrary,
}

impl BayesianNormalizer {
    /// Create a normalizer with the built-in prior library.
    pub fn new(scheme: NormalizationScheme, clip_bounds: (f64, f64)) -> Self {
        Self {
            scheme,
            clip_bounds,
            seed: DEFAULT_SEED,
            statistics: BTreeMap::new(),
            priors: PriorLibrary::default(),
        }
    }

    /// Override the deterministic seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Register a custom prior.
    pub fn add_prior(&mut self, prior: FeaturePrior) {
        self.priors.insert(prior);
    }

    /// Fit posterior statistics for every feature observed in the corpus.
    pub fn fit(&mut self, feature_vectors: &[FeatureVector]) -> Result<()> {
        self.statistics.clear();
        if feature_vectors.is_empty() {
            warn!("no feature vectors provided for Bayesian fitting");
            return Ok(());
        }

        let mut feature_values: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for vector in feature_vectors {
            for (name, &value) in &vector.features {
                feature_values.entry(name.as_str()).or_default().push(value);
            }
        }

        for (name, values) in feature_values {
            if values.is_empty() {
                continue;
            }
            let prior = self.priors.prior_for(name);
            let stats = Self::fuse(&values, &prior);
            debug!(
                feature = name,
                samples = stats.n_samples,
                confidence = stats.confidence.as_str(),
                prior_weight = stats.prior_weight,
                empirical_variance = stats.variance,
                posterior_variance = stats.posterior_variance,
                "fitted feature statistics"
            );
            self.statistics.insert(name.to_string(), stats);
        }

        Ok(())
    }

    /// Fuse empirical statistics with a prior.
    fn fuse(values: &[f64], prior: &FeaturePrior) -> FeatureStatistics {
        let (mean, variance, min, max, median, iqr) = empirical_stats(values);
        let n_samples = values.len();
        let confidence =
            VarianceConfidence::from_samples(n_samples, variance, prior.variance_threshold);
        let prior_weight = confidence.prior_weight();
        let empirical_weight = 1.0 - prior_weight;

        let posterior_mean = prior_weight * prior.expected_mean + empirical_weight * mean;
        let prior_variance = prior.prior_variance_estimate();

        let (posterior_variance, posterior_range, posterior_iqr) =
            if confidence == VarianceConfidence::Insufficient {
                let range = prior.expected_max - prior.expected_min;
                (prior_variance, range, range * 0.5)
            } else {
                let posterior_variance =
                    prior_weight * prior_variance + empirical_weight * variance;
                let posterior_std = posterior_variance.sqrt();
                let posterior_range = (max - min)
                    .max((prior.expected_max - prior.expected_min) * prior_weight);
                // 1.35 approximates the IQR of a normal distribution.
                let posterior_iqr = iqr.max(posterior_std * 1.35);
                (posterior_variance, posterior_range, posterior_iqr)
            };

        FeatureStatistics {
            n_samples,
            mean,
            variance,
            std_dev: variance.sqrt(),
            min,
            max,
            median,
            iqr,
            range: max - min,
            confidence,
            prior_weight,
            posterior_mean,
            posterior_variance,
            posterior_std: posterior_variance.sqrt(),
            posterior_min: min.min(prior.expected_min),
            posterior_max: max.max(prior.expected_max),
            posterior_range,
            posterior_iqr,
            posterior_median: posterior_mean,
        }
    }

    /// Normalize every vector in place using the fitted posterior statistics.
    pub fn normalize(&self, feature_vectors: &mut [FeatureVector]) -> Result<()> {
        for vector in feature_vectors.iter_mut() {
            let entity_id = vector.entity_id.clone();
            let raw: Vec<(String, f64)> = vector
                .features
                .iter()
                .map(|(k, &v)| (k.clone(), v))
                .collect();
            for (name, value) in raw {
                let normalized = self.normalize_value(&name, value, &entity_id);
                vector.normalized_features.insert(name, normalized);
            }
        }
        Ok(())
    }

    /// Normalize a single value.
    pub fn normalize_value(&self, feature: &str, value: f64, entity_id: &str) -> f64 {
        if value.is_nan() || value.is_infinite() {
            return self.clip(0.0);
        }

        let Some(stats) = self.statistics.get(feature) else {
            // Unknown feature: prior-only min/max mapping.
            let prior = self.priors.prior_for(feature);
            let range = prior.expected_max - prior.expected_min;
            if range <= 0.0 {
                return self.clip(0.5);
            }
            return self.clip((value - prior.expected_min) / range);
        };

        let normalized = match self.scheme {
            NormalizationScheme::Robust | NormalizationScheme::RobustBayesian => {
                if stats.iqr <= f64::EPSILON {
                    self.fallback(feature, value, stats, entity_id)
                } else {
                    let z = ((value - stats.posterior_median) / (1.5 * stats.posterior_iqr))
                        .clamp(-3.0, 3.0);
                    (z + 3.0) / 6.0
                }
            }
            NormalizationScheme::Minmax | NormalizationScheme::MinmaxBayesian => {
                if stats.range <= f64::EPSILON {
                    self.fallback(feature, value, stats, entity_id)
                } else {
                    (value - stats.min) / stats.range
                }
            }
            NormalizationScheme::Zscore | NormalizationScheme::ZscoreBayesian => {
                if stats.std_dev <= f64::EPSILON {
                    self.fallback(feature, value, stats, entity_id)
                } else {
                    let z = ((value - stats.posterior_mean) / stats.posterior_std)
                        .clamp(-3.0, 3.0);
                    (z + 3.0) / 6.0
                }
            }
        };

        self.clip(normalized)
    }

    /// Confidence-weighted fallback for zero-variance features: map the
    /// constant value into the posterior expected range, then add a small
    /// deterministic offset so downstream ordering is preserved when other
    /// features discriminate.
    fn fallback(
        &self,
        feature: &str,
        value: f64,
        stats: &FeatureStatistics,
        entity_id: &str,
    ) -> f64 {
        let span = stats.posterior_max - stats.posterior_min;
        let base = if span > f64::EPSILON {
            ((value - stats.posterior_min) / span).clamp(0.0, 1.0)
        } else {
            0.5
        };
        // The posterior spread scales the offset but never amplifies it past
        // the confidence tier's noise factor.
        let spread = stats.posterior_variance.sqrt().min(1.0);
        let offset =
            stats.confidence.noise_factor() * spread * unit_noise(self.seed, feature, entity_id);
        (base + offset).clamp(0.0, 1.0)
    }

    /// Public entry to the zero-variance fallback, used by the classical
    /// schemes when `use_bayesian_fallbacks` is enabled. Returns `None` when
    /// the feature was never fitted.
    pub fn zero_variance_fallback(
        &self,
        feature: &str,
        value: f64,
        entity_id: &str,
    ) -> Option<f64> {
        self.statistics
            .get(feature)
            .map(|stats| self.clip(self.fallback(feature, value, stats, entity_id)))
    }

    fn clip(&self, value: f64) -> f64 {
        value.clamp(self.clip_bounds.0, self.clip_bounds.1)
    }

    /// Fitted statistics for a feature
    pub fn statistics_for(&self, feature: &str) -> Option<&FeatureStatistics> {
        self.statistics.get(feature)
    }

    /// All fitted statistics
    pub fn all_statistics(&self) -> &BTreeMap<String, FeatureStatistics> {
        &self.statistics
    }

    /// Confidence tier for a feature
    pub fn confidence_for(&self, feature: &str) -> Option<VarianceConfidence> {
        self.statistics.get(feature).map(|s| s.confidence)
    }

    /// Per-feature diagnostics for the last fit.
    pub fn diagnostics(&self) -> BTreeMap<String, FeatureDiagnostics> {
        self.statistics
            .iter()
            .map(|(name, stats)| {
                (
                    name.clone(),
                    FeatureDiagnostics {
                        confidence: stats.confidence.as_str(),
                        n_samples: stats.n_samples,
                        empirical_variance: stats.variance,
                        posterior_variance: stats.posterior_variance,
                        prior_weight: stats.prior_weight,
                        fallback_quality: if stats.posterior_variance > 0.001 {
                            "informative"
                        } else {
                            "flat"
                        },
                    },
                )
            })
            .collect()
    }

    /// Log a fit summary. Warns when fewer than half of the features have an
    /// informative fallback.
    pub fn report_diagnostics(&self) {
        let diagnostics = self.diagnostics();
        if diagnostics.is_empty() {
            return;
        }

        let mut confidence_counts: BTreeMap<&str, usize> = BTreeMap::new();
        let mut informative = 0usize;
        for (name, diag) in &diagnostics {
            *confidence_counts.entry(diag.confidence).or_insert(0) += 1;
            if diag.fallback_quality == "informative" {
                informative += 1;
            }
            debug!(
                feature = name.as_str(),
                confidence = diag.confidence,
                samples = diag.n_samples,
                fallback = diag.fallback_quality,
                "normalization diagnostics"
            );
        }

        info!(?confidence_counts, informative, total = diagnostics.len(),
              "Bayesian normalization summary");

        if (informative as f64) < diagnostics.len() as f64 * 0.5 {
            warn!(
                informative,
                total = diagnostics.len(),
                "many features have flat fallbacks; consider more diverse data"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn vectors_with(feature: &str, values: &[f64]) -> Vec<FeatureVector> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let mut vector = FeatureVector::new(format!("entity_{i}"));
                vector.add_feature(feature, v);
                vector
            })
            .collect()
    }

    #[test]
    fn confidence_tiers_are_ordered_and_reachable() {
        assert_eq!(
            VarianceConfidence::from_samples(1, 0.0, 0.1),
            VarianceConfidence::Insufficient
        );
        assert_eq!(
            VarianceConfidence::from_samples(3, 5.0, 0.1),
            VarianceConfidence::VeryLow
        );
        assert_eq!(
            VarianceConfidence::from_samples(7, 0.01, 0.1),
            VarianceConfidence::VeryLow
        );
        assert_eq!(
            VarianceConfidence::from_samples(30, 0.01, 0.1),
            VarianceConfidence::Low
        );
        assert_eq!(
            VarianceConfidence::from_samples(7, 5.0, 0.1),
            VarianceConfidence::Medium
        );
        assert_eq!(
            VarianceConfidence::from_samples(30, 5.0, 0.1),
            VarianceConfidence::High
        );
    }

    #[test]
    fn fitting_twice_is_idempotent() {
        let vectors = vectors_with("cyclomatic", &[1.0, 3.0, 8.0, 2.0, 5.0]);
        let mut normalizer = BayesianNormalizer::new(
            NormalizationScheme::RobustBayesian,
            (0.0, 1.0),
        );
        normalizer.fit(&vectors).unwrap();
        let first = normalizer.all_statistics().clone();
        normalizer.fit(&vectors).unwrap();
        assert_eq!(first, *normalizer.all_statistics());
    }

    #[test]
    fn zero_variance_fallback_produces_distinct_values() {
        // Five entities, all cyclomatic = 5: empirical variance is 0.
        let mut vectors = vectors_with("cyclomatic", &[5.0; 5]);
        let mut normalizer = BayesianNormalizer::new(
            NormalizationScheme::RobustBayesian,
            (0.0, 1.0),
        );
        normalizer.fit(&vectors).unwrap();
        normalizer.normalize(&mut vectors).unwrap();

        let normalized: Vec<f64> = vectors
            .iter()
            .map(|v| v.get_normalized("cyclomatic").unwrap())
            .collect();

        // Values all land in [0, 1] and are not all identical.
        assert!(normalized.iter().all(|&v| (0.0..=1.0).contains(&v)));
        let first = normalized[0];
        assert!(normalized.iter().any(|&v| (v - first).abs() > 1e-12));

        // And the spread stays within the confidence-scaled offset band.
        let spread = normalized
            .iter()
            .fold(f64::NEG_INFINITY, |a, &b| a.max(b))
            - normalized.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        assert!(spread <= 0.31, "spread {spread} exceeds 2x offset bound");
    }

    #[test]
    fn fallback_is_deterministic_across_runs() {
        let make = || {
            let mut vectors = vectors_with("cyclomatic", &[5.0; 5]);
            let mut normalizer = BayesianNormalizer::new(
                NormalizationScheme::RobustBayesian,
                (0.0, 1.0),
            );
            normalizer.fit(&vectors).unwrap();
            normalizer.normalize(&mut vectors).unwrap();
            vectors
                .iter()
                .map(|v| v.get_normalized("cyclomatic").unwrap())
                .collect::<Vec<f64>>()
        };
        assert_eq!(make(), make());
    }

    #[test]
    fn varied_values_normalize_into_unit_interval() {
        let mut vectors = vectors_with("cognitive", &[0.0, 2.0, 9.0, 30.0, 4.0, 7.0]);
        let mut normalizer = BayesianNormalizer::new(
            NormalizationScheme::ZscoreBayesian,
            (0.0, 1.0),
        );
        normalizer.fit(&vectors).unwrap();
        normalizer.normalize(&mut vectors).unwrap();

        for vector in &vectors {
            let v = vector.get_normalized("cognitive").unwrap();
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn unknown_features_use_generic_prior() {
        let normalizer =
            BayesianNormalizer::new(NormalizationScheme::RobustBayesian, (0.0, 1.0));
        // Generic prior spans [0, 1] so mid value maps near itself.
        let v = normalizer.normalize_value("mystery_metric", 0.4, "e1");
        assert_relative_eq!(v, 0.4, epsilon = 1e-9);
    }

    #[test]
    fn beta_variance_matches_closed_form() {
        let prior = FeaturePrior::new("x").with_beta_params(2.0, 5.0);
        // Var(Beta(2,5)) = 10 / (49 * 8)
        assert_relative_eq!(prior.beta_variance(), 10.0 / 392.0, epsilon = 1e-12);
    }
}
