//! Feature normalization across the corpus.
//!
//! [`FeatureNormalizer`] fits per-feature statistics over every entity, then
//! maps each raw value into the configured clip bounds (default [0, 1]). The
//! classical schemes (robust, minmax, zscore) borrow the Bayesian fallback for
//! zero-variance features when `use_bayesian_fallbacks` is set; the
//! `*_bayesian` schemes delegate entirely to [`BayesianNormalizer`].

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::bayesian::{empirical_stats, BayesianNormalizer};
use crate::core::config::{NormalizationConfig, NormalizationScheme};
use crate::core::errors::Result;
use crate::core::featureset::FeatureVector;

/// Classical statistical measures for one feature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizationStatistics {
    /// Sample mean
    pub mean: f64,
    /// Sample variance (population)
    pub variance: f64,
    /// Sample standard deviation
    pub std_dev: f64,
    /// Minimum observed value
    pub min: f64,
    /// Maximum observed value
    pub max: f64,
    /// Observed range
    pub range: f64,
    /// Median
    pub median: f64,
    /// Interquartile range
    pub iqr: f64,
    /// Number of samples
    pub n_samples: usize,
}

impl NormalizationStatistics {
    /// Compute statistics from raw values.
    pub fn from_values(values: &[f64]) -> Self {
        let (mean, variance, min, max, median, iqr) = empirical_stats(values);
        Self {
            mean,
            variance,
            std_dev: variance.sqrt(),
            min,
            max,
            range: max - min,
            median,
            iqr,
            n_samples: values.len(),
        }
    }
}

/// Corpus-wide feature normalizer.
#[derive(Debug)]
pub struct FeatureNormalizer {
    config: NormalizationConfig,
    statistics: BTreeMap<String, NormalizationStatistics>,
    bayesian: Option<BayesianNormalizer>,
}

impl FeatureNormalizer {
    /// Create a normalizer from the run configuration.
    pub fn new(config: NormalizationConfig) -> Self {
        let bayesian = if config.scheme.is_bayesian() || config.use_bayesian_fallbacks {
            Some(BayesianNormalizer::new(config.scheme, config.clip_bounds))
        } else {
            None
        };
        Self {
            config,
            statistics: BTreeMap::new(),
            bayesian,
        }
    }

    /// Fit per-feature statistics over the corpus. Empty corpora fit to an
    /// empty table; normalization then passes values through clipped.
    pub fn fit(&mut self, feature_vectors: &[FeatureVector]) -> Result<()> {
        self.statistics.clear();

        if let Some(bayesian) = self.bayesian.as_mut() {
            bayesian.fit(feature_vectors)?;
            if self.config.confidence_reporting {
                bayesian.report_diagnostics();
            }
        }

        if self.config.scheme.is_bayesian() {
            return Ok(());
        }

        let mut feature_values: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for vector in feature_vectors {
            for (name, &value) in &vector.features {
                feature_values.entry(name.clone()).or_default().push(value);
            }
        }

        self.statistics = feature_values
            .into_iter()
            .map(|(name, values)| {
                let stats = NormalizationStatistics::from_values(&values);
                if stats.n_samples > 1 && stats.range <= f64::EPSILON {
                    warn!(feature = name.as_str(), value = stats.min,
                          "feature has zero variance across the corpus");
                }
                (name, stats)
            })
            .collect();

        Ok(())
    }

    /// Normalize every vector in place.
    pub fn normalize(&self, feature_vectors: &mut [FeatureVector]) -> Result<()> {
        if self.config.scheme.is_bayesian() {
            let bayesian = self
                .bayesian
                .as_ref()
                .expect("bayesian normalizer exists for bayesian schemes");
            return bayesian.normalize(feature_vectors);
        }

        feature_vectors.par_iter_mut().for_each(|vector| {
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
        });

        Ok(())
    }

    /// Normalize a single value with the classical schemes.
    fn normalize_value(&self, feature: &str, value: f64, entity_id: &str) -> f64 {
        if value.is_nan() || value.is_infinite() {
            return self.clip(0.0);
        }

        let Some(stats) = self.statistics.get(feature) else {
            return self.clip(value);
        };

        let normalized = match self.config.scheme {
            NormalizationScheme::Robust => {
                if stats.iqr <= f64::EPSILON {
                    return self.degenerate(feature, value, entity_id, 0.5);
                }
                let z = ((value - stats.median) / (1.5 * stats.iqr)).clamp(-3.0, 3.0);
                (z + 3.0) / 6.0
            }
            NormalizationScheme::Minmax => {
                if stats.range <= f64::EPSILON {
                    return self.degenerate(feature, value, entity_id, 0.5);
                }
                (value - stats.min) / stats.range
            }
            NormalizationScheme::Zscore => {
                if stats.std_dev <= f64::EPSILON {
                    return self.degenerate(feature, value, entity_id, 0.5);
                }
                let z = ((value - stats.mean) / stats.std_dev).clamp(-3.0, 3.0);
                (z + 3.0) / 6.0
            }
            // Bayesian schemes are handled before this point.
            _ => value,
        };

        self.clip(normalized)
    }

    /// Zero-variance handling for the classical schemes.
    fn degenerate(&self, feature: &str, value: f64, entity_id: &str, flat: f64) -> f64 {
        if self.config.use_bayesian_fallbacks {
            if let Some(fallback) = self
                .bayesian
                .as_ref()
                .and_then(|b| b.zero_variance_fallback(feature, value, entity_id))
            {
                return fallback;
            }
        }
        self.clip(flat)
    }

    fn clip(&self, value: f64) -> f64 {
        value.clamp(self.config.clip_bounds.0, self.config.clip_bounds.1)
    }

    /// Classical statistics for a feature (empty map for bayesian schemes)
    pub fn statistics_for(&self, feature: &str) -> Option<&NormalizationStatistics> {
        self.statistics.get(feature)
    }

    /// All classical statistics
    pub fn all_statistics(&self) -> &BTreeMap<String, NormalizationStatistics> {
        &self.statistics
    }

    /// The Bayesian normalizer, when the configuration enables one
    pub fn bayesian(&self) -> Option<&BayesianNormalizer> {
        self.bayesian.as_ref()
    }
}

/// Log per-feature variance diagnostics for a raw feature corpus. Flat
/// features are the main cause of uninformative rankings, so they are called
/// out before normalization runs.
pub fn log_feature_variance(feature_vectors: &[FeatureVector]) {
    let mut feature_values: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for vector in feature_vectors {
        for (name, &value) in &vector.features {
            feature_values.entry(name.as_str()).or_default().push(value);
        }
    }

    let mut flat = Vec::new();
    for (name, values) in &feature_values {
        let min = values.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        let max = values.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        let mut unique = values.clone();
        unique.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        unique.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);

        if values.len() > 1 && unique.len() == 1 {
            flat.push(*name);
        }
        info!(
            feature = name,
            min,
            max,
            unique = unique.len(),
            total = values.len(),
            "feature variance"
        );
    }

    if !flat.is_empty() {
        warn!(?flat, "flat features detected; Bayesian fallbacks will drive their normalization");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::NormalizationConfig;
    use approx::assert_relative_eq;

    fn vectors(values: &[f64]) -> Vec<FeatureVector> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let mut vector = FeatureVector::new(format!("e{i}"));
                vector.add_feature("metric", v);
                vector
            })
            .collect()
    }

    fn config(scheme: NormalizationScheme) -> NormalizationConfig {
        NormalizationConfig {
            scheme,
            ..NormalizationConfig::default()
        }
    }

    #[test]
    fn minmax_maps_extremes_to_unit_interval() {
        let mut vs = vectors(&[0.0, 5.0, 10.0]);
        let mut normalizer = FeatureNormalizer::new(config(NormalizationScheme::Minmax));
        normalizer.fit(&vs).unwrap();
        normalizer.normalize(&mut vs).unwrap();

        assert_relative_eq!(vs[0].get_normalized("metric").unwrap(), 0.0);
        assert_relative_eq!(vs[1].get_normalized("metric").unwrap(), 0.5);
        assert_relative_eq!(vs[2].get_normalized("metric").unwrap(), 1.0);
    }

    #[test]
    fn robust_scheme_centers_on_median() {
        let mut vs = vectors(&[1.0, 2.0, 3.0, 4.0, 100.0]);
        let mut normalizer = FeatureNormalizer::new(config(NormalizationScheme::Robust));
        normalizer.fit(&vs).unwrap();
        normalizer.normalize(&mut vs).unwrap();

        // Median value maps to the middle of the unit interval.
        assert_relative_eq!(vs[2].get_normalized("metric").unwrap(), 0.5, epsilon = 1e-9);
        // The outlier is clipped at the top of the band, not beyond it.
        assert!(vs[4].get_normalized("metric").unwrap() <= 1.0);
    }

    #[test]
    fn all_normalized_values_stay_in_bounds() {
        for scheme in [
            NormalizationScheme::Robust,
            NormalizationScheme::Minmax,
            NormalizationScheme::Zscore,
            NormalizationScheme::RobustBayesian,
            NormalizationScheme::MinmaxBayesian,
            NormalizationScheme::ZscoreBayesian,
        ] {
            let mut vs = vectors(&[-3.0, 0.0, 1.5, 7.0, 42.0]);
            let mut normalizer = FeatureNormalizer::new(config(scheme));
            normalizer.fit(&vs).unwrap();
            normalizer.normalize(&mut vs).unwrap();
            for v in &vs {
                let n = v.get_normalized("metric").unwrap();
                assert!((0.0..=1.0).contains(&n), "{scheme:?} produced {n}");
            }
        }
    }

    #[test]
    fn renormalizing_normalized_outputs_stays_in_bounds() {
        let mut vs = vectors(&[1.0, 4.0, 9.0, 16.0]);
        let mut normalizer =
            FeatureNormalizer::new(config(NormalizationScheme::RobustBayesian));
        normalizer.fit(&vs).unwrap();
        normalizer.normalize(&mut vs).unwrap();

        // Treat the outputs as a fresh raw corpus.
        let normalized: Vec<f64> = vs
            .iter()
            .map(|v| v.get_normalized("metric").unwrap())
            .collect();
        let mut second = vectors(&normalized);
        let mut normalizer2 =
            FeatureNormalizer::new(config(NormalizationScheme::RobustBayesian));
        normalizer2.fit(&second).unwrap();
        normalizer2.normalize(&mut second).unwrap();

        for v in &second {
            let n = v.get_normalized("metric").unwrap();
            assert!((0.0..=1.0).contains(&n));
        }
    }

    #[test]
    fn classical_scheme_uses_bayesian_fallback_for_flat_features() {
        let mut vs = vectors(&[0.4; 6]);
        let mut normalizer = FeatureNormalizer::new(config(NormalizationScheme::Minmax));
        normalizer.fit(&vs).unwrap();
        normalizer.normalize(&mut vs).unwrap();

        let values: Vec<f64> = vs
            .iter()
            .map(|v| v.get_normalized("metric").unwrap())
            .collect();
        let first = values[0];
        assert!(
            values.iter().any(|&v| (v - first).abs() > 1e-12),
            "fallback should break the flat tie"
        );
    }

    #[test]
    fn flat_features_without_fallback_collapse_to_half() {
        let mut cfg = config(NormalizationScheme::Zscore);
        cfg.use_bayesian_fallbacks = false;
        let mut vs = vectors(&[7.0; 4]);
        let mut normalizer = FeatureNormalizer::new(cfg);
        normalizer.fit(&vs).unwrap();
        normalizer.normalize(&mut vs).unwrap();
        for v in &vs {
            assert_relative_eq!(v.get_normalized("metric").unwrap(), 0.5);
        }
    }

    #[test]
    fn empty_corpus_fit_is_not_an_error() {
        let mut normalizer =
            FeatureNormalizer::new(config(NormalizationScheme::RobustBayesian));
        assert!(normalizer.fit(&[]).is_ok());
    }
}
