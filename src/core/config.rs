//! Configuration model for the analysis pipeline.
//!
//! The structure mirrors the recognized options of the external configuration
//! document (YAML). Every section has serde defaults so partial documents
//! deserialize cleanly; [`ValknutConfig::validate`] runs at pipeline
//! construction and is the only place a run can fail fast.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, ValknutError};

/// Configuration for a single source root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RootConfig {
    /// Root path to scan
    pub path: PathBuf,

    /// Include glob patterns (relative to the root)
    #[serde(default = "default_include_patterns")]
    pub include: Vec<String>,

    /// Exclude glob patterns (relative to the root)
    #[serde(default = "default_exclude_patterns")]
    pub exclude: Vec<String>,
}

impl RootConfig {
    /// Create a root config for a path with default include/exclude globs
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            include: default_include_patterns(),
            exclude: default_exclude_patterns(),
        }
    }
}

fn default_include_patterns() -> Vec<String> {
    vec!["**/*".to_string()]
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        "**/node_modules/**".to_string(),
        "**/dist/**".to_string(),
        "**/.venv/**".to_string(),
        "**/venv/**".to_string(),
        "**/target/**".to_string(),
        "**/__pycache__/**".to_string(),
        "**/.git/**".to_string(),
        "**/build/**".to_string(),
    ]
}

/// Category weights used by the scorer. Values are re-normalized to sum to 1
/// at scorer construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WeightsConfig {
    /// Weight for the complexity category
    pub complexity: f64,
    /// Weight for the clone-mass category
    pub clone_mass: f64,
    /// Weight for the centrality category
    pub centrality: f64,
    /// Weight for the cycles category
    pub cycles: f64,
    /// Weight for the type-friction category
    pub type_friction: f64,
    /// Weight for the smell-prior category
    pub smell_prior: f64,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            complexity: 0.25,
            clone_mass: 0.20,
            centrality: 0.15,
            cycles: 0.15,
            type_friction: 0.15,
            smell_prior: 0.10,
        }
    }
}

impl WeightsConfig {
    /// Sum of all category weights
    pub fn total(&self) -> f64 {
        self.complexity
            + self.clone_mass
            + self.centrality
            + self.cycles
            + self.type_friction
            + self.smell_prior
    }
}

/// Granularity of the ranked entity set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Function granularity for python/typescript/javascript, file otherwise
    #[default]
    Auto,
    /// File entities only
    File,
    /// Functions and methods
    Function,
    /// Class-like entities only
    Class,
}

/// Configuration for the ranking stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RankingConfig {
    /// Number of top entities to return
    pub top_k: usize,
    /// Granularity of analysis
    pub granularity: Granularity,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_k: 100,
            granularity: Granularity::Auto,
        }
    }
}

/// Normalization scheme selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationScheme {
    /// Median/IQR based scaling
    Robust,
    /// Min/max scaling
    Minmax,
    /// Mean/std scaling
    Zscore,
    /// Robust scaling with Bayesian posterior statistics
    #[default]
    RobustBayesian,
    /// Min/max scaling with Bayesian posterior statistics
    MinmaxBayesian,
    /// Z-score scaling with Bayesian posterior statistics
    ZscoreBayesian,
}

impl NormalizationScheme {
    /// True for the `*_bayesian` schemes
    pub fn is_bayesian(self) -> bool {
        matches!(
            self,
            Self::RobustBayesian | Self::MinmaxBayesian | Self::ZscoreBayesian
        )
    }
}

/// Configuration for the normalization stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NormalizationConfig {
    /// Scheme used to map raw features to [0, 1]
    pub scheme: NormalizationScheme,
    /// Bounds applied to every normalized value
    pub clip_bounds: (f64, f64),
    /// Enable Bayesian priors for zero-variance cases
    pub use_bayesian_fallbacks: bool,
    /// Report variance confidence diagnostics after fitting
    pub confidence_reporting: bool,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            scheme: NormalizationScheme::RobustBayesian,
            clip_bounds: (0.0, 1.0),
            use_bayesian_fallbacks: true,
            confidence_reporting: true,
        }
    }
}

/// Configuration for the external clone detector integration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EchoConfig {
    /// Whether clone-mass features and clone packs are produced
    pub enabled: bool,
    /// Minimum member similarity for a group to be considered
    pub min_similarity: f64,
    /// Minimum token count the detector was asked for
    pub min_tokens: usize,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_similarity: 0.85,
            min_tokens: 30,
        }
    }
}

/// Detector toggles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DetectorsConfig {
    /// External clone detector integration
    pub echo: EchoConfig,
}

/// Configuration for clone consolidation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CloneConfig {
    /// Minimum total LOC across group members for a clone pack
    pub min_total_loc: usize,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self { min_total_loc: 60 }
    }
}

/// Configuration for impact-pack synthesis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ImpactPacksConfig {
    /// Enable cycle-cutting packs
    pub enable_cycle_packs: bool,
    /// Enable chokepoint elimination packs
    pub enable_chokepoint_packs: bool,
    /// Maximum number of packs to keep after ranking
    pub max_packs: usize,
    /// Sample count for approximate betweenness centrality
    pub centrality_samples: usize,
    /// Keep a pack only if its entities do not overlap earlier selections
    pub non_overlap: bool,
}

impl Default for ImpactPacksConfig {
    fn default() -> Self {
        Self {
            enable_cycle_packs: true,
            enable_chokepoint_packs: true,
            max_packs: 20,
            centrality_samples: 64,
            non_overlap: true,
        }
    }
}

/// Configuration for brief generation over the tool protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BriefsConfig {
    /// Depth of callee context included in briefs
    pub callee_depth: usize,
    /// Maximum tokens per brief item
    pub max_tokens_per_item: usize,
    /// Include entity signatures in briefs
    pub include_signatures: bool,
    /// Include detected refactoring suggestions in briefs
    pub include_detected_refactors: bool,
}

impl Default for BriefsConfig {
    fn default() -> Self {
        Self {
            callee_depth: 2,
            max_tokens_per_item: 8000,
            include_signatures: true,
            include_detected_refactors: true,
        }
    }
}

/// Optional coverage report input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CoverageConfig {
    /// Path to a coverage report (format auto-detected)
    pub report_path: Option<PathBuf>,
}

/// Top-level valknut configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValknutConfig {
    /// Configuration schema version
    pub version: u32,
    /// Enabled languages
    pub languages: Vec<String>,
    /// Source roots to analyze
    pub roots: Vec<RootConfig>,
    /// Ranking options
    pub ranking: RankingConfig,
    /// Scoring category weights
    pub weights: WeightsConfig,
    /// Detector toggles
    pub detectors: DetectorsConfig,
    /// Normalization options
    pub normalize: NormalizationConfig,
    /// Clone consolidation options
    pub clone: CloneConfig,
    /// Impact-pack options
    pub impact_packs: ImpactPacksConfig,
    /// Brief generation options
    pub briefs: BriefsConfig,
    /// Coverage input options
    pub coverage: CoverageConfig,
    /// Cache directory (the on-disk cache is an external collaborator)
    pub cache_dir: PathBuf,
    /// Cache entry lifetime in seconds
    pub cache_ttl_seconds: u64,
}

impl Default for ValknutConfig {
    fn default() -> Self {
        Self {
            version: 1,
            languages: vec![
                "python".to_string(),
                "typescript".to_string(),
                "javascript".to_string(),
                "rust".to_string(),
                "go".to_string(),
            ],
            roots: vec![RootConfig::new("./")],
            ranking: RankingConfig::default(),
            weights: WeightsConfig::default(),
            detectors: DetectorsConfig::default(),
            normalize: NormalizationConfig::default(),
            clone: CloneConfig::default(),
            impact_packs: ImpactPacksConfig::default(),
            briefs: BriefsConfig::default(),
            coverage: CoverageConfig::default(),
            cache_dir: PathBuf::from(".valknut_cache"),
            cache_ttl_seconds: 86_400,
        }
    }
}

/// Languages the engine ships adapters for.
pub const SUPPORTED_LANGUAGES: &[&str] = &["python", "typescript", "javascript", "rust", "go"];

impl ValknutConfig {
    /// Parse a configuration from a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration, failing fast on the conditions that make a
    /// run unrunnable.
    pub fn validate(&self) -> Result<()> {
        if self.roots.is_empty() {
            return Err(ValknutError::config_field(
                "at least one root must be specified",
                "roots",
            ));
        }

        for language in &self.languages {
            if !SUPPORTED_LANGUAGES.contains(&language.as_str()) {
                return Err(ValknutError::config_field(
                    format!("unknown language '{language}'"),
                    "languages",
                ));
            }
        }

        if self.ranking.top_k < 1 {
            return Err(ValknutError::config_field(
                "top_k must be at least 1",
                "ranking.top_k",
            ));
        }

        let weight_fields = [
            ("weights.complexity", self.weights.complexity),
            ("weights.clone_mass", self.weights.clone_mass),
            ("weights.centrality", self.weights.centrality),
            ("weights.cycles", self.weights.cycles),
            ("weights.type_friction", self.weights.type_friction),
            ("weights.smell_prior", self.weights.smell_prior),
        ];
        for (field, value) in weight_fields {
            if !(0.0..=1.0).contains(&value) || value.is_nan() {
                return Err(ValknutError::config_field(
                    format!("weight must be in [0, 1], got {value}"),
                    field,
                ));
            }
        }
        if self.weights.total() <= 0.0 {
            return Err(ValknutError::config_field(
                "at least one weight must be positive",
                "weights",
            ));
        }

        if !(0.0..=1.0).contains(&self.detectors.echo.min_similarity) {
            return Err(ValknutError::config_field(
                "min_similarity must be in [0, 1]",
                "detectors.echo.min_similarity",
            ));
        }
        if self.detectors.echo.min_tokens < 1 {
            return Err(ValknutError::config_field(
                "min_tokens must be at least 1",
                "detectors.echo.min_tokens",
            ));
        }

        if self.clone.min_total_loc < 10 {
            return Err(ValknutError::config_field(
                "min_total_loc must be at least 10",
                "clone.min_total_loc",
            ));
        }

        let (lo, hi) = self.normalize.clip_bounds;
        if lo >= hi || lo.is_nan() || hi.is_nan() {
            return Err(ValknutError::config_field(
                format!("clip bounds must satisfy low < high, got ({lo}, {hi})"),
                "normalize.clip_bounds",
            ));
        }

        if self.impact_packs.max_packs < 1 {
            return Err(ValknutError::config_field(
                "max_packs must be at least 1",
                "impact_packs.max_packs",
            ));
        }

        Ok(())
    }

    /// Apply a weight update, validating the result.
    pub fn with_weights(mut self, weights: WeightsConfig) -> Result<Self> {
        self.weights = weights;
        self.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(ValknutConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_roots_are_rejected() {
        let mut config = ValknutConfig::default();
        config.roots.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_language_is_rejected() {
        let mut config = ValknutConfig::default();
        config.languages.push("cobol".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn zero_weights_are_rejected() {
        let mut config = ValknutConfig::default();
        config.weights = WeightsConfig {
            complexity: 0.0,
            clone_mass: 0.0,
            centrality: 0.0,
            cycles: 0.0,
            type_friction: 0.0,
            smell_prior: 0.0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn yaml_round_trip_preserves_options() {
        let config = ValknutConfig::default();
        let yaml = config.to_yaml().unwrap();
        let parsed = ValknutConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn partial_yaml_uses_defaults() {
        let config = ValknutConfig::from_yaml("ranking:\n  top_k: 7\n").unwrap();
        assert_eq!(config.ranking.top_k, 7);
        assert_eq!(config.normalize.scheme, NormalizationScheme::RobustBayesian);
    }

    #[test]
    fn inverted_clip_bounds_are_rejected() {
        let mut config = ValknutConfig::default();
        config.normalize.clip_bounds = (1.0, 0.0);
        assert!(config.validate().is_err());
    }
}
