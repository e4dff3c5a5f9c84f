//! Feature extraction framework and data structures.
//!
//! Extractors declare their feature schemas up front and are assembled into an
//! immutable [`ExtractorSet`] before the pipeline runs. Extraction is guarded:
//! a failing extractor substitutes its declared defaults and records a
//! `<extractor>_error` tag in the vector metadata, so a single bad entity can
//! never abort a run.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::config::ValknutConfig;
use crate::core::entities::{CodeEntity, EntityId, ParseIndex};
use crate::core::errors::Result;
use crate::detectors::clones::CloneGroup;

/// Map of feature name to value. Ordered for deterministic iteration.
pub type FeatureMap = BTreeMap<String, f64>;

/// Schema for one feature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureDefinition {
    /// Unique feature name
    pub name: String,
    /// Human-readable description of what this feature measures
    pub description: String,
    /// Minimum expected value, used for clamping
    pub min_value: Option<f64>,
    /// Maximum expected value, used for clamping
    pub max_value: Option<f64>,
    /// Default value substituted when the feature cannot be computed
    pub default_value: f64,
    /// True if higher values indicate more refactoring need
    pub higher_is_worse: bool,
}

impl FeatureDefinition {
    /// Create a definition with open range and zero default
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            min_value: None,
            max_value: None,
            default_value: 0.0,
            higher_is_worse: true,
        }
    }

    /// Set the expected value range
    pub fn with_range(mut self, min_value: f64, max_value: f64) -> Self {
        self.min_value = Some(min_value);
        self.max_value = Some(max_value);
        self
    }

    /// Set the default value
    pub fn with_default(mut self, default_value: f64) -> Self {
        self.default_value = default_value;
        self
    }

    /// Clamp a value into the declared range; NaN and infinities collapse to
    /// the default.
    pub fn clamp_value(&self, value: f64) -> f64 {
        if value.is_nan() || value.is_infinite() {
            return self.default_value;
        }
        let mut clamped = value;
        if let Some(min) = self.min_value {
            clamped = clamped.max(min);
        }
        if let Some(max) = self.max_value {
            clamped = clamped.min(max);
        }
        clamped
    }
}

/// Severity of a refactoring suggestion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Nice to have
    Low,
    /// Worth scheduling
    Medium,
    /// Should be addressed soon
    High,
}

/// Effort estimate attached to a suggestion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EffortLevel {
    /// Under an hour
    Low,
    /// A working session
    Medium,
    /// Multi-session change
    High,
}

/// A refactoring suggestion produced by the pattern detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefactoringSuggestion {
    /// Suggestion type, e.g. `extract_method`
    pub refactoring_type: String,
    /// Severity of the underlying smell
    pub severity: Severity,
    /// Short title
    pub title: String,
    /// What to do
    pub description: String,
    /// Why it matters
    pub rationale: String,
    /// Estimated effort
    pub effort: EffortLevel,
    /// Optional before sketch
    pub before: Option<String>,
    /// Optional after sketch
    pub after: Option<String>,
}

/// Per-entity, per-run feature container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Entity this vector belongs to
    pub entity_id: EntityId,
    /// Raw feature values as computed by extractors
    pub features: FeatureMap,
    /// Normalized feature values in [0, 1], filled by the normalizer
    pub normalized_features: FeatureMap,
    /// Extraction metadata, including `<extractor>_error` annotations
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Refactoring suggestions attached during extraction
    pub refactoring_suggestions: Vec<RefactoringSuggestion>,
}

impl FeatureVector {
    /// Create an empty vector for an entity
    pub fn new(entity_id: impl Into<EntityId>) -> Self {
        Self {
            entity_id: entity_id.into(),
            features: FeatureMap::new(),
            normalized_features: FeatureMap::new(),
            metadata: BTreeMap::new(),
            refactoring_suggestions: Vec::new(),
        }
    }

    /// Add a raw feature value
    pub fn add_feature(&mut self, name: impl Into<String>, value: f64) {
        self.features.insert(name.into(), value);
    }

    /// Raw feature lookup
    pub fn get_feature(&self, name: &str) -> Option<f64> {
        self.features.get(name).copied()
    }

    /// Normalized feature lookup
    pub fn get_normalized(&self, name: &str) -> Option<f64> {
        self.normalized_features.get(name).copied()
    }

    /// Attach metadata
    pub fn add_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Number of raw features
    pub fn feature_count(&self) -> usize {
        self.features.len()
    }
}

/// Context handed to extractors: the parse index for the entity's language
/// plus run configuration.
#[derive(Debug, Clone)]
pub struct ExtractionContext {
    /// Effective run configuration
    pub config: Arc<ValknutConfig>,
    /// Index owning the entity under extraction
    pub index: Arc<ParseIndex>,
    /// Clone groups reported by the external detector
    pub clone_groups: Arc<Vec<CloneGroup>>,
}

impl ExtractionContext {
    /// Create a context for one language index
    pub fn new(config: Arc<ValknutConfig>, index: Arc<ParseIndex>) -> Self {
        Self {
            config,
            index,
            clone_groups: Arc::new(Vec::new()),
        }
    }

    /// Attach clone groups from the external detector
    pub fn with_clone_groups(mut self, groups: Arc<Vec<CloneGroup>>) -> Self {
        self.clone_groups = groups;
        self
    }
}

/// Trait implemented by all feature extractors.
#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    /// Unique extractor name; used for error tags
    fn name(&self) -> &str;

    /// Feature schemas this extractor provides
    fn features(&self) -> &[FeatureDefinition];

    /// Whether this extractor applies to the entity
    fn supports_entity(&self, _entity: &CodeEntity) -> bool {
        true
    }

    /// Extract features from one entity
    async fn extract(&self, entity: &CodeEntity, context: &ExtractionContext) -> Result<FeatureMap>;

    /// Optionally attach refactoring suggestions for the entity
    fn suggestions(
        &self,
        _entity: &CodeEntity,
        _context: &ExtractionContext,
    ) -> Vec<RefactoringSuggestion> {
        Vec::new()
    }

    /// Look up a feature definition by name
    fn feature_definition(&self, name: &str) -> Option<&FeatureDefinition> {
        self.features().iter().find(|f| f.name == name)
    }

    /// Declared defaults for every feature of this extractor
    fn default_features(&self) -> FeatureMap {
        self.features()
            .iter()
            .map(|f| (f.name.clone(), f.default_value))
            .collect()
    }
}

/// Immutable table of extractors assembled before the pipeline runs.
#[derive(Default)]
pub struct ExtractorSet {
    extractors: Vec<Arc<dyn FeatureExtractor>>,
}

impl ExtractorSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an extractor to the table
    pub fn register(mut self, extractor: Arc<dyn FeatureExtractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    /// Registered extractors
    pub fn extractors(&self) -> &[Arc<dyn FeatureExtractor>] {
        &self.extractors
    }

    /// All feature definitions across the table
    pub fn all_definitions(&self) -> Vec<&FeatureDefinition> {
        self.extractors.iter().flat_map(|e| e.features().iter()).collect()
    }

    /// Extract every supported feature for an entity.
    ///
    /// Failures are captured: the offending extractor contributes its declared
    /// defaults and a `<name>_error` metadata entry, while all other
    /// extractors run unaffected.
    pub async fn extract_all(
        &self,
        entity: &CodeEntity,
        context: &ExtractionContext,
    ) -> FeatureVector {
        let mut vector = FeatureVector::new(entity.id.clone());

        for extractor in &self.extractors {
            if !extractor.supports_entity(entity) {
                continue;
            }

            match extractor.extract(entity, context).await {
                Ok(features) => {
                    for (name, value) in features {
                        let value = extractor
                            .feature_definition(&name)
                            .map(|def| def.clamp_value(value))
                            .unwrap_or(value);
                        vector.add_feature(name, value);
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        extractor = extractor.name(),
                        entity = %entity.id,
                        error = %err,
                        "feature extraction failed; substituting defaults"
                    );
                    for (name, value) in extractor.default_features() {
                        vector.features.entry(name).or_insert(value);
                    }
                    vector.add_metadata(
                        format!("{}_error", extractor.name()),
                        serde_json::Value::String(err.to_string()),
                    );
                }
            }

            for suggestion in extractor.suggestions(entity, context) {
                vector.refactoring_suggestions.push(suggestion);
            }
        }

        vector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entities::{EntityKind, SourceLocation};

    struct FixedExtractor;

    #[async_trait]
    impl FeatureExtractor for FixedExtractor {
        fn name(&self) -> &str {
            "fixed"
        }

        fn features(&self) -> &[FeatureDefinition] {
            static DEFS: once_cell::sync::Lazy<Vec<FeatureDefinition>> =
                once_cell::sync::Lazy::new(|| {
                    vec![FeatureDefinition::new("answer", "test feature")
                        .with_range(0.0, 10.0)
                        .with_default(1.0)]
                });
            &DEFS
        }

        async fn extract(
            &self,
            _entity: &CodeEntity,
            _context: &ExtractionContext,
        ) -> Result<FeatureMap> {
            let mut features = FeatureMap::new();
            features.insert("answer".to_string(), 42.0);
            Ok(features)
        }
    }

    struct FailingExtractor;

    #[async_trait]
    impl FeatureExtractor for FailingExtractor {
        fn name(&self) -> &str {
            "failing"
        }

        fn features(&self) -> &[FeatureDefinition] {
            static DEFS: once_cell::sync::Lazy<Vec<FeatureDefinition>> =
                once_cell::sync::Lazy::new(|| {
                    vec![FeatureDefinition::new("doomed", "always fails").with_default(0.25)]
                });
            &DEFS
        }

        async fn extract(
            &self,
            _entity: &CodeEntity,
            _context: &ExtractionContext,
        ) -> Result<FeatureMap> {
            Err(crate::core::errors::ValknutError::internal("nope"))
        }
    }

    fn test_entity() -> CodeEntity {
        CodeEntity::new(
            "python://a.py::f",
            "f",
            EntityKind::Function,
            SourceLocation {
                file_path: "a.py".to_string(),
                start_line: 1,
                end_line: 5,
                start_column: 0,
                end_column: 0,
            },
            "python",
        )
    }

    fn test_context() -> ExtractionContext {
        ExtractionContext::new(
            Arc::new(ValknutConfig::default()),
            Arc::new(ParseIndex::new("python")),
        )
    }

    #[tokio::test]
    async fn values_are_clamped_to_declared_range() {
        let set = ExtractorSet::new().register(Arc::new(FixedExtractor));
        let vector = set.extract_all(&test_entity(), &test_context()).await;
        assert_eq!(vector.get_feature("answer"), Some(10.0));
    }

    #[tokio::test]
    async fn failing_extractor_substitutes_defaults_and_tags_metadata() {
        let set = ExtractorSet::new()
            .register(Arc::new(FixedExtractor))
            .register(Arc::new(FailingExtractor));
        let vector = set.extract_all(&test_entity(), &test_context()).await;

        assert_eq!(vector.get_feature("doomed"), Some(0.25));
        assert!(vector.metadata.contains_key("failing_error"));
        // The other extractor is unaffected.
        assert_eq!(vector.get_feature("answer"), Some(10.0));
    }

    #[test]
    fn definition_clamp_handles_nan() {
        let def = FeatureDefinition::new("x", "test")
            .with_range(0.0, 1.0)
            .with_default(0.5);
        assert_eq!(def.clamp_value(f64::NAN), 0.5);
        assert_eq!(def.clamp_value(2.0), 1.0);
        assert_eq!(def.clamp_value(-1.0), 0.0);
    }
}
