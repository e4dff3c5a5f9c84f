//! Language adapter registry.
//!
//! Adapters are registered once at startup into an immutable table; lookups
//! are by language name or file extension. The registry also hosts the
//! extractor that surfaces per-language type/exception/cohesion features.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::core::entities::CodeEntity;
use crate::core::errors::Result;
use crate::core::featureset::{
    ExtractionContext, FeatureDefinition, FeatureExtractor, FeatureMap,
};
use crate::lang::common::LanguageAdapter;
use crate::lang::go::GoAdapter;
use crate::lang::javascript::JavaScriptAdapter;
use crate::lang::python::PythonAdapter;
use crate::lang::rust_lang::RustAdapter;
use crate::lang::typescript::TypeScriptAdapter;

static ADAPTERS: Lazy<Vec<Arc<dyn LanguageAdapter>>> = Lazy::new(|| {
    vec![
        Arc::new(PythonAdapter::new()),
        Arc::new(TypeScriptAdapter::new()),
        Arc::new(JavaScriptAdapter::new()),
        Arc::new(RustAdapter::new()),
        Arc::new(GoAdapter::new()),
    ]
});

/// All registered adapters
pub fn all_adapters() -> &'static [Arc<dyn LanguageAdapter>] {
    &ADAPTERS
}

/// Adapter for a language name
pub fn adapter_for_language(language: &str) -> Option<Arc<dyn LanguageAdapter>> {
    ADAPTERS
        .iter()
        .find(|a| a.language() == language)
        .cloned()
}

/// Adapter claiming a file extension (without dot)
pub fn adapter_for_extension(extension: &str) -> Option<Arc<dyn LanguageAdapter>> {
    let extension = extension.trim_start_matches('.').to_ascii_lowercase();
    ADAPTERS
        .iter()
        .find(|a| a.file_extensions().contains(&extension.as_str()))
        .cloned()
}

/// Adapter for a file path, by extension
pub fn adapter_for_file(path: &Path) -> Option<Arc<dyn LanguageAdapter>> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(adapter_for_extension)
}

/// Union of extensions advertised by the enabled languages
pub fn supported_extensions(languages: &[String]) -> Vec<String> {
    let mut extensions: Vec<String> = languages
        .iter()
        .filter_map(|language| adapter_for_language(language))
        .flat_map(|adapter| {
            adapter
                .file_extensions()
                .iter()
                .map(|e| (*e).to_string())
                .collect::<Vec<_>>()
        })
        .collect();
    extensions.sort();
    extensions.dedup();
    extensions
}

static LANG_FEATURES: Lazy<Vec<FeatureDefinition>> = Lazy::new(|| {
    vec![
        FeatureDefinition::new("typed_coverage_ratio", "Fraction of annotated parameters")
            .with_range(0.0, 1.0),
        FeatureDefinition::new("any_ratio", "Fraction of any-like type annotations")
            .with_range(0.0, 1.0),
        FeatureDefinition::new("casts_per_kloc", "Cast density per KLOC").with_range(0.0, 100.0),
        FeatureDefinition::new("non_null_bang_ratio", "Non-null assertion density")
            .with_range(0.0, 1.0),
        FeatureDefinition::new("unsafe_blocks_per_kloc", "Unsafe block density per KLOC")
            .with_range(0.0, 100.0),
        FeatureDefinition::new("exception_density", "Raise/throw density per KLOC")
            .with_range(0.0, 100.0),
        FeatureDefinition::new("exception_variety", "Distinct raised types per KLOC")
            .with_range(0.0, 50.0),
        FeatureDefinition::new("lcom_like", "Lack of cohesion of methods").with_range(0.0, 1.0),
    ]
});

/// Extractor that dispatches to the entity's language adapter for type,
/// exception, and cohesion features.
#[derive(Debug, Default)]
pub struct LanguageFeatureExtractor;

impl LanguageFeatureExtractor {
    /// Create the extractor
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeatureExtractor for LanguageFeatureExtractor {
    fn name(&self) -> &str {
        "language"
    }

    fn features(&self) -> &[FeatureDefinition] {
        &LANG_FEATURES
    }

    async fn extract(
        &self,
        entity: &CodeEntity,
        _context: &ExtractionContext,
    ) -> Result<FeatureMap> {
        let Some(adapter) = adapter_for_language(&entity.language) else {
            return Ok(FeatureMap::new());
        };

        let mut features = adapter.type_features(entity);
        features.extend(adapter.exception_features(entity));
        features.extend(adapter.cohesion_features(entity));
        Ok(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_all_five_languages() {
        for language in ["python", "typescript", "javascript", "rust", "go"] {
            assert!(adapter_for_language(language).is_some(), "{language}");
        }
        assert!(adapter_for_language("cobol").is_none());
    }

    #[test]
    fn extensions_route_to_adapters() {
        assert_eq!(adapter_for_extension("py").unwrap().language(), "python");
        assert_eq!(adapter_for_extension(".rs").unwrap().language(), "rust");
        assert_eq!(
            adapter_for_file(Path::new("x/y/app.tsx")).unwrap().language(),
            "typescript"
        );
        assert!(adapter_for_extension("exe").is_none());
    }

    #[test]
    fn supported_extensions_union_enabled_languages() {
        let extensions =
            supported_extensions(&["python".to_string(), "rust".to_string()]);
        assert!(extensions.contains(&"py".to_string()));
        assert!(extensions.contains(&"rs".to_string()));
        assert!(!extensions.contains(&"go".to_string()));
    }
}
