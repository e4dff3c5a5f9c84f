//! TypeScript language adapter.

use std::path::{Path, PathBuf};

use crate::core::entities::{CodeEntity, EntityKind, ParsedImport};
use crate::core::featureset::FeatureMap;
use crate::lang::common::{count_word, per_kloc, AdapterSpec, FileSet, LanguageAdapter};
use crate::lang::javascript::{resolve_es_import, scan_es_imports};

const SPEC: AdapterSpec = AdapterSpec {
    entity_nodes: &[
        ("function_declaration", EntityKind::Function),
        ("generator_function_declaration", EntityKind::Function),
        ("method_definition", EntityKind::Method),
        ("class_declaration", EntityKind::Class),
        ("abstract_class_declaration", EntityKind::Class),
        ("interface_declaration", EntityKind::Interface),
        ("enum_declaration", EntityKind::Enum),
    ],
    container_nodes: &[("internal_module", "name")],
    name_field: "name",
    params_field: "parameters",
};

/// Adapter for TypeScript sources.
#[derive(Debug, Default)]
pub struct TypeScriptAdapter;

impl TypeScriptAdapter {
    /// Create the adapter
    pub fn new() -> Self {
        Self
    }
}

impl LanguageAdapter for TypeScriptAdapter {
    fn language(&self) -> &'static str {
        "typescript"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["ts", "tsx"]
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
    }

    fn spec(&self) -> &AdapterSpec {
        &SPEC
    }

    fn scan_imports(&self, source: &str) -> Vec<ParsedImport> {
        scan_es_imports(source)
    }

    fn resolve_import(
        &self,
        import: &ParsedImport,
        from_file: &Path,
        files: &FileSet,
    ) -> Option<PathBuf> {
        resolve_es_import(import, from_file, files)
    }

    fn type_features(&self, entity: &CodeEntity) -> FeatureMap {
        let mut features = FeatureMap::new();
        let Some(source) = entity.raw_text.as_deref() else {
            return features;
        };

        let total_params = entity.parameters.len();
        let annotated = entity
            .parameters
            .iter()
            .filter(|p| p.contains(':'))
            .count();
        let typed_coverage = if total_params == 0 {
            1.0
        } else {
            annotated as f64 / total_params as f64
        };

        let any_count = count_word(source, "any");
        let annotations = source.matches(": ").count().max(1);
        let casts = source.matches(" as ").count();

        // Non-null assertions: `expr!.member` and `expr!)`.
        let bangs = source.matches("!.").count() + source.matches("!)").count();
        let accesses = source.matches('.').count().max(1);

        features.insert("typed_coverage_ratio".to_string(), typed_coverage.min(1.0));
        features.insert(
            "any_ratio".to_string(),
            (any_count as f64 / annotations as f64).min(1.0),
        );
        features.insert(
            "casts_per_kloc".to_string(),
            per_kloc(casts, entity.loc(), 100.0),
        );
        features.insert(
            "non_null_bang_ratio".to_string(),
            (bangs as f64 / accesses as f64).min(1.0),
        );
        features
    }

    fn exception_features(&self, entity: &CodeEntity) -> FeatureMap {
        let mut features = FeatureMap::new();
        let Some(source) = entity.raw_text.as_deref() else {
            return features;
        };

        let throws = source.matches("throw ").count();
        let mut error_types: std::collections::BTreeSet<&str> =
            std::collections::BTreeSet::new();
        for line in source.lines() {
            if let Some(pos) = line.find("throw new ") {
                let name: &str = line[pos + "throw new ".len()..]
                    .split(|c: char| !c.is_alphanumeric() && c != '_')
                    .next()
                    .unwrap_or("");
                if !name.is_empty() {
                    error_types.insert(name);
                }
            }
        }

        features.insert(
            "exception_density".to_string(),
            per_kloc(throws, entity.loc(), 100.0),
        );
        features.insert(
            "exception_variety".to_string(),
            per_kloc(error_types.len(), entity.loc(), 50.0),
        );
        features
    }
}
