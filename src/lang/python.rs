//! Python language adapter.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::core::entities::{CodeEntity, EntityKind, ParsedImport};
use crate::core::featureset::FeatureMap;
use crate::lang::common::{
    count_word, lcom_like, per_kloc, AdapterSpec, FileSet, LanguageAdapter,
};

/// Standard-library prefixes recognized and discarded during resolution.
const STDLIB_PREFIXES: &[&str] = &[
    "abc", "argparse", "asyncio", "collections", "contextlib", "copy", "dataclasses",
    "datetime", "enum", "functools", "hashlib", "io", "itertools", "json", "logging",
    "math", "os", "pathlib", "re", "shutil", "string", "subprocess", "sys", "tempfile",
    "threading", "time", "typing", "unittest", "uuid", "warnings",
];

const SPEC: AdapterSpec = AdapterSpec {
    entity_nodes: &[
        ("function_definition", EntityKind::Function),
        ("class_definition", EntityKind::Class),
    ],
    container_nodes: &[],
    name_field: "name",
    params_field: "parameters",
};

/// Adapter for Python sources.
#[derive(Debug, Default)]
pub struct PythonAdapter;

impl PythonAdapter {
    /// Create the adapter
    pub fn new() -> Self {
        Self
    }
}

impl LanguageAdapter for PythonAdapter {
    fn language(&self) -> &'static str {
        "python"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["py", "pyi"]
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_python::LANGUAGE.into()
    }

    fn spec(&self) -> &AdapterSpec {
        &SPEC
    }

    fn scan_imports(&self, source: &str) -> Vec<ParsedImport> {
        let mut imports = Vec::new();
        for (line_no, line) in source.lines().enumerate() {
            let trimmed = line.trim();
            if let Some(rest) = trimmed.strip_prefix("import ") {
                for module in rest.split(',') {
                    let module = module
                        .split(" as ")
                        .next()
                        .unwrap_or("")
                        .trim();
                    if !module.is_empty() {
                        imports.push(ParsedImport::new(module, false, line_no + 1));
                    }
                }
            } else if let Some(rest) = trimmed.strip_prefix("from ") {
                if let Some(module) = rest.split(" import ").next() {
                    let module = module.trim();
                    if !module.is_empty() {
                        let is_relative = module.starts_with('.');
                        imports.push(ParsedImport::new(module, is_relative, line_no + 1));
                    }
                }
            }
        }
        imports
    }

    fn resolve_import(
        &self,
        import: &ParsedImport,
        from_file: &Path,
        files: &FileSet,
    ) -> Option<PathBuf> {
        let suffixes: &[&str] = &[".py", "/__init__.py"];

        if import.is_relative {
            // Each leading dot beyond the first walks one directory up.
            let dots = import.module.chars().take_while(|&c| c == '.').count();
            let rest = &import.module[dots..];
            let mut base = from_file.parent()?.to_path_buf();
            for _ in 1..dots {
                base = base.parent()?.to_path_buf();
            }
            let relative = rest.replace('.', "/");
            if relative.is_empty() {
                return files.resolve_relative(&base, "", &["/__init__.py"]);
            }
            return files.resolve_relative(&base, &relative, suffixes);
        }

        let top = import.module.split('.').next().unwrap_or("");
        if STDLIB_PREFIXES.contains(&top) {
            return None;
        }

        // Absolute imports resolve anywhere under the discovered roots.
        let module_path = import.module.replace('.', "/");
        files.find_by_suffix(&[
            format!("{module_path}.py"),
            format!("{module_path}/__init__.py"),
        ])
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
            if source.contains("->") {
                1.0
            } else {
                0.0
            }
        } else {
            annotated as f64 / total_params as f64
        };

        let any_count = count_word(source, "Any");
        let annotation_count = annotated.max(1);
        let casts = source.matches("cast(").count();

        features.insert("typed_coverage_ratio".to_string(), typed_coverage.min(1.0));
        features.insert(
            "any_ratio".to_string(),
            (any_count as f64 / annotation_count as f64).min(1.0),
        );
        features.insert(
            "casts_per_kloc".to_string(),
            per_kloc(casts, entity.loc(), 100.0),
        );
        features
    }

    fn exception_features(&self, entity: &CodeEntity) -> FeatureMap {
        let mut features = FeatureMap::new();
        let Some(source) = entity.raw_text.as_deref() else {
            return features;
        };

        let raises = count_word(source, "raise");
        let mut exception_types: BTreeSet<&str> = BTreeSet::new();
        for line in source.lines() {
            let trimmed = line.trim();
            if let Some(rest) = trimmed.strip_prefix("raise ") {
                let name: &str = rest
                    .split(|c: char| !c.is_alphanumeric() && c != '_')
                    .next()
                    .unwrap_or("");
                if !name.is_empty() {
                    exception_types.insert(name);
                }
            }
        }

        features.insert(
            "exception_density".to_string(),
            per_kloc(raises, entity.loc(), 100.0),
        );
        features.insert(
            "exception_variety".to_string(),
            per_kloc(exception_types.len(), entity.loc(), 50.0),
        );
        features
    }

    fn cohesion_features(&self, entity: &CodeEntity) -> FeatureMap {
        let mut features = FeatureMap::new();
        if !entity.kind.is_class_like() {
            return features;
        }
        let Some(source) = entity.raw_text.as_deref() else {
            features.insert("lcom_like".to_string(), 0.0);
            return features;
        };

        // Split the class body into method segments at each `def`.
        let mut method_fields: Vec<BTreeSet<String>> = Vec::new();
        let mut current: Option<BTreeSet<String>> = None;
        for line in source.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with("def ") || trimmed.starts_with("async def ") {
                if let Some(fields) = current.take() {
                    method_fields.push(fields);
                }
                current = Some(BTreeSet::new());
            }
            if let Some(fields) = current.as_mut() {
                for field in self_field_refs(line) {
                    fields.insert(field);
                }
            }
        }
        if let Some(fields) = current.take() {
            method_fields.push(fields);
        }

        features.insert("lcom_like".to_string(), lcom_like(&method_fields));
        features
    }
}

/// Field names referenced as `self.<name>` on a line.
fn self_field_refs(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut rest = line;
    while let Some(pos) = rest.find("self.") {
        let after = &rest[pos + 5..];
        let name: String = after
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        if !name.is_empty() && !after[name.len()..].starts_with('(') {
            fields.push(name);
        }
        rest = &rest[pos + 5..];
    }
    fields
}
