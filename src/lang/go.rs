//! Go language adapter.

use std::path::{Path, PathBuf};

use crate::core::entities::{CodeEntity, EntityKind, ParsedImport};
use crate::core::featureset::FeatureMap;
use crate::lang::common::{per_kloc, AdapterSpec, FileSet, LanguageAdapter};

const SPEC: AdapterSpec = AdapterSpec {
    entity_nodes: &[
        ("function_declaration", EntityKind::Function),
        ("method_declaration", EntityKind::Method),
        ("type_spec", EntityKind::Struct),
    ],
    container_nodes: &[],
    name_field: "name",
    params_field: "parameters",
};

/// Adapter for Go sources.
#[derive(Debug, Default)]
pub struct GoAdapter;

impl GoAdapter {
    /// Create the adapter
    pub fn new() -> Self {
        Self
    }
}

impl LanguageAdapter for GoAdapter {
    fn language(&self) -> &'static str {
        "go"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["go"]
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_go::LANGUAGE.into()
    }

    fn spec(&self) -> &AdapterSpec {
        &SPEC
    }

    fn scan_imports(&self, source: &str) -> Vec<ParsedImport> {
        let mut imports = Vec::new();
        let mut in_block = false;
        for (line_no, line) in source.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.starts_with("import (") {
                in_block = true;
                continue;
            }
            if in_block {
                if trimmed.starts_with(')') {
                    in_block = false;
                    continue;
                }
                if let Some(module) = quoted_import(trimmed) {
                    imports.push(ParsedImport::new(module, false, line_no + 1));
                }
            } else if let Some(rest) = trimmed.strip_prefix("import ") {
                if let Some(module) = quoted_import(rest) {
                    imports.push(ParsedImport::new(module, false, line_no + 1));
                }
            }
        }
        imports
    }

    fn resolve_import(
        &self,
        import: &ParsedImport,
        _from_file: &Path,
        files: &FileSet,
    ) -> Option<PathBuf> {
        // Go import paths name package directories; stdlib packages have no
        // dots in their first segment and resolve nowhere in the file set.
        let tail: Vec<&str> = import.module.split('/').collect();

        // Try the longest directory suffix that contains a discovered file.
        for start in 0..tail.len() {
            let dir_suffix = tail[start..].join("/");
            if dir_suffix.is_empty() {
                continue;
            }
            let suffixes: Vec<String> = ["doc.go", "main.go", "mod.go"]
                .iter()
                .map(|name| format!("{dir_suffix}/{name}"))
                .collect();
            if let Some(found) = files.find_by_suffix(&suffixes) {
                return Some(found);
            }
            // Fall back to the package directory's lexically-first file.
            if let Some(found) = files.find_by_suffix(&[format!("{dir_suffix}/{}.go", tail[tail.len() - 1])]) {
                return Some(found);
            }
        }
        None
    }

    fn exception_features(&self, entity: &CodeEntity) -> FeatureMap {
        let mut features = FeatureMap::new();
        let Some(source) = entity.raw_text.as_deref() else {
            return features;
        };
        let loc = entity.loc();

        let panics = source.matches("panic(").count();
        let error_checks = source.matches("err != nil").count();

        features.insert("panic_density".to_string(), per_kloc(panics, loc, 100.0));
        features.insert(
            "error_check_density".to_string(),
            per_kloc(error_checks, loc, 100.0),
        );
        features
    }

    fn type_features(&self, entity: &CodeEntity) -> FeatureMap {
        let mut features = FeatureMap::new();
        let Some(source) = entity.raw_text.as_deref() else {
            return features;
        };

        // Type assertions `v.(T)` are Go's cast analogue.
        let assertions = source.matches(".(").count();
        features.insert("typed_coverage_ratio".to_string(), 1.0);
        features.insert(
            "casts_per_kloc".to_string(),
            per_kloc(assertions, entity.loc(), 100.0),
        );
        features
    }
}

fn quoted_import(text: &str) -> Option<String> {
    let start = text.find('"')?;
    let end = text[start + 1..].find('"')? + start + 1;
    let module = text[start + 1..end].trim();
    (!module.is_empty()).then(|| module.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_and_block_imports_are_scanned() {
        let source = "package main\n\nimport \"fmt\"\n\nimport (\n    \"os\"\n    app \"example.com/project/app\"\n)\n";
        let imports = GoAdapter::new().scan_imports(source);
        let modules: Vec<&str> = imports.iter().map(|i| i.module.as_str()).collect();
        assert_eq!(modules, vec!["fmt", "os", "example.com/project/app"]);
    }

    #[test]
    fn project_imports_resolve_to_package_files() {
        let files = FileSet::new(&[PathBuf::from("/r/project/app/app.go")]);
        let resolved = GoAdapter::new().resolve_import(
            &ParsedImport::new("example.com/project/app", false, 1),
            Path::new("/r/project/main.go"),
            &files,
        );
        assert_eq!(resolved, Some(PathBuf::from("/r/project/app/app.go")));
    }

    #[test]
    fn stdlib_imports_fail_to_resolve() {
        let files = FileSet::new(&[PathBuf::from("/r/main.go")]);
        let resolved = GoAdapter::new().resolve_import(
            &ParsedImport::new("fmt", false, 1),
            Path::new("/r/main.go"),
            &files,
        );
        assert_eq!(resolved, None);
    }

    #[test]
    fn parse_index_extracts_functions_and_methods() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.go");
        std::fs::write(
            &path,
            "package main\n\ntype Server struct {\n\tport int\n}\n\nfunc (s *Server) Run() error {\n\treturn nil\n}\n\nfunc main() {\n}\n",
        )
        .unwrap();

        let index = GoAdapter::new().parse_index(&[path]).unwrap();
        assert!(index.validate().is_ok());
        assert!(index
            .entities
            .values()
            .any(|e| e.kind == EntityKind::Struct && e.name == "Server"));
        assert!(index
            .entities
            .values()
            .any(|e| e.kind == EntityKind::Method && e.name == "Run"));
        assert!(index
            .entities
            .values()
            .any(|e| e.kind == EntityKind::Function && e.name == "main"));
    }

    #[test]
    fn panic_density_is_reported() {
        let entity = CodeEntity::new(
            "go://m.go::f",
            "f",
            EntityKind::Function,
            crate::core::entities::SourceLocation {
                file_path: "m.go".to_string(),
                start_line: 1,
                end_line: 3,
                start_column: 0,
                end_column: 0,
            },
            "go",
        )
        .with_raw_text("if err != nil {\n\tpanic(err)\n}\n");
        let features = GoAdapter::new().exception_features(&entity);
        assert!(features["panic_density"] > 0.0);
        assert!(features["error_check_density"] > 0.0);
    }
}
