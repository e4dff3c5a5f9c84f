//! JavaScript language adapter.

use std::path::{Path, PathBuf};

use crate::core::entities::{CodeEntity, EntityKind, ParsedImport};
use crate::core::featureset::FeatureMap;
use crate::lang::common::{per_kloc, AdapterSpec, FileSet, LanguageAdapter};

const SPEC: AdapterSpec = AdapterSpec {
    entity_nodes: &[
        ("function_declaration", EntityKind::Function),
        ("generator_function_declaration", EntityKind::Function),
        ("method_definition", EntityKind::Method),
        ("class_declaration", EntityKind::Class),
    ],
    container_nodes: &[],
    name_field: "name",
    params_field: "parameters",
};

/// Extension and index-file combinations tried when resolving relative
/// ES-module specifiers.
pub(crate) const ES_RESOLUTION_SUFFIXES: &[&str] = &[
    "",
    ".ts",
    ".tsx",
    ".js",
    ".jsx",
    ".mjs",
    "/index.ts",
    "/index.tsx",
    "/index.js",
    "/index.jsx",
];

/// Scan ES-module `import`/`export from` statements and CommonJS `require`
/// calls. Shared by the JavaScript and TypeScript adapters.
pub(crate) fn scan_es_imports(source: &str) -> Vec<ParsedImport> {
    let mut imports = Vec::new();
    for (line_no, line) in source.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*') {
            continue;
        }

        let module = if trimmed.starts_with("import ") || trimmed.starts_with("export ") {
            trimmed
                .split_once(" from ")
                .map(|(_, rhs)| rhs)
                .or_else(|| {
                    // Bare side-effect import: `import './setup';`
                    trimmed
                        .strip_prefix("import ")
                        .filter(|rest| rest.starts_with('\'') || rest.starts_with('"'))
                })
                .map(unquote_module)
        } else if let Some(pos) = trimmed.find("require(") {
            let rest = &trimmed[pos + "require(".len()..];
            rest.split_once(')').map(|(inner, _)| unquote_module(inner))
        } else {
            None
        };

        if let Some(module) = module {
            if !module.is_empty() {
                let is_relative = module.starts_with("./") || module.starts_with("../");
                imports.push(ParsedImport::new(module, is_relative, line_no + 1));
            }
        }
    }
    imports
}

fn unquote_module(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(';')
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim()
        .to_string()
}

/// Resolve an ES-module specifier. Relative forms walk the filesystem from
/// the importing file; bare package specifiers are discarded; project-rooted
/// paths fall back to suffix search.
pub(crate) fn resolve_es_import(
    import: &ParsedImport,
    from_file: &Path,
    files: &FileSet,
) -> Option<PathBuf> {
    if import.is_relative {
        let base = from_file.parent()?;
        return files.resolve_relative(base, &import.module, ES_RESOLUTION_SUFFIXES);
    }

    // Bare specifiers like `react` or `@scope/pkg` point at node_modules.
    if !import.module.contains('/') || import.module.starts_with('@') {
        return None;
    }

    let suffixes: Vec<String> = ES_RESOLUTION_SUFFIXES
        .iter()
        .map(|suffix| format!("{}{}", import.module, suffix))
        .collect();
    files.find_by_suffix(&suffixes)
}

/// Adapter for JavaScript sources.
#[derive(Debug, Default)]
pub struct JavaScriptAdapter;

impl JavaScriptAdapter {
    /// Create the adapter
    pub fn new() -> Self {
        Self
    }
}

impl LanguageAdapter for JavaScriptAdapter {
    fn language(&self) -> &'static str {
        "javascript"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["js", "jsx", "mjs", "cjs"]
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_javascript::LANGUAGE.into()
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

    fn exception_features(&self, entity: &CodeEntity) -> FeatureMap {
        let mut features = FeatureMap::new();
        let Some(source) = entity.raw_text.as_deref() else {
            return features;
        };

        let throws = source.matches("throw ").count();
        let strict = source.contains("'use strict'") || source.contains("\"use strict\"");

        features.insert(
            "exception_density".to_string(),
            per_kloc(throws, entity.loc(), 100.0),
        );
        features.insert("strict_mode".to_string(), if strict { 1.0 } else { 0.0 });
        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn es_and_commonjs_imports_are_scanned() {
        let source = "import { a } from './util';\nimport React from 'react';\nconst fs = require('fs');\nexport { b } from '../shared';\nimport './setup';\n";
        let imports = scan_es_imports(source);
        assert_eq!(imports.len(), 5);
        assert_eq!(imports[0].module, "./util");
        assert!(imports[0].is_relative);
        assert_eq!(imports[1].module, "react");
        assert!(!imports[1].is_relative);
        assert_eq!(imports[2].module, "fs");
        assert_eq!(imports[3].module, "../shared");
        assert!(imports[3].is_relative);
        assert_eq!(imports[4].module, "./setup");
    }

    #[test]
    fn relative_specifiers_try_extension_and_index_forms() {
        let files = FileSet::new(&[
            PathBuf::from("/r/src/util.js"),
            PathBuf::from("/r/src/widgets/index.js"),
        ]);

        let resolved = resolve_es_import(
            &ParsedImport::new("./util", true, 1),
            Path::new("/r/src/app.js"),
            &files,
        );
        assert_eq!(resolved, Some(PathBuf::from("/r/src/util.js")));

        let resolved = resolve_es_import(
            &ParsedImport::new("./widgets", true, 1),
            Path::new("/r/src/app.js"),
            &files,
        );
        assert_eq!(resolved, Some(PathBuf::from("/r/src/widgets/index.js")));
    }

    #[test]
    fn bare_package_specifiers_are_discarded() {
        let files = FileSet::new(&[PathBuf::from("/r/node_modules/react/index.js")]);
        let resolved = resolve_es_import(
            &ParsedImport::new("react", false, 1),
            Path::new("/r/src/app.js"),
            &files,
        );
        assert_eq!(resolved, None);
    }

    #[test]
    fn parse_index_extracts_classes_and_methods() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.js");
        std::fs::write(
            &path,
            "class Cart {\n  total(items) {\n    return items.length;\n  }\n}\n\nfunction main() {}\n",
        )
        .unwrap();

        let adapter = JavaScriptAdapter::new();
        let index = adapter.parse_index(&[path]).unwrap();
        assert!(index.validate().is_ok());

        let method = index
            .entities
            .values()
            .find(|e| e.kind == EntityKind::Method)
            .unwrap();
        assert!(method.id.ends_with("::Cart.total"));
        assert!(index
            .entities
            .values()
            .any(|e| e.kind == EntityKind::Function && e.name == "main"));
    }
}
