//! Rust language adapter.

use std::path::{Path, PathBuf};

use crate::core::entities::{CodeEntity, EntityKind, ParsedImport};
use crate::core::featureset::FeatureMap;
use crate::lang::common::{count_word, per_kloc, AdapterSpec, FileSet, LanguageAdapter};

const SPEC: AdapterSpec = AdapterSpec {
    entity_nodes: &[
        ("function_item", EntityKind::Function),
        ("struct_item", EntityKind::Struct),
        ("enum_item", EntityKind::Enum),
        ("trait_item", EntityKind::Trait),
        ("mod_item", EntityKind::Module),
    ],
    // Impl blocks scope their functions into methods without emitting an
    // entity of their own.
    container_nodes: &[("impl_item", "type")],
    name_field: "name",
    params_field: "parameters",
};

/// Adapter for Rust sources.
#[derive(Debug, Default)]
pub struct RustAdapter;

impl RustAdapter {
    /// Create the adapter
    pub fn new() -> Self {
        Self
    }
}

impl LanguageAdapter for RustAdapter {
    fn language(&self) -> &'static str {
        "rust"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["rs"]
    }

    fn grammar(&self) -> tree_sitter::Language {
        tree_sitter_rust::LANGUAGE.into()
    }

    fn spec(&self) -> &AdapterSpec {
        &SPEC
    }

    fn scan_imports(&self, source: &str) -> Vec<ParsedImport> {
        let mut imports = Vec::new();
        for (line_no, line) in source.lines().enumerate() {
            let trimmed = line.trim();
            if let Some(rest) = trimmed.strip_prefix("mod ") {
                let name = rest.trim_end_matches(';').trim();
                // `mod x;` declares a child file; `mod x {` is inline.
                if trimmed.ends_with(';') && !name.is_empty() {
                    imports.push(ParsedImport::new(name, true, line_no + 1));
                }
            } else if let Some(rest) = trimmed.strip_prefix("use ") {
                let path = rest
                    .trim_end_matches(';')
                    .split(" as ")
                    .next()
                    .unwrap_or("")
                    .trim();
                if !path.is_empty() {
                    let is_relative =
                        path.starts_with("super::") || path.starts_with("self::");
                    imports.push(ParsedImport::new(path, is_relative, line_no + 1));
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
        let module = import.module.as_str();

        // `mod x;` resolves to a sibling `x.rs` or `x/mod.rs`.
        if import.is_relative && !module.contains("::") {
            let base = module_base_dir(from_file)?;
            return files.resolve_relative(&base, module, &[".rs", "/mod.rs"]);
        }

        let mut segments: Vec<&str> = module.split("::").collect();
        let mut base = module_base_dir(from_file)?;
        match segments.first().copied() {
            Some("std") | Some("core") | Some("alloc") => return None,
            Some("crate") => {
                segments.remove(0);
                base = crate_src_root(from_file)?;
            }
            Some("self") => {
                segments.remove(0);
            }
            Some("super") => {
                while segments.first() == Some(&"super") {
                    segments.remove(0);
                    base = base.parent()?.to_path_buf();
                }
            }
            _ => {
                // An external crate or a module visible from the crate root.
                base = crate_src_root(from_file)?;
            }
        }

        // Try progressively shorter prefixes of the module path; the tail
        // segments name items rather than modules.
        for end in (1..=segments.len()).rev() {
            let candidate = segments[..end].join("/");
            if let Some(found) = files.resolve_relative(&base, &candidate, &[".rs", "/mod.rs"]) {
                return Some(found);
            }
        }
        None
    }

    fn type_features(&self, entity: &CodeEntity) -> FeatureMap {
        let mut features = FeatureMap::new();
        let Some(source) = entity.raw_text.as_deref() else {
            return features;
        };
        let loc = entity.loc();

        let unsafe_blocks = count_word(source, "unsafe");
        let casts = source.matches(" as ").count();
        let generics = source
            .lines()
            .filter(|line| {
                let trimmed = line.trim_start();
                trimmed.starts_with("fn ")
                    || trimmed.starts_with("pub fn ")
                    || trimmed.starts_with("struct ")
                    || trimmed.starts_with("pub struct ")
                    || trimmed.starts_with("enum ")
                    || trimmed.starts_with("impl")
                    || trimmed.starts_with("trait ")
            })
            .filter(|line| line.contains('<'))
            .count();
        let trait_bounds = count_word(source, "where")
            + source.matches(": impl ").count()
            + source.matches("dyn ").count();
        let lifetimes = source
            .as_bytes()
            .windows(2)
            .filter(|w| w[0] == b'\'' && (w[1].is_ascii_lowercase() || w[1] == b'_'))
            .count();

        features.insert("typed_coverage_ratio".to_string(), 1.0);
        features.insert(
            "unsafe_blocks_per_kloc".to_string(),
            per_kloc(unsafe_blocks, loc, 100.0),
        );
        features.insert("casts_per_kloc".to_string(), per_kloc(casts, loc, 100.0));
        features.insert("generic_density".to_string(), per_kloc(generics, loc, 100.0));
        features.insert(
            "trait_bound_density".to_string(),
            per_kloc(trait_bounds, loc, 100.0),
        );
        features.insert(
            "lifetime_density".to_string(),
            per_kloc(lifetimes, loc, 100.0),
        );
        features
    }

    fn exception_features(&self, entity: &CodeEntity) -> FeatureMap {
        let mut features = FeatureMap::new();
        let Some(source) = entity.raw_text.as_deref() else {
            return features;
        };
        let loc = entity.loc();

        let unwraps = source.matches(".unwrap()").count() + source.matches(".expect(").count();
        let panics = source.matches("panic!(").count()
            + source.matches("unreachable!(").count()
            + source.matches("todo!(").count();
        let results = count_word(source, "Result");

        features.insert(
            "unwrap_density".to_string(),
            per_kloc(unwraps, loc, 100.0),
        );
        features.insert("panic_density".to_string(), per_kloc(panics, loc, 100.0));
        features.insert(
            "result_density".to_string(),
            per_kloc(results, loc, 100.0),
        );
        features
    }
}

/// Directory a file's child modules resolve against: `src/foo.rs` children
/// live in `src/foo/`, while `mod.rs`/`lib.rs`/`main.rs` children are
/// siblings.
fn module_base_dir(file: &Path) -> Option<PathBuf> {
    let stem = file.file_stem()?.to_string_lossy();
    let dir = file.parent()?.to_path_buf();
    if stem == "mod" || stem == "lib" || stem == "main" {
        Some(dir)
    } else {
        Some(dir.join(stem.as_ref()))
    }
}

/// Nearest ancestor `src` directory, approximating the crate root.
fn crate_src_root(file: &Path) -> Option<PathBuf> {
    let mut current = file.parent()?;
    loop {
        if current.file_name().map(|n| n == "src").unwrap_or(false) {
            return Some(current.to_path_buf());
        }
        current = current.parent()?;
    }
}
