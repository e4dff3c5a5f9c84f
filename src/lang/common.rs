//! Common parsing abstractions shared by all language adapters.
//!
//! Adapters declare a node-type map and import rules; the tree-sitter walking,
//! entity wiring, and import-graph assembly live here. Entity ids follow the
//! `<lang>://<path>::<qualified-name>` scheme with qualified names joined by
//! `.` through enclosing scopes.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};
use tree_sitter::{Node, Parser};

use crate::core::entities::{
    CodeEntity, EntityKind, ParseIndex, ParsedImport, SourceLocation,
};
use crate::core::errors::{Result, ValknutError};
use crate::core::featureset::FeatureMap;

/// Node-type map and field names for one language's grammar.
#[derive(Debug, Clone)]
pub struct AdapterSpec {
    /// Grammar node kinds that produce entities
    pub entity_nodes: &'static [(&'static str, EntityKind)],
    /// Grammar node kinds that scope their children without producing an
    /// entity themselves (e.g. rust `impl` blocks), with their name field
    pub container_nodes: &'static [(&'static str, &'static str)],
    /// Field holding an entity's name node
    pub name_field: &'static str,
    /// Field holding an entity's parameter list node
    pub params_field: &'static str,
}

/// The set of discovered files an adapter resolves imports against.
#[derive(Debug, Default)]
pub struct FileSet {
    paths: BTreeSet<PathBuf>,
}

impl FileSet {
    /// Build from the files handed to `parse_index`
    pub fn new(files: &[PathBuf]) -> Self {
        Self {
            paths: files.iter().map(|p| normalize_path(p)).collect(),
        }
    }

    /// Exact membership after normalization
    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(&normalize_path(path))
    }

    /// Try `base/relative` with each suffix appended, returning the first
    /// candidate present in the set. Suffixes cover extension and index-file
    /// conventions (`.py`, `/__init__.py`, `/index.ts`, `/mod.rs`, ...).
    pub fn resolve_relative(
        &self,
        base: &Path,
        relative: &str,
        suffixes: &[&str],
    ) -> Option<PathBuf> {
        let joined = base.join(relative);
        for suffix in suffixes {
            let candidate = if suffix.is_empty() {
                joined.clone()
            } else if let Some(rest) = suffix.strip_prefix('/') {
                joined.join(rest)
            } else {
                PathBuf::from(format!("{}{}", joined.display(), suffix))
            };
            let candidate = normalize_path(&candidate);
            if self.paths.contains(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// First file (sorted order) whose path ends with any of the given
    /// suffix paths. Used for absolute import forms.
    pub fn find_by_suffix(&self, suffixes: &[String]) -> Option<PathBuf> {
        for suffix in suffixes {
            let suffix_path = PathBuf::from(suffix);
            if let Some(found) = self
                .paths
                .iter()
                .find(|p| ends_with_path(p, &suffix_path))
            {
                return Some(found.clone());
            }
        }
        None
    }
}

/// Lexically normalize a path (resolve `.` and `..` components).
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn ends_with_path(path: &Path, suffix: &Path) -> bool {
    let path_components: Vec<_> = path.components().collect();
    let suffix_components: Vec<_> = suffix.components().collect();
    if suffix_components.len() > path_components.len() {
        return false;
    }
    path_components[path_components.len() - suffix_components.len()..]
        .iter()
        .zip(&suffix_components)
        .all(|(a, b)| a == b)
}

/// Language adapter capability: parsing, import resolution, and the
/// language-specific feature families.
pub trait LanguageAdapter: Send + Sync {
    /// Language tag used in entity ids
    fn language(&self) -> &'static str;

    /// File extensions (without dot) this adapter claims
    fn file_extensions(&self) -> &'static [&'static str];

    /// The tree-sitter grammar
    fn grammar(&self) -> tree_sitter::Language;

    /// Node-type map for entity extraction
    fn spec(&self) -> &AdapterSpec;

    /// Scan a file's source for import statements
    fn scan_imports(&self, source: &str) -> Vec<ParsedImport>;

    /// Resolve a parsed import to a file path within the discovered set.
    /// Unresolvable imports return `None` and are dropped silently.
    fn resolve_import(
        &self,
        import: &ParsedImport,
        from_file: &Path,
        files: &FileSet,
    ) -> Option<PathBuf>;

    /// Type-system friction features for an entity
    fn type_features(&self, _entity: &CodeEntity) -> FeatureMap {
        FeatureMap::new()
    }

    /// Exception/error-flow features for an entity
    fn exception_features(&self, _entity: &CodeEntity) -> FeatureMap {
        FeatureMap::new()
    }

    /// Cohesion features for class-like entities
    fn cohesion_features(&self, entity: &CodeEntity) -> FeatureMap {
        let mut features = FeatureMap::new();
        if entity.kind.is_class_like() {
            features.insert("lcom_like".to_string(), 0.0);
        }
        features
    }

    /// Parse files into a [`ParseIndex`]: one file entity per file, nested
    /// construct entities, and the resolved import graph. Parse failures keep
    /// the file entity with empty children.
    fn parse_index(&self, files: &[PathBuf]) -> Result<ParseIndex> {
        let mut index = ParseIndex::new(self.language());
        let file_set = FileSet::new(files);

        let mut sorted: Vec<PathBuf> = files.iter().map(|p| normalize_path(p)).collect();
        sorted.sort();
        sorted.dedup();

        let mut pending_imports: Vec<(String, Vec<ParsedImport>, PathBuf)> = Vec::new();

        for path in &sorted {
            let source = match std::fs::read_to_string(path) {
                Ok(source) => source,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable file");
                    continue;
                }
            };

            let file_id = file_entity_id(self.language(), path);
            let line_count = source.lines().count().max(1);
            let file_entity = CodeEntity::new(
                file_id.clone(),
                path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string()),
                EntityKind::File,
                SourceLocation {
                    file_path: path.display().to_string(),
                    start_line: 1,
                    end_line: line_count,
                    start_column: 0,
                    end_column: 0,
                },
                self.language(),
            )
            .with_raw_text(source.clone());
            index.add_entity(file_entity);
            index.import_graph.add_node(file_id.clone());

            match self.parse_entities(&source, path, &file_id) {
                Ok(entities) => {
                    for entity in entities {
                        index.add_entity(entity);
                    }
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "parse failed; file entity retained with empty children"
                    );
                }
            }

            let imports = self.scan_imports(&source);
            if let Some(file_entity) = index.entities.get_mut(&file_id) {
                file_entity.imports = imports.iter().map(|i| i.module.clone()).collect();
            }
            pending_imports.push((file_id, imports, path.clone()));
        }

        for (file_id, imports, path) in pending_imports {
            for import in imports {
                let Some(target) = self.resolve_import(&import, &path, &file_set) else {
                    continue;
                };
                let target_id = file_entity_id(self.language(), &target);
                if index.entities.contains_key(&target_id) && target_id != file_id {
                    index.import_graph.add_edge(&file_id, &target_id);
                } else {
                    debug!(module = import.module.as_str(), "resolved import target not indexed");
                }
            }
        }

        Ok(index)
    }

    /// Walk one file's syntax tree and emit its construct entities.
    fn parse_entities(
        &self,
        source: &str,
        path: &Path,
        file_id: &str,
    ) -> Result<Vec<CodeEntity>> {
        let mut parser = Parser::new();
        parser.set_language(&self.grammar()).map_err(|err| {
            ValknutError::parse(self.language(), format!("grammar load failed: {err}"))
        })?;
        let tree = parser.parse(source, None).ok_or_else(|| {
            ValknutError::parse_in_file(
                self.language(),
                "parser returned no tree",
                path.display().to_string(),
            )
        })?;

        Ok(extract_entities(
            self.language(),
            self.spec(),
            tree.root_node(),
            source,
            path,
            file_id,
        ))
    }
}

/// File entity id for a path: `<lang>://<path>`.
pub fn file_entity_id(language: &str, path: &Path) -> String {
    format!("{language}://{}", path.display())
}

struct WalkFrame<'t> {
    node: Node<'t>,
    parent_id: String,
    prefix: String,
    in_class: bool,
}

/// Iterative tree walk emitting entities in source order.
fn extract_entities(
    language: &str,
    spec: &AdapterSpec,
    root: Node<'_>,
    source: &str,
    path: &Path,
    file_id: &str,
) -> Vec<CodeEntity> {
    let mut entities = Vec::new();
    let mut anonymous_counter = 0usize;

    // Children are processed depth-first in source order.
    let mut stack: Vec<WalkFrame> = Vec::new();
    push_children(&mut stack, root, file_id, "", false);

    while let Some(frame) = stack.pop() {
        let node = frame.node;
        let kind = spec
            .entity_nodes
            .iter()
            .find(|(node_kind, _)| *node_kind == node.kind())
            .map(|(_, kind)| *kind);

        if let Some(mut kind) = kind {
            if kind == EntityKind::Function && frame.in_class {
                kind = EntityKind::Method;
            }

            let name = node_field_text(node, source, spec.name_field).unwrap_or_else(|| {
                anonymous_counter += 1;
                format!("anonymous_{}_{anonymous_counter}", kind.as_str())
            });
            let qualified = if frame.prefix.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", frame.prefix, name)
            };
            let id = format!("{language}://{}::{qualified}", path.display());

            let mut entity = CodeEntity::new(
                id.clone(),
                name.clone(),
                kind,
                node_location(node, path),
                language,
            )
            .with_parent(frame.parent_id.clone());
            entity.raw_text = node.utf8_text(source.as_bytes()).ok().map(str::to_string);
            entity.signature = entity
                .raw_text
                .as_deref()
                .and_then(|t| t.lines().next())
                .map(|l| l.trim().to_string());
            if let Some(params_node) = node.child_by_field_name(spec.params_field) {
                if let Ok(params_text) = params_node.utf8_text(source.as_bytes()) {
                    entity.parameters = split_parameters(params_text)
                        .into_iter()
                        .collect();
                }
            }
            entities.push(entity);

            let child_in_class = kind.is_class_like() || frame.in_class;
            push_children(&mut stack, node, &id, &qualified, child_in_class);
            continue;
        }

        if let Some((_, name_field)) = spec
            .container_nodes
            .iter()
            .find(|(node_kind, _)| *node_kind == node.kind())
        {
            // Containers scope their children but emit no entity.
            let name = node_field_text(node, source, name_field).unwrap_or_default();
            let prefix = match (frame.prefix.is_empty(), name.is_empty()) {
                (_, true) => frame.prefix.clone(),
                (true, false) => name,
                (false, false) => format!("{}.{}", frame.prefix, name),
            };
            push_children(&mut stack, node, &frame.parent_id, &prefix, true);
            continue;
        }

        push_children(
            &mut stack,
            node,
            &frame.parent_id,
            &frame.prefix,
            frame.in_class,
        );
    }

    // The stack pops in reverse push order; restore source order.
    entities.sort_by_key(|e| (e.location.start_line, e.location.start_column, e.id.clone()));
    entities
}

fn push_children<'t>(
    stack: &mut Vec<WalkFrame<'t>>,
    node: Node<'t>,
    parent_id: &str,
    prefix: &str,
    in_class: bool,
) {
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.children(&mut cursor).collect();
    for child in children.into_iter().rev() {
        stack.push(WalkFrame {
            node: child,
            parent_id: parent_id.to_string(),
            prefix: prefix.to_string(),
            in_class,
        });
    }
}

fn node_field_text(node: Node<'_>, source: &str, field: &str) -> Option<String> {
    node.child_by_field_name(field)
        .and_then(|n| n.utf8_text(source.as_bytes()).ok())
        .map(str::to_string)
}

/// Location from tree-sitter positions: 1-based lines, 0-based columns.
fn node_location(node: Node<'_>, path: &Path) -> SourceLocation {
    let start = node.start_position();
    let end = node.end_position();
    SourceLocation {
        file_path: path.display().to_string(),
        start_line: start.row + 1,
        end_line: end.row + 1,
        start_column: start.column,
        end_column: end.column,
    }
}

/// Split a parameter list's raw text into individual declarations.
pub fn split_parameters(params_text: &str) -> Vec<String> {
    let trimmed = params_text
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')');
    let mut params = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in trimmed.chars() {
        match c {
            '(' | '[' | '{' | '<' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' | '>' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth <= 0 => {
                let param = current.trim().to_string();
                if !param.is_empty() {
                    params.push(param);
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    let last = current.trim().to_string();
    if !last.is_empty() {
        params.push(last);
    }
    params.retain(|p| p != "self" && p != "&self" && p != "&mut self" && p != "this");
    params
}

/// Count whole-word occurrences of `word` in `text`.
pub fn count_word(text: &str, word: &str) -> usize {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|token| *token == word)
        .count()
}

/// Density per KLOC, clamped to `cap`.
pub fn per_kloc(count: usize, loc: usize, cap: f64) -> f64 {
    ((count as f64 / loc.max(1) as f64) * 1000.0).min(cap)
}

/// LCOM-like cohesion: `1 − pairs-sharing-a-field / total-method-pairs`.
/// `method_fields` holds, per method, the set of fields it touches.
pub fn lcom_like(method_fields: &[BTreeSet<String>]) -> f64 {
    let n = method_fields.len();
    if n < 2 {
        return 0.0;
    }
    let total_pairs = n * (n - 1) / 2;
    let mut sharing = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            if method_fields[i].intersection(&method_fields[j]).next().is_some() {
                sharing += 1;
            }
        }
    }
    (1.0 - sharing as f64 / total_pairs as f64).clamp(0.0, 1.0)
}
