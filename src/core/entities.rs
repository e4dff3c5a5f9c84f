//! Entity model and per-language parse indices.
//!
//! Entities are the unit of analysis: files, classes, functions, and friends.
//! A [`ParseIndex`] owns the entities produced for one language together with
//! the file-level import graph; feature vectors downstream reference entities
//! by id only, so normalization and ranking never mutate entities.

use std::collections::BTreeMap;
use std::path::Path;

use ahash::AHashMap;
use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::core::errors::{Result, ValknutError};

/// Unique identifier for entities: `<lang>://<path>` for files,
/// `<lang>://<path>::<qualified-name>` for in-file constructs.
pub type EntityId = String;

/// Kinds of code entities subject to analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A source file
    File,
    /// A module or namespace declared inside a file
    Module,
    /// A class
    Class,
    /// A method (function owned by a class-like entity)
    Method,
    /// A free function
    Function,
    /// A property accessor
    Property,
    /// A variable or constant
    Variable,
    /// An interface
    Interface,
    /// An enum
    Enum,
    /// A struct
    Struct,
    /// A trait
    Trait,
}

impl EntityKind {
    /// True for functions and methods
    pub fn is_function_like(self) -> bool {
        matches!(self, Self::Function | Self::Method)
    }

    /// True for class-like containers (classes, interfaces, structs, enums, traits)
    pub fn is_class_like(self) -> bool {
        matches!(
            self,
            Self::Class | Self::Interface | Self::Struct | Self::Enum | Self::Trait
        )
    }

    /// Lowercase wire name of the kind
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Module => "module",
            Self::Class => "class",
            Self::Method => "method",
            Self::Function => "function",
            Self::Property => "property",
            Self::Variable => "variable",
            Self::Interface => "interface",
            Self::Enum => "enum",
            Self::Struct => "struct",
            Self::Trait => "trait",
        }
    }
}

/// Source code location. Lines are 1-based, columns 0-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Path of the containing file
    pub file_path: String,
    /// First line (1-based)
    pub start_line: usize,
    /// Last line (1-based, inclusive)
    pub end_line: usize,
    /// Start column (0-based)
    pub start_column: usize,
    /// End column (0-based)
    pub end_column: usize,
}

impl SourceLocation {
    /// Number of lines spanned (inclusive).
    pub fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    /// Check whether this location fully contains another location in the
    /// same file.
    pub fn contains(&self, other: &SourceLocation) -> bool {
        if self.file_path != other.file_path {
            return false;
        }
        self.start_line <= other.start_line
            && self.end_line >= other.end_line
            && (self.start_line < other.start_line || self.start_column <= other.start_column)
            && (self.end_line > other.end_line || self.end_column >= other.end_column)
    }

    /// Number of lines shared with an inclusive line range.
    pub fn overlap_with_range(&self, start: usize, end: usize) -> usize {
        let lo = self.start_line.max(start);
        let hi = self.end_line.min(end);
        if lo > hi {
            0
        } else {
            hi - lo + 1
        }
    }
}

/// A code entity: the unit of analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeEntity {
    /// Stable entity id, unique across the run
    pub id: EntityId,
    /// Human-readable name
    pub name: String,
    /// Entity kind
    pub kind: EntityKind,
    /// Source location
    pub location: SourceLocation,
    /// Language tag (adapter name)
    pub language: String,
    /// Innermost enclosing entity, file id for top-level constructs
    pub parent_id: Option<EntityId>,
    /// Child entity ids in source order
    pub children: Vec<EntityId>,
    /// Raw source text of the entity
    pub raw_text: Option<String>,
    /// Declaration signature, when the adapter extracts one
    pub signature: Option<String>,
    /// Docstring or doc comment, when present
    pub docstring: Option<String>,
    /// Parameters in source order
    pub parameters: SmallVec<[String; 4]>,
    /// Declared return type, when present
    pub return_type: Option<String>,
    /// Field names for class-like entities
    pub fields: Vec<String>,
    /// Raw import module names for file entities
    pub imports: Vec<String>,
    /// Metrics attached by extractors
    pub metrics: BTreeMap<String, serde_json::Value>,
}

impl CodeEntity {
    /// Create a new entity with empty optional fields.
    pub fn new(
        id: impl Into<EntityId>,
        name: impl Into<String>,
        kind: EntityKind,
        location: SourceLocation,
        language: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            location,
            language: language.into(),
            parent_id: None,
            children: Vec::new(),
            raw_text: None,
            signature: None,
            docstring: None,
            parameters: SmallVec::new(),
            return_type: None,
            fields: Vec::new(),
            imports: Vec::new(),
            metrics: BTreeMap::new(),
        }
    }

    /// Set the raw source text
    pub fn with_raw_text(mut self, text: impl Into<String>) -> Self {
        self.raw_text = Some(text.into());
        self
    }

    /// Set the parent id
    pub fn with_parent(mut self, parent_id: impl Into<EntityId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Lines of code spanned by the entity
    pub fn loc(&self) -> usize {
        self.location.line_count()
    }

    /// Qualified name portion of the id (everything after `::`), or the plain
    /// name for file entities.
    pub fn qualified_name(&self) -> &str {
        match self.id.split_once("::") {
            Some((_, qualified)) => qualified,
            None => &self.name,
        }
    }
}

/// An import statement parsed from a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedImport {
    /// Module path as written in the source
    pub module: String,
    /// True for relative forms (leading `./`, `../`, `.`)
    pub is_relative: bool,
    /// 1-based line of the import statement
    pub line: usize,
}

impl ParsedImport {
    /// Create a parsed import record
    pub fn new(module: impl Into<String>, is_relative: bool, line: usize) -> Self {
        Self {
            module: module.into(),
            is_relative,
            line,
        }
    }
}

/// Directed dependency graph over entity ids.
///
/// A thin wrapper around a petgraph [`DiGraph`] that keys nodes by entity id
/// and keeps lookups O(1). Both import graphs (file → file) and call graphs
/// (function → function) use this shape.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<EntityId, ()>,
    nodes: AHashMap<EntityId, NodeIndex>,
}

impl DependencyGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, returning its index. Re-adding an existing id is a no-op.
    pub fn add_node(&mut self, id: impl Into<EntityId>) -> NodeIndex {
        let id = id.into();
        if let Some(&index) = self.nodes.get(&id) {
            return index;
        }
        let index = self.graph.add_node(id.clone());
        self.nodes.insert(id, index);
        index
    }

    /// Add a directed edge, creating missing endpoints. Parallel edges are
    /// collapsed.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        let a = self.add_node(from);
        let b = self.add_node(to);
        if self.graph.find_edge(a, b).is_none() {
            self.graph.add_edge(a, b, ());
        }
    }

    /// True if the id is a node of this graph
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// In-degree of a node, 0 for unknown ids
    pub fn in_degree(&self, id: &str) -> usize {
        self.nodes
            .get(id)
            .map(|&ix| {
                self.graph
                    .neighbors_directed(ix, Direction::Incoming)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Out-degree of a node, 0 for unknown ids
    pub fn out_degree(&self, id: &str) -> usize {
        self.nodes
            .get(id)
            .map(|&ix| {
                self.graph
                    .neighbors_directed(ix, Direction::Outgoing)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Successor ids of a node, sorted for determinism
    pub fn successors(&self, id: &str) -> Vec<EntityId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Predecessor ids of a node, sorted for determinism
    pub fn predecessors(&self, id: &str) -> Vec<EntityId> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<EntityId> {
        let Some(&ix) = self.nodes.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<EntityId> = self
            .graph
            .neighbors_directed(ix, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        out.sort();
        out
    }

    /// All node ids, sorted for determinism
    pub fn node_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Strongly connected components as sorted id lists; singleton components
    /// are included.
    pub fn strongly_connected_components(&self) -> Vec<Vec<EntityId>> {
        let mut sccs: Vec<Vec<EntityId>> = petgraph::algo::tarjan_scc(&self.graph)
            .into_iter()
            .map(|component| {
                let mut ids: Vec<EntityId> =
                    component.into_iter().map(|ix| self.graph[ix].clone()).collect();
                ids.sort();
                ids
            })
            .collect();
        sccs.sort();
        sccs
    }

    /// Build a subgraph restricted to the given ids.
    pub fn subgraph(&self, ids: &[EntityId]) -> DependencyGraph {
        let keep: std::collections::HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut sub = DependencyGraph::new();
        for id in ids {
            sub.add_node(id.clone());
        }
        for id in ids {
            for succ in self.successors(id) {
                if keep.contains(succ.as_str()) {
                    sub.add_edge(id, &succ);
                }
            }
        }
        sub
    }

    /// Remove a node and its incident edges.
    pub fn remove_node(&mut self, id: &str) {
        if let Some(ix) = self.nodes.remove(id) {
            // petgraph swaps the last node into the removed slot; remap it.
            let last_index = NodeIndex::new(self.graph.node_count() - 1);
            let moved = if ix != last_index {
                Some(self.graph[last_index].clone())
            } else {
                None
            };
            self.graph.remove_node(ix);
            if let Some(moved_id) = moved {
                self.nodes.insert(moved_id, ix);
            }
        }
    }

    /// Merge another graph into this one (node and edge union).
    pub fn merge(&mut self, other: &DependencyGraph) {
        for id in other.node_ids() {
            self.add_node(id);
        }
        for id in other.node_ids() {
            for succ in other.successors(&id) {
                self.add_edge(&id, &succ);
            }
        }
    }

    /// True when the graph contains at least one cycle (self-loops included).
    pub fn has_cycle(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph)
            || self.strongly_connected_components().iter().any(|c| c.len() > 1)
    }

    /// Cheap structural fingerprint used to key per-graph metric caches.
    pub fn fingerprint(&self) -> u64 {
        let mut hash = 0xcbf2_9ce4_8422_2325u64;
        for id in self.node_ids() {
            hash ^= splitmix64(hash_str(&id));
            for succ in self.successors(&id) {
                hash = hash.wrapping_add(splitmix64(hash_str(&id) ^ hash_str(&succ).rotate_left(17)));
            }
        }
        hash ^ (self.node_count() as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)
    }

    /// Borrow the underlying petgraph storage (read-only algorithms).
    pub fn inner(&self) -> &DiGraph<EntityId, ()> {
        &self.graph
    }

    /// Look up the node index of an entity id.
    pub fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.nodes.get(id).copied()
    }
}

fn hash_str(s: &str) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in s.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// SplitMix64 mixing step. Used wherever the engine needs cheap deterministic
/// pseudo-randomness (sampled centrality sources, fallback offsets).
pub fn splitmix64(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Per-language immutable bundle of parsed state.
#[derive(Debug, Default)]
pub struct ParseIndex {
    /// Language tag of the adapter that produced this index
    pub language: String,
    /// All entities keyed by id, in deterministic insertion order
    pub entities: IndexMap<EntityId, CodeEntity>,
    /// File path → file entity id
    pub files: IndexMap<String, EntityId>,
    /// Directed import graph (file entity ids)
    pub import_graph: DependencyGraph,
    /// Optional directed call graph (function/method entity ids)
    pub call_graph: Option<DependencyGraph>,
}

impl ParseIndex {
    /// Create an empty index for a language
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            ..Self::default()
        }
    }

    /// Add an entity, wiring it into its parent's children list.
    pub fn add_entity(&mut self, entity: CodeEntity) {
        if entity.kind == EntityKind::File {
            self.files
                .insert(entity.location.file_path.clone(), entity.id.clone());
        }
        if let Some(parent_id) = entity.parent_id.clone() {
            if let Some(parent) = self.entities.get_mut(&parent_id) {
                parent.children.push(entity.id.clone());
            }
        }
        self.entities.insert(entity.id.clone(), entity);
    }

    /// Get an entity by id
    pub fn get_entity(&self, id: &str) -> Option<&CodeEntity> {
        self.entities.get(id)
    }

    /// File entity id for a path
    pub fn file_entity_id(&self, path: &Path) -> Option<&EntityId> {
        self.files.get(&path.to_string_lossy().to_string())
    }

    /// Direct children of an entity, resolved
    pub fn get_children(&self, id: &str) -> Vec<&CodeEntity> {
        self.entities
            .get(id)
            .map(|entity| {
                entity
                    .children
                    .iter()
                    .filter_map(|child_id| self.entities.get(child_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Entities of a given kind, in index order
    pub fn entities_of_kind(&self, kind: EntityKind) -> Vec<&CodeEntity> {
        self.entities
            .values()
            .filter(|entity| entity.kind == kind)
            .collect()
    }

    /// Total number of entities
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Verify structural invariants: parents and children resolve, import
    /// graph nodes are known file entities, child locations nest inside
    /// their parents.
    pub fn validate(&self) -> Result<()> {
        for entity in self.entities.values() {
            if let Some(parent_id) = &entity.parent_id {
                let parent = self.entities.get(parent_id).ok_or_else(|| {
                    ValknutError::internal(format!(
                        "entity '{}' references missing parent '{}'",
                        entity.id, parent_id
                    ))
                })?;
                if parent.location.file_path == entity.location.file_path
                    && !parent.location.contains(&entity.location)
                {
                    return Err(ValknutError::internal(format!(
                        "entity '{}' escapes its parent's span",
                        entity.id
                    )));
                }
            }
            for child_id in &entity.children {
                if !self.entities.contains_key(child_id) {
                    return Err(ValknutError::internal(format!(
                        "entity '{}' references missing child '{}'",
                        entity.id, child_id
                    )));
                }
            }
            if entity.location.start_line > entity.location.end_line {
                return Err(ValknutError::internal(format!(
                    "entity '{}' has inverted location",
                    entity.id
                )));
            }
        }

        for node in self.import_graph.node_ids() {
            match self.entities.get(&node) {
                Some(entity) if entity.kind == EntityKind::File => {}
                _ => {
                    return Err(ValknutError::graph(format!(
                        "import graph node '{node}' is not a known file entity"
                    )))
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(path: &str, start: usize, end: usize) -> SourceLocation {
        SourceLocation {
            file_path: path.to_string(),
            start_line: start,
            end_line: end,
            start_column: 0,
            end_column: 0,
        }
    }

    #[test]
    fn location_containment_and_overlap() {
        let outer = loc("a.py", 1, 20);
        let inner = loc("a.py", 5, 10);
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert_eq!(inner.overlap_with_range(8, 30), 3);
        assert_eq!(inner.overlap_with_range(11, 30), 0);
    }

    #[test]
    fn parse_index_wires_parent_children() {
        let mut index = ParseIndex::new("python");
        let file = CodeEntity::new(
            "python://a.py",
            "a.py",
            EntityKind::File,
            loc("a.py", 1, 30),
            "python",
        );
        index.add_entity(file);
        let func = CodeEntity::new(
            "python://a.py::f",
            "f",
            EntityKind::Function,
            loc("a.py", 2, 8),
            "python",
        )
        .with_parent("python://a.py");
        index.add_entity(func);

        let children = index.get_children("python://a.py");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "f");
        assert!(index.validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_file_import_nodes() {
        let mut index = ParseIndex::new("python");
        let file = CodeEntity::new(
            "python://a.py",
            "a.py",
            EntityKind::File,
            loc("a.py", 1, 30),
            "python",
        );
        index.add_entity(file);
        index.import_graph.add_edge("python://a.py", "python://ghost.py");
        assert!(index.validate().is_err());
    }

    #[test]
    fn dependency_graph_degrees_and_scc() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");
        graph.add_edge("c", "a");
        graph.add_edge("c", "d");

        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.in_degree("a"), 1);
        assert_eq!(graph.out_degree("c"), 2);

        let sccs = graph.strongly_connected_components();
        let big: Vec<_> = sccs.iter().filter(|c| c.len() > 1).collect();
        assert_eq!(big.len(), 1);
        assert_eq!(big[0].len(), 3);
    }

    #[test]
    fn remove_node_keeps_lookup_consistent() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");
        graph.add_edge("c", "a");
        graph.remove_node("b");

        assert_eq!(graph.node_count(), 2);
        assert!(!graph.contains("b"));
        assert_eq!(graph.successors("c"), vec!["a".to_string()]);
        assert!(graph.successors("a").is_empty());
    }

    #[test]
    fn fingerprint_is_stable_and_structure_sensitive() {
        let mut a = DependencyGraph::new();
        a.add_edge("x", "y");
        let mut b = DependencyGraph::new();
        b.add_edge("x", "y");
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.add_edge("y", "x");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn merge_unions_nodes_and_edges() {
        let mut a = DependencyGraph::new();
        a.add_edge("a", "b");
        let mut b = DependencyGraph::new();
        b.add_edge("b", "c");
        a.merge(&b);
        assert_eq!(a.node_count(), 3);
        assert_eq!(a.edge_count(), 2);
    }
}
