//! Filesystem structure analysis: directory balance and huge-file detection.
//!
//! Builds a directory tree over the discovered files, then computes per-
//! directory pressure and dispersion metrics (Gini coefficient, Shannon
//! entropy) that feed the `dir_imbalance` composite. The branch-reorg and
//! file-split pack builders consume this tree.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::entities::{CodeEntity, EntityId, EntityKind, ParseIndex};
use crate::core::errors::Result;
use crate::core::featureset::{
    ExtractionContext, FeatureDefinition, FeatureExtractor, FeatureMap,
};

/// Thresholds for structure analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructureConfig {
    /// Files per directory before file pressure saturates
    pub max_files_per_dir: usize,
    /// Subdirectories per directory before branch pressure saturates
    pub max_subdirs_per_dir: usize,
    /// Directory LOC before size pressure saturates
    pub max_dir_loc: usize,
    /// Minimum projected imbalance drop for a branch-reorg proposal
    pub min_branch_gain: f64,
    /// LOC above which a file is flagged huge
    pub huge_loc: usize,
    /// Bytes above which a file is flagged huge
    pub huge_bytes: usize,
    /// Directories below this file count are never reorganized
    pub min_analysis_files: usize,
    /// Directories below this LOC are never reorganized
    pub min_analysis_loc: usize,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            max_files_per_dir: 25,
            max_subdirs_per_dir: 10,
            max_dir_loc: 2000,
            min_branch_gain: 0.15,
            huge_loc: 800,
            huge_bytes: 128_000,
            min_analysis_files: 5,
            min_analysis_loc: 600,
        }
    }
}

/// A file attached to the directory tree.
#[derive(Debug, Clone)]
pub struct FileNode {
    /// File path
    pub path: PathBuf,
    /// Lines of code
    pub loc: usize,
    /// Size in bytes
    pub bytes: usize,
    /// Language tag
    pub language: String,
    /// Entity ids located in this file
    pub entities: Vec<EntityId>,
    /// True when the file exceeds the huge thresholds
    pub huge: bool,
}

/// Balance metrics for one directory.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DirMetrics {
    /// Number of immediate subdirectories
    pub branching_factor: usize,
    /// Number of immediate files
    pub leaf_load: usize,
    /// Total LOC of immediate files
    pub total_loc: usize,
    /// Gini coefficient of child-file LOC
    pub gini_loc: f64,
    /// Shannon entropy of child-file LOC
    pub entropy_loc: f64,
    /// Files / max_files_per_dir, capped at 1
    pub file_pressure: f64,
    /// Subdirs / max_subdirs_per_dir, capped at 1
    pub branch_pressure: f64,
    /// LOC / max_dir_loc, capped at 1
    pub size_pressure: f64,
    /// max(gini, 1 - entropy / log2 n)
    pub dispersion: f64,
    /// 0.35·file + 0.25·branch + 0.25·size + 0.15·dispersion
    pub dir_imbalance: f64,
}

/// A directory in the tree.
#[derive(Debug, Clone)]
pub struct DirNode {
    /// Directory path
    pub path: PathBuf,
    /// Parent index in the tree arena
    pub parent: Option<usize>,
    /// Child directory indices
    pub subdirs: Vec<usize>,
    /// Immediate files
    pub files: Vec<FileNode>,
    /// Computed balance metrics
    pub metrics: DirMetrics,
}

/// Directory tree with attached file nodes and computed metrics.
#[derive(Debug, Clone, Default)]
pub struct StructureTree {
    nodes: Vec<DirNode>,
    root: Option<usize>,
}

impl StructureTree {
    /// Build a tree from file nodes and compute all metrics.
    pub fn build(mut files: Vec<FileNode>, config: &StructureConfig) -> Self {
        if files.is_empty() {
            return Self::default();
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let mut tree = Self::default();
        let mut index_of: HashMap<PathBuf, usize> = HashMap::new();

        let common_root = common_root(&files);
        let root = tree.ensure_dir(common_root.clone(), &mut index_of);
        tree.root = Some(root);

        for file in files {
            let parent_dir = file
                .path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| common_root.clone());
            let dir_index = tree.ensure_dir(parent_dir, &mut index_of);
            tree.nodes[dir_index].files.push(file);
        }

        tree.compute_metrics(config);
        tree
    }

    fn ensure_dir(&mut self, path: PathBuf, index_of: &mut HashMap<PathBuf, usize>) -> usize {
        if let Some(&index) = index_of.get(&path) {
            return index;
        }

        // Attach to the parent directory when it lies inside the tree root.
        let parent = match (self.root, path.parent()) {
            (Some(root_index), Some(parent_path))
                if path != self.nodes[root_index].path
                    && path.starts_with(&self.nodes[root_index].path) =>
            {
                Some(self.ensure_dir(parent_path.to_path_buf(), index_of))
            }
            _ => None,
        };

        let index = self.nodes.len();
        self.nodes.push(DirNode {
            path: path.clone(),
            parent,
            subdirs: Vec::new(),
            files: Vec::new(),
            metrics: DirMetrics::default(),
        });
        if let Some(parent_index) = parent {
            self.nodes[parent_index].subdirs.push(index);
        }
        index_of.insert(path, index);
        index
    }

    fn compute_metrics(&mut self, config: &StructureConfig) {
        for index in 0..self.nodes.len() {
            let (file_count, subdir_count, total_loc, file_sizes) = {
                let node = &self.nodes[index];
                (
                    node.files.len(),
                    node.subdirs.len(),
                    node.files.iter().map(|f| f.loc).sum::<usize>(),
                    node.files.iter().map(|f| f.loc as f64).collect::<Vec<f64>>(),
                )
            };

            let gini = if file_count > 1 { gini_coefficient(&file_sizes) } else { 0.0 };
            let entropy = if file_count > 1 { shannon_entropy(&file_sizes) } else { 0.0 };

            let file_pressure = (file_count as f64 / config.max_files_per_dir as f64).min(1.0);
            let branch_pressure =
                (subdir_count as f64 / config.max_subdirs_per_dir as f64).min(1.0);
            let size_pressure = (total_loc as f64 / config.max_dir_loc as f64).min(1.0);

            let max_entropy = (file_count.max(1) as f64).log2();
            let entropy_factor = if max_entropy > 0.0 {
                1.0 - entropy / max_entropy
            } else {
                0.0
            };
            let dispersion = gini.max(entropy_factor);

            self.nodes[index].metrics = DirMetrics {
                branching_factor: subdir_count,
                leaf_load: file_count,
                total_loc,
                gini_loc: gini,
                entropy_loc: entropy,
                file_pressure,
                branch_pressure,
                size_pressure,
                dispersion,
                dir_imbalance: 0.35 * file_pressure
                    + 0.25 * branch_pressure
                    + 0.25 * size_pressure
                    + 0.15 * dispersion,
            };
        }
    }

    /// All directories in the tree
    pub fn directories(&self) -> &[DirNode] {
        &self.nodes
    }

    /// The directory containing a file path, if present
    pub fn directory_of(&self, file_path: &Path) -> Option<&DirNode> {
        let parent = file_path.parent()?;
        self.nodes.iter().find(|n| n.path == parent)
    }

    /// Every file node in the tree
    pub fn files(&self) -> impl Iterator<Item = &FileNode> {
        self.nodes.iter().flat_map(|n| n.files.iter())
    }

    /// True when the tree holds no files
    pub fn is_empty(&self) -> bool {
        self.nodes.iter().all(|n| n.files.is_empty())
    }
}

fn common_root(files: &[FileNode]) -> PathBuf {
    let mut root = files[0]
        .path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    for file in &files[1..] {
        while !file.path.starts_with(&root) {
            match root.parent() {
                Some(parent) => root = parent.to_path_buf(),
                None => return root,
            }
        }
    }
    root
}

/// Gini coefficient over non-negative values: `2·Σ(i+1)·xᵢ / (n·Σx) − (n+1)/n`
/// over ascending values, clamped at zero.
pub fn gini_coefficient(values: &[f64]) -> f64 {
    let n = values.len();
    if n <= 1 {
        return 0.0;
    }
    let total: f64 = values.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, x)| (i + 1) as f64 * x)
        .sum();
    let gini = (2.0 * weighted) / (n as f64 * total) - (n as f64 + 1.0) / n as f64;
    gini.max(0.0)
}

/// Shannon entropy (bits) of the value distribution.
pub fn shannon_entropy(values: &[f64]) -> f64 {
    let total: f64 = values.iter().sum();
    if values.is_empty() || total <= 0.0 {
        return 0.0;
    }
    values
        .iter()
        .filter(|&&v| v > 0.0)
        .map(|&v| {
            let p = v / total;
            -p * p.log2()
        })
        .sum()
}

/// Build file nodes for every file entity in a parse index.
pub fn file_nodes_from_index(index: &ParseIndex, config: &StructureConfig) -> Vec<FileNode> {
    let mut by_file: HashMap<&str, Vec<EntityId>> = HashMap::new();
    for entity in index.entities.values() {
        by_file
            .entry(entity.location.file_path.as_str())
            .or_default()
            .push(entity.id.clone());
    }

    index
        .entities
        .values()
        .filter(|entity| entity.kind == EntityKind::File)
        .map(|entity| {
            let loc = entity
                .raw_text
                .as_deref()
                .map(|t| t.lines().count())
                .unwrap_or_else(|| entity.loc());
            let bytes = entity.raw_text.as_deref().map(str::len).unwrap_or(0);
            let mut entities = by_file
                .remove(entity.location.file_path.as_str())
                .unwrap_or_default();
            entities.retain(|id| id != &entity.id);
            entities.sort();
            FileNode {
                path: PathBuf::from(&entity.location.file_path),
                loc,
                bytes,
                language: entity.language.clone(),
                entities,
                huge: loc >= config.huge_loc || bytes >= config.huge_bytes,
            }
        })
        .collect()
}

static FEATURES: Lazy<Vec<FeatureDefinition>> = Lazy::new(|| {
    vec![
        FeatureDefinition::new("dir_imbalance", "Imbalance of the containing directory")
            .with_range(0.0, 1.0),
        FeatureDefinition::new("huge_file", "File exceeds the huge-file thresholds")
            .with_range(0.0, 1.0),
        FeatureDefinition::new("file_loc", "Lines of code in the file").with_range(0.0, 1e9),
    ]
});

/// Extractor attaching directory-balance features to file entities.
pub struct StructureExtractor {
    config: StructureConfig,
    cache: Mutex<HashMap<usize, Arc<StructureTree>>>,
}

impl Default for StructureExtractor {
    fn default() -> Self {
        Self::new(StructureConfig::default())
    }
}

impl StructureExtractor {
    /// Create the extractor with explicit thresholds
    pub fn new(config: StructureConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn tree_for(&self, index: &Arc<ParseIndex>) -> Arc<StructureTree> {
        let key = Arc::as_ptr(index) as usize;
        let mut cache = self.cache.lock();
        cache
            .entry(key)
            .or_insert_with(|| {
                Arc::new(StructureTree::build(
                    file_nodes_from_index(index, &self.config),
                    &self.config,
                ))
            })
            .clone()
    }
}

#[async_trait]
impl FeatureExtractor for StructureExtractor {
    fn name(&self) -> &str {
        "structure"
    }

    fn features(&self) -> &[FeatureDefinition] {
        &FEATURES
    }

    fn supports_entity(&self, entity: &CodeEntity) -> bool {
        entity.kind == EntityKind::File
    }

    async fn extract(
        &self,
        entity: &CodeEntity,
        context: &ExtractionContext,
    ) -> Result<FeatureMap> {
        let tree = self.tree_for(&context.index);
        let path = PathBuf::from(&entity.location.file_path);

        let mut features = FeatureMap::new();
        let dir_imbalance = tree
            .directory_of(&path)
            .map(|dir| dir.metrics.dir_imbalance)
            .unwrap_or(0.0);
        let file = tree.files().find(|f| f.path == path);

        features.insert("dir_imbalance".to_string(), dir_imbalance);
        features.insert(
            "huge_file".to_string(),
            if file.map(|f| f.huge).unwrap_or(false) { 1.0 } else { 0.0 },
        );
        features.insert(
            "file_loc".to_string(),
            file.map(|f| f.loc as f64).unwrap_or(0.0),
        );
        Ok(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn file(path: &str, loc: usize) -> FileNode {
        FileNode {
            path: PathBuf::from(path),
            loc,
            bytes: loc * 40,
            language: "python".to_string(),
            entities: Vec::new(),
            huge: loc >= 800,
        }
    }

    #[test]
    fn gini_of_equal_values_is_zero() {
        assert_relative_eq!(gini_coefficient(&[10.0, 10.0, 10.0]), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn gini_of_concentrated_values_is_high() {
        let mut values = vec![10.0; 39];
        values.push(2000.0);
        let gini = gini_coefficient(&values);
        assert!(gini > 0.8, "gini = {gini}");
    }

    #[test]
    fn entropy_is_maximal_for_uniform_distribution() {
        let entropy = shannon_entropy(&[5.0, 5.0, 5.0, 5.0]);
        assert_relative_eq!(entropy, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn skewed_directory_exceeds_imbalance_thresholds() {
        // 40 files: 39 small, one enormous.
        let mut files: Vec<FileNode> = (0..39)
            .map(|i| file(&format!("/repo/pkg/f{i:02}.py"), 10))
            .collect();
        files.push(file("/repo/pkg/giant.py", 2000));

        let config = StructureConfig::default();
        let tree = StructureTree::build(files, &config);
        let dir = tree
            .directories()
            .iter()
            .find(|d| d.path.ends_with("pkg"))
            .unwrap();

        assert!(dir.metrics.gini_loc > 0.8);
        assert!(dir.metrics.dispersion > 0.7);
        assert!(dir.metrics.dir_imbalance > 0.6);
        assert_eq!(dir.metrics.leaf_load, 40);
        assert_eq!(dir.metrics.total_loc, 2390);
    }

    #[test]
    fn balanced_directory_stays_below_thresholds() {
        let files: Vec<FileNode> = (0..6)
            .map(|i| file(&format!("/repo/pkg/f{i}.py"), 50))
            .collect();
        let tree = StructureTree::build(files, &StructureConfig::default());
        let dir = tree
            .directories()
            .iter()
            .find(|d| d.path.ends_with("pkg"))
            .unwrap();
        assert!(dir.metrics.dir_imbalance < 0.6);
    }

    #[test]
    fn tree_nests_subdirectories_under_common_root() {
        let files = vec![
            file("/repo/src/a.py", 10),
            file("/repo/src/sub/b.py", 10),
            file("/repo/tests/c.py", 10),
        ];
        let tree = StructureTree::build(files, &StructureConfig::default());

        let root = tree
            .directories()
            .iter()
            .find(|d| d.path == Path::new("/repo"))
            .unwrap();
        assert_eq!(root.metrics.branching_factor, 2);

        let src = tree
            .directories()
            .iter()
            .find(|d| d.path == Path::new("/repo/src"))
            .unwrap();
        assert_eq!(src.metrics.leaf_load, 1);
        assert_eq!(src.metrics.branching_factor, 1);
    }

    #[test]
    fn huge_flag_uses_loc_and_bytes() {
        let big = file("/r/big.py", 900);
        assert!(big.huge);
        let small = file("/r/small.py", 50);
        assert!(!small.huge);
    }
}
