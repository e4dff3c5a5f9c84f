//! Structure packs: directory reorganization and huge-file splits.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::core::entities::{EntityId, ParseIndex};
use crate::detectors::structure::{DirNode, FileNode, StructureConfig, StructureTree};
use crate::packs::{
    BranchReorgPack, ClusterProposal, DirSnapshot, FileSplitPack, PackEffort, PackValue,
    SplitProposal,
};

/// Path fragments that disqualify a directory or file from reorganization.
const SKIP_PATTERNS: &[&str] = &[
    "generated",
    "build",
    "third_party",
    ".venv",
    "node_modules",
    "target",
    "dist",
    ".git",
    "__pycache__",
    "coverage",
    "vendor",
];

/// Additional fragments that disqualify a file from splitting.
const FILE_SKIP_PATTERNS: &[&str] = &["config", "settings", "constants", ".min.", "gen_"];

fn path_is_skipped(path: &Path, patterns: &[&str]) -> bool {
    let lowered = path.display().to_string().to_ascii_lowercase();
    patterns.iter().any(|p| lowered.contains(p))
}

/// Build branch-reorg packs for every imbalanced directory whose projected
/// clustering gain clears the threshold.
pub fn build_branch_reorg_packs(
    tree: &StructureTree,
    indices: &[Arc<ParseIndex>],
) -> Vec<BranchReorgPack> {
    let config = StructureConfig::default();
    let mut packs = Vec::new();

    for (index, dir) in tree.directories().iter().enumerate() {
        if !should_reorganize(dir, &config) {
            continue;
        }

        let clusters = cluster_files(&dir.files);
        if clusters.len() < 2 {
            continue;
        }

        let old_imbalance = dir.metrics.dir_imbalance;
        let new_imbalances: Vec<f64> = clusters
            .iter()
            .map(|(_, files)| estimate_cluster_imbalance(files, &config))
            .collect();
        let avg_new = new_imbalances.iter().sum::<f64>() / new_imbalances.len() as f64;
        let gain = old_imbalance - avg_new;
        if gain < config.min_branch_gain {
            continue;
        }

        let proposal: Vec<ClusterProposal> = clusters
            .iter()
            .map(|(name, files)| ClusterProposal {
                name: name.clone(),
                files: files.len(),
                loc: files.iter().map(|f| f.loc).sum(),
            })
            .collect();

        let files_moved: usize = proposal.iter().map(|p| p.files).sum();
        let cross_edges = estimate_cross_edges_reduced(&clusters);
        let import_updates = (files_moved * 2).min(files_moved + cross_edges);

        let cluster_names = proposal
            .iter()
            .map(|p| format!("{}/", p.name))
            .collect::<Vec<_>>()
            .join(", ");
        let dir_name = dir
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| dir.path.display().to_string());

        // File entity ids that move, for the non-overlap filter.
        let entity_ids: Vec<EntityId> = dir
            .files
            .iter()
            .filter_map(|file| file_entity_lookup(indices, &file.path))
            .collect();

        packs.push(BranchReorgPack {
            pack_id: format!("branchpack:DIR{index}"),
            dir: dir.path.display().to_string(),
            current: DirSnapshot {
                files: dir.metrics.leaf_load,
                subdirs: dir.metrics.branching_factor,
                loc: dir.metrics.total_loc,
                gini_loc: dir.metrics.gini_loc,
                imbalance: dir.metrics.dir_imbalance,
            },
            proposal,
            value: PackValue {
                imbalance_gain: Some(gain),
                cross_community_edges_reduced: Some(cross_edges),
                ..PackValue::default()
            },
            effort: PackEffort {
                files_moved: Some(files_moved),
                import_updates_est: Some(import_updates),
                ..PackEffort::default()
            },
            steps: vec![
                format!(
                    "Create subdirs {cluster_names} under {}.",
                    dir.path.display()
                ),
                format!("Move files as listed; update relative imports within {dir_name}/."),
                "Add index barrels where idiomatic (TS/JS).".to_string(),
            ],
            entity_ids,
        });
    }
    packs
}

fn should_reorganize(dir: &DirNode, config: &StructureConfig) -> bool {
    if dir.metrics.leaf_load <= config.min_analysis_files
        && dir.metrics.total_loc <= config.min_analysis_loc
    {
        return false;
    }
    if path_is_skipped(&dir.path, SKIP_PATTERNS) {
        return false;
    }
    if dir.metrics.dir_imbalance < 0.6 {
        return false;
    }
    dir.metrics.leaf_load > config.max_files_per_dir
        || dir.metrics.total_loc > config.max_dir_loc
        || dir.metrics.dispersion > 0.7
}

/// Cluster a directory's files into 2-4 logical groups by name patterns and
/// language.
fn cluster_files(files: &[FileNode]) -> Vec<(String, Vec<FileNode>)> {
    if files.len() < 4 {
        return vec![("core".to_string(), files.to_vec())];
    }

    let mut clusters: BTreeMap<&'static str, Vec<FileNode>> = BTreeMap::new();
    for file in files {
        let stem = file
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let bucket = if stem.contains("test") || stem.contains("spec") {
            "tests"
        } else if stem.contains("util") || stem.contains("helper") {
            "utils"
        } else if stem.contains("config") || stem.contains("setting") {
            "config"
        } else if stem.contains("service") || stem.contains("handler") || stem.contains("api") {
            "services"
        } else if stem.contains("model") || stem.contains("entity") || stem.contains("data") {
            "models"
        } else {
            "core"
        };
        clusters.entry(bucket).or_default().push(file.clone());
    }

    let mut named: Vec<(String, Vec<FileNode>)> = clusters
        .into_iter()
        .filter(|(_, files)| !files.is_empty())
        .map(|(name, files)| (name.to_string(), files))
        .collect();

    // Fold singleton clusters into the smallest substantive one.
    let (mut substantive, small): (Vec<_>, Vec<_>) =
        named.drain(..).partition(|(_, files)| files.len() >= 2);
    for (_, files) in small {
        if let Some(target) = substantive.iter_mut().min_by_key(|(_, f)| f.len()) {
            target.1.extend(files);
        } else {
            substantive.push(("core".to_string(), files));
        }
    }

    // Merge down to at most four clusters.
    while substantive.len() > 4 {
        substantive.sort_by_key(|(_, files)| files.len());
        let (_, smallest) = substantive.remove(0);
        substantive[0].1.extend(smallest);
    }

    substantive
}

fn estimate_cluster_imbalance(files: &[FileNode], config: &StructureConfig) -> f64 {
    if files.is_empty() {
        return 0.0;
    }
    let file_pressure = (files.len() as f64 / config.max_files_per_dir as f64).min(1.0);
    let total_loc: usize = files.iter().map(|f| f.loc).sum();
    let size_pressure = (total_loc as f64 / config.max_dir_loc as f64).min(1.0);
    let dispersion = if files.len() > 1 {
        let sizes: Vec<f64> = files.iter().map(|f| f.loc as f64).collect();
        crate::detectors::structure::gini_coefficient(&sizes) * 0.5
    } else {
        0.0
    };
    // New clusters have no subdivision pressure.
    0.35 * file_pressure + 0.25 * size_pressure + 0.15 * dispersion
}

fn estimate_cross_edges_reduced(clusters: &[(String, Vec<FileNode>)]) -> usize {
    let total_files: usize = clusters.iter().map(|(_, f)| f.len()).sum();
    if clusters.len() < 2 {
        return 0;
    }
    let estimated_edges = total_files * 2;
    let reduction = (0.1 * clusters.len() as f64).min(0.3);
    (estimated_edges as f64 * reduction) as usize
}

fn file_entity_lookup(indices: &[Arc<ParseIndex>], path: &Path) -> Option<EntityId> {
    let path_string = path.display().to_string();
    for index in indices {
        if let Some(id) = index.files.get(&path_string) {
            return Some(id.clone());
        }
    }
    None
}

/// Build file-split packs for every huge file that is worth splitting.
pub fn build_file_split_packs(tree: &StructureTree) -> Vec<FileSplitPack> {
    let config = StructureConfig::default();
    let mut packs = Vec::new();

    for (index, file) in tree.files().enumerate() {
        if !should_split(file, &config) {
            continue;
        }

        let mut reasons = Vec::new();
        if file.loc >= config.huge_loc {
            reasons.push(format!("loc {} > {}", file.loc, config.huge_loc));
        }
        if file.bytes >= config.huge_bytes {
            reasons.push(format!("bytes {} > {}", file.bytes, config.huge_bytes));
        }

        let suggested_splits = suggest_splits(file);
        if suggested_splits.is_empty() {
            continue;
        }

        let size_factor = (file.loc as f64 / config.huge_loc as f64).min(1.0);
        packs.push(FileSplitPack {
            pack_id: format!("filesplitpack:FILE{index}"),
            file: file.path.display().to_string(),
            reasons,
            suggested_splits,
            value: PackValue {
                size_drop: Some(size_factor * 0.6),
                ..PackValue::default()
            },
            effort: PackEffort {
                loc_touched: Some(file.loc),
                ..PackEffort::default()
            },
        });
    }
    packs
}

fn should_split(file: &FileNode, _config: &StructureConfig) -> bool {
    if !file.huge {
        return false;
    }
    // Byte-flagged files can still be tiny in LOC; those are not worth it.
    if file.loc < 200 {
        return false;
    }
    if file.entities.len() < 4 {
        return false;
    }
    !path_is_skipped(&file.path, SKIP_PATTERNS)
        && !path_is_skipped(&file.path, FILE_SKIP_PATTERNS)
}

/// Group a file's entities by name heuristics into up to four splits.
fn suggest_splits(file: &FileNode) -> Vec<SplitProposal> {
    let mut groups: BTreeMap<&'static str, Vec<EntityId>> = BTreeMap::new();
    for entity_id in &file.entities {
        let base = entity_id
            .rsplit("::")
            .next()
            .unwrap_or(entity_id)
            .rsplit('.')
            .next()
            .unwrap_or(entity_id)
            .to_ascii_lowercase();
        let bucket = if base.contains("test") {
            "tests"
        } else if base.contains("util") || base.contains("helper") {
            "utils"
        } else if base.contains("service") || base.contains("manager") || base.contains("handler")
        {
            "services"
        } else if base.contains("model") || base.contains("entity") || base.contains("data") {
            "models"
        } else {
            "core"
        };
        groups.entry(bucket).or_default().push(entity_id.clone());
    }

    let stem = file
        .path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "module".to_string());
    let extension = file
        .path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut splits: Vec<SplitProposal> = groups
        .into_iter()
        .filter(|(_, includes)| !includes.is_empty())
        .map(|(name, includes)| SplitProposal {
            name: format!("{stem}_{name}{extension}"),
            includes,
        })
        .collect();

    // A single bucket means the heuristics found no seams; split in half.
    if splits.len() < 2 && file.entities.len() >= 2 {
        let mid = file.entities.len() / 2;
        splits = vec![
            SplitProposal {
                name: format!("{stem}_part1{extension}"),
                includes: file.entities[..mid].to_vec(),
            },
            SplitProposal {
                name: format!("{stem}_part2{extension}"),
                includes: file.entities[mid..].to_vec(),
            },
        ];
    }

    splits.truncate(4);
    splits
}
