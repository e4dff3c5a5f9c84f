//! Impact packs: coordinated multi-entity refactoring recommendations.
//!
//! Five pack variants share a [`PackValue`]/[`PackEffort`] record; packs are
//! ranked by value over effort and optionally filtered so no two selected
//! packs claim the same entity.

pub mod chokepoints;
pub mod clones;
pub mod cycles;
pub mod structure;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::core::config::ValknutConfig;
use crate::core::entities::{DependencyGraph, EntityId, ParseIndex};
use crate::detectors::clones::{CloneGroup, CloneMember};
use crate::detectors::structure::StructureTree;

pub use chokepoints::ChokepointDetector;
pub use clones::CloneConsolidator;
pub use cycles::CycleCutter;

/// Numeric value metrics attached to a pack; fields are variant-specific.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PackValue {
    /// Duplicated LOC removed by consolidation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dup_loc_removed: Option<usize>,
    /// Estimated drop in the repository score
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_drop_estimate: Option<f64>,
    /// Cycles removed by the cut
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycles_removed: Option<usize>,
    /// Change in SCC count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scc_count_delta: Option<i64>,
    /// Average path length improvement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_path_len_delta: Option<f64>,
    /// Cross-community edges removed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cross_community_edges_reduced: Option<usize>,
    /// Projected drop in directory imbalance
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imbalance_gain: Option<f64>,
    /// Size reduction fraction for file splits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_drop: Option<f64>,
}

/// Numeric effort metrics attached to a pack; fields are variant-specific.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PackEffort {
    /// Lines touched by the refactoring
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loc_touched: Option<usize>,
    /// Call sites to update
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callsites: Option<usize>,
    /// Modules touched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modules_touched: Option<usize>,
    /// Imports that need rehoming
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imports_to_rehome_est: Option<usize>,
    /// Files moved by a reorganization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_moved: Option<usize>,
    /// Import statements to update after moving files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import_updates_est: Option<usize>,
}

/// A parameter extracted from clone variation analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateParameter {
    /// Parameter name
    pub name: String,
    /// Guessed type hint
    pub type_hint: String,
}

/// A code range present in some but not all clone members.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptionalBlock {
    /// Block label
    pub name: String,
    /// Paths of the members carrying the block
    pub appears_in: Vec<String>,
    /// Line range of the block in the longest member
    pub lines: String,
}

/// Template extracted from a clone group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CloneTemplate {
    /// Path of the medoid representative
    pub representative_path: String,
    /// Line range of the medoid representative
    pub representative_lines: String,
    /// Extracted parameters
    pub parameters: Vec<TemplateParameter>,
    /// Optional blocks
    pub optional_blocks: Vec<OptionalBlock>,
}

/// Suggested destination for extracted code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuggestedTarget {
    /// Language of the destination module
    pub language: String,
    /// Destination path
    pub path: String,
    /// Exported symbol name
    pub export: String,
}

/// Clone consolidation recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClonePack {
    /// Unique pack id
    pub pack_id: String,
    /// Group members
    pub members: Vec<CloneMember>,
    /// Extracted template
    pub template: CloneTemplate,
    /// Destination suggestion
    pub suggested_target: SuggestedTarget,
    /// Value metrics
    pub value: PackValue,
    /// Effort metrics
    pub effort: PackEffort,
    /// Ordered step recipe
    pub steps: Vec<String>,
    /// Why this pack is worth doing
    pub explanations: Vec<String>,
}

/// Cycle-cutting recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CyclePack {
    /// Unique pack id
    pub pack_id: String,
    /// Members of the strongly connected component
    pub scc_members: Vec<EntityId>,
    /// Node removal sequence that breaks the cycles
    pub cut_nodes: Vec<EntityId>,
    /// Value metrics
    pub value: PackValue,
    /// Effort metrics
    pub effort: PackEffort,
    /// Ordered step recipe
    pub steps: Vec<String>,
    /// Why this pack is worth doing
    pub explanations: Vec<String>,
}

/// Chokepoint elimination recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChokepointPack {
    /// Unique pack id
    pub pack_id: String,
    /// The high-centrality node
    pub chokepoint_node: EntityId,
    /// Labels of the communities the chokepoint bridges
    pub affected_communities: Vec<String>,
    /// Value metrics
    pub value: PackValue,
    /// Effort metrics
    pub effort: PackEffort,
    /// Ordered step recipe
    pub steps: Vec<String>,
    /// Why this pack is worth doing
    pub explanations: Vec<String>,
}

/// Snapshot of a directory's current state in a branch-reorg proposal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirSnapshot {
    /// Immediate file count
    pub files: usize,
    /// Immediate subdirectory count
    pub subdirs: usize,
    /// Total LOC of immediate files
    pub loc: usize,
    /// Gini coefficient of child-file LOC
    pub gini_loc: f64,
    /// Composite imbalance score
    pub imbalance: f64,
}

/// One proposed sub-cluster in a branch reorganization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterProposal {
    /// Proposed subdirectory name
    pub name: String,
    /// File count moved into the cluster
    pub files: usize,
    /// LOC moved into the cluster
    pub loc: usize,
}

/// Directory reorganization recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchReorgPack {
    /// Unique pack id
    pub pack_id: String,
    /// Target directory
    pub dir: String,
    /// Current directory metrics
    pub current: DirSnapshot,
    /// Proposed sub-clusters
    pub proposal: Vec<ClusterProposal>,
    /// Value metrics
    pub value: PackValue,
    /// Effort metrics
    pub effort: PackEffort,
    /// Ordered step recipe
    pub steps: Vec<String>,
    /// File entity ids that would move
    pub entity_ids: Vec<EntityId>,
}

/// One suggested split of a huge file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SplitProposal {
    /// Suggested file name
    pub name: String,
    /// Entity ids moved into the split
    pub includes: Vec<EntityId>,
}

/// Huge-file split recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSplitPack {
    /// Unique pack id
    pub pack_id: String,
    /// Target file
    pub file: String,
    /// Why the file should be split
    pub reasons: Vec<String>,
    /// Suggested splits
    pub suggested_splits: Vec<SplitProposal>,
    /// Value metrics
    pub value: PackValue,
    /// Effort metrics
    pub effort: PackEffort,
}

/// A coordinated refactoring recommendation, one of five variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImpactPack {
    /// Clone consolidation
    CloneConsolidation(ClonePack),
    /// Cycle cut
    CycleCut(CyclePack),
    /// Chokepoint elimination
    ChokepointElimination(ChokepointPack),
    /// Branch reorganization
    BranchReorg(BranchReorgPack),
    /// File split
    FileSplit(FileSplitPack),
}

impl ImpactPack {
    /// Unique pack id
    pub fn pack_id(&self) -> &str {
        match self {
            Self::CloneConsolidation(p) => &p.pack_id,
            Self::CycleCut(p) => &p.pack_id,
            Self::ChokepointElimination(p) => &p.pack_id,
            Self::BranchReorg(p) => &p.pack_id,
            Self::FileSplit(p) => &p.pack_id,
        }
    }

    /// Wire name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CloneConsolidation(_) => "clone_consolidation",
            Self::CycleCut(_) => "cycle_cut",
            Self::ChokepointElimination(_) => "chokepoint_elimination",
            Self::BranchReorg(_) => "branch_reorg",
            Self::FileSplit(_) => "file_split",
        }
    }

    /// Variant-specific value score used for ranking.
    pub fn value_score(&self) -> f64 {
        match self {
            Self::CloneConsolidation(p) => {
                p.value.dup_loc_removed.unwrap_or(0) as f64 / 100.0
                    + p.value.score_drop_estimate.unwrap_or(0.0) * 10.0
            }
            Self::CycleCut(p) => {
                p.value.cycles_removed.unwrap_or(0) as f64
                    + 0.5 * p.value.scc_count_delta.unwrap_or(0) as f64
                    + 10.0 * p.value.avg_path_len_delta.unwrap_or(0.0)
            }
            Self::ChokepointElimination(p) => {
                p.value.cross_community_edges_reduced.unwrap_or(0) as f64 * 2.0
            }
            Self::BranchReorg(p) => {
                let cross = p.value.cross_community_edges_reduced.unwrap_or(0) as f64;
                0.7 * p.value.imbalance_gain.unwrap_or(0.0) + 0.3 * (cross / (cross + 1.0))
            }
            Self::FileSplit(p) => p.value.size_drop.unwrap_or(0.0),
        }
    }

    /// Variant-specific effort score used for ranking.
    pub fn effort_score(&self) -> f64 {
        match self {
            Self::CloneConsolidation(p) => {
                p.effort.loc_touched.unwrap_or(0) as f64 / 10.0
                    + p.effort.callsites.unwrap_or(0) as f64
            }
            Self::CycleCut(p) => {
                p.effort.modules_touched.unwrap_or(0) as f64
                    + p.effort.imports_to_rehome_est.unwrap_or(0) as f64 / 3.0
            }
            Self::ChokepointElimination(p) => {
                p.effort.modules_touched.unwrap_or(0) as f64
                    + p.effort.imports_to_rehome_est.unwrap_or(0) as f64 / 5.0
            }
            Self::BranchReorg(p) => {
                0.4 * p.effort.files_moved.unwrap_or(0) as f64
                    + 0.6 * p.effort.import_updates_est.unwrap_or(0) as f64 / 2.0
            }
            Self::FileSplit(p) => p.effort.loc_touched.unwrap_or(0) as f64 / 100.0,
        }
    }

    /// Ranking score: value over effort, with the effort floored at 1.
    pub fn ranking_score(&self) -> f64 {
        self.value_score() / self.effort_score().max(1.0)
    }

    /// Entity ids claimed by this pack, used by the non-overlap filter.
    pub fn entity_ids(&self) -> BTreeSet<EntityId> {
        match self {
            Self::CloneConsolidation(p) => p
                .members
                .iter()
                .filter_map(|m| m.entity_id.clone())
                .collect(),
            Self::CycleCut(p) => p
                .scc_members
                .iter()
                .chain(p.cut_nodes.iter())
                .cloned()
                .collect(),
            Self::ChokepointElimination(p) => {
                std::iter::once(p.chokepoint_node.clone()).collect()
            }
            Self::BranchReorg(p) => p.entity_ids.iter().cloned().collect(),
            Self::FileSplit(p) => p
                .suggested_splits
                .iter()
                .flat_map(|s| s.includes.iter().cloned())
                .chain(std::iter::once(p.file.clone()))
                .collect(),
        }
    }
}

/// Builder that runs all enabled pack synthesizers, then ranks, filters, and
/// caps the result.
pub struct ImpactPackBuilder {
    config: ValknutConfig,
}

impl ImpactPackBuilder {
    /// Create a builder over the run configuration
    pub fn new(config: ValknutConfig) -> Self {
        Self { config }
    }

    /// Build, rank, and select packs.
    ///
    /// `graph` is the composed import graph across all languages; `indices`
    /// supply entity lookups for clone members and structure analysis.
    pub fn build_all(
        &self,
        graph: &DependencyGraph,
        clone_groups: &[CloneGroup],
        indices: &[std::sync::Arc<ParseIndex>],
        tree: &StructureTree,
    ) -> Vec<ImpactPack> {
        let mut packs: Vec<ImpactPack> = Vec::new();

        if self.config.detectors.echo.enabled && !clone_groups.is_empty() {
            let consolidator = CloneConsolidator::new(
                self.config.detectors.echo.min_similarity,
                self.config.clone.min_total_loc,
            );
            packs.extend(
                consolidator
                    .build_clone_packs(clone_groups, indices)
                    .into_iter()
                    .map(ImpactPack::CloneConsolidation),
            );
        }

        if self.config.impact_packs.enable_cycle_packs {
            let cutter = CycleCutter::new(self.config.impact_packs.centrality_samples);
            packs.extend(
                cutter
                    .build_cycle_packs(graph)
                    .into_iter()
                    .map(ImpactPack::CycleCut),
            );
        }

        if self.config.impact_packs.enable_chokepoint_packs {
            let detector = ChokepointDetector::new(self.config.impact_packs.centrality_samples);
            packs.extend(
                detector
                    .build_chokepoint_packs(graph)
                    .into_iter()
                    .map(ImpactPack::ChokepointElimination),
            );
        }

        packs.extend(
            structure::build_branch_reorg_packs(tree, indices)
                .into_iter()
                .map(ImpactPack::BranchReorg),
        );
        packs.extend(
            structure::build_file_split_packs(tree)
                .into_iter()
                .map(ImpactPack::FileSplit),
        );

        let ranked = rank_packs(packs);
        let selected = if self.config.impact_packs.non_overlap {
            apply_non_overlap(ranked)
        } else {
            ranked
        };
        selected
            .into_iter()
            .take(self.config.impact_packs.max_packs)
            .collect()
    }
}

/// Sort packs descending by value/effort ratio; ties break by pack id.
pub fn rank_packs(mut packs: Vec<ImpactPack>) -> Vec<ImpactPack> {
    packs.sort_by(|a, b| {
        b.ranking_score()
            .partial_cmp(&a.ranking_score())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.pack_id().cmp(b.pack_id()))
    });
    packs
}

/// Keep a pack only if its entity set does not intersect entities already
/// claimed by earlier-ranked selections.
pub fn apply_non_overlap(packs: Vec<ImpactPack>) -> Vec<ImpactPack> {
    let mut selected = Vec::new();
    let mut claimed: BTreeSet<EntityId> = BTreeSet::new();

    for pack in packs {
        let entities = pack.entity_ids();
        if entities.iter().any(|id| claimed.contains(id)) {
            continue;
        }
        claimed.extend(entities);
        selected.push(pack);
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::clones::CloneMember;

    fn clone_pack(pack_id: &str, entity_ids: &[&str], dup_loc: usize) -> ImpactPack {
        ImpactPack::CloneConsolidation(ClonePack {
            pack_id: pack_id.to_string(),
            members: entity_ids
                .iter()
                .map(|id| CloneMember {
                    entity_id: Some((*id).to_string()),
                    path: format!("{id}.py"),
                    lines: "1-10".to_string(),
                    similarity: 0.9,
                })
                .collect(),
            template: CloneTemplate {
                representative_path: "a.py".to_string(),
                representative_lines: "1-10".to_string(),
                parameters: Vec::new(),
                optional_blocks: Vec::new(),
            },
            suggested_target: SuggestedTarget {
                language: "python".to_string(),
                path: "shared.py".to_string(),
                export: "shared".to_string(),
            },
            value: PackValue {
                dup_loc_removed: Some(dup_loc),
                score_drop_estimate: Some((dup_loc as f64 / 1000.0).min(0.2)),
                ..PackValue::default()
            },
            effort: PackEffort {
                loc_touched: Some(dup_loc + 4),
                callsites: Some(2),
                ..PackEffort::default()
            },
            steps: Vec::new(),
            explanations: Vec::new(),
        })
    }

    #[test]
    fn higher_value_ratio_ranks_first() {
        let packs = rank_packs(vec![
            clone_pack("clonepack:SET0", &["e1"], 50),
            clone_pack("clonepack:SET1", &["e2"], 500),
        ]);
        assert_eq!(packs[0].pack_id(), "clonepack:SET1");
    }

    #[test]
    fn non_overlap_keeps_the_better_pack() {
        // Both packs claim e1; the higher-ratio pack wins.
        let better = clone_pack("clonepack:SET_A", &["e1", "e2"], 500);
        let worse = clone_pack("clonepack:SET_B", &["e1", "e3"], 50);
        let ranked = rank_packs(vec![worse, better]);
        let selected = apply_non_overlap(ranked);

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].pack_id(), "clonepack:SET_A");
    }

    #[test]
    fn disjoint_packs_all_survive_non_overlap() {
        let a = clone_pack("clonepack:SET_A", &["e1"], 100);
        let b = clone_pack("clonepack:SET_B", &["e2"], 100);
        let selected = apply_non_overlap(rank_packs(vec![a, b]));
        assert_eq!(selected.len(), 2);
    }
}
