//! Clone consolidation: turn externally detected clone groups into
//! actionable extraction plans with a medoid template and parameter list.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::entities::ParseIndex;
use crate::detectors::clones::{CloneGroup, CloneMember};
use crate::packs::{
    ClonePack, CloneTemplate, OptionalBlock, PackEffort, PackValue, SuggestedTarget,
    TemplateParameter,
};

/// Maximum extracted parameters before collapsing to a config object.
const MAX_PARAMETERS: usize = 6;

/// Member line-count delta treated as an optional trailing block.
const OPTIONAL_BLOCK_MIN_LINES: usize = 3;

/// Builds [`ClonePack`]s from clone groups.
pub struct CloneConsolidator {
    min_similarity: f64,
    min_total_loc: usize,
}

impl CloneConsolidator {
    /// Create a consolidator with the configured thresholds
    pub fn new(min_similarity: f64, min_total_loc: usize) -> Self {
        Self {
            min_similarity,
            min_total_loc,
        }
    }

    /// Build packs for every group passing the similarity and LOC filters.
    pub fn build_clone_packs(
        &self,
        groups: &[CloneGroup],
        indices: &[Arc<ParseIndex>],
    ) -> Vec<ClonePack> {
        let mut packs = Vec::new();
        for (group_index, group) in groups.iter().enumerate() {
            // Members with unparseable line ranges are dropped, never
            // defaulted.
            let members: Vec<CloneMember> = group
                .members
                .iter()
                .filter(|m| m.line_range().is_some())
                .cloned()
                .collect();
            if members.len() < 2 {
                continue;
            }
            if members.iter().any(|m| m.similarity < self.min_similarity) {
                continue;
            }
            let total_loc: usize = members.iter().map(CloneMember::loc).sum();
            if total_loc < self.min_total_loc {
                continue;
            }

            packs.push(self.build_pack(group_index, &members, total_loc, indices));
        }
        packs
    }

    fn build_pack(
        &self,
        group_index: usize,
        members: &[CloneMember],
        total_loc: usize,
        indices: &[Arc<ParseIndex>],
    ) -> ClonePack {
        let medoid = find_medoid(members);
        let representative = &members[medoid];

        let sources: Vec<Option<String>> = members
            .iter()
            .map(|m| member_source(m, indices))
            .collect();
        let parameters = extract_parameters(&sources);
        let optional_blocks = extract_optional_blocks(members);
        let suggested_target = suggest_target(members);

        let callsites = members.len();
        let value = PackValue {
            dup_loc_removed: Some(total_loc),
            score_drop_estimate: Some((total_loc as f64 / 1000.0).min(0.2)),
            ..PackValue::default()
        };
        let effort = PackEffort {
            loc_touched: Some(total_loc + 2 * callsites),
            callsites: Some(callsites),
            ..PackEffort::default()
        };

        let mut steps = vec![format!(
            "Extract common body to {} as `{}`.",
            suggested_target.path, suggested_target.export
        )];
        if !parameters.is_empty() {
            let parameter_list = parameters
                .iter()
                .map(|p| format!("{}:{}", p.name, p.type_hint))
                .collect::<Vec<_>>()
                .join(", ");
            steps.push(format!("Add parameters: {parameter_list}."));
        }
        if !optional_blocks.is_empty() {
            steps.push("Handle optional blocks with conditional parameters or hooks.".to_string());
        }
        steps.push(format!(
            "Replace {} clone instances with calls; preserve exceptions & return contracts.",
            members.len()
        ));

        let unique_paths: std::collections::BTreeSet<&str> =
            members.iter().map(|m| m.path.as_str()).collect();
        let explanations = vec![if unique_paths.len() > 1 {
            format!(
                "High clone mass across {} modules; parameters differ by {} identifiers/literals.",
                unique_paths.len(),
                parameters.len()
            )
        } else {
            format!(
                "Local code duplication with {} varying parameters - good candidate for extraction.",
                parameters.len()
            )
        }];

        ClonePack {
            pack_id: format!("clonepack:SET{group_index}"),
            members: members.to_vec(),
            template: CloneTemplate {
                representative_path: representative.path.clone(),
                representative_lines: representative.lines.clone(),
                parameters,
                optional_blocks,
            },
            suggested_target,
            value,
            effort,
            steps,
            explanations,
        }
    }
}

/// Medoid selection: the member whose summed similarity to the others is
/// maximal.
pub fn find_medoid(members: &[CloneMember]) -> usize {
    if members.len() == 1 {
        return 0;
    }
    let mut best_index = 0;
    let mut best_score = f64::NEG_INFINITY;
    for i in 0..members.len() {
        let total: f64 = members
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, other)| other.similarity)
            .sum();
        if total > best_score {
            best_score = total;
            best_index = i;
        }
    }
    best_index
}

fn member_source(member: &CloneMember, indices: &[Arc<ParseIndex>]) -> Option<String> {
    let (start, end) = member.line_range()?;
    for index in indices {
        for (path, file_id) in &index.files {
            if path.ends_with(&member.path) || member.path.ends_with(path.as_str()) {
                let file = index.get_entity(file_id)?;
                let text = file.raw_text.as_deref()?;
                let lines: Vec<&str> = text.lines().collect();
                if start <= lines.len() {
                    let slice = &lines[start - 1..end.min(lines.len())];
                    return Some(slice.join("\n"));
                }
            }
        }
    }
    None
}

/// Identify varying token positions across member sources. When member text
/// is unavailable the parameter list is empty; when the count exceeds the cap
/// a single synthetic config object replaces it.
fn extract_parameters(sources: &[Option<String>]) -> Vec<TemplateParameter> {
    let resolved: Vec<&String> = sources.iter().flatten().collect();
    if resolved.len() < 2 {
        return Vec::new();
    }

    let token_streams: Vec<Vec<&str>> = resolved
        .iter()
        .map(|s| {
            s.split(|c: char| !c.is_alphanumeric() && c != '_')
                .filter(|t| !t.is_empty())
                .collect()
        })
        .collect();
    let min_len = token_streams.iter().map(Vec::len).min().unwrap_or(0);

    let mut varying: BTreeMap<&str, &str> = BTreeMap::new();
    for position in 0..min_len {
        let first = token_streams[0][position];
        if token_streams.iter().any(|stream| stream[position] != first) {
            let type_hint = if first.chars().all(|c| c.is_ascii_digit()) {
                "int"
            } else {
                "str"
            };
            varying.insert(first, type_hint);
        }
    }

    let parameters: Vec<TemplateParameter> = varying
        .into_iter()
        .map(|(name, type_hint)| TemplateParameter {
            name: name.to_string(),
            type_hint: type_hint.to_string(),
        })
        .collect();

    if parameters.len() > MAX_PARAMETERS {
        return vec![TemplateParameter {
            name: "config".to_string(),
            type_hint: "ConfigObject".to_string(),
        }];
    }
    parameters
}

/// Members longer than the shortest member by a few lines carry a trailing
/// block the others lack.
fn extract_optional_blocks(members: &[CloneMember]) -> Vec<OptionalBlock> {
    let min_loc = members.iter().map(CloneMember::loc).min().unwrap_or(0);
    let carriers: Vec<&CloneMember> = members
        .iter()
        .filter(|m| m.loc() >= min_loc + OPTIONAL_BLOCK_MIN_LINES)
        .collect();
    if carriers.is_empty() {
        return Vec::new();
    }

    let longest = carriers
        .iter()
        .max_by_key(|m| m.loc())
        .expect("carriers is non-empty");
    let (start, end) = longest.line_range().expect("members were range-filtered");
    vec![OptionalBlock {
        name: "trailing_block".to_string(),
        appears_in: carriers.iter().map(|m| m.path.clone()).collect(),
        lines: format!("{}-{}", start + min_loc, end),
    }]
}

/// Destination suggestion: shared-utility module in the members' common
/// ancestor directory, named by language convention.
fn suggest_target(members: &[CloneMember]) -> SuggestedTarget {
    let paths: Vec<PathBuf> = members.iter().map(|m| PathBuf::from(&m.path)).collect();
    let ancestor = common_ancestor(&paths);

    let (language, file_name, export) = match Path::new(&members[0].path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
    {
        "ts" | "tsx" => ("typescript", "shared.ts", "sharedTransform"),
        "js" | "jsx" | "mjs" => ("javascript", "shared.js", "sharedTransform"),
        "rs" => ("rust", "shared.rs", "shared_transform"),
        "go" => ("go", "shared.go", "SharedTransform"),
        _ => ("python", "shared_utils.py", "shared_transform"),
    };

    SuggestedTarget {
        language: language.to_string(),
        path: ancestor.join(file_name).display().to_string(),
        export: export.to_string(),
    }
}

fn common_ancestor(paths: &[PathBuf]) -> PathBuf {
    let mut ancestor = paths[0]
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    for path in &paths[1..] {
        while !path.starts_with(&ancestor) {
            match ancestor.parent() {
                Some(parent) => ancestor = parent.to_path_buf(),
                None => return PathBuf::new(),
            }
        }
    }
    ancestor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(path: &str, lines: &str, similarity: f64) -> CloneMember {
        CloneMember {
            entity_id: Some(format!("python://{path}::f")),
            path: path.to_string(),
            lines: lines.to_string(),
            similarity,
        }
    }

    fn group(similarity: f64, members: Vec<CloneMember>) -> CloneGroup {
        CloneGroup {
            similarity,
            members,
        }
    }

    #[test]
    fn pack_metrics_match_member_spans() {
        // Two 80-line members at similarity 0.92.
        let groups = vec![group(
            0.92,
            vec![
                member("pkg/a/one.py", "10-89", 0.92),
                member("pkg/b/two.py", "20-99", 0.92),
            ],
        )];
        let consolidator = CloneConsolidator::new(0.85, 60);
        let packs = consolidator.build_clone_packs(&groups, &[]);

        assert_eq!(packs.len(), 1);
        let pack = &packs[0];
        assert_eq!(pack.value.dup_loc_removed, Some(160));
        approx::assert_relative_eq!(pack.value.score_drop_estimate.unwrap(), 0.16);
        assert_eq!(pack.effort.callsites, Some(2));
        assert_eq!(pack.effort.loc_touched, Some(164));

        // Target lands in the members' common ancestor directory.
        assert!(pack.suggested_target.path.starts_with("pkg/"));
        assert!(!pack.suggested_target.path.starts_with("pkg/a"));
        assert_eq!(pack.steps.len(), 2);
    }

    #[test]
    fn low_similarity_groups_are_filtered() {
        let groups = vec![group(
            0.7,
            vec![
                member("a.py", "1-80", 0.7),
                member("b.py", "1-80", 0.7),
            ],
        )];
        let consolidator = CloneConsolidator::new(0.85, 60);
        assert!(consolidator.build_clone_packs(&groups, &[]).is_empty());
    }

    #[test]
    fn small_groups_are_filtered_by_total_loc() {
        let groups = vec![group(
            0.95,
            vec![
                member("a.py", "1-10", 0.95),
                member("b.py", "1-10", 0.95),
            ],
        )];
        let consolidator = CloneConsolidator::new(0.85, 60);
        assert!(consolidator.build_clone_packs(&groups, &[]).is_empty());
    }

    #[test]
    fn malformed_ranges_drop_the_member() {
        let groups = vec![group(
            0.95,
            vec![
                member("a.py", "1-80", 0.95),
                member("b.py", "bogus", 0.95),
            ],
        )];
        let consolidator = CloneConsolidator::new(0.85, 60);
        // Only one valid member remains, so no pack is built.
        assert!(consolidator.build_clone_packs(&groups, &[]).is_empty());
    }

    #[test]
    fn medoid_maximizes_summed_similarity() {
        let members = vec![
            member("a.py", "1-10", 0.8),
            member("b.py", "1-10", 0.95),
            member("c.py", "1-10", 0.9),
        ];
        // Summed similarity of the *others* is maximal when excluding the
        // lowest-similarity member.
        assert_eq!(find_medoid(&members), 0);
    }

    #[test]
    fn length_mismatch_yields_optional_block() {
        let members = vec![
            member("a.py", "1-20", 0.9),
            member("b.py", "1-30", 0.9),
        ];
        let blocks = extract_optional_blocks(&members);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].appears_in, vec!["b.py".to_string()]);
    }
}
