//! Clone-mass features from externally detected clone groups.
//!
//! Clone detection itself is an external collaborator; it hands the pipeline a
//! list of groups, each with a similarity score and members identified by file
//! path and an `"A-B"` line range. This extractor maps those spans back onto
//! entities by line-range intersection.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::entities::CodeEntity;
use crate::core::errors::Result;
use crate::core::featureset::{
    ExtractionContext, FeatureDefinition, FeatureExtractor, FeatureMap,
};

/// One member of a clone group, as reported by the external detector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CloneMember {
    /// Entity id, when the detector resolved one
    #[serde(default)]
    pub entity_id: Option<String>,
    /// File path of the span
    pub path: String,
    /// Line range in `"A-B"` form (1-based, inclusive)
    pub lines: String,
    /// Similarity of this member to the group
    pub similarity: f64,
}

impl CloneMember {
    /// Parse the `"A-B"` line range. Returns `None` for malformed input; the
    /// consolidator drops such members rather than inventing a range.
    pub fn line_range(&self) -> Option<(usize, usize)> {
        let (start, end) = self.lines.split_once('-')?;
        let start: usize = start.trim().parse().ok()?;
        let end: usize = end.trim().parse().ok()?;
        (start >= 1 && start <= end).then_some((start, end))
    }

    /// Lines spanned by the member, 0 when the range is malformed.
    pub fn loc(&self) -> usize {
        self.line_range().map(|(s, e)| e - s + 1).unwrap_or(0)
    }
}

/// A clone group: near-duplicate spans with a shared similarity score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CloneGroup {
    /// Similarity of the group as a whole
    pub similarity: f64,
    /// Group members
    pub members: Vec<CloneMember>,
}

impl CloneGroup {
    /// Members located in the given file.
    pub fn members_in_file<'a>(&'a self, file_path: &'a str) -> impl Iterator<Item = &'a CloneMember> + 'a {
        self.members
            .iter()
            .filter(move |m| paths_match(&m.path, file_path))
    }
}

/// Loose path comparison: detector output is often repo-relative while entity
/// locations are absolute.
fn paths_match(a: &str, b: &str) -> bool {
    a == b || a.ends_with(b) || b.ends_with(a)
}

static FEATURES: Lazy<Vec<FeatureDefinition>> = Lazy::new(|| {
    vec![
        FeatureDefinition::new("clone_mass", "Fraction of entity lines covered by clones")
            .with_range(0.0, 1.0),
        FeatureDefinition::new("clone_groups_count", "Number of clone groups containing the entity")
            .with_range(0.0, 100.0),
        FeatureDefinition::new("max_clone_similarity", "Maximum similarity of any containing group")
            .with_range(0.0, 1.0),
        FeatureDefinition::new(
            "clone_locations_count",
            "Count of sibling clone locations across containing groups",
        )
        .with_range(0.0, 1000.0),
    ]
});

/// Extractor producing duplication features from external clone groups.
pub struct CloneMassExtractor {
    groups: Arc<Vec<CloneGroup>>,
}

impl CloneMassExtractor {
    /// Create an extractor over the detector's clone groups
    pub fn new(groups: Arc<Vec<CloneGroup>>) -> Self {
        Self { groups }
    }
}

#[async_trait]
impl FeatureExtractor for CloneMassExtractor {
    fn name(&self) -> &str {
        "clone_mass"
    }

    fn features(&self) -> &[FeatureDefinition] {
        &FEATURES
    }

    async fn extract(
        &self,
        entity: &CodeEntity,
        _context: &ExtractionContext,
    ) -> Result<FeatureMap> {
        let loc = entity.loc().max(1);
        let mut overlap_total = 0usize;
        let mut groups_count = 0usize;
        let mut max_similarity: f64 = 0.0;
        let mut locations_count = 0usize;

        for group in self.groups.iter() {
            let mut group_overlap = 0usize;
            for member in group.members_in_file(&entity.location.file_path) {
                if let Some((start, end)) = member.line_range() {
                    group_overlap += entity.location.overlap_with_range(start, end);
                }
            }
            let by_id = group
                .members
                .iter()
                .any(|m| m.entity_id.as_deref() == Some(entity.id.as_str()));

            if group_overlap > 0 || by_id {
                groups_count += 1;
                max_similarity = max_similarity.max(group.similarity);
                locations_count += group.members.len().saturating_sub(1);
                // Overlaps across groups are summed; the min(1.0) cap bounds
                // the double counting.
                overlap_total += group_overlap;
            }
        }

        let mut features = FeatureMap::new();
        features.insert(
            "clone_mass".to_string(),
            (overlap_total as f64 / loc as f64).min(1.0),
        );
        features.insert("clone_groups_count".to_string(), groups_count as f64);
        features.insert("max_clone_similarity".to_string(), max_similarity);
        features.insert("clone_locations_count".to_string(), locations_count as f64);
        Ok(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ValknutConfig;
    use crate::core::entities::{EntityKind, ParseIndex, SourceLocation};

    fn entity(path: &str, start: usize, end: usize) -> CodeEntity {
        CodeEntity::new(
            format!("python://{path}::f"),
            "f",
            EntityKind::Function,
            SourceLocation {
                file_path: path.to_string(),
                start_line: start,
                end_line: end,
                start_column: 0,
                end_column: 0,
            },
            "python",
        )
    }

    fn context() -> ExtractionContext {
        ExtractionContext::new(
            Arc::new(ValknutConfig::default()),
            Arc::new(ParseIndex::new("python")),
        )
    }

    fn group(similarity: f64, members: &[(&str, &str)]) -> CloneGroup {
        CloneGroup {
            similarity,
            members: members
                .iter()
                .map(|(path, lines)| CloneMember {
                    entity_id: None,
                    path: (*path).to_string(),
                    lines: (*lines).to_string(),
                    similarity,
                })
                .collect(),
        }
    }

    #[test]
    fn line_range_parsing_rejects_malformed_input() {
        let member = CloneMember {
            entity_id: None,
            path: "a.py".into(),
            lines: "120-176".into(),
            similarity: 0.9,
        };
        assert_eq!(member.line_range(), Some((120, 176)));
        assert_eq!(member.loc(), 57);

        let bad = CloneMember {
            entity_id: None,
            path: "a.py".into(),
            lines: "oops".into(),
            similarity: 0.9,
        };
        assert_eq!(bad.line_range(), None);
        assert_eq!(bad.loc(), 0);
    }

    #[tokio::test]
    async fn clone_mass_is_overlap_over_entity_loc() {
        let groups = Arc::new(vec![group(0.92, &[("a.py", "1-10"), ("b.py", "50-59")])]);
        let extractor = CloneMassExtractor::new(groups);

        // Entity spans lines 1-20; 10 of them overlap the clone span.
        let features = extractor
            .extract(&entity("a.py", 1, 20), &context())
            .await
            .unwrap();
        assert_eq!(features["clone_mass"], 0.5);
        assert_eq!(features["clone_groups_count"], 1.0);
        assert_eq!(features["max_clone_similarity"], 0.92);
        assert_eq!(features["clone_locations_count"], 1.0);
    }

    #[tokio::test]
    async fn clone_mass_is_capped_at_one() {
        let groups = Arc::new(vec![
            group(0.9, &[("a.py", "1-20"), ("b.py", "1-20")]),
            group(0.8, &[("a.py", "1-20"), ("c.py", "1-20")]),
        ]);
        let extractor = CloneMassExtractor::new(groups);
        let features = extractor
            .extract(&entity("a.py", 1, 20), &context())
            .await
            .unwrap();
        assert_eq!(features["clone_mass"], 1.0);
        assert_eq!(features["clone_groups_count"], 2.0);
    }

    #[tokio::test]
    async fn non_overlapping_entity_reports_zero() {
        let groups = Arc::new(vec![group(0.9, &[("a.py", "100-120")])]);
        let extractor = CloneMassExtractor::new(groups);
        let features = extractor
            .extract(&entity("a.py", 1, 20), &context())
            .await
            .unwrap();
        assert_eq!(features["clone_mass"], 0.0);
        assert_eq!(features["clone_groups_count"], 0.0);
    }
}
