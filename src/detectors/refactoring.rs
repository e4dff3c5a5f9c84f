//! Refactoring-pattern detection and structural smell scores.
//!
//! Scans raw entity text for a fixed pattern table and emits
//! [`RefactoringSuggestion`] records alongside bounded smell features. A
//! high-severity finding pushes the entity's refactoring urgency toward 100.

use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::core::entities::{CodeEntity, EntityKind};
use crate::core::errors::Result;
use crate::core::featureset::{
    EffortLevel, ExtractionContext, FeatureDefinition, FeatureExtractor, FeatureMap,
    RefactoringSuggestion, Severity,
};
use crate::detectors::complexity::cyclomatic_complexity;

const LONG_FUNCTION_LINES: usize = 20;
const VERY_LONG_FUNCTION_LINES: usize = 30;
const HIGH_CYCLOMATIC: f64 = 10.0;
const VERY_HIGH_CYCLOMATIC: f64 = 15.0;
const MANY_PARAMETERS: usize = 3;
const TOO_MANY_PARAMETERS: usize = 5;
const MAGIC_NUMBER_THRESHOLD: usize = 3;
const DUPLICATE_WINDOW: usize = 3;
const DUPLICATE_SIMILARITY: f64 = 0.7;

static FEATURES: Lazy<Vec<FeatureDefinition>> = Lazy::new(|| {
    vec![
        FeatureDefinition::new("refactoring_urgency", "Urgency of addressing detected smells")
            .with_range(0.0, 100.0),
        FeatureDefinition::new("smell_score", "Aggregate smell signal").with_range(0.0, 1.0),
        FeatureDefinition::new("long_method_score", "Long-method smell").with_range(0.0, 1.0),
        FeatureDefinition::new("god_class_score", "God-class smell").with_range(0.0, 1.0),
        FeatureDefinition::new("feature_envy_score", "Feature-envy smell").with_range(0.0, 1.0),
    ]
});

/// Detect suggestions for one entity per the pattern table.
pub fn detect_suggestions(entity: &CodeEntity) -> Vec<RefactoringSuggestion> {
    let Some(source) = entity.raw_text.as_deref() else {
        return Vec::new();
    };
    let mut suggestions = Vec::new();
    let line_count = source.lines().count();

    if entity.kind.is_function_like() && line_count > LONG_FUNCTION_LINES {
        let severity = if line_count > VERY_LONG_FUNCTION_LINES {
            Severity::High
        } else {
            Severity::Medium
        };
        suggestions.push(RefactoringSuggestion {
            refactoring_type: "extract_method".to_string(),
            severity,
            title: "Extract Method".to_string(),
            description: format!(
                "'{}' spans {line_count} lines; extract coherent blocks into helpers",
                entity.name
            ),
            rationale: "Long functions obscure intent and resist testing".to_string(),
            effort: if line_count > VERY_LONG_FUNCTION_LINES {
                EffortLevel::Medium
            } else {
                EffortLevel::Low
            },
            before: None,
            after: None,
        });
    }

    let cyclomatic = cyclomatic_complexity(source, &entity.language);
    if entity.kind.is_function_like() && cyclomatic > HIGH_CYCLOMATIC {
        let severity = if cyclomatic > VERY_HIGH_CYCLOMATIC {
            Severity::High
        } else {
            Severity::Medium
        };
        suggestions.push(RefactoringSuggestion {
            refactoring_type: "split_function".to_string(),
            severity,
            title: "Split Function".to_string(),
            description: format!(
                "cyclomatic complexity {cyclomatic:.0} exceeds {HIGH_CYCLOMATIC:.0}; split by decision clusters"
            ),
            rationale: "Each independent path multiplies the test burden".to_string(),
            effort: EffortLevel::Medium,
            before: None,
            after: None,
        });
    }

    let param_count = entity.parameters.len();
    if entity.kind.is_function_like() && param_count > MANY_PARAMETERS {
        let severity = if param_count > TOO_MANY_PARAMETERS {
            Severity::High
        } else {
            Severity::Medium
        };
        suggestions.push(RefactoringSuggestion {
            refactoring_type: "introduce_parameter_object".to_string(),
            severity,
            title: "Introduce Parameter Object".to_string(),
            description: format!(
                "'{}' takes {param_count} parameters; group related ones into a struct",
                entity.name
            ),
            rationale: "Long parameter lists are hard to remember and call correctly".to_string(),
            effort: EffortLevel::Medium,
            before: None,
            after: None,
        });
    }

    if let Some(condition) = find_complex_conditional(source) {
        suggestions.push(RefactoringSuggestion {
            refactoring_type: "consolidate_conditional".to_string(),
            severity: Severity::Medium,
            title: "Consolidate Conditional".to_string(),
            description: "Extract the compound condition into a named predicate".to_string(),
            rationale: "Multiple logical operators in one conditional hide the rule being checked"
                .to_string(),
            effort: EffortLevel::Low,
            before: Some(condition),
            after: None,
        });
    }

    let magic_numbers = find_magic_numbers(source);
    if magic_numbers.len() >= MAGIC_NUMBER_THRESHOLD {
        suggestions.push(RefactoringSuggestion {
            refactoring_type: "replace_magic_numbers".to_string(),
            severity: Severity::Low,
            title: "Replace Magic Numbers with Constants".to_string(),
            description: format!(
                "{} literal values ({}…) should be named constants",
                magic_numbers.len(),
                magic_numbers
                    .iter()
                    .take(3)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            rationale: "Unnamed literals leave the reader guessing at units and intent".to_string(),
            effort: EffortLevel::Low,
            before: None,
            after: None,
        });
    }

    if let Some(shared_type) = shared_parameter_type(entity) {
        suggestions.push(RefactoringSuggestion {
            refactoring_type: "extract_class".to_string(),
            severity: Severity::Medium,
            title: "Extract Class".to_string(),
            description: format!(
                "three or more parameters share the type '{shared_type}'; extract a value object"
            ),
            rationale: "Repeated parameter types usually travel together as one concept".to_string(),
            effort: EffortLevel::Medium,
            before: None,
            after: None,
        });
    }

    if has_duplicate_windows(source) {
        suggestions.push(RefactoringSuggestion {
            refactoring_type: "extract_common_code".to_string(),
            severity: Severity::Medium,
            title: "Extract Common Code".to_string(),
            description: "Two near-identical blocks can be extracted into one helper".to_string(),
            rationale: "Local duplication drifts apart silently when only one copy is fixed"
                .to_string(),
            effort: EffortLevel::Low,
            before: None,
            after: None,
        });
    }

    suggestions
}

/// First conditional line with two or more logical operators, if any.
fn find_complex_conditional(source: &str) -> Option<String> {
    for line in source.lines() {
        let trimmed = line.trim();
        let is_conditional = trimmed.starts_with("if ")
            || trimmed.starts_with("if(")
            || trimmed.starts_with("elif ")
            || trimmed.starts_with("while ")
            || trimmed.starts_with("while(");
        if !is_conditional {
            continue;
        }
        let operators = trimmed.matches("&&").count()
            + trimmed.matches("||").count()
            + count_word(trimmed, "and")
            + count_word(trimmed, "or");
        if operators >= 2 {
            return Some(trimmed.to_string());
        }
    }
    None
}

fn count_word(text: &str, word: &str) -> usize {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|token| *token == word)
        .count()
}

/// Numeric literals other than 0, 1, and -1.
fn find_magic_numbers(source: &str) -> Vec<String> {
    let mut numbers = Vec::new();
    for line in source.lines() {
        let mut token = String::new();
        let mut prev_ident = false;
        for c in line.chars() {
            if c.is_ascii_digit() || (c == '.' && !token.is_empty()) {
                if !prev_ident {
                    token.push(c);
                }
            } else {
                if !token.is_empty() {
                    push_magic(&mut numbers, &token);
                    token.clear();
                }
                prev_ident = c.is_alphabetic() || c == '_';
            }
        }
        if !token.is_empty() {
            push_magic(&mut numbers, &token);
        }
    }
    numbers
}

fn push_magic(numbers: &mut Vec<String>, token: &str) {
    if token != "0" && token != "1" && !token.is_empty() {
        numbers.push(token.to_string());
    }
}

/// Common annotation shared by three or more parameters, e.g. `x: int`.
fn shared_parameter_type(entity: &CodeEntity) -> Option<String> {
    let mut counts: std::collections::BTreeMap<String, usize> = std::collections::BTreeMap::new();
    for param in &entity.parameters {
        if let Some((_, type_hint)) = param.split_once(':') {
            let type_hint = type_hint.trim().trim_end_matches(',');
            if !type_hint.is_empty() {
                *counts.entry(type_hint.to_string()).or_insert(0) += 1;
            }
        }
    }
    counts
        .into_iter()
        .find(|(_, count)| *count >= 3)
        .map(|(type_hint, _)| type_hint)
}

/// Detect two non-overlapping 3-line windows with >= 70% token similarity.
fn has_duplicate_windows(source: &str) -> bool {
    let lines: Vec<&str> = source
        .lines()
        .map(str::trim)
        .collect();
    if lines.len() < DUPLICATE_WINDOW * 2 {
        return false;
    }

    let windows: Vec<Vec<&str>> = lines
        .windows(DUPLICATE_WINDOW)
        .map(|w| {
            w.iter()
                .flat_map(|line| line.split(|c: char| !c.is_alphanumeric() && c != '_'))
                .filter(|t| !t.is_empty())
                .collect()
        })
        .collect();

    for i in 0..windows.len() {
        if windows[i].len() < 4 {
            continue; // too few tokens to call it duplication
        }
        for j in (i + DUPLICATE_WINDOW)..windows.len() {
            if token_similarity(&windows[i], &windows[j]) >= DUPLICATE_SIMILARITY {
                return true;
            }
        }
    }
    false
}

fn token_similarity(a: &[&str], b: &[&str]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let set_a: std::collections::BTreeSet<&str> = a.iter().copied().collect();
    let set_b: std::collections::BTreeSet<&str> = b.iter().copied().collect();
    let shared = set_a.intersection(&set_b).count();
    (2 * shared) as f64 / (set_a.len() + set_b.len()) as f64
}

/// Extractor for smell features and refactoring suggestions.
#[derive(Debug, Default)]
pub struct RefactoringExtractor;

impl RefactoringExtractor {
    /// Create the extractor
    pub fn new() -> Self {
        Self
    }

    fn smell_features(entity: &CodeEntity, suggestions: &[RefactoringSuggestion]) -> FeatureMap {
        let loc = entity.loc();
        let high_count = suggestions
            .iter()
            .filter(|s| s.severity == Severity::High)
            .count();

        let long_method_score = if entity.kind.is_function_like() {
            (loc as f64 / 100.0).min(1.0)
        } else {
            0.0
        };

        let god_class_score = if entity.kind.is_class_like() {
            let method_count = entity.children.len() as f64;
            ((method_count / 20.0 + loc as f64 / 1000.0) / 2.0).min(1.0)
        } else {
            0.0
        };

        let feature_envy_score = entity
            .raw_text
            .as_deref()
            .map(|source| feature_envy(source))
            .unwrap_or(0.0);

        let severity_weight: f64 = suggestions
            .iter()
            .map(|s| match s.severity {
                Severity::Low => 0.25,
                Severity::Medium => 0.5,
                Severity::High => 1.0,
            })
            .sum();
        let smell_score = (severity_weight / 3.0).min(1.0);

        // High-severity findings elevate urgency toward 100.
        let urgency = if high_count > 0 {
            (60.0 + 20.0 * high_count as f64).min(100.0)
        } else {
            (10.0 * suggestions.len() as f64).min(50.0)
        };

        let mut features = FeatureMap::new();
        features.insert("refactoring_urgency".to_string(), urgency);
        features.insert("smell_score".to_string(), smell_score);
        features.insert("long_method_score".to_string(), long_method_score);
        features.insert("god_class_score".to_string(), god_class_score);
        features.insert("feature_envy_score".to_string(), feature_envy_score);
        features
    }
}

/// Ratio of member accesses on foreign receivers to all member accesses.
fn feature_envy(source: &str) -> f64 {
    let mut foreign = 0usize;
    let mut total = 0usize;
    for line in source.lines() {
        for (i, _) in line.match_indices('.') {
            let receiver: String = line[..i]
                .chars()
                .rev()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if receiver.is_empty() || receiver.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            total += 1;
            let receiver: String = receiver.chars().rev().collect();
            if receiver != "self" && receiver != "this" {
                foreign += 1;
            }
        }
    }
    if total < 3 {
        return 0.0;
    }
    foreign as f64 / total as f64
}

#[async_trait]
impl FeatureExtractor for RefactoringExtractor {
    fn name(&self) -> &str {
        "refactoring"
    }

    fn features(&self) -> &[FeatureDefinition] {
        &FEATURES
    }

    fn supports_entity(&self, entity: &CodeEntity) -> bool {
        entity.kind.is_function_like()
            || entity.kind.is_class_like()
            || entity.kind == EntityKind::File
    }

    async fn extract(
        &self,
        entity: &CodeEntity,
        _context: &ExtractionContext,
    ) -> Result<FeatureMap> {
        let suggestions = detect_suggestions(entity);
        Ok(Self::smell_features(entity, &suggestions))
    }

    fn suggestions(
        &self,
        entity: &CodeEntity,
        _context: &ExtractionContext,
    ) -> Vec<RefactoringSuggestion> {
        detect_suggestions(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entities::SourceLocation;

    fn function(source: &str, parameters: &[&str]) -> CodeEntity {
        let lines = source.lines().count().max(1);
        let mut entity = CodeEntity::new(
            "python://a.py::f",
            "f",
            EntityKind::Function,
            SourceLocation {
                file_path: "a.py".to_string(),
                start_line: 1,
                end_line: lines,
                start_column: 0,
                end_column: 0,
            },
            "python",
        )
        .with_raw_text(source);
        entity.parameters = parameters.iter().map(|p| p.to_string()).collect();
        entity
    }

    #[test]
    fn long_function_suggests_extract_method() {
        let source = (0..25).map(|i| format!("line_{i}()")).collect::<Vec<_>>().join("\n");
        let suggestions = detect_suggestions(&function(&source, &[]));
        let extract = suggestions
            .iter()
            .find(|s| s.refactoring_type == "extract_method")
            .unwrap();
        assert_eq!(extract.severity, Severity::Medium);

        let source = (0..35).map(|i| format!("line_{i}()")).collect::<Vec<_>>().join("\n");
        let suggestions = detect_suggestions(&function(&source, &[]));
        let extract = suggestions
            .iter()
            .find(|s| s.refactoring_type == "extract_method")
            .unwrap();
        assert_eq!(extract.severity, Severity::High);
    }

    #[test]
    fn many_parameters_suggest_parameter_object() {
        let entity = function("pass", &["a", "b", "c", "d"]);
        let suggestions = detect_suggestions(&entity);
        assert!(suggestions
            .iter()
            .any(|s| s.refactoring_type == "introduce_parameter_object"
                && s.severity == Severity::Medium));

        let entity = function("pass", &["a", "b", "c", "d", "e", "f"]);
        let suggestions = detect_suggestions(&entity);
        assert!(suggestions
            .iter()
            .any(|s| s.refactoring_type == "introduce_parameter_object"
                && s.severity == Severity::High));
    }

    #[test]
    fn compound_conditionals_are_flagged() {
        let entity = function("if a and b and c:\n    pass\n", &[]);
        let suggestions = detect_suggestions(&entity);
        assert!(suggestions
            .iter()
            .any(|s| s.refactoring_type == "consolidate_conditional"));
    }

    #[test]
    fn magic_numbers_need_three_occurrences() {
        let entity = function("x = 42\ny = 7\n", &[]);
        assert!(!detect_suggestions(&entity)
            .iter()
            .any(|s| s.refactoring_type == "replace_magic_numbers"));

        let entity = function("x = 42\ny = 7\nz = 1024\n", &[]);
        assert!(detect_suggestions(&entity)
            .iter()
            .any(|s| s.refactoring_type == "replace_magic_numbers"));
    }

    #[test]
    fn zero_and_one_are_not_magic() {
        let entity = function("x = 0\ny = 1\nz = 0\nw = 1\n", &[]);
        assert!(!detect_suggestions(&entity)
            .iter()
            .any(|s| s.refactoring_type == "replace_magic_numbers"));
    }

    #[test]
    fn shared_parameter_types_suggest_extract_class() {
        let entity = function("pass", &["a: str", "b: str", "c: str", "n: int"]);
        let suggestions = detect_suggestions(&entity);
        assert!(suggestions
            .iter()
            .any(|s| s.refactoring_type == "extract_class"));
    }

    #[test]
    fn duplicate_windows_suggest_extract_common_code() {
        let source = "total = compute(base, rate)\nlog(total)\nstore(total, db)\nother()\nmore()\nfiller()\ntotal = compute(base, rate)\nlog(total)\nstore(total, db)\n";
        let entity = function(source, &[]);
        assert!(detect_suggestions(&entity)
            .iter()
            .any(|s| s.refactoring_type == "extract_common_code"));
    }

    #[test]
    fn high_severity_elevates_urgency() {
        let source = (0..40).map(|i| format!("line_{i}()")).collect::<Vec<_>>().join("\n");
        let entity = function(&source, &[]);
        let suggestions = detect_suggestions(&entity);
        let features = RefactoringExtractor::smell_features(&entity, &suggestions);
        assert!(features["refactoring_urgency"] >= 60.0);
    }
}
