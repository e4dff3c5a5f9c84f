//! Complexity features: cyclomatic, cognitive, nesting, parameters, fanout.
//!
//! All metrics are computed from raw entity text with keyword scanning, which
//! keeps the extractor language-agnostic; per-language token tables add the
//! constructs (match/switch/select) the common set misses. File and class
//! entities aggregate from their function children.

use aho_corasick::AhoCorasick;
use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::core::entities::{CodeEntity, EntityKind};
use crate::core::errors::Result;
use crate::core::featureset::{
    ExtractionContext, FeatureDefinition, FeatureExtractor, FeatureMap,
};

static FEATURES: Lazy<Vec<FeatureDefinition>> = Lazy::new(|| {
    vec![
        FeatureDefinition::new("cyclomatic", "McCabe cyclomatic complexity")
            .with_range(1.0, 500.0)
            .with_default(1.0),
        FeatureDefinition::new("cognitive", "Cognitive complexity (nesting-weighted)")
            .with_range(0.0, 2000.0),
        FeatureDefinition::new("max_nesting", "Maximum nesting depth").with_range(0.0, 50.0),
        FeatureDefinition::new("param_count", "Number of parameters").with_range(0.0, 50.0),
        FeatureDefinition::new("branch_fanout", "Average branches per decision point")
            .with_range(0.0, 20.0),
    ]
});

const COMMON_DECISIONS: &[&str] = &["if", "elif", "while", "for", "try", "catch", "except"];
const BRANCH_TOKENS: &[&str] = &["else", "elif", "case", "catch", "except", "finally"];
const COGNITIVE_UNIT_TOKENS: &[&str] = &["if", "else", "while", "for", "try", "catch", "except"];
const COGNITIVE_HALF_TOKENS: &[&str] = &["and", "or"];

fn language_decisions(language: &str) -> &'static [&'static str] {
    match language {
        "python" => &["with"],
        "javascript" | "typescript" => &["switch", "case"],
        "rust" => &["match"],
        "go" => &["switch", "case", "select"],
        _ => &[],
    }
}

/// Count whole-word occurrences of any of `words` in `text`.
fn count_words(text: &str, words: &[&str]) -> usize {
    if words.is_empty() {
        return 0;
    }
    let automaton = AhoCorasick::new(words).expect("static token tables are valid");
    automaton
        .find_overlapping_iter(text)
        .filter(|m| is_word_boundary(text, m.start(), m.end()))
        .count()
}

fn is_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let bytes = text.as_bytes();
    let before_ok = start == 0 || !is_ident_byte(bytes[start - 1]);
    let after_ok = end >= bytes.len() || !is_ident_byte(bytes[end]);
    before_ok && after_ok
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Count ternary conditionals (`cond ? a : b`). Only meaningful for the
/// C-family syntax; python spells it differently and rust's `?` is error
/// propagation.
fn count_ternaries(language: &str, text: &str) -> usize {
    if !matches!(language, "javascript" | "typescript") {
        return 0;
    }
    let mut count = 0;
    for line in text.lines() {
        let bytes = line.as_bytes();
        for (i, &b) in bytes.iter().enumerate() {
            if b != b'?' {
                continue;
            }
            let next = bytes.get(i + 1).copied();
            if matches!(next, Some(b'?') | Some(b'.') | Some(b':')) {
                continue;
            }
            if line[i + 1..].contains(':') {
                count += 1;
                break; // at most one ternary counted per line
            }
        }
    }
    count
}

fn uses_indentation_nesting(language: &str) -> bool {
    language == "python"
}

/// Cyclomatic complexity: 1 + decision tokens + ternaries. Minimum 1.
pub fn cyclomatic_complexity(source: &str, language: &str) -> f64 {
    let decisions = decision_count(source, language);
    (1 + decisions + count_ternaries(language, source)) as f64
}

fn decision_count(source: &str, language: &str) -> usize {
    count_words(source, COMMON_DECISIONS) + count_words(source, language_decisions(language))
}

/// Cognitive complexity: pattern weights multiplied by `1 + nesting depth` at
/// the pattern's line. Depth is tracked by opening constructs (`{`, or a
/// trailing `:` in indentation-based languages) and closing braces.
pub fn cognitive_complexity(source: &str, language: &str) -> f64 {
    let indent_based = uses_indentation_nesting(language);
    let mut depth: usize = 0;
    let mut total = 0.0;

    for line in source.lines() {
        let trimmed = line.trim();
        if indent_based {
            if trimmed.ends_with(':') {
                depth += 1;
            }
        } else {
            depth += trimmed.matches('{').count();
        }

        let weight = (1 + depth) as f64;
        let units = count_words(trimmed, COGNITIVE_UNIT_TOKENS) as f64;
        let halves = count_words(trimmed, COGNITIVE_HALF_TOKENS) as f64
            + trimmed.matches("&&").count() as f64
            + trimmed.matches("||").count() as f64;
        total += (units + 0.5 * halves) * weight;

        if !indent_based {
            depth = depth.saturating_sub(trimmed.matches('}').count());
        }
    }

    total
}

/// Maximum simultaneous nesting depth seen in the same scan.
pub fn max_nesting_depth(source: &str, language: &str) -> f64 {
    let indent_based = uses_indentation_nesting(language);
    let mut depth: usize = 0;
    let mut max_depth: usize = 0;

    for line in source.lines() {
        let trimmed = line.trim();
        if indent_based {
            if trimmed.ends_with(':') {
                depth += 1;
            }
        } else {
            depth += trimmed.matches('{').count();
        }
        max_depth = max_depth.max(depth);
        if !indent_based {
            depth = depth.saturating_sub(trimmed.matches('}').count());
        }
    }

    max_depth as f64
}

/// Branches per decision point: `else/elif/case/catch/except/finally` counts
/// divided by the decision tally. Zero when there are no decisions.
pub fn branch_fanout(source: &str, language: &str) -> f64 {
    let decisions = decision_count(source, language) + count_ternaries(language, source);
    if decisions == 0 {
        return 0.0;
    }
    let branches = count_words(source, BRANCH_TOKENS);
    branches as f64 / decisions as f64
}

/// Extractor for complexity features.
#[derive(Debug, Default)]
pub struct ComplexityExtractor;

impl ComplexityExtractor {
    /// Create the extractor
    pub fn new() -> Self {
        Self
    }

    fn function_features(entity: &CodeEntity, source: &str) -> FeatureMap {
        let mut features = FeatureMap::new();
        features.insert(
            "cyclomatic".to_string(),
            cyclomatic_complexity(source, &entity.language),
        );
        features.insert(
            "cognitive".to_string(),
            cognitive_complexity(source, &entity.language),
        );
        features.insert(
            "max_nesting".to_string(),
            max_nesting_depth(source, &entity.language),
        );
        features.insert("param_count".to_string(), entity.parameters.len() as f64);
        features.insert(
            "branch_fanout".to_string(),
            branch_fanout(source, &entity.language),
        );
        features
    }

    /// Aggregate from function/method children: cyclomatic and cognitive
    /// summed, nesting and parameters taken as maxima, fanout averaged.
    fn aggregate_features(entity: &CodeEntity, context: &ExtractionContext) -> FeatureMap {
        let mut total_cyclomatic = 0.0;
        let mut total_cognitive = 0.0;
        let mut max_nesting: f64 = 0.0;
        let mut max_params: f64 = 0.0;
        let mut fanout_sum = 0.0;
        let mut count = 0usize;

        for child in context.index.get_children(&entity.id) {
            if !child.kind.is_function_like() {
                continue;
            }
            let Some(source) = child.raw_text.as_deref() else {
                continue;
            };
            let child_features = Self::function_features(child, source);
            total_cyclomatic += child_features.get("cyclomatic").copied().unwrap_or(1.0);
            total_cognitive += child_features.get("cognitive").copied().unwrap_or(0.0);
            max_nesting = max_nesting.max(child_features.get("max_nesting").copied().unwrap_or(0.0));
            max_params = max_params.max(child_features.get("param_count").copied().unwrap_or(0.0));
            fanout_sum += child_features.get("branch_fanout").copied().unwrap_or(0.0);
            count += 1;
        }

        let mut features = FeatureMap::new();
        features.insert("cyclomatic".to_string(), total_cyclomatic.max(1.0));
        features.insert("cognitive".to_string(), total_cognitive);
        features.insert("max_nesting".to_string(), max_nesting);
        features.insert("param_count".to_string(), max_params);
        features.insert(
            "branch_fanout".to_string(),
            fanout_sum / count.max(1) as f64,
        );
        features
    }
}

#[async_trait]
impl FeatureExtractor for ComplexityExtractor {
    fn name(&self) -> &str {
        "complexity"
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
        context: &ExtractionContext,
    ) -> Result<FeatureMap> {
        if entity.kind.is_function_like() {
            if let Some(source) = entity.raw_text.as_deref() {
                return Ok(Self::function_features(entity, source));
            }
            return Ok(self.default_features());
        }
        Ok(Self::aggregate_features(entity, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ValknutConfig;
    use crate::core::entities::{ParseIndex, SourceLocation};
    use std::sync::Arc;

    fn entity(kind: EntityKind, language: &str, source: &str) -> CodeEntity {
        let lines = source.lines().count().max(1);
        CodeEntity::new(
            format!("{language}://f.x::e"),
            "e",
            kind,
            SourceLocation {
                file_path: "f.x".to_string(),
                start_line: 1,
                end_line: lines,
                start_column: 0,
                end_column: 0,
            },
            language,
        )
        .with_raw_text(source)
    }

    #[test]
    fn nested_conditional_matches_expected_metrics() {
        // Cyclomatic = base 1 + if + for + inner if = 4; the `&&` contributes
        // to cognitive but not cyclomatic.
        let source = "if (a && b) {\n    for i in 0..n {\n        if c {\n            work();\n        }\n    }\n}\n";
        assert_eq!(cyclomatic_complexity(source, "rust"), 4.0);
        assert!(cognitive_complexity(source, "rust") >= 5.0);
        assert_eq!(max_nesting_depth(source, "rust"), 3.0);
    }

    #[test]
    fn straight_line_code_has_base_complexity() {
        let source = "let x = 1;\nlet y = x + 2;\nreturn y;\n";
        assert_eq!(cyclomatic_complexity(source, "rust"), 1.0);
        assert_eq!(cognitive_complexity(source, "rust"), 0.0);
        assert_eq!(branch_fanout(source, "rust"), 0.0);
    }

    #[test]
    fn keywords_inside_identifiers_are_not_counted() {
        let source = "let iffy = classify(specifier);\nnotify();\n";
        assert_eq!(cyclomatic_complexity(source, "rust"), 1.0);
    }

    #[test]
    fn python_nesting_uses_trailing_colons() {
        let source = "if a:\n    for b in c:\n        if d:\n            pass\n";
        assert_eq!(max_nesting_depth(source, "python"), 3.0);
        assert_eq!(cyclomatic_complexity(source, "python"), 4.0);
    }

    #[test]
    fn ternaries_count_for_javascript_only() {
        let source = "const x = a ? b : c;\n";
        assert_eq!(cyclomatic_complexity(source, "javascript"), 2.0);
        assert_eq!(cyclomatic_complexity(source, "rust"), 1.0);
    }

    #[test]
    fn branch_fanout_divides_branches_by_decisions() {
        let source = "if a {\n} else {\n}\nif b {\n}\n";
        // 2 decisions (if, if), 1 branch (else).
        approx::assert_relative_eq!(branch_fanout(source, "rust"), 0.5);
    }

    #[tokio::test]
    async fn file_level_features_aggregate_children() {
        let mut index = ParseIndex::new("rust");
        let mut file = entity(EntityKind::File, "rust", "mod x;\n");
        file.id = "rust://f.x".to_string();
        index.add_entity(file);

        for (i, complexity_body) in ["if a {\n}\n", "if a {\n} else if b {\n}\n"]
            .iter()
            .enumerate()
        {
            let mut child = entity(EntityKind::Function, "rust", complexity_body);
            child.id = format!("rust://f.x::f{i}");
            child.parent_id = Some("rust://f.x".to_string());
            index.add_entity(child);
        }

        let context = ExtractionContext::new(
            Arc::new(ValknutConfig::default()),
            Arc::new(index),
        );
        let extractor = ComplexityExtractor::new();
        let file_entity = context.index.get_entity("rust://f.x").unwrap().clone();
        let features = extractor.extract(&file_entity, &context).await.unwrap();

        // Children have cyclomatic 2 and 3; the file sums them.
        assert_eq!(features["cyclomatic"], 5.0);
    }
}
