//! Coverage report ingestion and per-entity coverage features.
//!
//! Five report formats are accepted (coverage.py JSON, LCOV, JaCoCo XML,
//! Cobertura XML, Istanbul JSON) and auto-detected by extension plus content
//! sniffing. Entities pick up coverage by line-range overlap against the
//! report's per-file line sets.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::core::entities::{CodeEntity, EntityKind};
use crate::core::errors::{Result, ValknutError};
use crate::core::featureset::{
    ExtractionContext, FeatureDefinition, FeatureExtractor, FeatureMap,
};

/// Supported coverage report formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageFormat {
    /// `coverage.py` JSON report
    CoveragePy,
    /// LCOV tracefile
    Lcov,
    /// JaCoCo XML report
    Jacoco,
    /// Cobertura XML report
    Cobertura,
    /// Istanbul JSON report
    Istanbul,
}

/// Line coverage for one file.
#[derive(Debug, Clone, Default)]
pub struct FileCoverage {
    /// Report path of the file
    pub path: String,
    /// Lines observed as executed
    pub covered_lines: BTreeSet<usize>,
    /// Lines observed as never executed
    pub uncovered_lines: BTreeSet<usize>,
    /// Total branch count, when the format reports branches
    pub branches_total: usize,
    /// Covered branch count
    pub branches_covered: usize,
}

impl FileCoverage {
    /// Covered fraction over all observed lines (1.0 when nothing observed).
    pub fn coverage_fraction(&self) -> f64 {
        let total = self.covered_lines.len() + self.uncovered_lines.len();
        if total == 0 {
            1.0
        } else {
            self.covered_lines.len() as f64 / total as f64
        }
    }
}

/// A parsed coverage report.
#[derive(Debug, Clone, Default)]
pub struct CoverageReport {
    /// Per-file coverage keyed by report path
    pub files: BTreeMap<String, FileCoverage>,
}

impl CoverageReport {
    /// Find the file record matching an entity path. Report paths are often
    /// repo-relative while entity paths are absolute, so suffix matching is
    /// applied in both directions.
    pub fn file_for(&self, entity_path: &str) -> Option<&FileCoverage> {
        if let Some(exact) = self.files.get(entity_path) {
            return Some(exact);
        }
        self.files
            .values()
            .find(|fc| entity_path.ends_with(&fc.path) || fc.path.ends_with(entity_path))
    }
}

/// Detect the report format from extension and content sniffing.
pub fn detect_format(path: &Path, content: &str) -> Option<CoverageFormat> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let head: String = content.chars().take(2048).collect();

    match extension.as_str() {
        "info" | "lcov" => Some(CoverageFormat::Lcov),
        "xml" => {
            if head.contains("<report") {
                Some(CoverageFormat::Jacoco)
            } else if head.contains("<coverage") {
                Some(CoverageFormat::Cobertura)
            } else {
                None
            }
        }
        "json" => {
            if head.contains("statementMap") {
                Some(CoverageFormat::Istanbul)
            } else if head.contains("\"files\"") || head.contains("executed_lines") {
                Some(CoverageFormat::CoveragePy)
            } else {
                Some(CoverageFormat::Istanbul)
            }
        }
        _ => {
            if head.starts_with("TN:") || head.contains("\nSF:") || head.starts_with("SF:") {
                Some(CoverageFormat::Lcov)
            } else {
                None
            }
        }
    }
}

/// Parse a coverage report, auto-detecting the format.
pub fn parse_report(path: &Path) -> Result<CoverageReport> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ValknutError::io(format!("failed to read coverage report {path:?}"), e))?;
    let format = detect_format(path, &content).ok_or_else(|| {
        ValknutError::unsupported(format!("unrecognized coverage report format: {path:?}"))
    })?;
    parse_with_format(&content, format)
}

/// Parse report content with a known format.
pub fn parse_with_format(content: &str, format: CoverageFormat) -> Result<CoverageReport> {
    match format {
        CoverageFormat::CoveragePy => parse_coverage_py(content),
        CoverageFormat::Lcov => Ok(parse_lcov(content)),
        CoverageFormat::Jacoco => parse_jacoco(content),
        CoverageFormat::Cobertura => parse_cobertura(content),
        CoverageFormat::Istanbul => parse_istanbul(content),
    }
}

fn parse_coverage_py(content: &str) -> Result<CoverageReport> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    let mut report = CoverageReport::default();

    let Some(files) = value.get("files").and_then(|f| f.as_object()) else {
        return Ok(report);
    };
    for (path, data) in files {
        let mut file = FileCoverage {
            path: path.clone(),
            ..FileCoverage::default()
        };
        for line in json_line_array(data.get("executed_lines")) {
            file.covered_lines.insert(line);
        }
        for line in json_line_array(data.get("missing_lines")) {
            file.uncovered_lines.insert(line);
        }
        if let Some(summary) = data.get("summary") {
            file.branches_total = summary
                .get("num_branches")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize;
            file.branches_covered = summary
                .get("covered_branches")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize;
        }
        report.files.insert(path.clone(), file);
    }
    Ok(report)
}

fn json_line_array(value: Option<&serde_json::Value>) -> Vec<usize> {
    value
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_u64())
                .map(|v| v as usize)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_lcov(content: &str) -> CoverageReport {
    let mut report = CoverageReport::default();
    let mut current: Option<FileCoverage> = None;

    for line in content.lines() {
        let line = line.trim();
        if let Some(path) = line.strip_prefix("SF:") {
            current = Some(FileCoverage {
                path: path.to_string(),
                ..FileCoverage::default()
            });
        } else if let Some(data) = line.strip_prefix("DA:") {
            if let Some(file) = current.as_mut() {
                let mut parts = data.split(',');
                if let (Some(line_no), Some(count)) = (parts.next(), parts.next()) {
                    if let (Ok(line_no), Ok(count)) =
                        (line_no.parse::<usize>(), count.parse::<u64>())
                    {
                        if count > 0 {
                            file.covered_lines.insert(line_no);
                        } else {
                            file.uncovered_lines.insert(line_no);
                        }
                    }
                }
            }
        } else if let Some(data) = line.strip_prefix("BRDA:") {
            if let Some(file) = current.as_mut() {
                file.branches_total += 1;
                let taken = data.rsplit(',').next().unwrap_or("-");
                if taken != "-" && taken != "0" {
                    file.branches_covered += 1;
                }
            }
        } else if line == "end_of_record" {
            if let Some(file) = current.take() {
                report.files.insert(file.path.clone(), file);
            }
        }
    }
    if let Some(file) = current.take() {
        report.files.insert(file.path.clone(), file);
    }
    report
}

fn xml_attr(e: &quick_xml::events::BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.as_ref() == name.as_bytes())
        .and_then(|a| String::from_utf8(a.value.to_vec()).ok())
}

fn parse_jacoco(content: &str) -> Result<CoverageReport> {
    let mut reader = Reader::from_reader(content.as_bytes());
    reader.trim_text(true);
    let mut report = CoverageReport::default();
    let mut package = String::new();
    let mut current: Option<FileCoverage> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"package" => {
                    package = xml_attr(e, "name").unwrap_or_default();
                }
                b"sourcefile" => {
                    let name = xml_attr(e, "name").unwrap_or_default();
                    let path = if package.is_empty() {
                        name
                    } else {
                        format!("{package}/{name}")
                    };
                    // Flush any previous sourcefile that lacked a close event.
                    if let Some(file) = current.take() {
                        report.files.insert(file.path.clone(), file);
                    }
                    current = Some(FileCoverage {
                        path,
                        ..FileCoverage::default()
                    });
                }
                b"line" => {
                    if let Some(file) = current.as_mut() {
                        let nr = xml_attr(e, "nr").and_then(|v| v.parse::<usize>().ok());
                        let covered_instructions = xml_attr(e, "ci")
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(0);
                        if let Some(nr) = nr {
                            if covered_instructions > 0 {
                                file.covered_lines.insert(nr);
                            } else {
                                file.uncovered_lines.insert(nr);
                            }
                        }
                        file.branches_total += xml_attr(e, "mb")
                            .and_then(|v| v.parse::<usize>().ok())
                            .unwrap_or(0)
                            + xml_attr(e, "cb")
                                .and_then(|v| v.parse::<usize>().ok())
                                .unwrap_or(0);
                        file.branches_covered += xml_attr(e, "cb")
                            .and_then(|v| v.parse::<usize>().ok())
                            .unwrap_or(0);
                    }
                }
                _ => {}
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"sourcefile" => {
                if let Some(file) = current.take() {
                    report.files.insert(file.path.clone(), file);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ValknutError::Serialization {
                    message: format!("malformed JaCoCo report: {e}"),
                    source: None,
                })
            }
            _ => {}
        }
        buf.clear();
    }
    if let Some(file) = current.take() {
        report.files.insert(file.path.clone(), file);
    }
    Ok(report)
}

fn parse_cobertura(content: &str) -> Result<CoverageReport> {
    let mut reader = Reader::from_reader(content.as_bytes());
    reader.trim_text(true);
    let mut report = CoverageReport::default();
    let mut current: Option<FileCoverage> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"class" => {
                    if let Some(filename) = xml_attr(e, "filename") {
                        if let Some(file) = current.take() {
                            merge_file(&mut report, file);
                        }
                        current = Some(FileCoverage {
                            path: filename,
                            ..FileCoverage::default()
                        });
                    }
                }
                b"line" => {
                    if let Some(file) = current.as_mut() {
                        let number = xml_attr(e, "number").and_then(|v| v.parse::<usize>().ok());
                        let hits = xml_attr(e, "hits")
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(0);
                        if let Some(number) = number {
                            if hits > 0 {
                                file.covered_lines.insert(number);
                            } else {
                                file.uncovered_lines.insert(number);
                            }
                        }
                        if xml_attr(e, "branch").as_deref() == Some("true") {
                            file.branches_total += 1;
                            if hits > 0 {
                                file.branches_covered += 1;
                            }
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"class" => {
                if let Some(file) = current.take() {
                    merge_file(&mut report, file);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ValknutError::Serialization {
                    message: format!("malformed Cobertura report: {e}"),
                    source: None,
                })
            }
            _ => {}
        }
        buf.clear();
    }
    if let Some(file) = current.take() {
        merge_file(&mut report, file);
    }
    Ok(report)
}

/// Cobertura lists one `<class>` per class; multiple classes can share one
/// source file, so line sets are unioned.
fn merge_file(report: &mut CoverageReport, file: FileCoverage) {
    let entry = report
        .files
        .entry(file.path.clone())
        .or_insert_with(|| FileCoverage {
            path: file.path.clone(),
            ..FileCoverage::default()
        });
    entry.covered_lines.extend(file.covered_lines.iter());
    entry.uncovered_lines.extend(file.uncovered_lines.iter());
    entry.branches_total += file.branches_total;
    entry.branches_covered += file.branches_covered;
    // A line covered anywhere is covered.
    let covered = entry.covered_lines.clone();
    entry.uncovered_lines.retain(|l| !covered.contains(l));
}

fn parse_istanbul(content: &str) -> Result<CoverageReport> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    let mut report = CoverageReport::default();

    let Some(files) = value.as_object() else {
        return Ok(report);
    };
    for (path, data) in files {
        let Some(statement_map) = data.get("statementMap").and_then(|v| v.as_object()) else {
            continue;
        };
        let counts = data.get("s").and_then(|v| v.as_object());
        let mut file = FileCoverage {
            path: path.clone(),
            ..FileCoverage::default()
        };

        for (id, span) in statement_map {
            let start = span
                .pointer("/start/line")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as usize;
            let end = span
                .pointer("/end/line")
                .and_then(|v| v.as_u64())
                .unwrap_or(start as u64) as usize;
            let hits = counts
                .and_then(|c| c.get(id))
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            for line in start..=end.max(start) {
                if line == 0 {
                    continue;
                }
                if hits > 0 {
                    file.covered_lines.insert(line);
                } else {
                    file.uncovered_lines.insert(line);
                }
            }
        }
        let covered = file.covered_lines.clone();
        file.uncovered_lines.retain(|l| !covered.contains(l));
        report.files.insert(path.clone(), file);
    }
    Ok(report)
}

static FEATURES: Lazy<Vec<FeatureDefinition>> = Lazy::new(|| {
    vec![
        FeatureDefinition::new("coverage_percentage", "Covered line percentage")
            .with_range(0.0, 100.0)
            .with_default(100.0),
        FeatureDefinition::new("uncovered_line_count", "Uncovered lines in the entity span")
            .with_range(0.0, 100_000.0),
        FeatureDefinition::new("uncovered_block_count", "Contiguous uncovered line runs")
            .with_range(0.0, 10_000.0),
        FeatureDefinition::new("branch_coverage_percentage", "Covered branch percentage")
            .with_range(0.0, 100.0)
            .with_default(100.0),
        FeatureDefinition::new(
            "coverage_priority_score",
            "Uncovered fraction weighted by entity importance",
        )
        .with_range(0.0, 1.0),
    ]
});

/// Extractor producing per-entity coverage features from a parsed report.
pub struct CoverageExtractor {
    report: CoverageReport,
}

impl CoverageExtractor {
    /// Create the extractor over a parsed report
    pub fn new(report: CoverageReport) -> Self {
        Self { report }
    }

    /// Importance heuristic: functions and methods outrank classes and files.
    fn importance(kind: EntityKind) -> f64 {
        match kind {
            EntityKind::Function | EntityKind::Method => 1.0,
            k if k.is_class_like() => 0.8,
            EntityKind::File => 0.6,
            _ => 0.5,
        }
    }
}

#[async_trait]
impl FeatureExtractor for CoverageExtractor {
    fn name(&self) -> &str {
        "coverage"
    }

    fn features(&self) -> &[FeatureDefinition] {
        &FEATURES
    }

    async fn extract(
        &self,
        entity: &CodeEntity,
        _context: &ExtractionContext,
    ) -> Result<FeatureMap> {
        let Some(file) = self.report.file_for(&entity.location.file_path) else {
            return Ok(self.default_features());
        };

        let start = entity.location.start_line;
        let end = entity.location.end_line;
        let covered = file
            .covered_lines
            .range(start..=end)
            .count();
        let uncovered: Vec<usize> = file
            .uncovered_lines
            .range(start..=end)
            .copied()
            .collect();

        let observed = covered + uncovered.len();
        let coverage_fraction = if observed == 0 {
            1.0
        } else {
            covered as f64 / observed as f64
        };

        // Contiguous uncovered runs.
        let mut blocks = 0usize;
        let mut previous: Option<usize> = None;
        for line in &uncovered {
            if previous.map_or(true, |p| *line > p + 1) {
                blocks += 1;
            }
            previous = Some(*line);
        }

        let branch_percentage = if file.branches_total == 0 {
            100.0
        } else {
            file.branches_covered as f64 / file.branches_total as f64 * 100.0
        };

        let mut features = FeatureMap::new();
        features.insert("coverage_percentage".to_string(), coverage_fraction * 100.0);
        features.insert("uncovered_line_count".to_string(), uncovered.len() as f64);
        features.insert("uncovered_block_count".to_string(), blocks as f64);
        features.insert("branch_coverage_percentage".to_string(), branch_percentage);
        features.insert(
            "coverage_priority_score".to_string(),
            (1.0 - coverage_fraction) * Self::importance(entity.kind),
        );
        Ok(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ValknutConfig;
    use crate::core::entities::{ParseIndex, SourceLocation};
    use std::sync::Arc;

    fn entity(path: &str, kind: EntityKind, start: usize, end: usize) -> CodeEntity {
        CodeEntity::new(
            format!("python://{path}::e"),
            "e",
            kind,
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

    #[test]
    fn lcov_format_is_detected_and_parsed() {
        let content = "TN:\nSF:src/lib.py\nDA:1,5\nDA:2,0\nDA:3,1\nBRDA:2,0,0,1\nBRDA:2,0,1,-\nend_of_record\n";
        assert_eq!(
            detect_format(Path::new("cov.info"), content),
            Some(CoverageFormat::Lcov)
        );
        let report = parse_lcov(content);
        let file = &report.files["src/lib.py"];
        assert_eq!(file.covered_lines.len(), 2);
        assert_eq!(file.uncovered_lines.len(), 1);
        assert_eq!(file.branches_total, 2);
        assert_eq!(file.branches_covered, 1);
    }

    #[test]
    fn coverage_py_json_is_detected_and_parsed() {
        let content = r#"{"files": {"pkg/mod.py": {"executed_lines": [1, 2, 5], "missing_lines": [3, 4]}}}"#;
        assert_eq!(
            detect_format(Path::new("coverage.json"), content),
            Some(CoverageFormat::CoveragePy)
        );
        let report = parse_with_format(content, CoverageFormat::CoveragePy).unwrap();
        let file = &report.files["pkg/mod.py"];
        assert_eq!(file.covered_lines.len(), 3);
        assert_eq!(file.uncovered_lines.len(), 2);
    }

    #[test]
    fn cobertura_xml_is_detected_and_parsed() {
        let content = r#"<?xml version="1.0"?>
<coverage><packages><package><classes>
<class filename="src/a.py"><lines>
<line number="1" hits="2"/>
<line number="2" hits="0"/>
<line number="3" hits="1" branch="true"/>
</lines></class>
</classes></package></packages></coverage>"#;
        assert_eq!(
            detect_format(Path::new("cov.xml"), content),
            Some(CoverageFormat::Cobertura)
        );
        let report = parse_with_format(content, CoverageFormat::Cobertura).unwrap();
        let file = &report.files["src/a.py"];
        assert_eq!(file.covered_lines.len(), 2);
        assert_eq!(file.uncovered_lines.len(), 1);
        assert_eq!(file.branches_total, 1);
        assert_eq!(file.branches_covered, 1);
    }

    #[test]
    fn jacoco_xml_is_detected_and_parsed() {
        let content = r#"<?xml version="1.0"?>
<report name="demo"><package name="com/demo">
<sourcefile name="App.java">
<line nr="3" mi="0" ci="4" mb="0" cb="0"/>
<line nr="4" mi="2" ci="0" mb="1" cb="1"/>
</sourcefile>
</package></report>"#;
        assert_eq!(
            detect_format(Path::new("jacoco.xml"), content),
            Some(CoverageFormat::Jacoco)
        );
        let report = parse_with_format(content, CoverageFormat::Jacoco).unwrap();
        let file = &report.files["com/demo/App.java"];
        assert_eq!(file.covered_lines.len(), 1);
        assert_eq!(file.uncovered_lines.len(), 1);
        assert_eq!(file.branches_total, 2);
    }

    #[test]
    fn istanbul_json_is_detected_and_parsed() {
        let content = r#"{"src/app.js": {"statementMap": {"0": {"start": {"line": 1}, "end": {"line": 2}}, "1": {"start": {"line": 4}, "end": {"line": 4}}}, "s": {"0": 3, "1": 0}}}"#;
        assert_eq!(
            detect_format(Path::new("coverage-final.json"), content),
            Some(CoverageFormat::Istanbul)
        );
        let report = parse_with_format(content, CoverageFormat::Istanbul).unwrap();
        let file = &report.files["src/app.js"];
        assert_eq!(file.covered_lines.len(), 2);
        assert_eq!(file.uncovered_lines.len(), 1);
    }

    #[tokio::test]
    async fn entity_features_come_from_overlapping_lines() {
        let content = "SF:src/lib.py\nDA:1,1\nDA:2,0\nDA:3,0\nDA:4,1\nDA:6,0\nend_of_record\n";
        let report = parse_lcov(content);
        let extractor = CoverageExtractor::new(report);

        let features = extractor
            .extract(&entity("src/lib.py", EntityKind::Function, 1, 4), &context())
            .await
            .unwrap();
        assert_eq!(features["coverage_percentage"], 50.0);
        assert_eq!(features["uncovered_line_count"], 2.0);
        // Lines 2-3 form one contiguous block.
        assert_eq!(features["uncovered_block_count"], 1.0);
        // (1 - 0.5) * 1.0 importance for functions.
        assert_eq!(features["coverage_priority_score"], 0.5);
    }

    #[tokio::test]
    async fn files_missing_from_report_get_defaults() {
        let extractor = CoverageExtractor::new(CoverageReport::default());
        let features = extractor
            .extract(&entity("src/other.py", EntityKind::File, 1, 10), &context())
            .await
            .unwrap();
        assert_eq!(features["coverage_percentage"], 100.0);
        assert_eq!(features["coverage_priority_score"], 0.0);
    }
}
