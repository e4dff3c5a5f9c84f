//! Staged analysis pipeline.
//!
//! Stages run strictly in order — discovery, parse indexing, feature
//! extraction, normalization, scoring/ranking, impact-pack synthesis, result
//! assembly — and each stage consumes only the previous stage's immutable
//! output. No failure past configuration validation aborts a run; problems
//! degrade to warnings carried on the result.

pub mod discovery;
pub mod results;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::core::config::{Granularity, ValknutConfig};
use crate::core::entities::{DependencyGraph, EntityKind, ParseIndex};
use crate::core::errors::Result;
use crate::core::featureset::{ExtractionContext, ExtractorSet, FeatureVector};
use crate::core::normalization::{log_feature_variance, FeatureNormalizer};
use crate::core::scoring::RankingSystem;
use crate::detectors::clones::{CloneGroup, CloneMassExtractor};
use crate::detectors::complexity::ComplexityExtractor;
use crate::detectors::coverage::{parse_report, CoverageExtractor};
use crate::detectors::graph::GraphExtractor;
use crate::detectors::refactoring::RefactoringExtractor;
use crate::detectors::structure::{
    file_nodes_from_index, StructureConfig, StructureExtractor, StructureTree,
};
use crate::lang::registry::{adapter_for_file, LanguageFeatureExtractor};
use crate::packs::ImpactPackBuilder;

pub use results::{new_result_id, EntitySummary, PipelineResult, ResultRegistry};

/// Externally supplied analysis inputs.
#[derive(Debug, Default)]
pub struct AnalysisInputs {
    /// Clone groups from the external clone detector
    pub clone_groups: Vec<CloneGroup>,
}

/// The staged analysis pipeline.
pub struct Pipeline {
    config: Arc<ValknutConfig>,
}

impl Pipeline {
    /// Create a pipeline; configuration errors fail fast here.
    pub fn new(config: ValknutConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// The effective configuration
    pub fn config(&self) -> &ValknutConfig {
        &self.config
    }

    /// Run the complete pipeline.
    pub async fn analyze(&self, inputs: AnalysisInputs) -> Result<PipelineResult> {
        let started = Instant::now();
        let result_id = new_result_id();
        info!(result_id = result_id.as_str(), "starting pipeline analysis");

        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        // Stage 1: discovery.
        let discovered = discovery::discover_files(&self.config)?;
        warnings.extend(discovered.warnings.clone());
        info!(files = discovered.files.len(), "stage 1: discovery complete");

        // Stage 2: parse indexing per language.
        let indices = self.parse_and_index(&discovered.files, &mut warnings);
        let total_entities: usize = indices.iter().map(|i| i.entity_count()).sum();
        info!(entities = total_entities, "stage 2: parse indexing complete");

        if total_entities == 0 {
            return Ok(self.assemble(
                result_id,
                discovered.files.len(),
                0,
                started,
                Vec::new(),
                Vec::new(),
                Vec::new(),
                BTreeMap::new(),
                warnings,
                errors,
            ));
        }

        // Stage 3: feature extraction.
        let clone_groups = Arc::new(inputs.clone_groups);
        let extractors = Arc::new(self.build_extractor_set(&clone_groups, &mut warnings));
        let mut feature_vectors = self
            .extract_features(&indices, &clone_groups, &extractors)
            .await;
        info!(
            vectors = feature_vectors.len(),
            "stage 3: feature extraction complete"
        );
        log_feature_variance(&feature_vectors);

        // Stage 4: normalization.
        let mut normalizer = FeatureNormalizer::new(self.config.normalize.clone());
        if let Err(err) = normalizer.fit(&feature_vectors) {
            errors.push(format!("normalizer fit failed: {err}"));
        }
        if let Err(err) = normalizer.normalize(&mut feature_vectors) {
            errors.push(format!("normalization failed: {err}"));
        }
        info!("stage 4: normalization complete");

        // Stage 5: scoring and ranking.
        let ranking = RankingSystem::new(&self.config.weights);
        let ranked = ranking.rank_entities(&feature_vectors);
        info!(ranked = ranked.len(), "stage 5: ranking complete");

        // Stage 6: impact packs.
        let impact_packs = self.build_impact_packs(&indices, &clone_groups);
        info!(packs = impact_packs.len(), "stage 6: impact packs complete");

        let entity_summaries: BTreeMap<String, EntitySummary> = indices
            .iter()
            .flat_map(|index| index.entities.values())
            .map(|entity| (entity.id.clone(), EntitySummary::from_entity(entity)))
            .collect();

        Ok(self.assemble(
            result_id,
            discovered.files.len(),
            total_entities,
            started,
            feature_vectors,
            ranked,
            impact_packs,
            entity_summaries,
            warnings,
            errors,
        ))
    }

    /// Group discovered files by adapter and parse each language bucket.
    fn parse_and_index(
        &self,
        files: &[PathBuf],
        warnings: &mut Vec<String>,
    ) -> Vec<Arc<ParseIndex>> {
        let mut files_by_language: BTreeMap<&'static str, Vec<PathBuf>> = BTreeMap::new();
        for file in files {
            let Some(adapter) = adapter_for_file(file) else {
                continue;
            };
            if !self
                .config
                .languages
                .iter()
                .any(|l| l == adapter.language())
            {
                continue;
            }
            files_by_language
                .entry(adapter.language())
                .or_default()
                .push(file.clone());
        }

        let mut indices = Vec::new();
        for (language, language_files) in files_by_language {
            let adapter = crate::lang::registry::adapter_for_language(language)
                .expect("language came from the registry");
            match adapter.parse_index(&language_files) {
                Ok(index) => {
                    if let Err(err) = index.validate() {
                        warnings.push(format!("{language} index validation: {err}"));
                    }
                    indices.push(Arc::new(index));
                }
                Err(err) => {
                    warn!(language, error = %err, "language parse failed");
                    warnings.push(format!("failed to parse {language} files: {err}"));
                }
            }
        }
        indices
    }

    /// Assemble the immutable extractor table for this run.
    fn build_extractor_set(
        &self,
        clone_groups: &Arc<Vec<CloneGroup>>,
        warnings: &mut Vec<String>,
    ) -> ExtractorSet {
        let mut set = ExtractorSet::new()
            .register(Arc::new(ComplexityExtractor::new()))
            .register(Arc::new(GraphExtractor::new()))
            .register(Arc::new(RefactoringExtractor::new()))
            .register(Arc::new(LanguageFeatureExtractor::new()))
            .register(Arc::new(StructureExtractor::new(StructureConfig::default())));

        if self.config.detectors.echo.enabled {
            set = set.register(Arc::new(CloneMassExtractor::new(clone_groups.clone())));
        }

        if let Some(report_path) = &self.config.coverage.report_path {
            match parse_report(report_path) {
                Ok(report) => {
                    set = set.register(Arc::new(CoverageExtractor::new(report)));
                }
                Err(err) => {
                    warnings.push(format!(
                        "coverage report '{}' ignored: {err}",
                        report_path.display()
                    ));
                }
            }
        }

        set
    }

    /// Per-entity extraction across all language indices. Work is fanned out
    /// on the runtime's worker pool; results are re-ordered by entity so the
    /// output is independent of worker count.
    async fn extract_features(
        &self,
        indices: &[Arc<ParseIndex>],
        clone_groups: &Arc<Vec<CloneGroup>>,
        extractors: &Arc<ExtractorSet>,
    ) -> Vec<FeatureVector> {
        let mut ordered_ids = Vec::new();
        let mut join_set = JoinSet::new();

        for index in indices {
            let context = Arc::new(
                ExtractionContext::new(self.config.clone(), index.clone())
                    .with_clone_groups(clone_groups.clone()),
            );

            for entity in self.entities_for_granularity(index) {
                ordered_ids.push(entity.id.clone());
                let entity = entity.clone();
                let context = context.clone();
                let extractors = extractors.clone();
                join_set
                    .spawn(async move { extractors.extract_all(&entity, &context).await });
            }
        }

        let mut by_id: BTreeMap<String, FeatureVector> = BTreeMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(vector) => {
                    by_id.insert(vector.entity_id.clone(), vector);
                }
                Err(err) => warn!(error = %err, "extraction task failed"),
            }
        }

        ordered_ids
            .into_iter()
            .filter_map(|id| by_id.remove(&id))
            .collect()
    }

    /// Select entities per the configured granularity. `auto` maps to
    /// function granularity for python/typescript/javascript and file
    /// granularity otherwise.
    fn entities_for_granularity<'a>(
        &self,
        index: &'a ParseIndex,
    ) -> Vec<&'a crate::core::entities::CodeEntity> {
        let granularity = match self.config.ranking.granularity {
            Granularity::Auto => {
                if matches!(index.language.as_str(), "python" | "typescript" | "javascript") {
                    Granularity::Function
                } else {
                    Granularity::File
                }
            }
            explicit => explicit,
        };

        match granularity {
            Granularity::File => index.entities_of_kind(EntityKind::File),
            Granularity::Function => index
                .entities
                .values()
                .filter(|e| e.kind.is_function_like())
                .collect(),
            Granularity::Class => index
                .entities
                .values()
                .filter(|e| e.kind.is_class_like())
                .collect(),
            Granularity::Auto => unreachable!("auto resolved above"),
        }
    }

    /// Compose the per-language import graphs and run the pack builders.
    fn build_impact_packs(
        &self,
        indices: &[Arc<ParseIndex>],
        clone_groups: &Arc<Vec<CloneGroup>>,
    ) -> Vec<crate::packs::ImpactPack> {
        let mut composed = DependencyGraph::new();
        for index in indices {
            composed.merge(&index.import_graph);
        }

        let structure_config = StructureConfig::default();
        let mut file_nodes = Vec::new();
        for index in indices {
            file_nodes.extend(file_nodes_from_index(index, &structure_config));
        }
        let tree = StructureTree::build(file_nodes, &structure_config);

        let builder = ImpactPackBuilder::new((*self.config).clone());
        builder.build_all(&composed, clone_groups, indices, &tree)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        result_id: String,
        total_files: usize,
        total_entities: usize,
        started: Instant,
        feature_vectors: Vec<FeatureVector>,
        ranked_entities: Vec<crate::core::scoring::RankedEntity>,
        impact_packs: Vec<crate::packs::ImpactPack>,
        entity_summaries: BTreeMap<String, EntitySummary>,
        warnings: Vec<String>,
        errors: Vec<String>,
    ) -> PipelineResult {
        PipelineResult {
            result_id,
            config: (*self.config).clone(),
            total_files,
            total_entities,
            processing_time: started.elapsed().as_secs_f64(),
            completed_at: Utc::now(),
            feature_vectors,
            ranked_entities,
            impact_packs,
            entity_summaries,
            warnings,
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RootConfig;

    fn config_for(dir: &std::path::Path) -> ValknutConfig {
        let mut config = ValknutConfig::default();
        config.roots = vec![RootConfig::new(dir)];
        config
    }

    #[tokio::test]
    async fn zero_entity_run_returns_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config_for(dir.path())).unwrap();
        let result = pipeline.analyze(AnalysisInputs::default()).await.unwrap();

        assert_eq!(result.total_files, 0);
        assert_eq!(result.total_entities, 0);
        assert!(result.ranked_entities.is_empty());
        assert!(result.impact_packs.is_empty());
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn single_entity_run_scores_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("solo.py"),
            "def solo():\n    return 1\n",
        )
        .unwrap();

        let pipeline = Pipeline::new(config_for(dir.path())).unwrap();
        let result = pipeline.analyze(AnalysisInputs::default()).await.unwrap();

        assert_eq!(result.ranked_entities.len(), 1);
        let entity = &result.ranked_entities[0];
        assert!((0.0..=1.0).contains(&entity.score));
        for value in entity.vector.normalized_features.values() {
            assert!((0.0..=1.0).contains(value));
        }
    }

    #[tokio::test]
    async fn identical_runs_produce_identical_rankings() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..6 {
            std::fs::write(
                dir.path().join(format!("m{i}.py")),
                format!(
                    "def f{i}(a, b):\n    if a:\n        return b\n    for x in range({i}):\n        b += x\n    return b\n"
                ),
            )
            .unwrap();
        }

        let run = || async {
            let pipeline = Pipeline::new(config_for(dir.path())).unwrap();
            let result = pipeline.analyze(AnalysisInputs::default()).await.unwrap();
            result
                .ranked_entities
                .iter()
                .map(|r| (r.entity_id.clone(), r.score))
                .collect::<Vec<_>>()
        };
        assert_eq!(run().await, run().await);
    }

    #[tokio::test]
    async fn granularity_file_ranks_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def f():\n    pass\n").unwrap();

        let mut config = config_for(dir.path());
        config.ranking.granularity = Granularity::File;
        let pipeline = Pipeline::new(config).unwrap();
        let result = pipeline.analyze(AnalysisInputs::default()).await.unwrap();

        assert_eq!(result.ranked_entities.len(), 1);
        assert!(result.ranked_entities[0].entity_id.starts_with("python://"));
        assert!(!result.ranked_entities[0].entity_id.contains("::"));
    }
}
