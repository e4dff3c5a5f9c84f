//! High-level engine facade over the analysis pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::core::config::{RootConfig, ValknutConfig, WeightsConfig};
use crate::core::errors::Result;
use crate::core::pipeline::{AnalysisInputs, Pipeline, PipelineResult, ResultRegistry};
use crate::detectors::clones::CloneGroup;

/// The engine owns the effective configuration and runs pipelines against it.
/// Completed results land in the process-local registry for later retrieval
/// by id.
pub struct ValknutEngine {
    config: RwLock<ValknutConfig>,
}

impl ValknutEngine {
    /// Create an engine; the configuration is validated immediately.
    pub fn new(config: ValknutConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: RwLock::new(config),
        })
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> ValknutConfig {
        self.config.read().clone()
    }

    /// Replace the scoring weights for subsequent runs.
    pub fn set_weights(&self, weights: WeightsConfig) -> Result<()> {
        let updated = self.config.read().clone().with_weights(weights)?;
        *self.config.write() = updated;
        info!("scoring weights updated");
        Ok(())
    }

    /// Analyze the given root paths with the engine's configuration.
    pub async fn analyze_paths(&self, paths: &[PathBuf]) -> Result<Arc<PipelineResult>> {
        self.analyze_paths_with(paths, AnalysisInputs::default(), None)
            .await
    }

    /// Analyze root paths with externally supplied clone groups and an
    /// optional top-K override.
    pub async fn analyze_paths_with(
        &self,
        paths: &[PathBuf],
        inputs: AnalysisInputs,
        top_k: Option<usize>,
    ) -> Result<Arc<PipelineResult>> {
        let mut config = self.config.read().clone();
        if !paths.is_empty() {
            config.roots = paths.iter().map(RootConfig::new).collect();
        }
        if let Some(top_k) = top_k {
            config.ranking.top_k = top_k;
        }

        let pipeline = Pipeline::new(config)?;
        let result = pipeline.analyze(inputs).await?;
        Ok(ResultRegistry::insert(result))
    }

    /// Analyze with clone groups from the external detector.
    pub async fn analyze_with_clones(
        &self,
        paths: &[PathBuf],
        clone_groups: Vec<CloneGroup>,
    ) -> Result<Arc<PipelineResult>> {
        self.analyze_paths_with(paths, AnalysisInputs { clone_groups }, None)
            .await
    }

    /// Retrieve a completed result by id.
    pub fn get_result(&self, result_id: &str) -> Option<Arc<PipelineResult>> {
        ResultRegistry::get(result_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn engine_runs_and_registers_results() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("m.py"),
            "def f(a):\n    if a:\n        return 1\n    return 0\n",
        )
        .unwrap();

        let engine = ValknutEngine::new(ValknutConfig::default()).unwrap();
        let result = engine
            .analyze_paths(&[dir.path().to_path_buf()])
            .await
            .unwrap();

        assert!(result.total_entities > 0);
        let fetched = engine.get_result(&result.result_id).unwrap();
        assert_eq!(fetched.result_id, result.result_id);
    }

    #[tokio::test]
    async fn top_k_override_caps_brief_slice() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            std::fs::write(
                dir.path().join(format!("f{i}.py")),
                format!("def f{i}():\n    return {i}\n"),
            )
            .unwrap();
        }

        let engine = ValknutEngine::new(ValknutConfig::default()).unwrap();
        let result = engine
            .analyze_paths_with(
                &[dir.path().to_path_buf()],
                AnalysisInputs::default(),
                Some(2),
            )
            .await
            .unwrap();

        assert_eq!(result.top_k_entities().len(), 2);
        assert_eq!(result.ranked_entities.len(), 5);
    }

    #[test]
    fn invalid_weights_are_rejected() {
        let engine = ValknutEngine::new(ValknutConfig::default()).unwrap();
        let zero = WeightsConfig {
            complexity: 0.0,
            clone_mass: 0.0,
            centrality: 0.0,
            cycles: 0.0,
            type_friction: 0.0,
            smell_prior: 0.0,
        };
        assert!(engine.set_weights(zero).is_err());
        // The previous configuration is untouched.
        assert!(engine.config().weights.total() > 0.0);
    }
}
