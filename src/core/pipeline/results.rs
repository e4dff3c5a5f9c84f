//! Pipeline result assembly and the process-local result registry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::collections::BTreeMap;

use crate::core::config::ValknutConfig;
use crate::core::entities::{CodeEntity, EntityId, EntityKind};
use crate::core::featureset::FeatureVector;
use crate::core::scoring::RankedEntity;
use crate::packs::ImpactPack;

/// Lightweight entity descriptor retained on the result for brief
/// generation after the parse indices are dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySummary {
    /// Entity id
    pub entity_id: EntityId,
    /// Human-readable name
    pub name: String,
    /// Entity kind
    pub kind: EntityKind,
    /// Containing file path
    pub file_path: String,
    /// First line (1-based)
    pub start_line: usize,
    /// Last line (1-based)
    pub end_line: usize,
    /// Declaration signature, when extracted
    pub signature: Option<String>,
}

impl EntitySummary {
    /// Build a summary from a full entity
    pub fn from_entity(entity: &CodeEntity) -> Self {
        Self {
            entity_id: entity.id.clone(),
            name: entity.name.clone(),
            kind: entity.kind,
            file_path: entity.location.file_path.clone(),
            start_line: entity.location.start_line,
            end_line: entity.location.end_line,
            signature: entity.signature.clone(),
        }
    }
}

/// Completed analysis bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Freshly generated result identifier
    pub result_id: String,
    /// Effective configuration of the run
    pub config: ValknutConfig,
    /// Number of files analyzed
    pub total_files: usize,
    /// Number of entities analyzed
    pub total_entities: usize,
    /// Wall-clock duration in seconds
    pub processing_time: f64,
    /// Completion timestamp
    pub completed_at: DateTime<Utc>,
    /// Normalized feature vectors for every entity
    pub feature_vectors: Vec<FeatureVector>,
    /// Full ranking, sorted descending
    pub ranked_entities: Vec<RankedEntity>,
    /// Synthesized impact packs
    pub impact_packs: Vec<ImpactPack>,
    /// Entity descriptors for brief generation, keyed by id
    pub entity_summaries: BTreeMap<EntityId, EntitySummary>,
    /// Non-fatal diagnostics
    pub warnings: Vec<String>,
    /// Errors captured by stage-level guards
    pub errors: Vec<String>,
}

impl PipelineResult {
    /// Top-K slice of the ranking, per the run configuration.
    pub fn top_k_entities(&self) -> &[RankedEntity] {
        let k = self.config.ranking.top_k.min(self.ranked_entities.len());
        &self.ranked_entities[..k]
    }

    /// Find a ranked entity by id.
    pub fn ranked_entity(&self, entity_id: &str) -> Option<&RankedEntity> {
        self.ranked_entities
            .iter()
            .find(|r| r.entity_id == entity_id)
    }
}

/// Generate a fresh result identifier.
pub fn new_result_id() -> String {
    Uuid::new_v4().to_string()
}

static REGISTRY: Lazy<DashMap<String, Arc<PipelineResult>>> = Lazy::new(DashMap::new);

/// Process-local registry of completed results, keyed by result id.
/// Single-writer on pipeline completion, many readers for retrieval.
pub struct ResultRegistry;

impl ResultRegistry {
    /// Store a result, returning it wrapped for sharing.
    pub fn insert(result: PipelineResult) -> Arc<PipelineResult> {
        let shared = Arc::new(result);
        REGISTRY.insert(shared.result_id.clone(), shared.clone());
        shared
    }

    /// Retrieve a result by id.
    pub fn get(result_id: &str) -> Option<Arc<PipelineResult>> {
        REGISTRY.get(result_id).map(|entry| entry.value().clone())
    }

    /// Number of retained results.
    pub fn len() -> usize {
        REGISTRY.len()
    }

    /// Drop all retained results.
    pub fn clear() {
        REGISTRY.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_result() -> PipelineResult {
        PipelineResult {
            result_id: new_result_id(),
            config: ValknutConfig::default(),
            total_files: 0,
            total_entities: 0,
            processing_time: 0.0,
            completed_at: Utc::now(),
            feature_vectors: Vec::new(),
            ranked_entities: Vec::new(),
            impact_packs: Vec::new(),
            entity_summaries: BTreeMap::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    #[test]
    fn registry_round_trips_results() {
        let result = empty_result();
        let id = result.result_id.clone();
        ResultRegistry::insert(result);

        let fetched = ResultRegistry::get(&id).unwrap();
        assert_eq!(fetched.result_id, id);
        assert!(ResultRegistry::get("nope").is_none());
    }

    #[test]
    fn top_k_respects_available_entities() {
        let mut result = empty_result();
        result.config.ranking.top_k = 10;
        assert!(result.top_k_entities().is_empty());
    }
}
