//! Graph features: degrees, centralities, and cycle membership.
//!
//! Centralities are computed once per graph and cached by structural
//! fingerprint. Betweenness is exact below ten nodes and source-sampled above,
//! with a deterministic seed so repeated runs produce identical rankings.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::core::bayesian::DEFAULT_SEED;
use crate::core::entities::{splitmix64, CodeEntity, DependencyGraph, EntityId};
use crate::core::errors::Result;
use crate::core::featureset::{
    ExtractionContext, FeatureDefinition, FeatureExtractor, FeatureMap,
};

/// Per-node metric bundle for one graph.
#[derive(Debug, Clone, Default)]
pub struct NodeMetrics {
    /// Approximate betweenness centrality
    pub betweenness: f64,
    /// Closeness centrality (incoming distances)
    pub closeness: f64,
    /// Eigenvector centrality, 0 when iteration failed to converge
    pub eigenvector: f64,
    /// In-degree
    pub fan_in: f64,
    /// Out-degree
    pub fan_out: f64,
    /// 1.0 when the node's SCC has more than one member
    pub in_cycle: f64,
    /// SCC size divided by node count, 0 outside cycles
    pub cycle_size: f64,
}

/// Default sample cap for approximate betweenness. The pack builders override
/// this with the configured `impact_packs.centrality_samples`.
pub const DEFAULT_CENTRALITY_SAMPLES: usize = 64;

/// Betweenness centrality via Brandes' algorithm on the unweighted digraph.
///
/// Exact when the graph has fewer than ten nodes; otherwise `k = min(
/// max_samples, |V|/4)` sources are sampled deterministically from `seed` and
/// the accumulated dependencies rescaled by `|V|/k`.
pub fn betweenness_centrality(
    graph: &DependencyGraph,
    seed: u64,
    max_samples: usize,
) -> BTreeMap<EntityId, f64> {
    let ids = graph.node_ids();
    let n = ids.len();
    let mut centrality: BTreeMap<EntityId, f64> =
        ids.iter().map(|id| (id.clone(), 0.0)).collect();
    if n < 2 {
        return centrality;
    }

    let sources: Vec<&EntityId> = if n < 10 {
        ids.iter().collect()
    } else {
        let k = (n / 4).clamp(1, max_samples.max(1));
        sample_indices(n, k, seed).into_iter().map(|i| &ids[i]).collect()
    };
    let sampled_scale = n as f64 / sources.len() as f64;

    let index_of: HashMap<&str, usize> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    let successors: Vec<Vec<usize>> = ids
        .iter()
        .map(|id| {
            graph
                .successors(id)
                .iter()
                .filter_map(|s| index_of.get(s.as_str()).copied())
                .collect()
        })
        .collect();

    let mut accumulated = vec![0.0f64; n];
    for source in &sources {
        let s = index_of[source.as_str()];

        let mut stack: Vec<usize> = Vec::with_capacity(n);
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut sigma = vec![0.0f64; n];
        let mut dist = vec![-1i64; n];
        sigma[s] = 1.0;
        dist[s] = 0;

        let mut queue = VecDeque::new();
        queue.push_back(s);
        while let Some(v) = queue.pop_front() {
            stack.push(v);
            for &w in &successors[v] {
                if dist[w] < 0 {
                    dist[w] = dist[v] + 1;
                    queue.push_back(w);
                }
                if dist[w] == dist[v] + 1 {
                    sigma[w] += sigma[v];
                    preds[w].push(v);
                }
            }
        }

        let mut delta = vec![0.0f64; n];
        while let Some(w) = stack.pop() {
            for &v in &preds[w] {
                delta[v] += (sigma[v] / sigma[w]) * (1.0 + delta[w]);
            }
            if w != s {
                accumulated[w] += delta[w];
            }
        }
    }

    // Directed normalization: 1 / ((n-1)(n-2)).
    let norm = if n > 2 {
        1.0 / ((n - 1) as f64 * (n - 2) as f64)
    } else {
        1.0
    };
    for (i, id) in ids.iter().enumerate() {
        centrality.insert(id.clone(), accumulated[i] * sampled_scale * norm);
    }
    centrality
}

/// Deterministically sample `k` distinct indices from `0..n`.
fn sample_indices(n: usize, k: usize, seed: u64) -> Vec<usize> {
    let mut chosen = Vec::with_capacity(k);
    let mut state = seed;
    let mut seen = vec![false; n];
    while chosen.len() < k.min(n) {
        state = splitmix64(state);
        let candidate = (state % n as u64) as usize;
        if !seen[candidate] {
            seen[candidate] = true;
            chosen.push(candidate);
        }
    }
    chosen.sort_unstable();
    chosen
}

/// Closeness centrality using incoming shortest paths, with the
/// reachable-fraction improvement for disconnected graphs.
pub fn closeness_centrality(graph: &DependencyGraph) -> BTreeMap<EntityId, f64> {
    let ids = graph.node_ids();
    let n = ids.len();
    let index_of: HashMap<&str, usize> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    let predecessors: Vec<Vec<usize>> = ids
        .iter()
        .map(|id| {
            graph
                .predecessors(id)
                .iter()
                .filter_map(|p| index_of.get(p.as_str()).copied())
                .collect()
        })
        .collect();

    let mut centrality = BTreeMap::new();
    for (v, id) in ids.iter().enumerate() {
        // BFS over incoming edges gives distances *to* v.
        let mut dist = vec![-1i64; n];
        dist[v] = 0;
        let mut queue = VecDeque::new();
        queue.push_back(v);
        let mut total = 0i64;
        let mut reachable = 0i64;
        while let Some(u) = queue.pop_front() {
            for &p in &predecessors[u] {
                if dist[p] < 0 {
                    dist[p] = dist[u] + 1;
                    total += dist[p];
                    reachable += 1;
                    queue.push_back(p);
                }
            }
        }

        let value = if total > 0 && n > 1 {
            let r = reachable as f64;
            (r / total as f64) * (r / (n - 1) as f64)
        } else {
            0.0
        };
        centrality.insert(id.clone(), value);
    }
    centrality
}

/// Eigenvector centrality via power iteration on incoming edges. Returns
/// `None` when the iteration fails to converge within `max_iter`.
pub fn eigenvector_centrality(
    graph: &DependencyGraph,
    max_iter: usize,
    tolerance: f64,
) -> Option<BTreeMap<EntityId, f64>> {
    let ids = graph.node_ids();
    let n = ids.len();
    if n == 0 {
        return Some(BTreeMap::new());
    }
    let index_of: HashMap<&str, usize> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    let predecessors: Vec<Vec<usize>> = ids
        .iter()
        .map(|id| {
            graph
                .predecessors(id)
                .iter()
                .filter_map(|p| index_of.get(p.as_str()).copied())
                .collect()
        })
        .collect();

    let mut x = vec![1.0 / n as f64; n];
    for _ in 0..max_iter {
        let mut next = vec![0.0f64; n];
        for (i, preds) in predecessors.iter().enumerate() {
            next[i] = x[i] + preds.iter().map(|&p| x[p]).sum::<f64>();
        }
        let norm = next.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm <= f64::EPSILON {
            return None;
        }
        for v in next.iter_mut() {
            *v /= norm;
        }
        let drift: f64 = next.iter().zip(&x).map(|(a, b)| (a - b).abs()).sum();
        x = next;
        if drift < n as f64 * tolerance {
            return Some(ids.into_iter().zip(x).collect());
        }
    }
    None
}

/// Compute the full per-node metric bundle for a graph.
pub fn compute_node_metrics(
    graph: &DependencyGraph,
    seed: u64,
) -> BTreeMap<EntityId, NodeMetrics> {
    let betweenness = betweenness_centrality(graph, seed, DEFAULT_CENTRALITY_SAMPLES);
    let closeness = closeness_centrality(graph);
    let eigenvector = eigenvector_centrality(graph, 1000, 1e-6).unwrap_or_default();

    let n = graph.node_count().max(1);
    let mut scc_size: BTreeMap<EntityId, usize> = BTreeMap::new();
    for component in graph.strongly_connected_components() {
        for id in &component {
            scc_size.insert(id.clone(), component.len());
        }
    }

    graph
        .node_ids()
        .into_iter()
        .map(|id| {
            let size = scc_size.get(&id).copied().unwrap_or(1);
            let metrics = NodeMetrics {
                betweenness: betweenness.get(&id).copied().unwrap_or(0.0),
                closeness: closeness.get(&id).copied().unwrap_or(0.0),
                eigenvector: eigenvector.get(&id).copied().unwrap_or(0.0),
                fan_in: graph.in_degree(&id) as f64,
                fan_out: graph.out_degree(&id) as f64,
                in_cycle: if size > 1 { 1.0 } else { 0.0 },
                cycle_size: if size > 1 { size as f64 / n as f64 } else { 0.0 },
            };
            (id, metrics)
        })
        .collect()
}

static FEATURES: Lazy<Vec<FeatureDefinition>> = Lazy::new(|| {
    vec![
        FeatureDefinition::new("betweenness_approx", "Approximate betweenness centrality")
            .with_range(0.0, 1.0),
        FeatureDefinition::new("fan_in", "Number of incoming dependencies")
            .with_range(0.0, 10_000.0),
        FeatureDefinition::new("fan_out", "Number of outgoing dependencies")
            .with_range(0.0, 10_000.0),
        FeatureDefinition::new("closeness", "Closeness centrality").with_range(0.0, 1.0),
        FeatureDefinition::new("eigenvector", "Eigenvector centrality").with_range(0.0, 1.0),
        FeatureDefinition::new("in_cycle", "Entity participates in a dependency cycle")
            .with_range(0.0, 1.0),
        FeatureDefinition::new("cycle_size", "SCC size relative to the whole graph")
            .with_range(0.0, 1.0),
    ]
});

/// Extractor for graph-based features. The import graph is preferred; the
/// call graph is consulted only when the entity is absent from it.
pub struct GraphExtractor {
    seed: u64,
    cache: Mutex<HashMap<u64, Arc<BTreeMap<EntityId, NodeMetrics>>>>,
}

impl Default for GraphExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphExtractor {
    /// Create the extractor with the default deterministic seed
    pub fn new() -> Self {
        Self {
            seed: DEFAULT_SEED,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Override the sampling seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn metrics_for(&self, graph: &DependencyGraph) -> Arc<BTreeMap<EntityId, NodeMetrics>> {
        let fingerprint = graph.fingerprint();
        let mut cache = self.cache.lock();
        cache
            .entry(fingerprint)
            .or_insert_with(|| Arc::new(compute_node_metrics(graph, self.seed)))
            .clone()
    }
}

#[async_trait]
impl FeatureExtractor for GraphExtractor {
    fn name(&self) -> &str {
        "graph"
    }

    fn features(&self) -> &[FeatureDefinition] {
        &FEATURES
    }

    async fn extract(
        &self,
        entity: &CodeEntity,
        context: &ExtractionContext,
    ) -> Result<FeatureMap> {
        let index = &context.index;

        // Import graph first; call graph only for ids the import graph lacks.
        let graph = if index.import_graph.contains(&entity.id) {
            Some(&index.import_graph)
        } else {
            index
                .call_graph
                .as_ref()
                .filter(|call_graph| call_graph.contains(&entity.id))
        };

        let Some(graph) = graph else {
            return Ok(self.default_features());
        };

        let metrics = self.metrics_for(graph);
        let node = metrics.get(&entity.id).cloned().unwrap_or_default();

        let mut features = FeatureMap::new();
        features.insert("betweenness_approx".to_string(), node.betweenness);
        features.insert("fan_in".to_string(), node.fan_in);
        features.insert("fan_out".to_string(), node.fan_out);
        features.insert("closeness".to_string(), node.closeness);
        features.insert("eigenvector".to_string(), node.eigenvector);
        features.insert("in_cycle".to_string(), node.in_cycle);
        features.insert("cycle_size".to_string(), node.cycle_size);
        Ok(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ValknutConfig;
    use crate::core::entities::{EntityKind, ParseIndex, SourceLocation};

    fn triangle() -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");
        graph.add_edge("c", "a");
        graph
    }

    #[test]
    fn triangle_nodes_are_all_in_cycle() {
        let metrics = compute_node_metrics(&triangle(), DEFAULT_SEED);
        for id in ["a", "b", "c"] {
            let node = &metrics[id];
            assert_eq!(node.in_cycle, 1.0);
            approx::assert_relative_eq!(node.cycle_size, 1.0);
            assert_eq!(node.fan_in, 1.0);
            assert_eq!(node.fan_out, 1.0);
        }
    }

    #[test]
    fn path_midpoint_has_highest_betweenness() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");
        let centrality = betweenness_centrality(&graph, DEFAULT_SEED, DEFAULT_CENTRALITY_SAMPLES);
        assert!(centrality["b"] > centrality["a"]);
        assert!(centrality["b"] > centrality["c"]);
    }

    #[test]
    fn betweenness_is_deterministic_on_large_graphs() {
        let mut graph = DependencyGraph::new();
        for i in 0..40 {
            graph.add_edge(&format!("n{i}"), &format!("n{}", (i + 1) % 40));
            graph.add_edge(&format!("n{i}"), &format!("n{}", (i * 7 + 3) % 40));
        }
        let first = betweenness_centrality(&graph, DEFAULT_SEED, DEFAULT_CENTRALITY_SAMPLES);
        let second = betweenness_centrality(&graph, DEFAULT_SEED, DEFAULT_CENTRALITY_SAMPLES);
        assert_eq!(first, second);

        // The configured sample budget changes the estimate, not the
        // determinism.
        let capped = betweenness_centrality(&graph, DEFAULT_SEED, 4);
        assert_eq!(capped, betweenness_centrality(&graph, DEFAULT_SEED, 4));
    }

    #[test]
    fn eigenvector_converges_on_symmetric_cycle() {
        let centrality = eigenvector_centrality(&triangle(), 1000, 1e-6).unwrap();
        approx::assert_relative_eq!(centrality["a"], centrality["b"], epsilon = 1e-6);
        approx::assert_relative_eq!(centrality["b"], centrality["c"], epsilon = 1e-6);
    }

    #[test]
    fn closeness_rewards_reachable_nodes() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "c");
        graph.add_edge("b", "c");
        graph.add_node("d");
        let closeness = closeness_centrality(&graph);
        assert!(closeness["c"] > 0.0);
        assert_eq!(closeness["d"], 0.0);
    }

    #[tokio::test]
    async fn extractor_prefers_import_graph() {
        let mut index = ParseIndex::new("python");
        for path in ["a.py", "b.py", "c.py"] {
            index.add_entity(CodeEntity::new(
                format!("python://{path}"),
                path,
                EntityKind::File,
                SourceLocation {
                    file_path: path.to_string(),
                    start_line: 1,
                    end_line: 10,
                    start_column: 0,
                    end_column: 0,
                },
                "python",
            ));
        }
        index.import_graph.add_edge("python://a.py", "python://b.py");
        index.import_graph.add_edge("python://b.py", "python://c.py");
        index.import_graph.add_edge("python://c.py", "python://a.py");

        let entity = index.get_entity("python://a.py").unwrap().clone();
        let context = ExtractionContext::new(
            Arc::new(ValknutConfig::default()),
            Arc::new(index),
        );
        let extractor = GraphExtractor::new();
        let features = extractor.extract(&entity, &context).await.unwrap();
        assert_eq!(features["in_cycle"], 1.0);
        assert_eq!(features["cycle_size"], 1.0);
        assert_eq!(features["fan_in"], 1.0);
    }

    #[tokio::test]
    async fn unknown_entity_gets_defaults() {
        let index = ParseIndex::new("python");
        let entity = CodeEntity::new(
            "python://lost.py",
            "lost.py",
            EntityKind::File,
            SourceLocation {
                file_path: "lost.py".to_string(),
                start_line: 1,
                end_line: 1,
                start_column: 0,
                end_column: 0,
            },
            "python",
        );
        let context = ExtractionContext::new(
            Arc::new(ValknutConfig::default()),
            Arc::new(index),
        );
        let extractor = GraphExtractor::new();
        let features = extractor.extract(&entity, &context).await.unwrap();
        assert_eq!(features["fan_in"], 0.0);
        assert_eq!(features["in_cycle"], 0.0);
    }
}
