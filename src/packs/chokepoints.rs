//! Chokepoint detection: high-betweenness nodes bridging graph communities.

use crate::core::bayesian::DEFAULT_SEED;
use crate::core::entities::DependencyGraph;
use crate::detectors::graph::betweenness_centrality;
use crate::packs::{ChokepointPack, PackEffort, PackValue};

/// Minimum centrality for a node to count as a chokepoint.
const CENTRALITY_THRESHOLD: f64 = 0.05;

/// Builds [`ChokepointPack`]s for the top-centrality nodes of a graph.
pub struct ChokepointDetector {
    centrality_samples: usize,
    top_n: usize,
}

impl ChokepointDetector {
    /// Create a detector; `top_n` defaults to 3
    pub fn new(centrality_samples: usize) -> Self {
        Self {
            centrality_samples,
            top_n: 3,
        }
    }

    /// Override the minimum candidate count
    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    /// Build packs for the top 5% of nodes — at least `top_n` — whose
    /// centrality clears the threshold.
    pub fn build_chokepoint_packs(&self, graph: &DependencyGraph) -> Vec<ChokepointPack> {
        let centrality = betweenness_centrality(graph, DEFAULT_SEED, self.centrality_samples);

        let mut sorted: Vec<(&String, &f64)> = centrality.iter().collect();
        sorted.sort_by(|a, b| {
            b.1.partial_cmp(a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });

        let percentile_count = (sorted.len() as f64 * 0.05) as usize;
        let candidate_count = percentile_count.max(self.top_n);

        let mut packs = Vec::new();
        for (index, (node, &score)) in sorted.iter().take(candidate_count).enumerate() {
            if score <= CENTRALITY_THRESHOLD {
                continue;
            }

            let mut neighbors: std::collections::BTreeSet<String> =
                graph.predecessors(node.as_str()).into_iter().collect();
            neighbors.extend(graph.successors(node.as_str()));
            let neighbor_count = neighbors.len();

            let community_count = (neighbor_count / 3).min(5);
            let affected_communities = (0..community_count)
                .map(|i| format!("community_{i}"))
                .collect();

            packs.push(ChokepointPack {
                pack_id: format!("chokepointpack:HUB{index}"),
                chokepoint_node: (*node).clone(),
                affected_communities,
                value: PackValue {
                    cross_community_edges_reduced: Some(neighbor_count / 2),
                    ..PackValue::default()
                },
                effort: PackEffort {
                    modules_touched: Some(1),
                    imports_to_rehome_est: Some(neighbor_count),
                    ..PackEffort::default()
                },
                steps: vec![
                    format!("Split {node} into focused modules by responsibility."),
                    "Extract interfaces for cross-cutting concerns.".to_string(),
                    "Move shared utilities to dedicated common layer.".to_string(),
                ],
                explanations: vec![format!(
                    "High-centrality node ({score:.3}) with {neighbor_count} dependencies - \
                     splitting reduces coupling and improves testability."
                )],
            });
        }
        packs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A star-through graph: every `inN` reaches every `outN` through `hub`.
    fn hub_graph() -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for i in 0..4 {
            graph.add_edge(&format!("in{i}"), "hub");
            graph.add_edge("hub", &format!("out{i}"));
        }
        graph
    }

    #[test]
    fn hub_node_becomes_a_chokepoint() {
        let graph = hub_graph();
        let packs = ChokepointDetector::new(64).build_chokepoint_packs(&graph);

        assert!(!packs.is_empty());
        assert_eq!(packs[0].chokepoint_node, "hub");
        assert_eq!(packs[0].value.cross_community_edges_reduced, Some(4));
        assert_eq!(packs[0].effort.imports_to_rehome_est, Some(8));
        assert_eq!(packs[0].affected_communities.len(), 2);
    }

    #[test]
    fn low_centrality_graphs_produce_no_packs() {
        let mut graph = DependencyGraph::new();
        graph.add_edge("a", "b");
        let packs = ChokepointDetector::new(64).build_chokepoint_packs(&graph);
        assert!(packs.is_empty());
    }

    #[test]
    fn pack_count_is_bounded_by_top_n() {
        let graph = hub_graph();
        let packs = ChokepointDetector::new(64)
            .with_top_n(1)
            .build_chokepoint_packs(&graph);
        assert!(packs.len() <= 1);
    }

    #[test]
    fn top_five_percent_extends_past_top_n() {
        // An 80-node chain: the 5% percentile admits 4 candidates, one more
        // than the top-n floor, and every mid-chain node has centrality far
        // above the threshold.
        let mut graph = DependencyGraph::new();
        for i in 0..79 {
            graph.add_edge(&format!("n{i:02}"), &format!("n{:02}", i + 1));
        }

        let packs = ChokepointDetector::new(64).build_chokepoint_packs(&graph);
        assert_eq!(packs.len(), 4);
    }
}
