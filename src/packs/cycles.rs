//! Cycle cutting: greedy feedback-vertex-set approximation over import-graph
//! strongly connected components.

use crate::core::bayesian::DEFAULT_SEED;
use crate::core::entities::{DependencyGraph, EntityId};
use crate::detectors::graph::betweenness_centrality;
use crate::packs::{CyclePack, PackEffort, PackValue};

/// Upper bound on cut iterations; pathological graphs terminate gracefully.
const MAX_CUT_ITERATIONS: usize = 100;

/// Cap on the rehomed-imports effort estimate.
const MAX_IMPORTS_TO_REHOME: usize = 20;

/// Builds [`CyclePack`]s from the composed import graph.
pub struct CycleCutter {
    centrality_samples: usize,
}

impl CycleCutter {
    /// Create a cutter with the configured sampling budget
    pub fn new(centrality_samples: usize) -> Self {
        Self { centrality_samples }
    }

    /// Build one pack per SCC with more than one member.
    pub fn build_cycle_packs(&self, graph: &DependencyGraph) -> Vec<CyclePack> {
        let mut packs = Vec::new();
        let sccs: Vec<Vec<EntityId>> = graph
            .strongly_connected_components()
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .collect();

        for (index, scc) in sccs.iter().enumerate() {
            let cut_nodes = find_minimal_cut(graph, scc, self.centrality_samples);
            if cut_nodes.is_empty() {
                continue;
            }

            let cycles_removed = cut_nodes.len() * 2;
            let scc_count_delta = cut_nodes.len() as i64 - 1;
            let avg_path_len_delta = (0.1 * cut_nodes.len() as f64).min(0.5);

            let imports_to_rehome: usize = cut_nodes
                .iter()
                .map(|node| graph.in_degree(node) + graph.out_degree(node))
                .sum::<usize>()
                .min(MAX_IMPORTS_TO_REHOME);

            let primary = &cut_nodes[0];
            let mut steps = vec![
                format!("Extract interface or facade for functionality in {primary}."),
                "Invert dependencies to use the interface instead of direct imports.".to_string(),
            ];
            if cut_nodes.len() > 1 {
                steps.push("Move shared utilities to common module if needed.".to_string());
            }

            packs.push(CyclePack {
                pack_id: format!("cyclepack:SCC{index}"),
                scc_members: scc.clone(),
                value: PackValue {
                    cycles_removed: Some(cycles_removed),
                    scc_count_delta: Some(scc_count_delta),
                    avg_path_len_delta: Some(avg_path_len_delta),
                    ..PackValue::default()
                },
                effort: PackEffort {
                    modules_touched: Some(cut_nodes.len()),
                    imports_to_rehome_est: Some(imports_to_rehome),
                    ..PackEffort::default()
                },
                steps,
                explanations: vec![format!(
                    "Cutting {primary} breaks circular dependency in {}-node SCC and improves modularity.",
                    scc.len()
                )],
                cut_nodes,
            });
        }
        packs
    }
}

/// Greedy feedback vertex set: repeatedly remove the node with the highest
/// `0.5·betweenness + 0.3·degree + 0.2·boundary_edges` score until the
/// subgraph is acyclic, bounded at [`MAX_CUT_ITERATIONS`]. `centrality_samples`
/// caps the sampled-betweenness budget on large components.
pub fn find_minimal_cut(
    full_graph: &DependencyGraph,
    scc: &[EntityId],
    centrality_samples: usize,
) -> Vec<EntityId> {
    let mut remaining = full_graph.subgraph(scc);
    let mut cut_nodes = Vec::new();

    for _ in 0..MAX_CUT_ITERATIONS {
        if !remaining.has_cycle() || remaining.node_count() == 0 {
            break;
        }

        let betweenness = betweenness_centrality(&remaining, DEFAULT_SEED, centrality_samples);
        let mut best: Option<(EntityId, f64)> = None;
        for node in remaining.node_ids() {
            let degree = (remaining.in_degree(&node) + remaining.out_degree(&node)) as f64;
            let boundary = boundary_edges(full_graph, scc, &node) as f64;
            let score = 0.5 * betweenness.get(&node).copied().unwrap_or(0.0)
                + 0.3 * degree
                + 0.2 * boundary;
            // Lexicographic tie-break keeps the cut deterministic.
            let better = match &best {
                None => true,
                Some((best_node, best_score)) => {
                    score > *best_score || (score == *best_score && node < *best_node)
                }
            };
            if better {
                best = Some((node, score));
            }
        }

        let Some((node, _)) = best else { break };
        remaining.remove_node(&node);
        cut_nodes.push(node);
    }

    cut_nodes
}

/// Edges crossing the original SCC boundary at a node.
fn boundary_edges(full_graph: &DependencyGraph, scc: &[EntityId], node: &str) -> usize {
    let inside: std::collections::HashSet<&str> = scc.iter().map(String::as_str).collect();
    let outgoing = full_graph
        .successors(node)
        .iter()
        .filter(|s| !inside.contains(s.as_str()))
        .count();
    let incoming = full_graph
        .predecessors(node)
        .iter()
        .filter(|p| !inside.contains(p.as_str()))
        .count();
    outgoing + incoming
}
