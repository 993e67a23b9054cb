//! Shared helpers over petgraph graphs
//!
//! All graphs in this crate are petgraph directed multigraphs; the builders
//! that remove nodes (SCFG label patching, PDG simplification and pi-block
//! formation) use `StableDiGraph` so indices stay valid across removals.
//! This module collects the small queries every builder needs: edge lookup
//! between a pair of nodes, predecessor enumeration and SCC iteration.

use petgraph::graph::NodeIndex;
use petgraph::stable_graph::{EdgeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

/// All edge indices connecting `src` to `tgt` (parallel edges included),
/// in outgoing-adjacency order.
pub fn edges_between<N, E>(
    graph: &StableDiGraph<N, E>,
    src: NodeIndex,
    tgt: NodeIndex,
) -> Vec<EdgeIndex> {
    graph.edges_connecting(src, tgt).map(|e| e.id()).collect()
}

/// Check whether at least one `src -> tgt` edge exists.
pub fn has_edge<N, E>(graph: &StableDiGraph<N, E>, src: NodeIndex, tgt: NodeIndex) -> bool {
    graph.find_edge(src, tgt).is_some()
}

/// Distinct predecessor nodes of `node`, deduplicated.
pub fn predecessors<N, E>(graph: &StableDiGraph<N, E>, node: NodeIndex) -> Vec<NodeIndex> {
    let mut preds: Vec<NodeIndex> = graph
        .neighbors_directed(node, Direction::Incoming)
        .collect();
    preds.sort_unstable();
    preds.dedup();
    preds
}

/// Non-trivial strongly connected components (size >= 2) of the graph.
///
/// A single node with a self-loop is a trivial SCC and is not reported.
/// Components are returned in reverse topological order (Tarjan).
pub fn non_trivial_sccs<N, E>(graph: &StableDiGraph<N, E>) -> Vec<Vec<NodeIndex>> {
    petgraph::algo::tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() >= 2)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle_graph() -> StableDiGraph<&'static str, ()> {
        // a -> b -> c -> b, c -> d, d -> d (self loop)
        let mut g = StableDiGraph::new();
        let a = g.add_node("a");
        let b = g.add_node("b");
        let c = g.add_node("c");
        let d = g.add_node("d");
        g.add_edge(a, b, ());
        g.add_edge(b, c, ());
        g.add_edge(c, b, ());
        g.add_edge(c, d, ());
        g.add_edge(d, d, ());
        g
    }

    #[test]
    fn test_edges_between_parallel() {
        let mut g: StableDiGraph<(), u32> = StableDiGraph::new();
        let a = g.add_node(());
        let b = g.add_node(());
        g.add_edge(a, b, 1);
        g.add_edge(a, b, 2);
        assert_eq!(edges_between(&g, a, b).len(), 2);
        assert!(edges_between(&g, b, a).is_empty());
    }

    #[test]
    fn test_has_edge() {
        let g = cycle_graph();
        let nodes: Vec<_> = g.node_indices().collect();
        assert!(has_edge(&g, nodes[0], nodes[1]));
        assert!(!has_edge(&g, nodes[1], nodes[0]));
    }

    #[test]
    fn test_predecessors_dedup() {
        let mut g: StableDiGraph<(), ()> = StableDiGraph::new();
        let a = g.add_node(());
        let b = g.add_node(());
        g.add_edge(a, b, ());
        g.add_edge(a, b, ());
        assert_eq!(predecessors(&g, b), vec![a]);
    }

    #[test]
    fn test_non_trivial_sccs_excludes_self_loop() {
        let g = cycle_graph();
        let sccs = non_trivial_sccs(&g);
        // {b, c} is the only non-trivial SCC; d's self-loop does not count.
        assert_eq!(sccs.len(), 1);
        assert_eq!(sccs[0].len(), 2);
    }

    #[test]
    fn test_sccs_survive_node_removal() {
        let mut g = cycle_graph();
        let a = g.node_indices().next().unwrap();
        g.remove_node(a);
        let sccs = non_trivial_sccs(&g);
        assert_eq!(sccs.len(), 1);
        assert_eq!(sccs[0].len(), 2);
    }
}
