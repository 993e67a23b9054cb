//! Post-dominator tree construction and queries
//!
//! A node d post-dominates node n if every path from n to an exit must go
//! through d. Computed by running the dominance algorithm on the reversed
//! CFG, rooted at a virtual node adjacent to every real exit so functions
//! with several exits still get a single tree. The virtual root never
//! appears in query results.

use petgraph::algo::dominators::simple_fast;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::{EdgeRef, IntoEdgeReferences, Reversed};
use std::collections::HashMap;

/// Post-dominator tree over an arbitrary CFG.
///
/// Generic over the CFG's node and edge weights: only the structure is
/// consulted. Nodes that cannot reach any exit are absent from the tree.
#[derive(Debug, Clone)]
pub struct PostDominatorTree {
    /// Immediate post-dominator; None means the parent is the virtual root.
    idom: HashMap<NodeIndex, Option<NodeIndex>>,
    children: HashMap<NodeIndex, Vec<NodeIndex>>,
    /// Children of the virtual root: the real exit nodes.
    roots: Vec<NodeIndex>,
}

impl PostDominatorTree {
    /// Build the tree for `graph`. Exits are the nodes without outgoing
    /// edges; when there are none (an endless loop) the tree is empty.
    pub fn new<N, E>(graph: &StableDiGraph<N, E>) -> Self {
        // Compact copy with a virtual root appended; stable graphs may
        // have index holes after node removal.
        let mut inner: DiGraph<(), ()> = DiGraph::new();
        let mut to_inner: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut from_inner: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        for n in graph.node_indices() {
            let i = inner.add_node(());
            to_inner.insert(n, i);
            from_inner.insert(i, n);
        }
        for e in graph.edge_references() {
            inner.add_edge(to_inner[&e.source()], to_inner[&e.target()], ());
        }
        let exits: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|&n| graph.edges(n).next().is_none())
            .collect();
        let virt = inner.add_node(());
        for &x in &exits {
            inner.add_edge(to_inner[&x], virt, ());
        }

        let dominators = simple_fast(Reversed(&inner), virt);

        let mut idom = HashMap::new();
        let mut children: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        let mut roots = Vec::new();
        for n in graph.node_indices() {
            match dominators.immediate_dominator(to_inner[&n]) {
                Some(p) if p == virt => {
                    idom.insert(n, None);
                    roots.push(n);
                }
                Some(p) => {
                    let parent = from_inner[&p];
                    idom.insert(n, Some(parent));
                    children.entry(parent).or_default().push(n);
                }
                // Cannot reach any exit: not in the tree.
                None => {}
            }
        }

        Self {
            idom,
            children,
            roots,
        }
    }

    /// Whether `node` participates in the tree (it can reach an exit).
    pub fn contains(&self, node: NodeIndex) -> bool {
        self.idom.contains_key(&node)
    }

    /// Immediate post-dominator; None for the real exit nodes (their
    /// parent is the hidden virtual root) and for nodes outside the tree.
    pub fn idom(&self, node: NodeIndex) -> Option<NodeIndex> {
        self.idom.get(&node).copied().flatten()
    }

    /// The real exit nodes, i.e. the children of the virtual root.
    pub fn roots(&self) -> &[NodeIndex] {
        &self.roots
    }

    /// Nodes immediately post-dominated by `node`.
    pub fn children(&self, node: NodeIndex) -> &[NodeIndex] {
        self.children.get(&node).map_or(&[], |v| v.as_slice())
    }

    /// Check if `a` post-dominates `b`. Every node post-dominates itself.
    pub fn post_dominates(&self, a: NodeIndex, b: NodeIndex) -> bool {
        if a == b {
            return self.contains(a);
        }
        let mut cur = b;
        while let Some(p) = self.idom(cur) {
            if p == a {
                return true;
            }
            cur = p;
        }
        false
    }

    /// Path from the tree root down to `node`, both ends inclusive, the
    /// virtual root excluded.
    pub fn path_from_root(&self, node: NodeIndex) -> Vec<NodeIndex> {
        if !self.contains(node) {
            return Vec::new();
        }
        let mut path = vec![node];
        let mut cur = node;
        while let Some(p) = self.idom(cur) {
            path.push(p);
            cur = p;
        }
        path.reverse();
        path
    }

    /// Depth below the virtual root: exit nodes have depth 0.
    pub fn depth(&self, node: NodeIndex) -> usize {
        let mut depth = 0;
        let mut cur = node;
        while let Some(p) = self.idom(cur) {
            depth += 1;
            cur = p;
        }
        depth
    }
}
