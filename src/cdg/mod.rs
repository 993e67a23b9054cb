//! Control Dependence Graph construction
//!
//! One Block node per CFG node plus a single Entry. An edge `u -> v`
//! records that executing `v` is controlled by the branch taken at `u`.
//! The construction is the Ferrante–Ottenstein–Warren walk over the
//! post-dominator tree and is generic over the CFG's node and edge
//! weights, so it serves both the source-level CFG and the low-level
//! block CFG.

pub mod post_dominators;

pub use post_dominators::PostDominatorTree;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, HashSet};

/// A CDG node: the synthetic entry, or a stand-in for one CFG node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdgNode {
    Entry,
    Block(NodeIndex),
}

/// A populated control dependence graph. Edges carry no payload; there is
/// only one kind of control dependence.
#[derive(Debug, Clone)]
pub struct Cdg {
    graph: DiGraph<CdgNode, ()>,
    entry: NodeIndex,
    blocks: HashMap<NodeIndex, NodeIndex>,
}

impl Cdg {
    pub fn graph(&self) -> &DiGraph<CdgNode, ()> {
        &self.graph
    }

    pub fn entry(&self) -> NodeIndex {
        self.entry
    }

    /// CDG node standing in for the given CFG node.
    pub fn node_of(&self, cfg_node: NodeIndex) -> Option<NodeIndex> {
        self.blocks.get(&cfg_node).copied()
    }

    /// Control dependences as `(controller, dependent)` pairs of CDG nodes.
    pub fn dependences(&self) -> impl Iterator<Item = (NodeIndex, NodeIndex)> + '_ {
        self.graph.edge_references().map(|e| (e.source(), e.target()))
    }

    pub fn size(&self) -> usize {
        self.graph.node_count()
    }
}

/// Build the CDG of `cfg` starting from its entry node.
///
/// For every CFG edge `u -> v` where `v` does not post-dominate `u`, the
/// nodes on the post-dominator path from `v` up to (exclusive) the
/// immediate post-dominator of `u` become control-dependent on `u`. Entry
/// dependences cover the path from the CFG entry up to the virtual root.
pub fn build_cdg<N, E>(cfg: &StableDiGraph<N, E>, entry: NodeIndex) -> Cdg {
    let pdt = PostDominatorTree::new(cfg);

    let mut graph = DiGraph::new();
    let entry_node = graph.add_node(CdgNode::Entry);
    let mut blocks = HashMap::new();
    for n in cfg.node_indices() {
        blocks.insert(n, graph.add_node(CdgNode::Block(n)));
    }

    let mut seen: HashSet<(NodeIndex, NodeIndex)> = HashSet::new();
    let mut edges: Vec<(NodeIndex, NodeIndex)> = Vec::new();
    let mut record = |src: NodeIndex, tgt: NodeIndex| {
        if seen.insert((src, tgt)) {
            edges.push((src, tgt));
        }
    };

    // The entry depends on nothing; everything on its post-dominator
    // chain executes unconditionally.
    let mut w = if pdt.contains(entry) { Some(entry) } else { None };
    while let Some(x) = w {
        record(entry_node, blocks[&x]);
        w = pdt.idom(x);
    }

    for u in cfg.node_indices() {
        let stop = pdt.idom(u);
        for e in cfg.edges(u) {
            let v = e.target();
            if !pdt.contains(v) {
                continue;
            }
            let mut w = Some(v);
            while w != stop {
                let Some(x) = w else { break };
                record(blocks[&u], blocks[&x]);
                w = pdt.idom(x);
            }
        }
    }

    for (src, tgt) in edges {
        graph.add_edge(src, tgt, ());
    }
    tracing::trace!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "control dependence graph built"
    );

    Cdg {
        graph,
        entry: entry_node,
        blocks,
    }
}
