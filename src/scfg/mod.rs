//! Source Control Flow Graph over C-family statements
//!
//! Basic blocks hold ordered "node ops": native leaf statements, wrapper
//! ops carrying sub-expression leaves, and references that name an op
//! declared in another block. Service nodes mark the graph start, stop and
//! the synthetic entry inserted after population.

pub mod builder;

pub use builder::{build_scfg, ScfgBuilder};

use crate::error::Diagnostic;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::{Dfs, EdgeRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Stable identifier of a node op, unique within one SCFG.
pub type OpId = usize;

/// One operation inside a source basic block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeOp {
    /// A leaf statement rendered verbatim.
    Native { id: OpId, text: String },
    /// A statement with dedicated leaf ops for its side-effecting
    /// sub-expressions, in evaluation order.
    Wrapper {
        id: OpId,
        text: String,
        leaves: Vec<NodeOp>,
    },
    /// A named back-reference to an op that lives in another block.
    Reference {
        id: OpId,
        target: OpId,
        name: String,
    },
}

impl NodeOp {
    pub fn id(&self) -> OpId {
        match self {
            NodeOp::Native { id, .. }
            | NodeOp::Wrapper { id, .. }
            | NodeOp::Reference { id, .. } => *id,
        }
    }

    fn kind_tag(&self) -> &'static str {
        match self {
            NodeOp::Native { .. } => "NATIVE",
            NodeOp::Wrapper { .. } => "WRAPPER",
            NodeOp::Reference { .. } => "REFERENCE",
        }
    }

    /// Render this op, prefixing the stable identifier when some
    /// reference elsewhere targets it.
    pub fn label(&self, referred: &HashSet<OpId>) -> String {
        let mut out = String::new();
        if referred.contains(&self.id()) {
            out.push_str(&format!("<ref_decl_op{}_{}_> - ", self.id(), self.kind_tag()));
        }
        match self {
            NodeOp::Native { text, .. } => out.push_str(text),
            NodeOp::Wrapper { text, leaves, .. } => {
                for leaf in leaves {
                    out.push_str(&leaf.label(referred));
                    out.push_str("; ");
                }
                out.push_str(text);
            }
            NodeOp::Reference { target, name, .. } => {
                out.push_str(&format!("<{}_op{}_REFERENCE_>", name, target));
            }
        }
        out
    }
}

/// Ordered op sequence owned by one default node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceBasicBlock {
    pub ops: Vec<NodeOp>,
}

impl SourceBasicBlock {
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn label(&self, referred: &HashSet<OpId>) -> String {
        self.ops
            .iter()
            .map(|op| op.label(referred))
            .collect::<Vec<_>>()
            .join("\\n")
    }
}

/// Service node roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceKind {
    Start,
    Stop,
    Entry,
}

/// An SCFG node: a basic block or a service marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScfgNode {
    Default(SourceBasicBlock),
    Service(ServiceKind),
}

impl ScfgNode {
    pub fn as_block(&self) -> Option<&SourceBasicBlock> {
        match self {
            ScfgNode::Default(b) => Some(b),
            ScfgNode::Service(_) => None,
        }
    }

    pub fn as_block_mut(&mut self) -> Option<&mut SourceBasicBlock> {
        match self {
            ScfgNode::Default(b) => Some(b),
            ScfgNode::Service(_) => None,
        }
    }

    pub fn label(&self, referred: &HashSet<OpId>) -> String {
        match self {
            ScfgNode::Default(block) => block.label(referred),
            ScfgNode::Service(ServiceKind::Start) => "START".to_string(),
            ScfgNode::Service(ServiceKind::Stop) => "STOP".to_string(),
            ScfgNode::Service(ServiceKind::Entry) => "ENTRY".to_string(),
        }
    }
}

/// Control flow edge kinds between source basic blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScfgEdge {
    Default,
    True,
    False,
    Continue,
    Break,
    ToCase,
}

impl ScfgEdge {
    /// Label for DOT visualization.
    pub fn dot_label(&self) -> &'static str {
        match self {
            ScfgEdge::Default => "",
            ScfgEdge::True => "T",
            ScfgEdge::False => "F",
            ScfgEdge::Continue => "continue",
            ScfgEdge::Break => "break",
            ScfgEdge::ToCase => "case",
        }
    }

    /// Color for DOT visualization.
    pub fn dot_color(&self) -> &'static str {
        match self {
            ScfgEdge::Default => "black",
            ScfgEdge::True => "green",
            ScfgEdge::False => "red",
            ScfgEdge::Continue => "blue",
            ScfgEdge::Break => "orange",
            ScfgEdge::ToCase => "purple",
        }
    }
}

pub type ScfgGraph = StableDiGraph<ScfgNode, ScfgEdge>;

/// A populated source control flow graph.
///
/// Owns exactly one Start and one Stop service node, and after population
/// an Entry node with `True -> Start` and `False -> Stop`. Ops referenced
/// from other blocks are tracked in `referred` so labels can advertise
/// their stable identifiers.
#[derive(Debug, Clone)]
pub struct Scfg {
    name: String,
    graph: ScfgGraph,
    start: NodeIndex,
    stop: NodeIndex,
    entry: Option<NodeIndex>,
    referred: HashSet<OpId>,
    preds: HashMap<NodeIndex, BTreeSet<NodeIndex>>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Scfg {
    pub fn new(name: impl Into<String>) -> Self {
        let mut graph = ScfgGraph::new();
        let start = graph.add_node(ScfgNode::Service(ServiceKind::Start));
        let stop = graph.add_node(ScfgNode::Service(ServiceKind::Stop));
        Self {
            name: name.into(),
            graph,
            start,
            stop,
            entry: None,
            referred: HashSet::new(),
            preds: HashMap::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &ScfgGraph {
        &self.graph
    }

    pub fn start(&self) -> NodeIndex {
        self.start
    }

    pub fn stop(&self) -> NodeIndex {
        self.stop
    }

    pub fn entry(&self) -> Option<NodeIndex> {
        self.entry
    }

    /// The node traversals should start from: Entry when present, else Start.
    pub fn entry_or_start(&self) -> NodeIndex {
        self.entry.unwrap_or(self.start)
    }

    pub fn referred_ops(&self) -> &HashSet<OpId> {
        &self.referred
    }

    pub fn mark_referred(&mut self, op: OpId) {
        self.referred.insert(op);
    }

    /// Allocate an empty default node.
    pub fn add_block(&mut self) -> NodeIndex {
        self.graph
            .add_node(ScfgNode::Default(SourceBasicBlock::default()))
    }

    pub fn bind(&mut self, src: NodeIndex, tgt: NodeIndex, kind: ScfgEdge) {
        self.graph.add_edge(src, tgt, kind);
    }

    pub fn push_op(&mut self, node: NodeIndex, op: NodeOp) {
        if let Some(block) = self.graph[node].as_block_mut() {
            block.ops.push(op);
        } else {
            debug_assert!(false, "push_op on a service node");
        }
    }

    pub fn ops_len(&self, node: NodeIndex) -> usize {
        self.graph[node].as_block().map_or(0, |b| b.len())
    }

    /// Insert the Entry service node with `True -> Start`, `False -> Stop`.
    pub fn emplace_entry(&mut self) -> NodeIndex {
        debug_assert!(self.entry.is_none(), "entry inserted twice");
        let entry = self.graph.add_node(ScfgNode::Service(ServiceKind::Entry));
        self.graph.add_edge(entry, self.start, ScfgEdge::True);
        self.graph.add_edge(entry, self.stop, ScfgEdge::False);
        self.entry = Some(entry);
        entry
    }

    /// Split `node` at op index `at`: ops `[at..]` move into a fresh
    /// default node, outgoing edges transfer to the new node, and the two
    /// halves are joined with a Default edge. Returns the new node.
    pub fn split_node(&mut self, node: NodeIndex, at: usize) -> NodeIndex {
        let tail = {
            let block = self.graph[node]
                .as_block_mut()
                .expect("split_node on a service node");
            block.ops.split_off(at)
        };
        let new = self
            .graph
            .add_node(ScfgNode::Default(SourceBasicBlock { ops: tail }));

        let out_edges: Vec<_> = self
            .graph
            .edges(node)
            .map(|e| (e.id(), e.target(), *e.weight()))
            .collect();
        for (id, tgt, kind) in out_edges {
            self.graph.remove_edge(id);
            self.graph.add_edge(new, tgt, kind);
        }
        self.graph.add_edge(node, new, ScfgEdge::Default);
        new
    }

    /// Merge `outgoing` into `absorb`: ops are concatenated and the
    /// outgoing edges of `outgoing` move to `absorb`. Refuses (returns
    /// false) when `outgoing` has predecessors other than `absorb` — the
    /// merge would leave their edges dangling.
    pub fn merge_nodes(&mut self, absorb: NodeIndex, outgoing: NodeIndex) -> bool {
        if absorb == outgoing {
            return false;
        }
        let has_foreign_pred = self
            .graph
            .neighbors_directed(outgoing, petgraph::Direction::Incoming)
            .any(|p| p != absorb);
        if has_foreign_pred {
            tracing::debug!(
                "merge of {:?} into {:?} refused: outgoing node has other predecessors",
                outgoing,
                absorb
            );
            return false;
        }
        if self.graph[absorb].as_block().is_none() || self.graph[outgoing].as_block().is_none() {
            return false;
        }

        let moved_ops = self.graph[outgoing]
            .as_block_mut()
            .map(|b| std::mem::take(&mut b.ops))
            .unwrap_or_default();
        let out_edges: Vec<_> = self
            .graph
            .edges(outgoing)
            .map(|e| (e.target(), *e.weight()))
            .collect();
        self.graph.remove_node(outgoing);
        if let Some(block) = self.graph[absorb].as_block_mut() {
            block.ops.extend(moved_ops);
        }
        for (tgt, kind) in out_edges {
            if tgt != outgoing {
                self.graph.add_edge(absorb, tgt, kind);
            }
        }
        true
    }

    /// Drop every node unreachable from Start. Service nodes survive.
    pub fn eliminate_unreachable(&mut self) {
        let mut reachable = HashSet::new();
        let mut dfs = Dfs::new(&self.graph, self.start);
        while let Some(n) = dfs.next(&self.graph) {
            reachable.insert(n);
        }
        let doomed: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|n| {
                !reachable.contains(n) && self.graph[*n].as_block().is_some()
            })
            .collect();
        for n in doomed {
            self.graph.remove_node(n);
        }
    }

    /// Rebuild the predecessor map used for inverse traversal.
    pub fn recalculate_pred_map(&mut self) {
        self.preds.clear();
        for e in self.graph.edge_indices() {
            if let Some((src, tgt)) = self.graph.edge_endpoints(e) {
                self.preds.entry(tgt).or_default().insert(src);
            }
        }
    }

    pub fn predecessors(&self, node: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.preds.get(&node).into_iter().flatten().copied()
    }

    /// Number of nodes currently in the graph.
    pub fn size(&self) -> usize {
        self.graph.node_count()
    }
}
