//! Node simplification: merging register def-use chains
//!
//! A node with exactly one outgoing def-use edge merges into its target
//! when the target has that node as its only non-control predecessor, is
//! not control-dependent on a real branch (entry dependences state
//! unconditional execution and do not pin a node), and no edge runs back
//! from target to source. Merging concatenates the instructions in
//! program order into a multi-instruction node and retargets the
//! remaining edges. Running the pass twice is a no-op.

use crate::pdg::{Pdg, PdgEdge, PdgNode};
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::VecDeque;

impl Pdg {
    /// Merge def-use chains until no candidate remains.
    pub fn simplify(&mut self) {
        let mut work: VecDeque<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&n| self.is_merge_candidate(n))
            .collect();

        let mut merged = 0usize;
        while let Some(n) = work.pop_front() {
            if self.graph.node_weight(n).is_none() || !self.is_merge_candidate(n) {
                continue;
            }
            let Some(target) = self.single_def_use_target(n) else {
                continue;
            };
            if !self.merge_allowed(n, target) {
                continue;
            }

            self.merge_into(n, target, &mut work);
            merged += 1;
            work.push_back(target);
        }
        if merged > 0 {
            tracing::debug!(merged, "simplification merged def-use chains");
        }
    }

    /// Candidate sources carry exactly one outgoing register def-use
    /// edge; other outgoing edge kinds do not disqualify them.
    fn is_merge_candidate(&self, n: NodeIndex) -> bool {
        match self.graph.node_weight(n) {
            Some(PdgNode::SingleInstruction(_)) | Some(PdgNode::MultiInstruction(_)) => {}
            _ => return false,
        }
        self.graph
            .edges(n)
            .filter(|e| e.weight().is_def_use())
            .count()
            == 1
    }

    fn single_def_use_target(&self, n: NodeIndex) -> Option<NodeIndex> {
        self.graph
            .edges(n)
            .find(|e| e.weight().is_def_use())
            .map(|e| e.target())
    }

    fn merge_allowed(&self, n: NodeIndex, target: NodeIndex) -> bool {
        if n == target {
            return false;
        }
        match self.graph.node_weight(target) {
            Some(PdgNode::SingleInstruction(_)) | Some(PdgNode::MultiInstruction(_)) => {}
            _ => return false,
        }
        // Control-dependent nodes never merge into their predecessor.
        // Control edges from the graph entry only state that the node
        // executes unconditionally and do not pin it.
        let mut non_control_preds: Vec<NodeIndex> = Vec::new();
        for e in self.graph.edges_directed(target, Direction::Incoming) {
            if e.weight().is_control() {
                if e.source() != self.entry() {
                    return false;
                }
                continue;
            }
            if !non_control_preds.contains(&e.source()) {
                non_control_preds.push(e.source());
            }
        }
        if non_control_preds != [n] {
            return false;
        }
        // Any edge running back would close a cycle inside one node.
        self.graph.find_edge(target, n).is_none()
    }

    fn merge_into(&mut self, n: NodeIndex, target: NodeIndex, work: &mut VecDeque<NodeIndex>) {
        let n_insts = self.graph[n].instructions();
        let t_insts = self.graph[target].instructions();
        let merged = if self.ordinal_of(n) <= self.ordinal_of(target) {
            n_insts.into_iter().chain(t_insts).collect()
        } else {
            t_insts.into_iter().chain(n_insts).collect()
        };
        let new_ordinal = self.ordinal_of(n).min(self.ordinal_of(target));
        *self
            .graph
            .node_weight_mut(target)
            .expect("merge target is live") = PdgNode::MultiInstruction(merged);
        self.ordinals.insert(target, new_ordinal);

        let incoming: Vec<(NodeIndex, PdgEdge)> = self
            .graph
            .edges_directed(n, Direction::Incoming)
            .map(|e| (e.source(), e.weight().clone()))
            .collect();
        let outgoing: Vec<(NodeIndex, PdgEdge)> = self
            .graph
            .edges(n)
            .map(|e| (e.target(), e.weight().clone()))
            .collect();
        self.graph.remove_node(n);
        self.ordinals.remove(&n);

        for (src, w) in incoming {
            if src != target {
                self.add_edge_dedup(src, target, w);
                work.push_back(src);
            }
        }
        for (tgt, w) in outgoing {
            // Edges into the target become internal and disappear.
            if tgt != target {
                self.add_edge_dedup(target, tgt, w);
            }
        }
    }

    /// Add an edge unless one of the same kind already joins the pair.
    fn add_edge_dedup(&mut self, src: NodeIndex, tgt: NodeIndex, edge: PdgEdge) {
        let duplicate = self
            .graph
            .edges_connecting(src, tgt)
            .any(|e| e.weight().same_kind(&edge));
        if !duplicate {
            self.graph.add_edge(src, tgt, edge);
        }
    }
}
