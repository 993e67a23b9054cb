//! Pi-block formation: collapsing non-trivial SCCs
//!
//! Every strongly connected component of size two or more becomes a
//! single pi-block node holding its members in program order. Edges
//! between members move inside the block; edges crossing the boundary
//! are coalesced per external peer and dependence class into one complex
//! edge whose handles record the absorbed originals together with the
//! member ordinals they attached to. Running the pass twice is a no-op:
//! after formation no non-trivial SCC remains among top-level nodes.

use crate::graph::non_trivial_sccs;
use crate::pdg::{
    DependenceClass, EdgeHandle, Pdg, PdgEdge, PdgNode, PiBlock, PiMember,
};
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;

impl Pdg {
    /// Collapse every non-trivial SCC into a pi-block. Consumes the
    /// ordinal map: it is cleared once all components are processed.
    pub fn form_pi_blocks(&mut self) {
        let sccs = non_trivial_sccs(&self.graph);
        for scc in sccs {
            self.form_one(scc);
        }
        self.ordinals.clear();
    }

    fn form_one(&mut self, mut members: Vec<NodeIndex>) {
        members.sort_by_key(|&n| self.ordinal_of(n));
        let position: HashMap<NodeIndex, usize> = members
            .iter()
            .enumerate()
            .map(|(i, &n)| (n, i))
            .collect();
        tracing::debug!(size = members.len(), "collapsing SCC into pi-block");

        // Detach the edges running between members.
        let mut internal_ids = Vec::new();
        for &m in &members {
            let mut ids: Vec<_> = self
                .graph
                .edges(m)
                .filter(|e| position.contains_key(&e.target()))
                .map(|e| e.id())
                .collect();
            ids.sort();
            internal_ids.extend(ids);
        }
        let mut internal_edges = Vec::new();
        for id in internal_ids {
            let (src, tgt) = self.graph.edge_endpoints(id).expect("edge endpoints");
            let weight = self.graph.remove_edge(id).expect("internal edge");
            internal_edges.push((position[&src], position[&tgt], weight));
        }
        internal_edges.sort_by_key(|&(s, t, _)| (s, t));

        // Absorb boundary edges, grouped per external peer and class.
        let mut incoming: Vec<(NodeIndex, DependenceClass, Vec<EdgeHandle>)> = Vec::new();
        let mut outgoing: Vec<(NodeIndex, DependenceClass, Vec<EdgeHandle>)> = Vec::new();
        for &m in &members {
            let mut in_ids: Vec<_> = self
                .graph
                .edges_directed(m, Direction::Incoming)
                .map(|e| (e.id(), e.source()))
                .collect();
            in_ids.sort_by_key(|&(id, _)| id);
            for (id, src) in in_ids {
                let weight = self.graph.remove_edge(id).expect("incoming edge");
                let handle = EdgeHandle {
                    source_ordinal: None,
                    target_ordinal: Some(position[&m]),
                    edge: weight,
                };
                Self::group_push(&mut incoming, src, handle);
            }
            let mut out_ids: Vec<_> = self
                .graph
                .edges(m)
                .map(|e| (e.id(), e.target()))
                .collect();
            out_ids.sort_by_key(|&(id, _)| id);
            for (id, tgt) in out_ids {
                let weight = self.graph.remove_edge(id).expect("outgoing edge");
                let handle = EdgeHandle {
                    source_ordinal: Some(position[&m]),
                    target_ordinal: None,
                    edge: weight,
                };
                Self::group_push(&mut outgoing, tgt, handle);
            }
        }

        // Members leave the peer set and live inside the pi-block.
        let mut pi_members = Vec::new();
        for &m in &members {
            let ordinal = self.ordinals.remove(&m).unwrap_or(0);
            let node = self.graph.remove_node(m).expect("member node");
            pi_members.push(PiMember { node, ordinal });
        }
        let min_ordinal = pi_members.iter().map(|m| m.ordinal).min().unwrap_or(0);
        let pi = self.graph.add_node(PdgNode::PiBlock(PiBlock {
            members: pi_members,
            internal_edges,
        }));
        self.ordinals.insert(pi, min_ordinal);

        for (src, class, handles) in incoming {
            let edge = match class {
                DependenceClass::Data => PdgEdge::ComplexData(handles),
                DependenceClass::Control => PdgEdge::ComplexControl(handles),
            };
            self.graph.add_edge(src, pi, edge);
        }
        for (tgt, class, handles) in outgoing {
            let edge = match class {
                DependenceClass::Data => PdgEdge::ComplexData(handles),
                DependenceClass::Control => PdgEdge::ComplexControl(handles),
            };
            self.graph.add_edge(pi, tgt, edge);
        }
    }

    /// Append a handle to the group of its peer and class, creating the
    /// group on first use so coalescing order stays deterministic.
    fn group_push(
        groups: &mut Vec<(NodeIndex, DependenceClass, Vec<EdgeHandle>)>,
        peer: NodeIndex,
        handle: EdgeHandle,
    ) {
        let class = handle.edge.class();
        if let Some(slot) = groups
            .iter_mut()
            .find(|(p, c, _)| *p == peer && *c == class)
        {
            slot.2.push(handle);
        } else {
            groups.push((peer, class, vec![handle]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Dependence, Direction as Dir, IrBlock, IrFunction, MapOracle};
    use crate::pdg::builder::tests::{flat_config, inst, load, node_of_inst, store};
    use crate::pdg::PdgBuilder;

    fn pi_nodes(pdg: &Pdg) -> Vec<NodeIndex> {
        pdg.graph()
            .node_indices()
            .filter(|&n| matches!(pdg.graph()[n], PdgNode::PiBlock(_)))
            .collect()
    }

    /// Loop body where the store feeds the next iteration's load:
    /// pre-loop store, loop { load a; store a }, post-loop load.
    fn two_node_cycle() -> (IrFunction, MapOracle) {
        let init = store("a", vec![]);
        let l = load("a");
        let s = store("a", vec![1]);
        let post = load("a");
        let func = IrFunction {
            name: "f".to_string(),
            instructions: vec![init, l, s, post],
            blocks: vec![
                IrBlock {
                    insts: vec![0],
                    successors: vec![1],
                },
                IrBlock {
                    insts: vec![1, 2],
                    successors: vec![1, 2],
                },
                IrBlock {
                    insts: vec![3],
                    successors: vec![],
                },
            ],
            entry: 0,
        };
        let mut oracle = MapOracle::default();
        let forward = Dependence {
            confused: false,
            ordered: true,
            loop_independent: true,
            directions: vec![],
        };
        // Loop-carried dependence with a `>` first component: the edge
        // reverses into store -> load, closing the cycle with the
        // def-use edge load -> store.
        let carried = Dependence {
            confused: false,
            ordered: true,
            loop_independent: false,
            directions: vec![Dir::Gt],
        };
        oracle.insert(1, 2, carried);
        oracle.insert(0, 1, forward.clone());
        oracle.insert(2, 3, forward);
        (func, oracle)
    }

    #[test]
    fn test_self_cycle_is_not_a_pi_block() {
        // x = x + 1 across iterations: a single node with a self edge.
        let mut func = crate::pdg::builder::tests::one_block(vec![{
            let mut i = load("x");
            i.may_write = true;
            i
        }]);
        func.blocks[0].successors = vec![0];
        let mut oracle = MapOracle::default();
        oracle.insert(
            0,
            0,
            Dependence {
                confused: false,
                ordered: true,
                loop_independent: false,
                directions: vec![Dir::Gt],
            },
        );
        let mut pdg = PdgBuilder::new(&func)
            .with_oracle(&oracle)
            .with_config(flat_config())
            .build();
        pdg.form_pi_blocks();
        assert!(pi_nodes(&pdg).is_empty(), "size-1 SCC must stay plain");
    }

    #[test]
    fn test_two_node_cycle_forms_pi_block() {
        let (func, oracle) = two_node_cycle();
        let mut pdg = PdgBuilder::new(&func)
            .with_oracle(&oracle)
            .with_config(flat_config())
            .build();
        pdg.form_pi_blocks();
        let pis = pi_nodes(&pdg);
        assert_eq!(pis.len(), 1);
        let PdgNode::PiBlock(pi) = &pdg.graph()[pis[0]] else {
            unreachable!()
        };
        assert_eq!(pi.len(), 2);
        // Members stay in program order: load before store.
        assert_eq!(pi.members[0].node.instructions(), vec![1]);
        assert_eq!(pi.members[1].node.instructions(), vec![2]);
        // Both cycle edges moved inside, along with the loop header's
        // control self-dependence.
        assert_eq!(pi.internal_edges.len(), 3);
    }

    #[test]
    fn test_external_edges_coalesce_into_complex() {
        let (func, oracle) = two_node_cycle();
        let mut pdg = PdgBuilder::new(&func)
            .with_oracle(&oracle)
            .with_config(flat_config())
            .build();
        pdg.form_pi_blocks();
        let pi = pi_nodes(&pdg)[0];
        let init = node_of_inst(&pdg, 0);
        let post = node_of_inst(&pdg, 3);

        // Pre-loop write becomes one incoming complex data edge.
        let incoming: Vec<_> = pdg
            .graph()
            .edges_connecting(init, pi)
            .filter(|e| matches!(e.weight(), PdgEdge::ComplexData(_)))
            .collect();
        assert_eq!(incoming.len(), 1);
        let PdgEdge::ComplexData(handles) = incoming[0].weight() else {
            unreachable!()
        };
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].source_ordinal, None);
        assert_eq!(handles[0].target_ordinal, Some(0));

        // Post-loop read becomes one outgoing complex data edge.
        let outgoing: Vec<_> = pdg
            .graph()
            .edges_connecting(pi, post)
            .filter(|e| matches!(e.weight(), PdgEdge::ComplexData(_)))
            .collect();
        assert_eq!(outgoing.len(), 1);
        let PdgEdge::ComplexData(handles) = outgoing[0].weight() else {
            unreachable!()
        };
        assert_eq!(handles[0].source_ordinal, Some(1));
        assert_eq!(handles[0].target_ordinal, None);
    }

    #[test]
    fn test_control_edges_coalesce_separately() {
        let (func, oracle) = two_node_cycle();
        let mut pdg = PdgBuilder::new(&func)
            .with_oracle(&oracle)
            .with_config(flat_config())
            .build();
        pdg.form_pi_blocks();
        let pi = pi_nodes(&pdg)[0];
        // The loop block is control-dependent on its own terminator and
        // on the entry; the entry side arrives as complex control.
        let ctrl: Vec<_> = pdg
            .graph()
            .edges_directed(pi, Direction::Incoming)
            .filter(|e| matches!(e.weight(), PdgEdge::ComplexControl(_)))
            .collect();
        assert!(!ctrl.is_empty());
        for e in &ctrl {
            let PdgEdge::ComplexControl(handles) = e.weight() else {
                unreachable!()
            };
            assert!(handles
                .iter()
                .all(|h| matches!(h.edge, PdgEdge::Control | PdgEdge::ComplexControl(_))));
        }
    }

    #[test]
    fn test_pi_block_formation_is_idempotent() {
        let (func, oracle) = two_node_cycle();
        let mut pdg = PdgBuilder::new(&func)
            .with_oracle(&oracle)
            .with_config(flat_config())
            .build();
        pdg.form_pi_blocks();
        let nodes = pdg.node_count();
        let edges = pdg.graph().edge_count();
        pdg.form_pi_blocks();
        assert_eq!(pdg.node_count(), nodes);
        assert_eq!(pdg.graph().edge_count(), edges);
    }

    #[test]
    fn test_no_top_level_scc_after_formation() {
        let (func, oracle) = two_node_cycle();
        let mut pdg = PdgBuilder::new(&func)
            .with_oracle(&oracle)
            .with_config(flat_config())
            .build();
        pdg.form_pi_blocks();
        assert!(non_trivial_sccs(&pdg.graph).is_empty());
    }

    #[test]
    fn test_built_in_passes_match_post_hoc_application() {
        let (func, oracle) = two_node_cycle();
        let built = PdgBuilder::new(&func)
            .with_oracle(&oracle)
            .build();

        let mut manual = PdgBuilder::new(&func)
            .with_oracle(&oracle)
            .with_config(flat_config())
            .build();
        manual.simplify();
        manual.form_pi_blocks();

        assert_eq!(built.node_count(), manual.node_count());
        assert_eq!(built.graph().edge_count(), manual.graph().edge_count());
        assert_eq!(
            pi_nodes(&built).len(),
            pi_nodes(&manual).len()
        );
    }

    #[test]
    fn test_plain_nodes_survive_formation() {
        let func = crate::pdg::builder::tests::one_block(vec![inst("a"), inst("b")]);
        let mut pdg = PdgBuilder::new(&func).with_config(flat_config()).build();
        let before = pdg.node_count();
        pdg.form_pi_blocks();
        assert_eq!(pdg.node_count(), before);
        assert!(pi_nodes(&pdg).is_empty());
    }
}
