//! Program Dependence Graph over low-level instructions
//!
//! Nodes hold one instruction each after construction; simplification can
//! merge def-use chains into multi-instruction nodes, and pi-block
//! formation collapses every non-trivial strongly connected component
//! into a single container node whose incident edges are coalesced into
//! complex edges carrying the absorbed originals.

pub mod builder;
pub mod pi_blocks;
pub mod simplify;

pub use builder::PdgBuilder;

use crate::error::Diagnostic;
use crate::ir::{Dependence, DiDepTrait, InstId, IrFunction};
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Construction switches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PdgConfig {
    /// Compute the block reachability closure and only test reachable
    /// memory pairs.
    #[serde(default = "default_true")]
    pub solve_reachability: bool,
    /// Merge single-predecessor def-use chains after construction.
    #[serde(default = "default_true")]
    pub simplify: bool,
    /// Collapse non-trivial SCCs into pi-blocks after construction.
    #[serde(default = "default_true")]
    pub create_pi_blocks: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PdgConfig {
    fn default() -> Self {
        Self {
            solve_reachability: true,
            simplify: true,
            create_pi_blocks: true,
        }
    }
}

/// Payload of a memory edge: the raw verdict of the dependence tester, or
/// the traits projected from the debug-metadata summaries.
#[derive(Debug, Clone)]
pub enum MemoryPayload {
    Raw(Dependence),
    Traits(Vec<DiDepTrait>),
}

impl MemoryPayload {
    /// Edge label: direction vector or trait names.
    pub fn label(&self) -> String {
        match self {
            MemoryPayload::Raw(dep) => dep.summary(),
            MemoryPayload::Traits(traits) => traits
                .iter()
                .map(|t| t.kind.name())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// An original edge absorbed into a complex edge. The ordinals locate the
/// inlined endpoints inside the source and target SCCs; the one whose
/// endpoint is external is absent. The handle owns the absorbed edge.
#[derive(Debug, Clone)]
pub struct EdgeHandle {
    pub source_ordinal: Option<usize>,
    pub target_ordinal: Option<usize>,
    pub edge: PdgEdge,
}

/// Kinds of PDG edges.
#[derive(Debug, Clone)]
pub enum PdgEdge {
    RegisterDefUse,
    Memory(MemoryPayload),
    /// Both a def-use and a memory dependence join the same pair.
    MixedData(MemoryPayload),
    Control,
    ComplexData(Vec<EdgeHandle>),
    ComplexControl(Vec<EdgeHandle>),
}

/// Coarse classification used when coalescing edges onto pi-blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependenceClass {
    Data,
    Control,
}

impl PdgEdge {
    pub fn class(&self) -> DependenceClass {
        match self {
            PdgEdge::Control | PdgEdge::ComplexControl(_) => DependenceClass::Control,
            _ => DependenceClass::Data,
        }
    }

    pub fn is_def_use(&self) -> bool {
        matches!(self, PdgEdge::RegisterDefUse)
    }

    pub fn is_control(&self) -> bool {
        matches!(self, PdgEdge::Control)
    }

    /// Same edge kind, payloads ignored. Used to drop duplicate edges
    /// when retargeting during simplification.
    pub fn same_kind(&self, other: &PdgEdge) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// A member of a pi-block, carried with its instruction ordinal.
#[derive(Debug, Clone)]
pub struct PiMember {
    pub node: PdgNode,
    pub ordinal: u64,
}

/// A collapsed non-trivial SCC: the members in program order plus the
/// edges that ran between them, recorded by member position.
#[derive(Debug, Clone)]
pub struct PiBlock {
    pub members: Vec<PiMember>,
    pub internal_edges: Vec<(usize, usize, PdgEdge)>,
}

impl PiBlock {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Kinds of PDG nodes.
#[derive(Debug, Clone)]
pub enum PdgNode {
    Entry,
    SingleInstruction(InstId),
    MultiInstruction(Vec<InstId>),
    PiBlock(PiBlock),
}

impl PdgNode {
    /// Instructions contained in this node, pi-block members included.
    pub fn instructions(&self) -> Vec<InstId> {
        match self {
            PdgNode::Entry => Vec::new(),
            PdgNode::SingleInstruction(i) => vec![*i],
            PdgNode::MultiInstruction(insts) => insts.clone(),
            PdgNode::PiBlock(pi) => pi
                .members
                .iter()
                .flat_map(|m| m.node.instructions())
                .collect(),
        }
    }

    /// Display label; shadowed debug intrinsics are contained but hidden.
    pub fn label(&self, func: &IrFunction) -> String {
        match self {
            PdgNode::Entry => "ENTRY".to_string(),
            PdgNode::SingleInstruction(i) => {
                let inst = func.inst(*i);
                if inst.is_debug {
                    String::new()
                } else {
                    inst.display().to_string()
                }
            }
            PdgNode::MultiInstruction(insts) => insts
                .iter()
                .filter(|&&i| !func.inst(i).is_debug)
                .map(|&i| func.inst(i).display().to_string())
                .collect::<Vec<_>>()
                .join("\\n"),
            PdgNode::PiBlock(pi) => {
                let mut lines = vec!["pi-block".to_string()];
                for m in &pi.members {
                    let inner = m.node.label(func);
                    if !inner.is_empty() {
                        lines.push(inner);
                    }
                }
                lines.join("\\n")
            }
        }
    }
}

pub type PdgGraph = StableDiGraph<PdgNode, PdgEdge>;

/// A populated program dependence graph for one function.
#[derive(Debug)]
pub struct Pdg {
    name: String,
    pub(crate) graph: PdgGraph,
    entry: NodeIndex,
    /// Program-order ordinal per node, kept until pi-block formation
    /// consumes it.
    pub(crate) ordinals: HashMap<NodeIndex, u64>,
    /// Memory edges whose first non-`=` direction component was `>`.
    pub edge_reversals: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl Pdg {
    pub fn new(name: impl Into<String>) -> Self {
        let mut graph = PdgGraph::new();
        let entry = graph.add_node(PdgNode::Entry);
        Self {
            name: name.into(),
            graph,
            entry,
            ordinals: HashMap::new(),
            edge_reversals: 0,
            diagnostics: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &PdgGraph {
        &self.graph
    }

    pub fn entry(&self) -> NodeIndex {
        self.entry
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Program-order ordinal of a node; merged nodes carry the smallest
    /// ordinal of their parts. Falls back to the first instruction id
    /// once the ordinal map has been consumed by pi-block formation.
    pub(crate) fn ordinal_of(&self, node: NodeIndex) -> u64 {
        if let Some(&o) = self.ordinals.get(&node) {
            return o;
        }
        self.graph
            .node_weight(node)
            .map(|w| w.instructions().first().copied().unwrap_or(usize::MAX) as u64)
            .unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Instruction, IrBlock};

    fn func_with(texts: &[&str]) -> IrFunction {
        IrFunction {
            name: "f".to_string(),
            instructions: texts
                .iter()
                .map(|t| Instruction {
                    opcode: t.to_string(),
                    text: String::new(),
                    operands: vec![],
                    may_read: false,
                    may_write: false,
                    is_debug: false,
                    debug_loc: None,
                    memory: None,
                })
                .collect(),
            blocks: vec![IrBlock {
                insts: (0..texts.len()).collect(),
                successors: vec![],
            }],
            entry: 0,
        }
    }

    #[test]
    fn test_new_pdg_has_entry() {
        let pdg = Pdg::new("f");
        assert_eq!(pdg.node_count(), 1);
        assert!(matches!(pdg.graph()[pdg.entry()], PdgNode::Entry));
    }

    #[test]
    fn test_node_instructions() {
        let multi = PdgNode::MultiInstruction(vec![1, 2]);
        assert_eq!(multi.instructions(), vec![1, 2]);
        let pi = PdgNode::PiBlock(PiBlock {
            members: vec![
                PiMember {
                    node: PdgNode::SingleInstruction(0),
                    ordinal: 0,
                },
                PiMember {
                    node: PdgNode::MultiInstruction(vec![3, 4]),
                    ordinal: 3,
                },
            ],
            internal_edges: vec![],
        });
        assert_eq!(pi.instructions(), vec![0, 3, 4]);
    }

    #[test]
    fn test_shadowed_instruction_hidden_from_label() {
        let mut func = func_with(&["load", "dbg.value", "store"]);
        func.instructions[1].is_debug = true;
        let node = PdgNode::MultiInstruction(vec![0, 1, 2]);
        let label = node.label(&func);
        assert!(label.contains("load"));
        assert!(label.contains("store"));
        assert!(!label.contains("dbg.value"));
    }

    #[test]
    fn test_edge_classes() {
        assert_eq!(PdgEdge::Control.class(), DependenceClass::Control);
        assert_eq!(
            PdgEdge::ComplexControl(vec![]).class(),
            DependenceClass::Control
        );
        assert_eq!(PdgEdge::RegisterDefUse.class(), DependenceClass::Data);
        assert_eq!(
            PdgEdge::Memory(MemoryPayload::Traits(vec![])).class(),
            DependenceClass::Data
        );
    }
}
