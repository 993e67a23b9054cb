//! Low-level function model and the analysis oracles the PDG consumes
//!
//! The lowering stage, dependence testers, alias trees and loop
//! recognition are external collaborators; this module defines the narrow
//! data shapes through which their results arrive (typically as parts of a
//! JSON input document).

pub mod alias;
pub mod deps;
pub mod loops;

pub use alias::{
    AliasTree, DepCause, DiAliasTrait, DiDepTrait, DiDependenceInfo, DiDependenceSet,
    DiMemoryId, DiMemoryTrait, DiTraitKind, EstimateMemoryId,
};
pub use deps::{Dependence, DependenceEntry, DependenceOracle, Direction, MapOracle};
pub use loops::{LoopId, LoopInfo};

use petgraph::stable_graph::StableDiGraph;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Index of an instruction within its function.
pub type InstId = usize;

/// Source position carried by debug metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugLoc {
    pub line: u32,
    #[serde(default)]
    pub col: u32,
}

/// An abstract memory location an instruction may touch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryLocation {
    pub base: String,
    #[serde(default)]
    pub size: Option<u64>,
}

impl MemoryLocation {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            size: None,
        }
    }
}

/// One low-level instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: String,
    /// Display text; falls back to the opcode when empty.
    #[serde(default)]
    pub text: String,
    /// Producers of the register values this instruction uses.
    #[serde(default)]
    pub operands: Vec<InstId>,
    #[serde(default)]
    pub may_read: bool,
    #[serde(default)]
    pub may_write: bool,
    /// Debug intrinsics stay in the graph but are hidden from rendering.
    #[serde(default)]
    pub is_debug: bool,
    #[serde(default)]
    pub debug_loc: Option<DebugLoc>,
    #[serde(default)]
    pub memory: Option<MemoryLocation>,
}

impl Instruction {
    pub fn display(&self) -> &str {
        if self.text.is_empty() {
            &self.opcode
        } else {
            &self.text
        }
    }
}

/// A basic block: instruction ids in program order plus successor blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrBlock {
    pub insts: Vec<InstId>,
    #[serde(default)]
    pub successors: Vec<usize>,
}

/// A lowered function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrFunction {
    pub name: String,
    pub instructions: Vec<Instruction>,
    pub blocks: Vec<IrBlock>,
    #[serde(default)]
    pub entry: usize,
}

impl IrFunction {
    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.instructions[id]
    }

    /// Terminator instruction of a block (its last instruction).
    pub fn terminator(&self, block: usize) -> Option<InstId> {
        self.blocks.get(block).and_then(|b| b.insts.last().copied())
    }

    /// The block CFG with one node per block, in block order. Node `i`
    /// corresponds to block `i`; the graph is freshly built so indices
    /// are dense.
    pub fn block_graph(&self) -> StableDiGraph<usize, ()> {
        let mut g = StableDiGraph::new();
        let nodes: Vec<_> = (0..self.blocks.len()).map(|b| g.add_node(b)).collect();
        for (b, block) in self.blocks.iter().enumerate() {
            for &s in &block.successors {
                if s < nodes.len() {
                    g.add_edge(nodes[b], nodes[s], ());
                }
            }
        }
        g
    }
}

/// Target library knowledge: which callees behave like memory intrinsics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetLibInfo {
    pub intrinsics: HashSet<String>,
}

impl Default for TargetLibInfo {
    fn default() -> Self {
        let intrinsics = ["memcpy", "memmove", "memset", "strcpy", "strcat"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Self { intrinsics }
    }
}

impl TargetLibInfo {
    pub fn is_memory_intrinsic(&self, opcode: &str) -> bool {
        self.intrinsics.contains(opcode)
    }
}
