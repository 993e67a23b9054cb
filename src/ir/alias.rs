//! Alias-tree and debug-metadata dependence summaries
//!
//! Two alias trees can be supplied (client side, and optionally a server
//! side built with whole-program knowledge). Estimate-memory nodes are
//! related by a spanning tree; a pair of nodes with no tree path between
//! them cannot alias. Debug-level memories carry per-loop dependence
//! traits collected by an earlier analysis.

use crate::ir::{DebugLoc, LoopId, MemoryLocation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Node id in an alias tree.
pub type EstimateMemoryId = usize;
/// Debug-metadata-level memory id.
pub type DiMemoryId = usize;

/// Alias tree lookup surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliasTree {
    /// Memory base name to estimate-memory node.
    #[serde(default)]
    pub locations: HashMap<String, EstimateMemoryId>,
    /// Estimate memory to the debug-level memory describing it.
    #[serde(default)]
    pub di_memory: HashMap<EstimateMemoryId, DiMemoryId>,
    /// Pairs connected in the spanning tree (either orientation).
    #[serde(default)]
    pub reachable: Vec<(EstimateMemoryId, EstimateMemoryId)>,
}

impl AliasTree {
    pub fn find(&self, loc: &MemoryLocation) -> Option<EstimateMemoryId> {
        self.locations.get(&loc.base).copied()
    }

    pub fn di_memory_of(&self, em: EstimateMemoryId) -> Option<DiMemoryId> {
        self.di_memory.get(&em).copied()
    }

    /// True when the spanning tree has no path between the two nodes,
    /// i.e. the memories provably do not alias.
    pub fn unreachable(&self, a: EstimateMemoryId, b: EstimateMemoryId) -> bool {
        a != b && !self.reachable.contains(&(a, b)) && !self.reachable.contains(&(b, a))
    }
}

/// Debug-metadata classification of one memory inside one loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiTraitKind {
    NoAccess,
    Readonly,
    Shared,
    Private,
    FirstPrivate,
    SecondToLastPrivate,
    LastPrivate,
    DynamicPrivate,
    Flow,
    Anti,
    Output,
}

impl DiTraitKind {
    pub fn is_privatization(&self) -> bool {
        matches!(
            self,
            DiTraitKind::Private
                | DiTraitKind::FirstPrivate
                | DiTraitKind::SecondToLastPrivate
                | DiTraitKind::LastPrivate
                | DiTraitKind::DynamicPrivate
        )
    }

    pub fn is_dependence(&self) -> bool {
        matches!(self, DiTraitKind::Flow | DiTraitKind::Anti | DiTraitKind::Output)
    }

    pub fn is_no_dependence(&self) -> bool {
        matches!(
            self,
            DiTraitKind::NoAccess | DiTraitKind::Readonly | DiTraitKind::Shared
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            DiTraitKind::NoAccess => "no access",
            DiTraitKind::Readonly => "readonly",
            DiTraitKind::Shared => "shared",
            DiTraitKind::Private => "private",
            DiTraitKind::FirstPrivate => "first private",
            DiTraitKind::SecondToLastPrivate => "second to last private",
            DiTraitKind::LastPrivate => "last private",
            DiTraitKind::DynamicPrivate => "dynamic private",
            DiTraitKind::Flow => "flow",
            DiTraitKind::Anti => "anti",
            DiTraitKind::Output => "output",
        }
    }
}

/// A recorded cause of a flow/anti/output dependence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepCause {
    pub kind: DiTraitKind,
    #[serde(default)]
    pub loc: Option<DebugLoc>,
}

/// Traits of one debug-level memory within an alias group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiMemoryTrait {
    pub memory: DiMemoryId,
    #[serde(default)]
    pub descriptor: String,
    pub kinds: Vec<DiTraitKind>,
    #[serde(default)]
    pub causes: Vec<DepCause>,
}

/// One alias group: traits for each debug memory it covers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiAliasTrait {
    pub traits: Vec<DiMemoryTrait>,
}

impl DiAliasTrait {
    pub fn find(&self, memory: DiMemoryId) -> Option<&DiMemoryTrait> {
        self.traits.iter().find(|t| t.memory == memory)
    }
}

/// All alias groups summarised for one loop.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiDependenceSet {
    pub traits: Vec<DiAliasTrait>,
}

/// Per-loop dependence summaries, keyed by loop id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiDependenceInfo {
    #[serde(default)]
    pub per_loop: HashMap<LoopId, DiDependenceSet>,
}

/// A projected trait attached to a memory edge of the PDG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiDepTrait {
    pub kind: DiTraitKind,
    pub memory: DiMemoryId,
    pub descriptor: String,
}

impl DiDepTrait {
    pub fn new(kind: DiTraitKind, memory: DiMemoryId, descriptor: impl Into<String>) -> Self {
        Self {
            kind,
            memory,
            descriptor: descriptor.into(),
        }
    }
}
