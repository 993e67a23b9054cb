// Tangle: Program Dependence Graph engine for C-family source code.
//
// Builds source-level control flow graphs, control dependence graphs and
// instruction-level program dependence graphs, one function at a time.

#![allow(dead_code)]

pub mod ast;
pub mod cdg;
pub mod cli;
pub mod error;
pub mod export;
pub mod graph;
pub mod ir;
pub mod pdg;
pub mod scfg;

pub use cdg::{build_cdg, Cdg, PostDominatorTree};
pub use pdg::{Pdg, PdgConfig};
pub use scfg::{Scfg, ScfgBuilder};
