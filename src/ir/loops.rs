//! Loop nest information supplied by the loop-recognition stage

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifier of a recognised loop.
pub type LoopId = usize;

/// Block-to-loop mapping plus the loop parent chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopInfo {
    /// Innermost loop containing each basic block.
    #[serde(default)]
    pub innermost: HashMap<usize, LoopId>,
    /// Parent loop of each loop, absent for top-level loops.
    #[serde(default)]
    pub parents: HashMap<LoopId, LoopId>,
}

impl LoopInfo {
    pub fn loop_for(&self, block: usize) -> Option<LoopId> {
        self.innermost.get(&block).copied()
    }

    /// Enclosing loops of `l`, innermost first, `l` included.
    pub fn chain(&self, l: LoopId) -> Vec<LoopId> {
        let mut out = vec![l];
        let mut cur = l;
        while let Some(&p) = self.parents.get(&cur) {
            // Malformed parent cycles would spin forever.
            if out.contains(&p) {
                break;
            }
            out.push(p);
            cur = p;
        }
        out
    }

    /// Loops enclosing both blocks, innermost first.
    pub fn common_loops(&self, b1: usize, b2: usize) -> Vec<LoopId> {
        let (Some(l1), Some(l2)) = (self.loop_for(b1), self.loop_for(b2)) else {
            return Vec::new();
        };
        let c2 = self.chain(l2);
        self.chain(l1).into_iter().filter(|l| c2.contains(l)).collect()
    }
}
