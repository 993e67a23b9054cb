//! Dependence-analysis oracle interface
//!
//! The dependence tester runs in an earlier pipeline stage; its verdicts
//! arrive here as `Dependence` records keyed by instruction pair.

use crate::ir::InstId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One component of a loop-level direction vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Lt,
    Eq,
    Gt,
    /// Unknown or mixed component (`*`).
    All,
}

impl Direction {
    pub fn symbol(&self) -> &'static str {
        match self {
            Direction::Lt => "<",
            Direction::Eq => "=",
            Direction::Gt => ">",
            Direction::All => "*",
        }
    }
}

/// Verdict of the dependence tester for an ordered instruction pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependence {
    #[serde(default)]
    pub confused: bool,
    #[serde(default)]
    pub ordered: bool,
    #[serde(default)]
    pub loop_independent: bool,
    /// Direction components, outermost loop level first.
    #[serde(default)]
    pub directions: Vec<Direction>,
}

impl Dependence {
    pub fn is_confused(&self) -> bool {
        self.confused
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    pub fn is_loop_independent(&self) -> bool {
        self.loop_independent
    }

    pub fn levels(&self) -> usize {
        self.directions.len()
    }

    /// Direction at `level`; unknown when the tester reported no
    /// component for it.
    pub fn direction(&self, level: usize) -> Direction {
        self.directions.get(level).copied().unwrap_or(Direction::All)
    }

    /// Compact rendering for edge labels, e.g. `<,=,>`.
    pub fn summary(&self) -> String {
        if self.confused {
            return "confused".to_string();
        }
        if self.directions.is_empty() {
            return "loop-independent".to_string();
        }
        self.directions
            .iter()
            .map(Direction::symbol)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// The dependence oracle consulted for every memory-touching pair.
pub trait DependenceOracle {
    fn depends(&self, src: InstId, dst: InstId) -> Option<Dependence>;
}

/// One oracle verdict in a serialized input document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependenceEntry {
    pub src: InstId,
    pub dst: InstId,
    #[serde(flatten)]
    pub dependence: Dependence,
}

/// Map-backed oracle, populated from input documents or test fixtures.
#[derive(Debug, Default, Clone)]
pub struct MapOracle {
    map: HashMap<(InstId, InstId), Dependence>,
}

impl MapOracle {
    pub fn new(entries: impl IntoIterator<Item = DependenceEntry>) -> Self {
        let map = entries
            .into_iter()
            .map(|e| ((e.src, e.dst), e.dependence))
            .collect();
        Self { map }
    }

    pub fn insert(&mut self, src: InstId, dst: InstId, dependence: Dependence) {
        self.map.insert((src, dst), dependence);
    }
}

impl DependenceOracle for MapOracle {
    fn depends(&self, src: InstId, dst: InstId) -> Option<Dependence> {
        self.map.get(&(src, dst)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(directions: Vec<Direction>) -> Dependence {
        Dependence {
            confused: false,
            ordered: true,
            loop_independent: false,
            directions,
        }
    }

    #[test]
    fn test_direction_out_of_range_is_unknown() {
        let d = dep(vec![Direction::Lt]);
        assert_eq!(d.direction(0), Direction::Lt);
        assert_eq!(d.direction(5), Direction::All);
    }

    #[test]
    fn test_summary() {
        assert_eq!(
            dep(vec![Direction::Lt, Direction::Eq]).summary(),
            "<,="
        );
        let confused = Dependence {
            confused: true,
            ordered: false,
            loop_independent: false,
            directions: vec![],
        };
        assert_eq!(confused.summary(), "confused");
    }

    #[test]
    fn test_map_oracle_lookup() {
        let mut oracle = MapOracle::default();
        oracle.insert(0, 1, dep(vec![Direction::Eq]));
        assert!(oracle.depends(0, 1).is_some());
        assert!(oracle.depends(1, 0).is_none());
    }
}
