//! End-to-end scenarios for the PDG pipeline
//!
//! Each test drives the public API the way a pass driver would: build
//! the graph from a small fixture function, then check the dependence
//! structure, the transform passes and their idempotence.

use tangle::ast::{Expr, Function, Stmt};
use tangle::cdg::build_cdg;
use tangle::ir::{
    Dependence, Direction, InstId, Instruction, IrBlock, IrFunction, MapOracle, MemoryLocation,
};
use tangle::pdg::{Pdg, PdgBuilder, PdgConfig, PdgEdge, PdgNode};
use tangle::scfg::{build_scfg, ScfgEdge};
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;

fn inst(opcode: &str) -> Instruction {
    Instruction {
        opcode: opcode.to_string(),
        text: String::new(),
        operands: vec![],
        may_read: false,
        may_write: false,
        is_debug: false,
        debug_loc: None,
        memory: None,
    }
}

fn load(base: &str) -> Instruction {
    let mut i = inst("load");
    i.text = format!("load {}", base);
    i.may_read = true;
    i.memory = Some(MemoryLocation::new(base));
    i
}

fn store(base: &str, operands: Vec<InstId>) -> Instruction {
    let mut i = inst("store");
    i.text = format!("store {}", base);
    i.may_write = true;
    i.memory = Some(MemoryLocation::new(base));
    i.operands = operands;
    i
}

fn flat() -> PdgConfig {
    PdgConfig {
        solve_reachability: true,
        simplify: false,
        create_pi_blocks: false,
    }
}

fn node_of(pdg: &Pdg, inst: InstId) -> NodeIndex {
    pdg.graph()
        .node_indices()
        .find(|&n| pdg.graph()[n].instructions().contains(&inst))
        .expect("instruction owned by a node")
}

fn forward_loop_independent() -> Dependence {
    Dependence {
        confused: false,
        ordered: true,
        loop_independent: true,
        directions: vec![],
    }
}

fn carried_reversed() -> Dependence {
    Dependence {
        confused: false,
        ordered: true,
        loop_independent: false,
        directions: vec![Direction::Gt],
    }
}

/// S1: a = load p; b = a + 1; store b, p.
fn s1() -> (IrFunction, MapOracle) {
    let mut add = inst("add");
    add.text = "b = a + 1".to_string();
    add.operands = vec![0];
    let func = IrFunction {
        name: "s1".to_string(),
        instructions: vec![load("p"), add, store("p", vec![1, 0])],
        blocks: vec![IrBlock {
            insts: vec![0, 1, 2],
            successors: vec![],
        }],
        entry: 0,
    };
    let mut oracle = MapOracle::default();
    oracle.insert(0, 2, forward_loop_independent());
    (func, oracle)
}

#[test]
fn s1_straight_line_shape() {
    let (func, oracle) = s1();
    let pdg = PdgBuilder::new(&func)
        .with_oracle(&oracle)
        .with_config(flat())
        .build();
    let defuse = pdg
        .graph()
        .edge_indices()
        .filter(|&e| matches!(pdg.graph().edge_weight(e), Some(PdgEdge::RegisterDefUse)))
        .count();
    let mixed = pdg
        .graph()
        .edge_indices()
        .filter(|&e| matches!(pdg.graph().edge_weight(e), Some(PdgEdge::MixedData(_))))
        .count();
    assert_eq!(defuse, 2);
    assert_eq!(mixed, 1);
}

#[test]
fn s1_simplifies_to_one_node() {
    let (func, oracle) = s1();
    let pdg = PdgBuilder::new(&func)
        .with_oracle(&oracle)
        .with_config(PdgConfig {
            solve_reachability: true,
            simplify: true,
            create_pi_blocks: true,
        })
        .build();
    // Entry plus one merged node holding all three instructions.
    assert_eq!(pdg.node_count(), 2);
    let merged = node_of(&pdg, 0);
    assert_eq!(pdg.graph()[merged].instructions(), vec![0, 1, 2]);
}

/// S2: x = x + 1 across iterations; SCC of size one never becomes a
/// pi-block.
#[test]
fn s2_self_cycle_has_no_pi_block() {
    let mut x = load("x");
    x.may_write = true;
    x.text = "x = x + 1".to_string();
    let func = IrFunction {
        name: "s2".to_string(),
        instructions: vec![x],
        blocks: vec![IrBlock {
            insts: vec![0],
            successors: vec![0],
        }],
        entry: 0,
    };
    let mut oracle = MapOracle::default();
    oracle.insert(0, 0, carried_reversed());
    let pdg = PdgBuilder::new(&func).with_oracle(&oracle).build();
    assert!(pdg
        .graph()
        .node_indices()
        .all(|n| !matches!(pdg.graph()[n], PdgNode::PiBlock(_))));
    // The self memory edge survives.
    let n = node_of(&pdg, 0);
    assert!(pdg
        .graph()
        .edges_connecting(n, n)
        .any(|e| matches!(e.weight(), PdgEdge::Memory(_))));
}

/// S3 fixture: pre-loop store, loop { load; store }, post-loop load.
fn s3() -> (IrFunction, MapOracle) {
    let func = IrFunction {
        name: "s3".to_string(),
        instructions: vec![
            store("a", vec![]),
            load("a"),
            store("a", vec![1]),
            load("a"),
        ],
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
    oracle.insert(1, 2, carried_reversed());
    oracle.insert(0, 1, forward_loop_independent());
    oracle.insert(2, 3, forward_loop_independent());
    (func, oracle)
}

#[test]
fn s3_two_node_cycle_becomes_pi_block() {
    let (func, oracle) = s3();
    let pdg = PdgBuilder::new(&func)
        .with_oracle(&oracle)
        .with_config(PdgConfig {
            solve_reachability: true,
            simplify: false,
            create_pi_blocks: true,
        })
        .build();
    let pi = pdg
        .graph()
        .node_indices()
        .find(|&n| matches!(pdg.graph()[n], PdgNode::PiBlock(_)))
        .expect("pi-block formed");
    let PdgNode::PiBlock(block) = &pdg.graph()[pi] else {
        unreachable!()
    };
    assert_eq!(block.len(), 2);

    // External write-before-loop arrives as complex data in; the read
    // after the loop leaves as complex data out.
    let init = node_of(&pdg, 0);
    let post = node_of(&pdg, 3);
    assert!(pdg
        .graph()
        .edges_connecting(init, pi)
        .any(|e| matches!(e.weight(), PdgEdge::ComplexData(_))));
    assert!(pdg
        .graph()
        .edges_connecting(pi, post)
        .any(|e| matches!(e.weight(), PdgEdge::ComplexData(_))));
    assert_eq!(pdg.edge_reversals, 1);
}

/// S4: if (c) s1; else s2; s3 — control edges reach the arms, never the
/// join.
#[test]
fn s4_if_else_control_edges() {
    let func = IrFunction {
        name: "s4".to_string(),
        instructions: vec![inst("br"), inst("s1"), inst("s2"), inst("s3")],
        blocks: vec![
            IrBlock {
                insts: vec![0],
                successors: vec![1, 2],
            },
            IrBlock {
                insts: vec![1],
                successors: vec![3],
            },
            IrBlock {
                insts: vec![2],
                successors: vec![3],
            },
            IrBlock {
                insts: vec![3],
                successors: vec![],
            },
        ],
        entry: 0,
    };
    let pdg = PdgBuilder::new(&func).with_config(flat()).build();
    let br = node_of(&pdg, 0);
    let ctrl = |a: NodeIndex, b: NodeIndex| {
        pdg.graph()
            .edges_connecting(a, b)
            .any(|e| matches!(e.weight(), PdgEdge::Control))
    };
    assert!(ctrl(br, node_of(&pdg, 1)));
    assert!(ctrl(br, node_of(&pdg, 2)));
    assert!(!ctrl(br, node_of(&pdg, 3)));
    assert!(ctrl(pdg.entry(), node_of(&pdg, 3)));
}

/// S4 at the source level: the SCFG/CDG pair shows the same shape.
#[test]
fn s4_source_cdg() {
    let scfg = build_scfg(&Function {
        name: "s4".to_string(),
        params: vec![],
        body: Stmt::Compound(vec![
            Stmt::If {
                cond: Expr::ident("c"),
                then_branch: Box::new(Stmt::Expr(Expr::assign(Expr::ident("s1"), Expr::lit("1")))),
                else_branch: Some(Box::new(Stmt::Expr(Expr::assign(
                    Expr::ident("s2"),
                    Expr::lit("2"),
                )))),
            },
            Stmt::Expr(Expr::assign(Expr::ident("s3"), Expr::lit("3"))),
        ]),
    });
    let find = |needle: &str| {
        scfg.graph()
            .node_indices()
            .find(|&n| {
                scfg.graph()[n]
                    .as_block()
                    .map(|b| b.label(scfg.referred_ops()).contains(needle))
                    .unwrap_or(false)
            })
            .unwrap()
    };
    let c = find("c");
    let b1 = find("s1 = 1");
    let b2 = find("s2 = 2");
    let j = find("s3 = 3");

    let cdg = build_cdg(scfg.graph(), scfg.entry_or_start());
    let dep = |u: NodeIndex, v: NodeIndex| {
        match (cdg.node_of(u), cdg.node_of(v)) {
            (Some(cu), Some(cv)) => cdg.graph().find_edge(cu, cv).is_some(),
            _ => false,
        }
    };
    assert!(dep(c, b1));
    assert!(dep(c, b2));
    assert!(!dep(c, j));
}

/// S5: switch with fallthrough between case 1 and case 2.
#[test]
fn s5_switch_fallthrough_scfg() {
    let scfg = build_scfg(&Function {
        name: "s5".to_string(),
        params: vec![],
        body: Stmt::Compound(vec![Stmt::Switch {
            cond: Expr::ident("x"),
            body: Box::new(Stmt::Compound(vec![
                Stmt::Case {
                    value: "1".to_string(),
                    body: Box::new(Stmt::Expr(Expr::assign(Expr::ident("a"), Expr::lit("1")))),
                },
                Stmt::Case {
                    value: "2".to_string(),
                    body: Box::new(Stmt::Expr(Expr::assign(Expr::ident("b"), Expr::lit("2")))),
                },
                Stmt::DefaultCase {
                    body: Box::new(Stmt::Expr(Expr::assign(Expr::ident("c"), Expr::lit("3")))),
                },
            ])),
        }]),
    });
    let find = |needle: &str| {
        scfg.graph()
            .node_indices()
            .find(|&n| {
                scfg.graph()[n]
                    .as_block()
                    .map(|b| b.label(scfg.referred_ops()).contains(needle))
                    .unwrap_or(false)
            })
            .unwrap()
    };
    let sn = find("x");
    let l1 = find("case 1:");
    let l2 = find("case 2:");
    let def = find("default:");
    let kind = |a: NodeIndex, b: NodeIndex, k: ScfgEdge| {
        scfg.graph().edges_connecting(a, b).any(|e| *e.weight() == k)
    };
    assert!(kind(sn, l1, ScfgEdge::ToCase));
    assert!(kind(sn, l2, ScfgEdge::ToCase));
    assert!(kind(sn, def, ScfgEdge::False));
    assert!(kind(l1, l2, ScfgEdge::Default));
    assert!(kind(l2, def, ScfgEdge::Default));
}

/// S6: s = 0; for i { s += a[i]; } use(s) — the reduction forms a
/// pi-block with one inlined edge per external peer.
#[test]
fn s6_reduction_chain() {
    // init store s, loop { load s (0-aliased), add, store s }, load s.
    let mut add = inst("add");
    add.operands = vec![2];
    let func = IrFunction {
        name: "s6".to_string(),
        instructions: vec![
            store("s", vec![]),
            load("a"),
            load("s"),
            add,
            store("s", vec![3]),
            load("s"),
        ],
        blocks: vec![
            IrBlock {
                insts: vec![0],
                successors: vec![1],
            },
            IrBlock {
                insts: vec![1, 2, 3, 4],
                successors: vec![1, 2],
            },
            IrBlock {
                insts: vec![5],
                successors: vec![],
            },
        ],
        entry: 0,
    };
    let mut oracle = MapOracle::default();
    oracle.insert(0, 2, forward_loop_independent());
    oracle.insert(2, 4, carried_reversed());
    oracle.insert(4, 5, forward_loop_independent());
    let pdg = PdgBuilder::new(&func)
        .with_oracle(&oracle)
        .with_config(PdgConfig {
            solve_reachability: true,
            simplify: false,
            create_pi_blocks: true,
        })
        .build();

    let pi = pdg
        .graph()
        .node_indices()
        .find(|&n| matches!(pdg.graph()[n], PdgNode::PiBlock(_)))
        .expect("reduction pi-block");
    let init = node_of(&pdg, 0);
    let post = node_of(&pdg, 5);
    let incoming: Vec<_> = pdg
        .graph()
        .edges_connecting(init, pi)
        .filter(|e| matches!(e.weight(), PdgEdge::ComplexData(_)))
        .collect();
    let outgoing: Vec<_> = pdg
        .graph()
        .edges_connecting(pi, post)
        .filter(|e| matches!(e.weight(), PdgEdge::ComplexData(_)))
        .collect();
    // Exactly one complex edge per external peer in each direction.
    assert_eq!(incoming.len(), 1);
    assert_eq!(outgoing.len(), 1);
}

#[test]
fn transforms_are_idempotent_and_match_built_in() {
    let (func, oracle) = s3();
    let built = PdgBuilder::new(&func).with_oracle(&oracle).build();

    let mut manual = PdgBuilder::new(&func)
        .with_oracle(&oracle)
        .with_config(flat())
        .build();
    manual.simplify();
    manual.simplify();
    manual.form_pi_blocks();
    manual.form_pi_blocks();

    assert_eq!(built.node_count(), manual.node_count());
    assert_eq!(built.graph().edge_count(), manual.graph().edge_count());
}

#[test]
fn every_edge_endpoint_is_live() {
    let (func, oracle) = s3();
    let pdg = PdgBuilder::new(&func).with_oracle(&oracle).build();
    for e in pdg.graph().edge_indices() {
        let (s, t) = pdg.graph().edge_endpoints(e).unwrap();
        assert!(pdg.graph().node_weight(s).is_some());
        assert!(pdg.graph().node_weight(t).is_some());
    }
}

#[test]
fn instructions_partition_across_nodes() {
    let (func, oracle) = s3();
    for config in [
        PdgConfig::default(),
        flat(),
        PdgConfig {
            solve_reachability: false,
            simplify: true,
            create_pi_blocks: false,
        },
    ] {
        let pdg = PdgBuilder::new(&func)
            .with_oracle(&oracle)
            .with_config(config)
            .build();
        for i in 0..func.instructions.len() {
            let owners = pdg
                .graph()
                .node_indices()
                .filter(|&n| pdg.graph()[n].instructions().contains(&i))
                .count();
            assert_eq!(owners, 1, "instruction {} must be owned exactly once", i);
        }
    }
}
