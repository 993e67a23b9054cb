//! Graph serialisation: DOT for Graphviz, JSON for machine consumers
//!
//! Edge styling for the PDG: def-use solid blue, memory solid green with
//! direction or trait labels, mixed data solid purple, control dotted,
//! complex data solid orchid with the ordinal pair of every inlined edge,
//! complex control dashed. Shadowed debug intrinsics never appear in node
//! labels.

use crate::cdg::{Cdg, CdgNode, PostDominatorTree};
use crate::ir::IrFunction;
use crate::pdg::{EdgeHandle, Pdg, PdgEdge};
use crate::scfg::Scfg;
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

fn escape_dot_string(s: &str) -> String {
    s.replace('"', "\\\"")
}

/// Render the SCFG; the graph is named the way its consumers expect.
pub fn scfg_to_dot(scfg: &Scfg) -> String {
    let mut dot = String::from("digraph \"Source Control Flow Graph\" {\n");
    dot.push_str("  rankdir=TB;\n");
    dot.push_str("  node [shape=box];\n\n");
    for n in scfg.graph().node_indices() {
        let label = escape_dot_string(&scfg.graph()[n].label(scfg.referred_ops()));
        writeln!(dot, "  \"{}\" [label=\"{}\"];", n.index(), label).ok();
    }
    dot.push('\n');
    for e in scfg.graph().edge_references() {
        let kind = e.weight();
        let label = kind.dot_label();
        let label_attr = if label.is_empty() {
            String::new()
        } else {
            format!(", label=\"{}\"", label)
        };
        writeln!(
            dot,
            "  \"{}\" -> \"{}\" [color={}{}];",
            e.source().index(),
            e.target().index(),
            kind.dot_color(),
            label_attr
        )
        .ok();
    }
    dot.push_str("}\n");
    dot
}

/// Render a CDG with generic block labels.
pub fn cdg_to_dot(cdg: &Cdg, title: &str) -> String {
    let mut dot = format!("digraph \"{}\" {{\n", escape_dot_string(title));
    dot.push_str("  node [shape=box];\n\n");
    for n in cdg.graph().node_indices() {
        let label = match cdg.graph()[n] {
            CdgNode::Entry => "ENTRY".to_string(),
            CdgNode::Block(b) => format!("B{}", b.index()),
        };
        writeln!(dot, "  \"{}\" [label=\"{}\"];", n.index(), label).ok();
    }
    dot.push('\n');
    for e in cdg.graph().edge_references() {
        writeln!(
            dot,
            "  \"{}\" -> \"{}\";",
            e.source().index(),
            e.target().index()
        )
        .ok();
    }
    dot.push_str("}\n");
    dot
}

/// Render a post-dominator tree; the virtual root stays hidden, so the
/// real exits appear as tree roots.
pub fn pdt_to_dot(pdt: &PostDominatorTree) -> String {
    let mut dot = String::from("digraph \"Post-Dominator Tree\" {\n");
    dot.push_str("  node [shape=box];\n\n");
    let mut stack: Vec<_> = pdt.roots().to_vec();
    let mut seen = Vec::new();
    while let Some(n) = stack.pop() {
        if seen.contains(&n) {
            continue;
        }
        seen.push(n);
        writeln!(dot, "  \"{}\" [label=\"B{}\"];", n.index(), n.index()).ok();
        for &c in pdt.children(n) {
            writeln!(dot, "  \"{}\" -> \"{}\";", n.index(), c.index()).ok();
            stack.push(c);
        }
    }
    dot.push_str("}\n");
    dot
}

fn handle_pairs(handles: &[EdgeHandle]) -> String {
    handles
        .iter()
        .map(|h| {
            let src = h
                .source_ordinal
                .map(|o| o.to_string())
                .unwrap_or_else(|| "ext".to_string());
            let tgt = h
                .target_ordinal
                .map(|o| o.to_string())
                .unwrap_or_else(|| "ext".to_string());
            format!("({},{})", src, tgt)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn pdg_edge_attrs(edge: &PdgEdge) -> String {
    match edge {
        PdgEdge::RegisterDefUse => "color=blue, style=solid, label=\"def-use\"".to_string(),
        PdgEdge::Memory(payload) => format!(
            "color=green, style=solid, label=\"{}\"",
            escape_dot_string(&payload.label())
        ),
        PdgEdge::MixedData(payload) => format!(
            "color=purple, style=solid, label=\"{}\"",
            escape_dot_string(&payload.label())
        ),
        PdgEdge::Control => "style=dotted".to_string(),
        PdgEdge::ComplexData(handles) => format!(
            "color=orchid, style=solid, label=\"{}\"",
            handle_pairs(handles)
        ),
        PdgEdge::ComplexControl(_) => "style=dashed".to_string(),
    }
}

/// Render the PDG.
pub fn pdg_to_dot(pdg: &Pdg, func: &IrFunction) -> String {
    let mut dot = String::from("digraph \"Program Dependency Graph\" {\n");
    dot.push_str("  rankdir=TB;\n");
    dot.push_str("  node [shape=box];\n\n");
    for n in pdg.graph().node_indices() {
        let label = escape_dot_string(&pdg.graph()[n].label(func));
        writeln!(dot, "  \"{}\" [label=\"{}\"];", n.index(), label).ok();
    }
    dot.push('\n');
    for e in pdg.graph().edge_references() {
        writeln!(
            dot,
            "  \"{}\" -> \"{}\" [{}];",
            e.source().index(),
            e.target().index(),
            pdg_edge_attrs(e.weight())
        )
        .ok();
    }
    dot.push_str("}\n");
    dot
}

/// Machine-readable export shared by every graph flavor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphExport {
    pub graph: String,
    pub nodes: Vec<NodeExport>,
    pub edges: Vec<EdgeExport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExport {
    pub id: usize,
    pub label: String,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeExport {
    pub from: usize,
    pub to: usize,
    pub kind: String,
}

pub fn scfg_to_json(scfg: &Scfg) -> GraphExport {
    let nodes = scfg
        .graph()
        .node_indices()
        .map(|n| NodeExport {
            id: n.index(),
            label: scfg.graph()[n].label(scfg.referred_ops()),
            kind: match &scfg.graph()[n] {
                crate::scfg::ScfgNode::Default(_) => "default".to_string(),
                crate::scfg::ScfgNode::Service(k) => format!("{:?}", k).to_lowercase(),
            },
        })
        .collect();
    let edges = scfg
        .graph()
        .edge_references()
        .map(|e| EdgeExport {
            from: e.source().index(),
            to: e.target().index(),
            kind: format!("{:?}", e.weight()),
        })
        .collect();
    GraphExport {
        graph: "Source Control Flow Graph".to_string(),
        nodes,
        edges,
    }
}

pub fn pdg_to_json(pdg: &Pdg, func: &IrFunction) -> GraphExport {
    let nodes = pdg
        .graph()
        .node_indices()
        .map(|n| NodeExport {
            id: n.index(),
            label: pdg.graph()[n].label(func),
            kind: match &pdg.graph()[n] {
                crate::pdg::PdgNode::Entry => "entry".to_string(),
                crate::pdg::PdgNode::SingleInstruction(_) => "single".to_string(),
                crate::pdg::PdgNode::MultiInstruction(_) => "multi".to_string(),
                crate::pdg::PdgNode::PiBlock(_) => "pi".to_string(),
            },
        })
        .collect();
    let edges = pdg
        .graph()
        .edge_references()
        .map(|e| EdgeExport {
            from: e.source().index(),
            to: e.target().index(),
            kind: match e.weight() {
                PdgEdge::RegisterDefUse => "def-use".to_string(),
                PdgEdge::Memory(p) => format!("memory [{}]", p.label()),
                PdgEdge::MixedData(p) => format!("mixed [{}]", p.label()),
                PdgEdge::Control => "control".to_string(),
                PdgEdge::ComplexData(h) => format!("complex-data [{}]", handle_pairs(&h)),
                PdgEdge::ComplexControl(h) => {
                    format!("complex-control [{}]", handle_pairs(&h))
                }
            },
        })
        .collect();
    GraphExport {
        graph: "Program Dependency Graph".to_string(),
        nodes,
        edges,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, Function, Stmt};
    use crate::cdg::build_cdg;
    use crate::pdg::builder::tests as pdg_fixtures;
    use crate::pdg::PdgBuilder;
    use crate::scfg::build_scfg;

    fn sample_scfg() -> Scfg {
        build_scfg(&Function {
            name: "f".to_string(),
            params: vec![],
            body: Stmt::Compound(vec![
                Stmt::If {
                    cond: Expr::ident("c"),
                    then_branch: Box::new(Stmt::Expr(Expr::assign(
                        Expr::ident("x"),
                        Expr::lit("1"),
                    ))),
                    else_branch: None,
                },
                Stmt::Return(None),
            ]),
        })
    }

    #[test]
    fn test_scfg_dot_structure() {
        let dot = scfg_to_dot(&sample_scfg());
        assert!(dot.starts_with("digraph \"Source Control Flow Graph\" {"));
        assert!(dot.ends_with("}\n"));
        assert!(dot.contains("START"));
        assert!(dot.contains("STOP"));
        assert!(dot.contains("ENTRY"));
        assert!(dot.contains("label=\"T\""));
        assert!(dot.contains("label=\"F\""));
    }

    #[test]
    fn test_pdg_dot_edge_styles() {
        let (func, oracle) = pdg_fixtures::straight_line();
        let pdg = PdgBuilder::new(&func)
            .with_oracle(&oracle)
            .with_config(pdg_fixtures::flat_config())
            .build();
        let dot = pdg_to_dot(&pdg, &func);
        assert!(dot.starts_with("digraph \"Program Dependency Graph\" {"));
        assert!(dot.contains("color=blue"));
        assert!(dot.contains("color=purple"));
        assert!(dot.contains("style=dotted"));
    }

    #[test]
    fn test_pdg_dot_hides_shadowed_instructions() {
        let mut dbg = pdg_fixtures::inst("dbg.value");
        dbg.is_debug = true;
        let func = pdg_fixtures::one_block(vec![pdg_fixtures::inst("add"), dbg]);
        let pdg = PdgBuilder::new(&func)
            .with_config(pdg_fixtures::flat_config())
            .build();
        let dot = pdg_to_dot(&pdg, &func);
        assert!(!dot.contains("dbg.value"));
        assert!(dot.contains("add"));
    }

    #[test]
    fn test_cdg_dot() {
        let func = pdg_fixtures::diamond_ir();
        let bg = func.block_graph();
        let cdg = build_cdg(&bg, petgraph::graph::NodeIndex::new(0));
        let dot = cdg_to_dot(&cdg, "IR Control Dependence Graph");
        assert!(dot.contains("ENTRY"));
        assert!(dot.contains("B0"));
        assert!(dot.contains("->"));
    }

    #[test]
    fn test_pdt_dot_hides_virtual_root() {
        let func = pdg_fixtures::diamond_ir();
        let bg = func.block_graph();
        let pdt = crate::cdg::PostDominatorTree::new(&bg);
        let dot = pdt_to_dot(&pdt);
        assert!(dot.starts_with("digraph \"Post-Dominator Tree\" {"));
        // Four blocks, no virtual node.
        assert!(dot.contains("B3"));
        assert!(!dot.contains("B4"));
    }

    #[test]
    fn test_json_exports() {
        let scfg = sample_scfg();
        let export = scfg_to_json(&scfg);
        assert_eq!(export.graph, "Source Control Flow Graph");
        assert!(export.nodes.iter().any(|n| n.kind == "start"));
        assert!(!export.edges.is_empty());

        let (func, oracle) = pdg_fixtures::straight_line();
        let pdg = PdgBuilder::new(&func)
            .with_oracle(&oracle)
            .with_config(pdg_fixtures::flat_config())
            .build();
        let export = pdg_to_json(&pdg, &func);
        assert_eq!(export.graph, "Program Dependency Graph");
        assert!(export.edges.iter().any(|e| e.kind == "def-use"));
        assert!(export.edges.iter().any(|e| e.kind.starts_with("mixed")));
        let text = serde_json::to_string(&export).unwrap();
        assert!(text.contains("def-use"));
    }
}
