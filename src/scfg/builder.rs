//! AST-directed construction of the source control flow graph
//!
//! One cooperative pass over the function body. The builder keeps the
//! currently appended-to block, a list of pending direct-out edges waiting
//! for the next block, and stacks of pending continue/break exits for the
//! enclosing loops and switches. Gotos and labels are recorded during the
//! pass and patched afterwards, splitting host blocks at the recorded op
//! index.

use crate::ast::{Expr, Function, Stmt};
use crate::error::{Diagnostic, DiagnosticKind};
use crate::scfg::{NodeOp, OpId, Scfg, ScfgEdge};
use petgraph::graph::NodeIndex;
use std::collections::HashMap;

/// Build the SCFG of one function.
pub fn build_scfg(func: &Function) -> Scfg {
    ScfgBuilder::new(&func.name).populate(&func.body)
}

#[derive(Debug, Clone)]
struct LabelSite {
    name: String,
    node: NodeIndex,
    index: usize,
}

#[derive(Debug, Clone)]
struct JumpSite {
    label: String,
    node: NodeIndex,
    index: usize,
}

struct SwitchFrame {
    cond_node: NodeIndex,
    default_seen: bool,
}

/// Branch exits of a lowered condition. A short-circuit condition spans
/// several blocks, so both sets can hold more than one node; `ops` are the
/// wrapper ops that computed the pieces of the value, for back-references
/// from join blocks.
struct CondInfo {
    true_outs: Vec<NodeIndex>,
    false_outs: Vec<NodeIndex>,
    ops: Vec<OpId>,
}

/// Single-pass SCFG builder.
pub struct ScfgBuilder {
    scfg: Scfg,
    /// Block currently being appended to; None after a flow break.
    current: Option<NodeIndex>,
    /// Branch exits waiting to be connected to whichever block comes next.
    pending: Vec<(NodeIndex, ScfgEdge)>,
    continue_stack: Vec<Vec<NodeIndex>>,
    break_stack: Vec<Vec<NodeIndex>>,
    switch_stack: Vec<SwitchFrame>,
    labels: Vec<LabelSite>,
    gotos: Vec<JumpSite>,
    /// Latest declaration op per variable name, for back-references from
    /// loop conditions.
    decl_ops: HashMap<String, OpId>,
    next_op: OpId,
}

impl ScfgBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let scfg = Scfg::new(name);
        let start = scfg.start();
        Self {
            scfg,
            current: None,
            pending: vec![(start, ScfgEdge::Default)],
            continue_stack: Vec::new(),
            break_stack: Vec::new(),
            switch_stack: Vec::new(),
            labels: Vec::new(),
            gotos: Vec::new(),
            decl_ops: HashMap::new(),
            next_op: 0,
        }
    }

    /// Lower the function body and post-process: patch labels, drop
    /// unreachable blocks, insert the Entry node, rebuild predecessors.
    pub fn populate(mut self, body: &Stmt) -> Scfg {
        tracing::debug!(function = self.scfg.name(), "building source CFG");
        self.parse_stmt(body);
        let exits = self.take_exits();
        let stop = self.scfg.stop();
        for (n, kind) in exits {
            self.scfg.bind(n, stop, kind);
        }
        self.process_labels();
        self.scfg.eliminate_unreachable();
        self.scfg.emplace_entry();
        self.scfg.recalculate_pred_map();
        self.scfg
    }

    // Flow bookkeeping

    /// Block to append to; materialises one if flow arrives only through
    /// pending edges.
    fn ensure_current(&mut self) -> NodeIndex {
        if let Some(n) = self.current {
            return n;
        }
        let n = self.scfg.add_block();
        for (src, kind) in self.pending.drain(..) {
            self.scfg.bind(src, n, kind);
        }
        self.current = Some(n);
        n
    }

    /// End the current block; its continuation becomes a pending Default.
    fn seal_current(&mut self) {
        if let Some(n) = self.current.take() {
            self.pending.push((n, ScfgEdge::Default));
        }
    }

    /// Drain every loose end: pending edges plus the current block.
    fn take_exits(&mut self) -> Vec<(NodeIndex, ScfgEdge)> {
        let mut outs: Vec<_> = self.pending.drain(..).collect();
        if let Some(n) = self.current.take() {
            outs.push((n, ScfgEdge::Default));
        }
        outs
    }

    /// Replace the flow front with the given branch exits.
    fn set_flow(&mut self, outs: Vec<(NodeIndex, ScfgEdge)>) {
        debug_assert!(self.pending.is_empty(), "pending outs overwritten");
        self.current = None;
        self.pending = outs;
    }

    fn marked(outs: &[NodeIndex], kind: ScfgEdge) -> Vec<(NodeIndex, ScfgEdge)> {
        outs.iter().map(|&n| (n, kind)).collect()
    }

    // Op construction

    fn alloc_op(&mut self) -> OpId {
        let id = self.next_op;
        self.next_op += 1;
        id
    }

    fn native_op(&mut self, text: impl Into<String>) -> NodeOp {
        NodeOp::Native {
            id: self.alloc_op(),
            text: text.into(),
        }
    }

    fn reference_op(&mut self, target: OpId, name: &str) -> NodeOp {
        self.scfg.mark_referred(target);
        NodeOp::Reference {
            id: self.alloc_op(),
            target,
            name: name.to_string(),
        }
    }

    /// Wrapper op for an expression: call sub-expressions become leaf ops
    /// in evaluation order; with `decl_refs`, identifiers resolved against
    /// earlier declarations gain reference leaves.
    fn expr_op(&mut self, expr: &Expr, decl_refs: bool) -> NodeOp {
        let mut leaves = Vec::new();
        if decl_refs {
            let mut seen = Vec::new();
            for ident in expr.idents() {
                if seen.contains(&ident) {
                    continue;
                }
                seen.push(ident);
                if let Some(&decl) = self.decl_ops.get(ident) {
                    leaves.push(self.reference_op(decl, ident));
                }
            }
        }
        for call in expr.calls() {
            let text = call.to_string();
            leaves.push(self.native_op(text));
        }
        NodeOp::Wrapper {
            id: self.alloc_op(),
            text: expr.to_string(),
            leaves,
        }
    }

    fn diagnose(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
        self.scfg.diagnostics.push(Diagnostic::new(kind, message));
    }

    // Statement parsing

    fn parse_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Compound(stmts) => {
                for s in stmts {
                    self.parse_stmt(s);
                }
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => self.parse_if(cond, then_branch, else_branch.as_deref()),
            Stmt::While { cond, body } => self.parse_while(cond, body),
            Stmt::DoWhile { body, cond } => self.parse_do_while(body, cond),
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => self.parse_for(init.as_deref(), cond.as_ref(), step.as_ref(), body),
            Stmt::Switch { cond, body } => self.parse_switch(cond, body),
            Stmt::Case { value, body } => self.parse_case(value, body),
            Stmt::DefaultCase { body } => self.parse_default_case(body),
            Stmt::Break => self.parse_break(),
            Stmt::Continue => self.parse_continue(),
            Stmt::Return(value) => self.parse_return(value.as_ref()),
            Stmt::Goto(label) => self.parse_goto(label),
            Stmt::Label { name, body } => self.parse_label(name, body),
            Stmt::Decl { name, ty, init } => self.parse_decl(name, ty, init.as_ref()),
            Stmt::Expr(expr) => self.parse_expr_stmt(expr),
            Stmt::Asm(text) => {
                let n = self.ensure_current();
                let op = self.native_op(text.clone());
                self.scfg.push_op(n, op);
                self.diagnose(
                    DiagnosticKind::UnsupportedConstruct,
                    format!("no structural lowering for `{}`", text),
                );
            }
        }
    }

    fn parse_if(&mut self, cond: &Expr, then_branch: &Stmt, else_branch: Option<&Stmt>) {
        let ci = self.lower_condition(cond, false);
        self.set_flow(Self::marked(&ci.true_outs, ScfgEdge::True));
        self.parse_stmt(then_branch);
        let mut exits = self.take_exits();
        if let Some(else_stmt) = else_branch {
            self.set_flow(Self::marked(&ci.false_outs, ScfgEdge::False));
            self.parse_stmt(else_stmt);
            exits.extend(self.take_exits());
        } else {
            exits.extend(Self::marked(&ci.false_outs, ScfgEdge::False));
        }
        self.set_flow(exits);
    }

    fn parse_while(&mut self, cond: &Expr, body: &Stmt) {
        self.seal_current();
        let header = self.ensure_current();
        let ci = self.lower_condition(cond, true);
        self.continue_stack.push(Vec::new());
        self.break_stack.push(Vec::new());

        self.set_flow(Self::marked(&ci.true_outs, ScfgEdge::True));
        self.parse_stmt(body);
        for (n, kind) in self.take_exits() {
            self.scfg.bind(n, header, kind);
        }
        for c in self.continue_stack.pop().unwrap_or_default() {
            self.scfg.bind(c, header, ScfgEdge::Continue);
        }

        let mut outs = Self::marked(&ci.false_outs, ScfgEdge::False);
        for b in self.break_stack.pop().unwrap_or_default() {
            outs.push((b, ScfgEdge::Break));
        }
        self.set_flow(outs);
    }

    fn parse_do_while(&mut self, body: &Stmt, cond: &Expr) {
        self.seal_current();
        let body_start = self.ensure_current();
        self.continue_stack.push(Vec::new());
        self.break_stack.push(Vec::new());

        self.parse_stmt(body);
        let body_exits = self.take_exits();
        self.set_flow(body_exits);
        let cond_block = self.ensure_current();
        for c in self.continue_stack.pop().unwrap_or_default() {
            self.scfg.bind(c, cond_block, ScfgEdge::Continue);
        }
        let ci = self.lower_condition(cond, true);
        for &n in &ci.true_outs {
            self.scfg.bind(n, body_start, ScfgEdge::True);
        }

        self.current = None;
        let mut outs = Self::marked(&ci.false_outs, ScfgEdge::False);
        for b in self.break_stack.pop().unwrap_or_default() {
            outs.push((b, ScfgEdge::Break));
        }
        self.set_flow(outs);
    }

    fn parse_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &Stmt,
    ) {
        if let Some(init) = init {
            self.parse_stmt(init);
        }
        self.seal_current();
        let header = self.ensure_current();
        let ci = cond.map(|c| self.lower_condition(c, true));
        self.continue_stack.push(Vec::new());
        self.break_stack.push(Vec::new());

        match &ci {
            Some(ci) => self.set_flow(Self::marked(&ci.true_outs, ScfgEdge::True)),
            // No condition: the header falls through into the body and the
            // loop only exits through breaks.
            None => self.set_flow(vec![(header, ScfgEdge::Default)]),
        }
        self.parse_stmt(body);
        let body_exits = self.take_exits();
        let continues = self.continue_stack.pop().unwrap_or_default();

        if let Some(step_expr) = step {
            self.set_flow(body_exits);
            let step_block = self.ensure_current();
            for c in continues {
                self.scfg.bind(c, step_block, ScfgEdge::Continue);
            }
            let op = self.expr_op(step_expr, true);
            self.scfg.push_op(step_block, op);
            self.current = None;
            self.scfg.bind(step_block, header, ScfgEdge::Default);
        } else {
            for (n, kind) in body_exits {
                self.scfg.bind(n, header, kind);
            }
            for c in continues {
                self.scfg.bind(c, header, ScfgEdge::Continue);
            }
        }

        let mut outs = ci
            .map(|ci| Self::marked(&ci.false_outs, ScfgEdge::False))
            .unwrap_or_default();
        for b in self.break_stack.pop().unwrap_or_default() {
            outs.push((b, ScfgEdge::Break));
        }
        self.set_flow(outs);
    }

    fn parse_switch(&mut self, cond: &Expr, body: &Stmt) {
        let n = self.ensure_current();
        let op = self.expr_op(cond, false);
        self.scfg.push_op(n, op);
        self.switch_stack.push(SwitchFrame {
            cond_node: n,
            default_seen: false,
        });
        self.break_stack.push(Vec::new());
        // Flow enters case bodies through ToCase edges only.
        self.current = None;

        self.parse_stmt(body);
        let mut exits = self.take_exits();
        let frame = self.switch_stack.pop().unwrap();
        if !frame.default_seen {
            exits.push((frame.cond_node, ScfgEdge::False));
        }
        for b in self.break_stack.pop().unwrap_or_default() {
            exits.push((b, ScfgEdge::Break));
        }
        self.set_flow(exits);
    }

    fn parse_case(&mut self, value: &str, body: &Stmt) {
        let Some(cond_node) = self.switch_stack.last().map(|f| f.cond_node) else {
            self.diagnose(
                DiagnosticKind::UnsupportedConstruct,
                format!("case {} outside of a switch", value),
            );
            self.parse_stmt(body);
            return;
        };
        // Fallthrough from the previous case body is an explicit Default
        // edge into this case block.
        self.seal_current();
        let case_block = self.ensure_current();
        self.scfg.bind(cond_node, case_block, ScfgEdge::ToCase);
        let op = self.native_op(format!("case {}:", value));
        self.scfg.push_op(case_block, op);
        self.parse_stmt(body);
    }

    fn parse_default_case(&mut self, body: &Stmt) {
        let Some(cond_node) = self.switch_stack.last().map(|f| f.cond_node) else {
            self.diagnose(
                DiagnosticKind::UnsupportedConstruct,
                "default label outside of a switch",
            );
            self.parse_stmt(body);
            return;
        };
        self.seal_current();
        let case_block = self.ensure_current();
        self.scfg.bind(cond_node, case_block, ScfgEdge::False);
        if let Some(frame) = self.switch_stack.last_mut() {
            frame.default_seen = true;
        }
        let op = self.native_op("default:");
        self.scfg.push_op(case_block, op);
        self.parse_stmt(body);
    }

    fn parse_break(&mut self) {
        if self.break_stack.is_empty() {
            self.diagnose(DiagnosticKind::OrphanJump, "break outside of loop or switch");
            return;
        }
        let n = self.ensure_current();
        self.break_stack.last_mut().unwrap().push(n);
        self.current = None;
    }

    fn parse_continue(&mut self) {
        if self.continue_stack.is_empty() {
            self.diagnose(DiagnosticKind::OrphanJump, "continue outside of loop");
            return;
        }
        let n = self.ensure_current();
        self.continue_stack.last_mut().unwrap().push(n);
        self.current = None;
    }

    fn parse_return(&mut self, value: Option<&Expr>) {
        let n = self.ensure_current();
        let op = match value {
            Some(e) => {
                let mut op = self.expr_op(e, false);
                if let NodeOp::Wrapper { text, .. } = &mut op {
                    *text = format!("return {}", text);
                }
                op
            }
            None => self.native_op("return"),
        };
        self.scfg.push_op(n, op);
        let stop = self.scfg.stop();
        self.scfg.bind(n, stop, ScfgEdge::Default);
        self.current = None;
    }

    fn parse_goto(&mut self, label: &str) {
        let n = self.ensure_current();
        self.gotos.push(JumpSite {
            label: label.to_string(),
            node: n,
            index: self.scfg.ops_len(n),
        });
        self.current = None;
    }

    fn parse_label(&mut self, name: &str, body: &Stmt) {
        let n = self.ensure_current();
        self.labels.push(LabelSite {
            name: name.to_string(),
            node: n,
            index: self.scfg.ops_len(n),
        });
        self.parse_stmt(body);
    }

    fn parse_decl(&mut self, name: &str, ty: &str, init: Option<&Expr>) {
        let n = self.ensure_current();
        let text = match (ty.is_empty(), init) {
            (false, Some(e)) => format!("{} {} = {}", ty, name, e),
            (false, None) => format!("{} {}", ty, name),
            (true, Some(e)) => format!("{} = {}", name, e),
            (true, None) => name.to_string(),
        };
        let leaves = init
            .map(|e| {
                e.calls()
                    .into_iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default()
            .into_iter()
            .map(|text| self.native_op(text))
            .collect();
        let op = NodeOp::Wrapper {
            id: self.alloc_op(),
            text,
            leaves,
        };
        self.decl_ops.insert(name.to_string(), op.id());
        self.scfg.push_op(n, op);
    }

    fn parse_expr_stmt(&mut self, expr: &Expr) {
        match expr {
            // Short-circuit evaluated for effect: both outcomes just join.
            Expr::And { .. } | Expr::Or { .. } => {
                let ci = self.lower_condition(expr, false);
                let mut outs = Self::marked(&ci.true_outs, ScfgEdge::True);
                outs.extend(Self::marked(&ci.false_outs, ScfgEdge::False));
                self.set_flow(outs);
            }
            // A conditional value: the join block re-uses the arm results
            // through back-references.
            Expr::Conditional { .. } => {
                self.lower_valued_branching(expr, expr);
            }
            Expr::Assign { rhs, .. } if rhs.has_branching() => {
                self.lower_valued_branching(rhs, expr);
            }
            _ if expr.has_branching() => {
                // Branching buried where no structural lowering applies.
                let n = self.ensure_current();
                let op = self.expr_op(expr, false);
                self.scfg.push_op(n, op);
                self.diagnose(
                    DiagnosticKind::UnsupportedConstruct,
                    format!("short-circuit inside `{}` not lowered structurally", expr),
                );
            }
            _ => {
                let n = self.ensure_current();
                let op = self.expr_op(expr, false);
                self.scfg.push_op(n, op);
            }
        }
    }

    /// Lower `branching` into blocks, then emit `full` in the join block
    /// with reference leaves to the ops that computed the pieces.
    fn lower_valued_branching(&mut self, branching: &Expr, full: &Expr) {
        let ci = self.lower_condition(branching, false);
        let mut outs = Self::marked(&ci.true_outs, ScfgEdge::True);
        outs.extend(Self::marked(&ci.false_outs, ScfgEdge::False));
        self.set_flow(outs);
        let join = self.ensure_current();
        let leaves: Vec<NodeOp> = ci
            .ops
            .iter()
            .map(|&target| self.reference_op(target, "val"))
            .collect();
        let op = NodeOp::Wrapper {
            id: self.alloc_op(),
            text: full.to_string(),
            leaves,
        };
        self.scfg.push_op(join, op);
    }

    // Condition lowering

    /// Lower a condition expression, creating extra blocks for
    /// short-circuit operators and conditional sub-expressions.
    fn lower_condition(&mut self, expr: &Expr, decl_refs: bool) -> CondInfo {
        match expr {
            Expr::And { lhs, rhs } => {
                let l = self.lower_condition(lhs, decl_refs);
                self.set_flow(Self::marked(&l.true_outs, ScfgEdge::True));
                self.ensure_current();
                let r = self.lower_condition(rhs, decl_refs);
                CondInfo {
                    true_outs: r.true_outs,
                    false_outs: l.false_outs.into_iter().chain(r.false_outs).collect(),
                    ops: l.ops.into_iter().chain(r.ops).collect(),
                }
            }
            Expr::Or { lhs, rhs } => {
                let l = self.lower_condition(lhs, decl_refs);
                self.set_flow(Self::marked(&l.false_outs, ScfgEdge::False));
                self.ensure_current();
                let r = self.lower_condition(rhs, decl_refs);
                CondInfo {
                    true_outs: l.true_outs.into_iter().chain(r.true_outs).collect(),
                    false_outs: r.false_outs,
                    ops: l.ops.into_iter().chain(r.ops).collect(),
                }
            }
            Expr::Conditional {
                cond,
                then_value,
                else_value,
            } => {
                let c = self.lower_condition(cond, decl_refs);
                self.set_flow(Self::marked(&c.true_outs, ScfgEdge::True));
                self.ensure_current();
                let t = self.lower_condition(then_value, decl_refs);
                self.current = None;
                self.set_flow(Self::marked(&c.false_outs, ScfgEdge::False));
                self.ensure_current();
                let e = self.lower_condition(else_value, decl_refs);
                self.current = None;
                CondInfo {
                    true_outs: t.true_outs.into_iter().chain(e.true_outs).collect(),
                    false_outs: t.false_outs.into_iter().chain(e.false_outs).collect(),
                    ops: t.ops.into_iter().chain(e.ops).collect(),
                }
            }
            Expr::Comma { lhs, rhs } => {
                let n = self.ensure_current();
                let op = self.expr_op(lhs, decl_refs);
                self.scfg.push_op(n, op);
                self.lower_condition(rhs, decl_refs)
            }
            _ => {
                if expr.has_branching() {
                    self.diagnose(
                        DiagnosticKind::UnsupportedConstruct,
                        format!("short-circuit inside `{}` not lowered structurally", expr),
                    );
                }
                let n = self.ensure_current();
                let op = self.expr_op(expr, decl_refs);
                let id = op.id();
                self.scfg.push_op(n, op);
                CondInfo {
                    true_outs: vec![n],
                    false_outs: vec![n],
                    ops: vec![id],
                }
            }
        }
    }

    fn process_labels(&mut self) {
        let mut sites = std::mem::take(&mut self.labels);
        let mut gotos = std::mem::take(&mut self.gotos);
        let mut targets: HashMap<String, NodeIndex> = HashMap::new();

        // Split hosts at the highest op index first so lower recorded
        // indices stay valid.
        sites.sort_by(|a, b| b.index.cmp(&a.index));
        for i in 0..sites.len() {
            let site = sites[i].clone();
            let target = if site.index == 0 {
                site.node
            } else {
                let new = self.scfg.split_node(site.node, site.index);
                for later in sites[i + 1..].iter_mut() {
                    if later.node == site.node && later.index >= site.index {
                        later.node = new;
                        later.index -= site.index;
                    }
                }
                for g in gotos.iter_mut() {
                    if g.node == site.node && g.index >= site.index {
                        g.node = new;
                        g.index -= site.index;
                    }
                }
                new
            };
            targets.insert(site.name.clone(), target);
        }

        for g in gotos {
            match targets.get(&g.label) {
                Some(&t) => self.scfg.bind(g.node, t, ScfgEdge::Default),
                None => self.scfg.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::OrphanJump,
                    format!("goto to unknown label `{}`", g.label),
                )),
            }
        }
    }
}
