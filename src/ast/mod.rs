//! C-family function AST consumed by the source CFG builder
//!
//! The front-end that produces these trees is an external collaborator;
//! functions arrive pre-parsed, typically as JSON documents. The statement
//! set covers the C constructs the builder lowers structurally; anything
//! else is carried as `Stmt::Asm` and surfaced as a diagnostic.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single function definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    pub body: Stmt,
}

/// C-family statements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    Compound(Vec<Stmt>),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        #[serde(default)]
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    For {
        #[serde(default)]
        init: Option<Box<Stmt>>,
        #[serde(default)]
        cond: Option<Expr>,
        #[serde(default)]
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    Switch {
        cond: Expr,
        body: Box<Stmt>,
    },
    Case {
        value: String,
        body: Box<Stmt>,
    },
    DefaultCase {
        body: Box<Stmt>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Goto(String),
    Label {
        name: String,
        body: Box<Stmt>,
    },
    Decl {
        name: String,
        #[serde(default)]
        ty: String,
        #[serde(default)]
        init: Option<Expr>,
    },
    Expr(Expr),
    /// Inline assembly or another construct without structural control flow.
    Asm(String),
}

/// C-family expressions. `And`/`Or`/`Conditional` are kept apart from
/// `Binary` because they constrain evaluation order and force the builder
/// to introduce extra basic blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    Ident(String),
    Literal(String),
    Unary {
        op: String,
        operand: Box<Expr>,
    },
    Binary {
        op: String,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        callee: String,
        args: Vec<Expr>,
    },
    And {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Or {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then_value: Box<Expr>,
        else_value: Box<Expr>,
    },
    Comma {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    /// True if evaluating this expression requires branching
    /// (short-circuit or conditional anywhere in the tree).
    pub fn has_branching(&self) -> bool {
        match self {
            Expr::And { .. } | Expr::Or { .. } | Expr::Conditional { .. } => true,
            Expr::Ident(_) | Expr::Literal(_) => false,
            Expr::Unary { operand, .. } => operand.has_branching(),
            Expr::Binary { lhs, rhs, .. }
            | Expr::Assign { lhs, rhs }
            | Expr::Comma { lhs, rhs } => lhs.has_branching() || rhs.has_branching(),
            Expr::Call { args, .. } => args.iter().any(Expr::has_branching),
        }
    }

    /// Call sub-expressions in evaluation order. These become dedicated
    /// leaf ops inside the wrapper op of the enclosing statement.
    pub fn calls(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        self.collect_calls(&mut out);
        out
    }

    fn collect_calls<'a>(&'a self, out: &mut Vec<&'a Expr>) {
        match self {
            Expr::Call { args, .. } => {
                for a in args {
                    a.collect_calls(out);
                }
                out.push(self);
            }
            Expr::Unary { operand, .. } => operand.collect_calls(out),
            Expr::Binary { lhs, rhs, .. }
            | Expr::Assign { lhs, rhs }
            | Expr::And { lhs, rhs }
            | Expr::Or { lhs, rhs }
            | Expr::Comma { lhs, rhs } => {
                lhs.collect_calls(out);
                rhs.collect_calls(out);
            }
            Expr::Conditional {
                cond,
                then_value,
                else_value,
            } => {
                cond.collect_calls(out);
                then_value.collect_calls(out);
                else_value.collect_calls(out);
            }
            Expr::Ident(_) | Expr::Literal(_) => {}
        }
    }

    /// Identifiers read by this expression, in evaluation order.
    pub fn idents(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_idents(&mut out);
        out
    }

    fn collect_idents<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Ident(name) => out.push(name),
            Expr::Literal(_) => {}
            Expr::Unary { operand, .. } => operand.collect_idents(out),
            Expr::Binary { lhs, rhs, .. }
            | Expr::Assign { lhs, rhs }
            | Expr::And { lhs, rhs }
            | Expr::Or { lhs, rhs }
            | Expr::Comma { lhs, rhs } => {
                lhs.collect_idents(out);
                rhs.collect_idents(out);
            }
            Expr::Call { args, .. } => {
                for a in args {
                    a.collect_idents(out);
                }
            }
            Expr::Conditional {
                cond,
                then_value,
                else_value,
            } => {
                cond.collect_idents(out);
                then_value.collect_idents(out);
                else_value.collect_idents(out);
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Ident(name) => write!(f, "{}", name),
            Expr::Literal(text) => write!(f, "{}", text),
            Expr::Unary { op, operand } => write!(f, "{}{}", op, operand),
            Expr::Binary { op, lhs, rhs } => write!(f, "{} {} {}", lhs, op, rhs),
            Expr::Assign { lhs, rhs } => write!(f, "{} = {}", lhs, rhs),
            Expr::Call { callee, args } => {
                write!(f, "{}(", callee)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            Expr::And { lhs, rhs } => write!(f, "{} && {}", lhs, rhs),
            Expr::Or { lhs, rhs } => write!(f, "{} || {}", lhs, rhs),
            Expr::Conditional {
                cond,
                then_value,
                else_value,
            } => write!(f, "{} ? {} : {}", cond, then_value, else_value),
            Expr::Comma { lhs, rhs } => write!(f, "{}, {}", lhs, rhs),
        }
    }
}

/// Convenience constructors used heavily by tests and fixtures.
impl Expr {
    pub fn ident(name: &str) -> Expr {
        Expr::Ident(name.to_string())
    }

    pub fn lit(text: &str) -> Expr {
        Expr::Literal(text.to_string())
    }

    pub fn binary(op: &str, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op: op.to_string(),
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn assign(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Assign {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn call(callee: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            callee: callee.to_string(),
            args,
        }
    }

    pub fn and(lhs: Expr, rhs: Expr) -> Expr {
        Expr::And {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn or(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Or {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }
}
