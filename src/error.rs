//! Error and diagnostic types shared by the graph builders
//!
//! Builders never abort on defective input: defects are recorded as
//! diagnostics on the produced graph and the affected edges fall back to a
//! conservative default. `AnalysisError` is reserved for the driver boundary
//! (unreadable or malformed input documents).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Driver-level errors: failures to obtain an input, not analysis failures.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed input document: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("input document has no `{0}` section")]
    MissingSection(&'static str),
}

/// Classification of a non-fatal defect observed while building a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// An AST construct the SCFG builder cannot lower structurally.
    UnsupportedConstruct,
    /// A goto whose label was never declared, or a break/continue outside
    /// an enclosing loop or switch.
    OrphanJump,
    /// A memory location with no backing alias or debug-metadata entry;
    /// the dependence edge is emitted conservatively.
    MissingAliasInfo,
}

/// A non-fatal defect attached to the graph that was being built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
