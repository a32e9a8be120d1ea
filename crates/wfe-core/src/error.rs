//! Engine-wide error type.
//!
//! `WorkflowPaused` and `WorkflowFailure` are the two first-class
//! control-flow signals the interpreter raises on purpose (loop
//! exhaustion, handler-requested pause/fail). Every other variant is an
//! unexpected infrastructure fault that propagates unchanged out of
//! `run`/`resume`.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} \"{name}\" not found (searched: {searched})")]
    NotFound {
        kind: &'static str,
        name: String,
        searched: String,
    },

    #[error("{0}")]
    SchemaError(String),

    #[error("escapes workflow directory: {0}")]
    PathEscapesWorkflowDir(PathBuf),

    #[error("handler \"{0}\" not registered")]
    HandlerNotFound(String),

    #[error("per-task source \"{0}\" did not resolve to an array")]
    PerTaskSourceNotArray(String),

    #[error("Circular dependency: {0}")]
    CircularDependency(String),

    #[error("Phase \"{0}\" not found")]
    PhaseNotFound(String),

    #[error("invalid condition expression: {0}")]
    InvalidExpr(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(String),

    /// Raised by `escalate` loop exhaustion or by a handler.
    #[error("workflow paused at \"{paused_at_phase}\": {blocker_details}")]
    WorkflowPaused {
        paused_at_phase: String,
        blocker_details: String,
    },

    /// Raised by `fail` loop exhaustion or an explicit handler/agent failure.
    #[error("workflow failed in phase \"{phase}\": {reason}")]
    WorkflowFailure { phase: String, reason: String },

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(kind: &'static str, name: impl Into<String>, searched: Vec<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
            searched: searched.join(", "),
        }
    }

    pub fn paused(phase: impl Into<String>, details: impl Into<String>) -> Self {
        Error::WorkflowPaused {
            paused_at_phase: phase.into(),
            blocker_details: details.into(),
        }
    }

    pub fn failure(phase: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::WorkflowFailure {
            phase: phase.into(),
            reason: reason.into(),
        }
    }

    /// `true` for the two first-class control-flow outcomes; `false` for
    /// everything that should propagate as a raw infrastructure fault.
    pub fn is_control_flow(&self) -> bool {
        matches!(self, Error::WorkflowPaused { .. } | Error::WorkflowFailure { .. })
    }
}
