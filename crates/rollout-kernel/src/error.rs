//! Kernel-local errors
//!
//! The run-level taxonomy lives in `rollout_core::error`; these cover the
//! engine's own bookkeeping.

use rollout_core::{ControlPlaneError, HostUpgradeState, RemoteError};

/// State machine rejected a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal host state transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: HostUpgradeState,
    pub to: HostUpgradeState,
}

/// A single readiness check could not produce an outcome
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    /// Command ran but its output made no sense
    #[error("unexpected output: {0}")]
    Unparseable(String),

    #[error("command exited with {code}: {summary}")]
    Command { code: i32, summary: String },
}

/// Audit chain errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuditError {
    /// Event does not link to its predecessor or its hash does not match
    #[error("audit chain broken at event {seq}")]
    IntegrityViolation { seq: u64 },
}

/// Report could not be persisted
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("cannot write report to {}: {source}", .path.display())]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot encode report: {0}")]
    Encode(#[from] serde_json::Error),
}
