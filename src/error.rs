//! Error types for pipeline construction, stage execution and manifest patching

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building or starting a pipeline.
///
/// Every variant here is fatal: it is returned before any stage runs, so a
/// pipeline that fails with one of these has had no side effects.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("cycle detected in stage graph involving: {}", .cycle.join(", "))]
    CycleDetected { cycle: Vec<String> },

    #[error("duplicate stage name: {0}")]
    DuplicateStage(String),

    #[error("stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    #[error("invalid stage '{stage}': {reason}")]
    InvalidStage { stage: String, reason: String },

    #[error("undefined variable '{name}' referenced in {location}")]
    UndefinedVariable { name: String, location: String },

    #[error(
        "workspace {} is busy ({holder}); remove the lock file if no run is active",
        .root.display()
    )]
    WorkspaceBusy { root: PathBuf, holder: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_rule(rule: &str, reason: impl Into<String>) -> Self {
        PipelineError::InvalidRule {
            rule: rule.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while executing a single stage attempt
#[derive(Debug, Error)]
pub enum StageError {
    #[error("failed to spawn `{program}`: {message}")]
    Spawn { program: String, message: String },

    #[error("exited with status {exit_code}: {stderr_tail}")]
    Execution { exit_code: i32, stderr_tail: String },

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("cancelled")]
    Cancelled,

    #[error("manifest patch failed: {0}")]
    Patch(String),

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<StageError>,
    },
}

impl StageError {
    /// Exit status of the underlying process, if the stage got that far
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            StageError::Execution { exit_code, .. } => Some(*exit_code),
            StageError::RetriesExhausted { last, .. } => last.exit_code(),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            StageError::Cancelled => true,
            StageError::RetriesExhausted { last, .. } => last.is_cancelled(),
            _ => false,
        }
    }
}

/// Per-file failure during a patch pass. Never aborts the pass by itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("rule '{rule}' changes its own output; refusing to write")]
    NotIdempotent { rule: String },

    #[error("{0}")]
    Io(String),
}

impl PatchError {
    pub fn from_io(err: &std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            PatchError::PermissionDenied
        } else {
            PatchError::Io(err.to_string())
        }
    }

    pub fn kind(&self) -> FileErrorKind {
        match self {
            PatchError::PermissionDenied => FileErrorKind::PermissionDenied,
            PatchError::NotIdempotent { .. } => FileErrorKind::NotIdempotent,
            PatchError::Io(_) => FileErrorKind::Io,
        }
    }
}

/// Serializable classification of a [`PatchError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileErrorKind {
    PermissionDenied,
    NotIdempotent,
    Io,
}
