//! Execution state models

use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall pipeline run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverallStatus {
    /// Run has not started
    Pending,
    /// Run is in progress
    Running,
    /// Every stage succeeded or was intentionally skipped
    Completed,
    /// An abort-pipeline stage failed, or the run was cancelled
    Aborted,
    /// At least one stage failed but the run still finished
    Failed,
}

impl OverallStatus {
    /// Process exit code for the CLI
    pub fn exit_code(&self) -> u8 {
        match self {
            OverallStatus::Completed => 0,
            OverallStatus::Aborted => 1,
            OverallStatus::Failed => 2,
            // A report is only handed out once finalized
            OverallStatus::Pending | OverallStatus::Running => 1,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OverallStatus::Completed | OverallStatus::Aborted | OverallStatus::Failed
        )
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OverallStatus::Pending => "pending",
            OverallStatus::Running => "running",
            OverallStatus::Completed => "completed",
            OverallStatus::Aborted => "aborted",
            OverallStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of a single stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Succeeded | StageStatus::Failed | StageStatus::Skipped
        )
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Why a stage did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// A dependency failed under skip-dependents, or was itself skipped for that reason
    DependencyFailed,
    /// The stage's `when` condition was false
    Condition,
    /// Command stages do not run in a dry run
    DryRun,
    /// An abort-pipeline stage failed earlier in the run
    Aborted,
    /// The run was cancelled before the stage started
    Cancelled,
}

impl SkipReason {
    /// Whether dependents of a stage skipped for this reason are skipped too
    pub fn propagates(&self) -> bool {
        matches!(self, SkipReason::DependencyFailed)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::DependencyFailed => "dependency failed",
            SkipReason::Condition => "condition not met",
            SkipReason::DryRun => "dry run",
            SkipReason::Aborted => "pipeline aborted",
            SkipReason::Cancelled => "run cancelled",
        };
        f.write_str(s)
    }
}
