//! Run report - the record of every stage outcome and file change in a run

use crate::core::state::{OverallStatus, SkipReason, StageStatus};
use crate::error::{FileErrorKind, PatchError};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A file rewritten (or, in a dry run, that would be rewritten) by a patch pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeRecord {
    /// Path relative to the patch root, `/`-separated
    pub path: String,
    /// Ids of the rules that changed the content, in application order
    pub rules_applied: Vec<String>,
    pub bytes_before: u64,
    pub bytes_after: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileSkipReason {
    Binary,
    InvalidUtf8,
    SymlinkEscapesRoot,
}

impl std::fmt::Display for FileSkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FileSkipReason::Binary => "binary",
            FileSkipReason::InvalidUtf8 => "not valid UTF-8",
            FileSkipReason::SymlinkEscapesRoot => "symlink escapes root",
        };
        f.write_str(s)
    }
}

/// A file the patcher refused to touch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: FileSkipReason,
}

/// A per-file failure recorded during a patch pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub path: String,
    pub kind: FileErrorKind,
    pub message: String,
}

impl FileError {
    pub fn new(path: impl Into<String>, error: &PatchError) -> Self {
        Self {
            path: path.into(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Outcome of one stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: String,
    pub status: StageStatus,
    /// Exit code of the last process attempt, if one ran to completion
    pub exit_status: Option<i32>,
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl StageResult {
    pub fn skipped(stage: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            stage: stage.into(),
            status: StageStatus::Skipped,
            exit_status: None,
            attempts: 0,
            duration_ms: 0,
            error: None,
            skip_reason: Some(reason),
            started_at: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == StageStatus::Failed
    }
}

/// Full record of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline: String,
    pub workspace: PathBuf,
    pub dry_run: bool,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub overall_status: OverallStatus,
    pub stage_results: Vec<StageResult>,
    pub file_changes: Vec<FileChangeRecord>,
    pub skipped_files: Vec<SkippedFile>,
    pub file_errors: Vec<FileError>,
}

impl RunReport {
    pub fn new(pipeline: impl Into<String>, workspace: impl Into<PathBuf>, dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline: pipeline.into(),
            workspace: workspace.into(),
            dry_run,
            cancelled: false,
            started_at: Utc::now(),
            finished_at: None,
            overall_status: OverallStatus::Running,
            stage_results: Vec::new(),
            file_changes: Vec::new(),
            skipped_files: Vec::new(),
            file_errors: Vec::new(),
        }
    }

    pub fn record_stage(&mut self, result: StageResult) {
        self.stage_results.push(result);
    }

    pub fn record_patch(
        &mut self,
        changes: Vec<FileChangeRecord>,
        skipped: Vec<SkippedFile>,
        errors: Vec<FileError>,
    ) {
        self.file_changes.extend(changes);
        self.skipped_files.extend(skipped);
        self.file_errors.extend(errors);
    }

    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stage_results.iter().find(|r| r.stage == name)
    }

    pub fn count(&self, status: StageStatus) -> usize {
        self.stage_results
            .iter()
            .filter(|r| r.status == status)
            .count()
    }

    /// Close the report.
    ///
    /// `aborted` is set when an abort-pipeline stage failed; cancellation
    /// also ends the run as aborted.
    pub fn finalize(&mut self, aborted: bool) {
        self.overall_status = if aborted || self.cancelled {
            OverallStatus::Aborted
        } else if self.stage_results.iter().any(StageResult::is_failed) {
            OverallStatus::Failed
        } else {
            OverallStatus::Completed
        };
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> u64 {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize run report")
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))
    }
}
