//! Persistence layer for run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::{OverallStatus, RunReport, StageStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Condensed record of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub pipeline: String,
    pub workspace: String,
    pub status: OverallStatus,
    pub dry_run: bool,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages_total: usize,
    pub stages_succeeded: usize,
    pub stages_failed: usize,
    pub stages_skipped: usize,
    pub files_changed: usize,
    pub file_errors: usize,
}

impl RunSummary {
    pub fn from_report(report: &RunReport) -> Self {
        Self {
            run_id: report.run_id,
            pipeline: report.pipeline.clone(),
            workspace: report.workspace.display().to_string(),
            status: report.overall_status,
            dry_run: report.dry_run,
            cancelled: report.cancelled,
            started_at: report.started_at,
            finished_at: report.finished_at,
            stages_total: report.stage_results.len(),
            stages_succeeded: report.count(StageStatus::Succeeded),
            stages_failed: report.count(StageStatus::Failed),
            stages_skipped: report.count(StageStatus::Skipped),
            files_changed: report.file_changes.len(),
            file_errors: report.file_errors.len(),
        }
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save (or replace) a run summary
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by id
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// Most recent runs first, optionally for one pipeline
    async fn list_runs(&self, pipeline: Option<&str>, limit: usize) -> Result<Vec<RunSummary>>;

    /// Names of every pipeline with recorded runs
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, RunSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        self.runs.write().await.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, pipeline: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut result: Vec<RunSummary> = runs
            .values()
            .filter(|r| pipeline.map_or(true, |p| r.pipeline == p))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        result.truncate(limit);
        Ok(result)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<String> = runs.values().map(|r| r.pipeline.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}
