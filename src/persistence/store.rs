//! SQLite-based run history store

use crate::core::OverallStatus;
use crate::persistence::{PersistenceBackend, RunSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use uuid::Uuid;

const SELECT_COLUMNS: &str = "SELECT id, pipeline, workspace, status, dry_run, cancelled, \
     started_at, finished_at, stages_total, stages_succeeded, stages_failed, stages_skipped, \
     files_changed, file_errors \
     FROM runs";

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Open (creating if needed) the database at `db_path`
    pub async fn new(db_path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open run history at {}", db_path.display()))?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("repoforge");
        std::fs::create_dir_all(&db_dir)
            .with_context(|| format!("Failed to create {}", db_dir.display()))?;

        Self::new(&db_dir.join("runs.db")).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                pipeline TEXT NOT NULL,
                workspace TEXT NOT NULL,
                status TEXT NOT NULL,
                dry_run INTEGER NOT NULL,
                cancelled INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                stages_total INTEGER NOT NULL DEFAULT 0,
                stages_succeeded INTEGER NOT NULL DEFAULT 0,
                stages_failed INTEGER NOT NULL DEFAULT 0,
                stages_skipped INTEGER NOT NULL DEFAULT 0,
                files_changed INTEGER NOT NULL DEFAULT 0,
                file_errors INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create runs table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_pipeline ON runs(pipeline)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn parse_status(status: &str) -> OverallStatus {
        match status {
            "completed" => OverallStatus::Completed,
            "aborted" => OverallStatus::Aborted,
            "failed" => OverallStatus::Failed,
            "running" => OverallStatus::Running,
            _ => OverallStatus::Pending,
        }
    }

    fn parse_time(value: &str) -> Result<DateTime<Utc>> {
        Ok(DateTime::parse_from_rfc3339(value)
            .with_context(|| format!("Invalid timestamp in run history: {}", value))?
            .with_timezone(&Utc))
    }

    fn from_row(row: &SqliteRow) -> Result<RunSummary> {
        let finished_at = match row.get::<Option<String>, _>("finished_at") {
            Some(ts) => Some(Self::parse_time(&ts)?),
            None => None,
        };
        Ok(RunSummary {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            pipeline: row.get("pipeline"),
            workspace: row.get("workspace"),
            status: Self::parse_status(&row.get::<String, _>("status")),
            dry_run: row.get::<i64, _>("dry_run") != 0,
            cancelled: row.get::<i64, _>("cancelled") != 0,
            started_at: Self::parse_time(&row.get::<String, _>("started_at"))?,
            finished_at,
            stages_total: row.get::<i64, _>("stages_total") as usize,
            stages_succeeded: row.get::<i64, _>("stages_succeeded") as usize,
            stages_failed: row.get::<i64, _>("stages_failed") as usize,
            stages_skipped: row.get::<i64, _>("stages_skipped") as usize,
            files_changed: row.get::<i64, _>("files_changed") as usize,
            file_errors: row.get::<i64, _>("file_errors") as usize,
        })
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteRunStore {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, pipeline, workspace, status, dry_run, cancelled, started_at, finished_at,
             stages_total, stages_succeeded, stages_failed, stages_skipped,
             files_changed, file_errors)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(&run.pipeline)
        .bind(&run.workspace)
        .bind(run.status.to_string())
        .bind(run.dry_run as i64)
        .bind(run.cancelled as i64)
        .bind(run.started_at.to_rfc3339())
        .bind(run.finished_at.map(|t| t.to_rfc3339()))
        .bind(run.stages_total as i64)
        .bind(run.stages_succeeded as i64)
        .bind(run.stages_failed as i64)
        .bind(run.stages_skipped as i64)
        .bind(run.files_changed as i64)
        .bind(run.file_errors as i64)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let row = sqlx::query(&format!("{} WHERE id = ?1", SELECT_COLUMNS))
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_runs(&self, pipeline: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        let rows = match pipeline {
            Some(name) => {
                sqlx::query(&format!(
                    "{} WHERE pipeline = ?1 ORDER BY started_at DESC LIMIT ?2",
                    SELECT_COLUMNS
                ))
                .bind(name)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!("{} ORDER BY started_at DESC LIMIT ?1", SELECT_COLUMNS))
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .context("Failed to list runs")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT pipeline FROM runs ORDER BY pipeline ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list pipelines")?;

        Ok(rows.iter().map(|row| row.get("pipeline")).collect())
    }
}
