//! Main execution engine - orchestrates the entire pipeline run

use crate::{
    core::{
        context::RunContext,
        pipeline::{Pipeline, PreparedRun},
        report::{FileChangeRecord, RunReport, StageResult},
        stage::{FailurePolicy, Stage, StageAction},
        state::{OverallStatus, SkipReason, StageStatus},
    },
    error::PipelineError,
    execution::{
        cancel::CancelHandle,
        executor::StageExecutor,
        lock::WorkspaceLock,
        process::ProcessRunner,
        scheduler::{ExecutionScheduler, Footprint, SchedulingStrategy},
    },
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events that can occur during a pipeline run
#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted {
        run_id: Uuid,
        pipeline: String,
        total_stages: usize,
        dry_run: bool,
    },
    StageStarted {
        stage: String,
        attempt: u32,
        max_attempts: u32,
    },
    StageRetrying {
        stage: String,
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        error: String,
    },
    StageFinished {
        result: StageResult,
    },
    StageSkipped {
        stage: String,
        reason: SkipReason,
    },
    FilePatched {
        stage: String,
        change: FileChangeRecord,
    },
    RunFinished {
        run_id: Uuid,
        status: OverallStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(RunEvent) + Send + Sync>;

/// Executes a pipeline's stage graph against a workspace
pub struct PipelineRunner<R> {
    scheduler: ExecutionScheduler,
    executor: StageExecutor<R>,
    event_handlers: Vec<EventHandler>,
    cancel: CancelHandle,
}

impl<R: ProcessRunner> PipelineRunner<R> {
    pub fn new(runner: R, strategy: SchedulingStrategy) -> Self {
        Self {
            scheduler: ExecutionScheduler::new(strategy),
            executor: StageExecutor::new(runner),
            event_handlers: Vec::new(),
            cancel: CancelHandle::new(),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(RunEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    pub fn with_event_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(RunEvent) + Send + Sync + 'static,
    {
        self.add_event_handler(handler);
        self
    }

    /// Handle that cancels this runner's runs. Completed stage results are kept.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn process_runner(&self) -> &R {
        self.executor.runner()
    }

    pub fn into_process_runner(self) -> R {
        self.executor.into_runner()
    }

    /// Emit an event to all handlers
    fn emit(&self, event: RunEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Run the pipeline.
    ///
    /// Templates and conditions are resolved and the workspace lock is taken
    /// before anything else happens; an `Err` therefore means no stage ran.
    /// Stage failures are not errors: they are recorded in the report.
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        ctx: &RunContext,
    ) -> Result<RunReport, PipelineError> {
        let prepared = pipeline.prepare(ctx)?;
        let mut report = RunReport::new(&pipeline.name, &ctx.workspace, ctx.dry_run);

        // A dry run against a workspace that does not exist yet has nothing to protect
        let _lock = if ctx.dry_run && !ctx.workspace.exists() {
            None
        } else {
            Some(WorkspaceLock::acquire(&ctx.workspace, report.run_id)?)
        };

        info!(
            "Starting pipeline run: {} ({}){}",
            pipeline.name,
            report.run_id,
            if ctx.dry_run { " [dry run]" } else { "" }
        );
        self.emit(RunEvent::RunStarted {
            run_id: report.run_id,
            pipeline: pipeline.name.clone(),
            total_stages: prepared.stages.len(),
            dry_run: ctx.dry_run,
        });

        let aborted = self.run_stages(&prepared, ctx, &mut report).await;

        report.cancelled = report.cancelled || self.cancel.is_cancelled();
        report
            .stage_results
            .sort_by_key(|r| pipeline.graph.position(&r.stage));
        report.finalize(aborted);

        info!(
            "Pipeline {} finished: {} ({} succeeded, {} failed, {} skipped)",
            pipeline.name,
            report.overall_status,
            report.count(StageStatus::Succeeded),
            report.count(StageStatus::Failed),
            report.count(StageStatus::Skipped)
        );
        self.emit(RunEvent::RunFinished {
            run_id: report.run_id,
            status: report.overall_status,
        });

        Ok(report)
    }

    /// Main execution loop. Returns whether an abort-pipeline stage failed.
    async fn run_stages(
        &self,
        prepared: &PreparedRun,
        ctx: &RunContext,
        report: &mut RunReport,
    ) -> bool {
        let stages = &prepared.stages;
        let footprints: Vec<Footprint> =
            stages.iter().map(|s| Footprint::of(s, &ctx.env)).collect();
        let mut statuses: HashMap<String, StageStatus> = HashMap::new();
        let mut skip_reasons: HashMap<String, SkipReason> = HashMap::new();
        let mut aborted = false;
        let emit = |event: RunEvent| self.emit(event);

        loop {
            let batch = self.scheduler.next_batch(stages, &statuses, &footprints);
            if batch.is_empty() {
                break;
            }

            let mut to_run: Vec<&Stage> = Vec::new();
            for i in batch {
                let stage = &stages[i];
                let skip =
                    self.skip_reason(stage, prepared, ctx, &statuses, &skip_reasons, aborted);
                match skip {
                    Some(reason) => {
                        info!("Skipping stage {}: {}", stage.name, reason);
                        statuses.insert(stage.name.clone(), StageStatus::Skipped);
                        skip_reasons.insert(stage.name.clone(), reason);
                        report.record_stage(StageResult::skipped(&stage.name, reason));
                        self.emit(RunEvent::StageSkipped {
                            stage: stage.name.clone(),
                            reason,
                        });
                    }
                    None => {
                        statuses.insert(stage.name.clone(), StageStatus::Running);
                        to_run.push(stage);
                    }
                }
            }

            if to_run.is_empty() {
                continue;
            }

            let executions = futures::future::join_all(to_run.iter().map(|stage| {
                self.executor
                    .execute(stage, &prepared.rules, ctx, &self.cancel, &emit)
            }))
            .await;

            for (stage, mut execution) in to_run.into_iter().zip(executions) {
                if let Some(patch) = execution.patch.take() {
                    for change in &patch.changes {
                        self.emit(RunEvent::FilePatched {
                            stage: stage.name.clone(),
                            change: change.clone(),
                        });
                    }
                    report.record_patch(patch.changes, patch.skipped, patch.errors);
                }

                if execution.is_cancelled() {
                    report.cancelled = true;
                } else if execution.result.is_failed()
                    && stage.on_failure == FailurePolicy::AbortPipeline
                {
                    warn!("Stage {} failed with abort-pipeline; stopping", stage.name);
                    aborted = true;
                }

                statuses.insert(stage.name.clone(), execution.result.status);
                self.emit(RunEvent::StageFinished {
                    result: execution.result.clone(),
                });
                report.record_stage(execution.result);
            }
        }

        aborted
    }

    fn skip_reason(
        &self,
        stage: &Stage,
        prepared: &PreparedRun,
        ctx: &RunContext,
        statuses: &HashMap<String, StageStatus>,
        skip_reasons: &HashMap<String, SkipReason>,
        aborted: bool,
    ) -> Option<SkipReason> {
        if self.cancel.is_cancelled() {
            return Some(SkipReason::Cancelled);
        }
        if aborted {
            return Some(SkipReason::Aborted);
        }

        let blocked = stage.depends_on.iter().any(|dep| {
            let failed_and_contained = statuses.get(dep) == Some(&StageStatus::Failed)
                && prepared
                    .stages
                    .iter()
                    .find(|s| &s.name == dep)
                    .is_some_and(|s| s.on_failure == FailurePolicy::SkipDependents);
            let skipped_transitively = skip_reasons.get(dep).is_some_and(SkipReason::propagates);
            failed_and_contained || skipped_transitively
        });
        if blocked {
            return Some(SkipReason::DependencyFailed);
        }

        if !prepared.condition_met(&stage.name) {
            return Some(SkipReason::Condition);
        }
        if ctx.dry_run && matches!(stage.action, StageAction::Command(_)) {
            return Some(SkipReason::DryRun);
        }
        None
    }
}
