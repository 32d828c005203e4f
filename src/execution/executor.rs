//! Stage executor - runs one stage with retries, backoff and timeout

use crate::{
    core::{
        context::RunContext,
        report::StageResult,
        rule::PatchRuleSet,
        stage::{PatchTarget, Stage, StageAction},
        state::StageStatus,
    },
    error::{PipelineError, StageError},
    execution::{
        cancel::CancelHandle,
        engine::RunEvent,
        process::{ProcessRunner, STDERR_TAIL_LINES},
    },
    patch::{ManifestPatcher, PatchOptions, PatchOutcome},
};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

/// Everything one stage produced
#[derive(Debug)]
pub struct StageExecution {
    pub result: StageResult,
    /// Merged patch outcome, for patch stages
    pub patch: Option<PatchOutcome>,
    /// Final error, if the stage failed
    pub error: Option<StageError>,
}

impl StageExecution {
    pub fn is_cancelled(&self) -> bool {
        self.error.as_ref().is_some_and(StageError::is_cancelled)
    }
}

/// Outcome of a single attempt
struct Attempt {
    exit_code: Option<i32>,
    patch: Option<PatchOutcome>,
    error: Option<StageError>,
}

impl Attempt {
    fn failed(error: StageError) -> Self {
        Self {
            exit_code: error.exit_code(),
            patch: None,
            error: Some(error),
        }
    }
}

/// Executes a single stage
pub struct StageExecutor<R> {
    runner: R,
}

impl<R: ProcessRunner> StageExecutor<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn into_runner(self) -> R {
        self.runner
    }

    /// Run `stage` (already resolved against `ctx`) until it succeeds or its
    /// retry policy is used up.
    ///
    /// Backoff sleeps end early when `cancel` fires; a cancelled stage is not
    /// retried.
    pub async fn execute(
        &self,
        stage: &Stage,
        rules: &Arc<PatchRuleSet>,
        ctx: &RunContext,
        cancel: &CancelHandle,
        emit: &(dyn Fn(RunEvent) + Send + Sync),
    ) -> StageExecution {
        info!("Executing stage: {}", stage.name);

        let started_at = Utc::now();
        let clock = Instant::now();
        let max_attempts = stage.retry.max_attempts.max(1);

        let mut attempts = 0;
        let mut exit_status = None;
        let mut last_error: Option<StageError> = None;
        let mut patch: Option<PatchOutcome> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = stage.retry.backoff.delay_before(attempt);
                let reason = last_error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                warn!(
                    "Retrying stage {} (attempt {}/{}) in {}ms: {}",
                    stage.name,
                    attempt,
                    max_attempts,
                    delay.as_millis(),
                    reason
                );
                emit(RunEvent::StageRetrying {
                    stage: stage.name.clone(),
                    attempt,
                    max_attempts,
                    delay_ms: delay.as_millis() as u64,
                    error: reason,
                });

                if !delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {
                            last_error = Some(StageError::Cancelled);
                            break;
                        }
                    }
                }
            }

            if cancel.is_cancelled() {
                last_error = Some(StageError::Cancelled);
                break;
            }

            attempts = attempt;
            emit(RunEvent::StageStarted {
                stage: stage.name.clone(),
                attempt,
                max_attempts,
            });

            let outcome = self.attempt(stage, rules, ctx, cancel).await;
            exit_status = outcome.exit_code;
            if let Some(current) = outcome.patch {
                patch = Some(merge_patch(patch, current));
            }
            last_error = outcome.error;

            match &last_error {
                None => break,
                Some(e) if e.is_cancelled() => break,
                Some(e) => debug!("Stage {} attempt {} failed: {}", stage.name, attempt, e),
            }
        }

        let error = last_error.map(|e| {
            if attempts > 1 && !e.is_cancelled() {
                StageError::RetriesExhausted {
                    attempts,
                    last: Box::new(e),
                }
            } else {
                e
            }
        });

        let status = match &error {
            None => {
                info!("Stage {} succeeded after {} attempt(s)", stage.name, attempts);
                StageStatus::Succeeded
            }
            Some(e) => {
                error!("Stage {} failed: {}", stage.name, e);
                StageStatus::Failed
            }
        };

        StageExecution {
            result: StageResult {
                stage: stage.name.clone(),
                status,
                exit_status,
                attempts,
                duration_ms: clock.elapsed().as_millis() as u64,
                error: error.as_ref().map(ToString::to_string),
                skip_reason: None,
                started_at: Some(started_at),
            },
            patch,
            error,
        }
    }

    async fn attempt(
        &self,
        stage: &Stage,
        rules: &Arc<PatchRuleSet>,
        ctx: &RunContext,
        cancel: &CancelHandle,
    ) -> Attempt {
        let limit = stage.timeout_secs.or(ctx.default_timeout_secs);

        match &stage.action {
            StageAction::Command(spec) => {
                let run = self.runner.run(spec, cancel);
                let result = match limit {
                    Some(secs) => match timeout(Duration::from_secs(secs), run).await {
                        Ok(result) => result,
                        Err(_) => Err(StageError::Timeout(secs)),
                    },
                    None => run.await,
                };

                match result {
                    Ok(output) if output.success() => Attempt {
                        exit_code: Some(output.exit_code),
                        patch: None,
                        error: None,
                    },
                    Ok(output) => Attempt::failed(StageError::Execution {
                        exit_code: output.exit_code,
                        stderr_tail: output.stderr_tail(STDERR_TAIL_LINES),
                    }),
                    Err(e) => Attempt::failed(e),
                }
            }
            StageAction::Patch(target) => {
                match run_patch(target, rules, ctx, limit, cancel).await {
                    Ok((outcome, Some(interruption))) => Attempt {
                        exit_code: None,
                        patch: Some(outcome),
                        error: Some(interruption),
                    },
                    Ok((outcome, None)) => {
                        let error = (ctx.strict && outcome.has_errors()).then(|| {
                            StageError::Patch(format!(
                                "{} file(s) could not be patched under {}",
                                outcome.errors.len(),
                                target.root.display()
                            ))
                        });
                        Attempt {
                            exit_code: None,
                            patch: Some(outcome),
                            error,
                        }
                    }
                    Err(e) => Attempt::failed(e),
                }
            }
        }
    }
}

/// Patch passes walk the file system, so they run on the blocking pool.
///
/// A timeout or cancellation raises the pass's stop flag and then waits for
/// it, so the files already rewritten are reported alongside the error and no
/// pass outlives its attempt.
async fn run_patch(
    target: &PatchTarget,
    rules: &Arc<PatchRuleSet>,
    ctx: &RunContext,
    limit: Option<u64>,
    cancel: &CancelHandle,
) -> Result<(PatchOutcome, Option<StageError>), StageError> {
    let patcher = ManifestPatcher::new(PatchOptions {
        dry_run: ctx.dry_run,
        backup: ctx.backup,
    });
    let rules = Arc::clone(rules);
    let root = target.root.clone();
    let stop = Arc::new(AtomicBool::new(false));

    let mut task = {
        let stop = Arc::clone(&stop);
        tokio::task::spawn_blocking(move || patcher.apply_until(&root, &rules, &stop))
    };

    let interruption = tokio::select! {
        biased;
        _ = cancel.cancelled() => StageError::Cancelled,
        _ = sleep_for(limit) => StageError::Timeout(limit.unwrap_or_default()),
        joined = &mut task => return Ok((patch_result(joined)?, None)),
    };

    debug!("Stopping patch pass under {}: {}", target.root.display(), interruption);
    stop.store(true, Ordering::SeqCst);
    let outcome = patch_result(task.await)?;
    Ok((outcome, Some(interruption)))
}

fn patch_result(
    joined: Result<Result<PatchOutcome, PipelineError>, JoinError>,
) -> Result<PatchOutcome, StageError> {
    joined
        .map_err(|e| StageError::Patch(format!("patch task failed: {}", e)))?
        .map_err(|e| StageError::Patch(e.to_string()))
}

/// Never resolves without a limit
async fn sleep_for(limit: Option<u64>) {
    match limit {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending().await,
    }
}

/// One change record per path across attempts, the latest attempt winning.
/// Skips and errors reflect the last attempt.
fn merge_patch(previous: Option<PatchOutcome>, current: PatchOutcome) -> PatchOutcome {
    match previous {
        None => current,
        Some(mut merged) => {
            for change in current.changes {
                match merged.changes.iter_mut().find(|c| c.path == change.path) {
                    Some(existing) => *existing = change,
                    None => merged.changes.push(change),
                }
            }
            merged.skipped = current.skipped;
            merged.errors = current.errors;
            merged
        }
    }
}
