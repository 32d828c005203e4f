//! CLI output formatting

use crate::{
    core::{OverallStatus, RunReport, StageResult, StageStatus},
    execution::RunEvent,
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static PENCIL: Emoji<'_, '_> = Emoji("📝 ", "* ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a progress bar over the stage count
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let template = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}");
    if let Ok(bar_style) = template {
        progress.set_style(bar_style.progress_chars("#>-"));
    }
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format an overall status for display
pub fn format_status(status: OverallStatus) -> String {
    match status {
        OverallStatus::Pending => style("PENDING").dim().to_string(),
        OverallStatus::Running => style("RUNNING").yellow().to_string(),
        OverallStatus::Completed => style("COMPLETED").green().to_string(),
        OverallStatus::Aborted => style("ABORTED").red().bold().to_string(),
        OverallStatus::Failed => style("FAILED").red().to_string(),
    }
}

fn status_icon(status: OverallStatus) -> &'static Emoji<'static, 'static> {
    match status {
        OverallStatus::Completed => &CHECK,
        OverallStatus::Aborted | OverallStatus::Failed => &CROSS,
        OverallStatus::Running => &SPINNER,
        OverallStatus::Pending => &INFO,
    }
}

/// One line per stage result
pub fn format_stage_result(result: &StageResult) -> String {
    match result.status {
        StageStatus::Succeeded => {
            let retries = if result.attempts > 1 {
                format!(" after {} attempts", result.attempts)
            } else {
                String::new()
            };
            format!(
                "{} {} {}{}",
                CHECK,
                style(&result.stage).green(),
                style(format_duration(Duration::from_millis(result.duration_ms))).dim(),
                retries
            )
        }
        StageStatus::Failed => format!(
            "{} {}: {}",
            CROSS,
            style(&result.stage).red(),
            style(result.error.as_deref().unwrap_or("failed")).dim()
        ),
        StageStatus::Skipped => format!(
            "{} {} ({})",
            SKIP,
            style(&result.stage).dim(),
            result
                .skip_reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "skipped".to_string())
        ),
        StageStatus::Pending | StageStatus::Running => {
            format!("{} {}", SPINNER, style(&result.stage).cyan())
        }
    }
}

/// Format a run event for display. Events with no line of their own yield `None`.
pub fn format_run_event(event: &RunEvent) -> Option<String> {
    let line = match event {
        RunEvent::RunStarted {
            run_id,
            pipeline,
            total_stages,
            dry_run,
        } => format!(
            "{} {} {} ({}, {} stages)",
            ROCKET,
            if *dry_run { "Dry run of" } else { "Starting pipeline" },
            style(pipeline).bold(),
            style(&run_id.to_string()[..8]).dim(),
            total_stages
        ),
        RunEvent::StageStarted {
            stage,
            attempt,
            max_attempts,
        } => {
            if *attempt > 1 {
                format!(
                    "{} {} (attempt {}/{})",
                    SPINNER,
                    style(stage).cyan(),
                    attempt,
                    max_attempts
                )
            } else {
                format!("{} {}", SPINNER, style(stage).cyan())
            }
        }
        RunEvent::StageRetrying {
            stage,
            attempt,
            max_attempts,
            delay_ms,
            error,
        } => format!(
            "{} {} failed attempt {}/{}: {} (retrying in {})",
            WARN,
            style(stage).yellow(),
            attempt,
            max_attempts,
            style(error).dim(),
            format_duration(Duration::from_millis(*delay_ms))
        ),
        RunEvent::StageFinished { result } => format_stage_result(result),
        RunEvent::StageSkipped { stage, reason } => {
            format!("{} {} ({})", SKIP, style(stage).dim(), reason)
        }
        RunEvent::FilePatched { change, .. } => format!(
            "  {} {} [{}]",
            PENCIL,
            change.path,
            style(change.rules_applied.join(", ")).dim()
        ),
        RunEvent::RunFinished { .. } => return None,
    };
    Some(line)
}

/// Closing summary for a finished run
pub fn format_report_summary(report: &RunReport) -> String {
    let mut lines = vec![format!(
        "{} {} {} in {}",
        status_icon(report.overall_status),
        style(&report.pipeline).bold(),
        format_status(report.overall_status),
        format_duration(Duration::from_millis(report.duration_ms()))
    )];

    lines.push(format!(
        "  Stages: {} succeeded, {} failed, {} skipped",
        style(report.count(StageStatus::Succeeded)).green(),
        style(report.count(StageStatus::Failed)).red(),
        style(report.count(StageStatus::Skipped)).dim()
    ));

    let verb = if report.dry_run { "would change" } else { "changed" };
    lines.push(format!("  Files {}: {}", verb, style(report.file_changes.len()).cyan()));

    for skipped in &report.skipped_files {
        lines.push(format!("  {} {} ({})", SKIP, skipped.path, skipped.reason));
    }
    for error in &report.file_errors {
        lines.push(format!("  {} {}: {}", WARN, error.path, style(&error.message).red()));
    }
    if report.cancelled {
        lines.push(format!("  {} Run was cancelled", WARN));
    }

    lines.join("\n")
}

/// Format a run summary for the history listing
pub fn format_run_summary(summary: &RunSummary) -> String {
    let duration = summary
        .finished_at
        .and_then(|end| end.signed_duration_since(summary.started_at).to_std().ok())
        .map(format_duration)
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{} {} - {} - {}{} - {} ({}/{} stages ok, {} files) - {}",
        status_icon(summary.status),
        style(&summary.run_id.to_string()[..8]).dim(),
        style(&summary.pipeline).bold(),
        format_status(summary.status),
        if summary.dry_run { " (dry run)" } else { "" },
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim(),
        summary.stages_succeeded,
        summary.stages_total,
        summary.files_changed,
        duration
    )
}

/// Hint listing the pipelines that do have history, if any
pub fn format_known_pipelines(pipelines: &[String]) -> Option<String> {
    if pipelines.is_empty() {
        return None;
    }
    Some(format!("  Pipelines with history: {}", pipelines.join(", ")))
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
