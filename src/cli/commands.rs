//! CLI command definitions

use crate::core::{context::RunContext, pipeline::Pipeline};
use crate::execution::SchedulingStrategy;
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

/// Run (or dry-run) a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    pub file: PathBuf,

    /// Variable overrides (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub var: Vec<(String, String)>,

    /// Workspace root (defaults to the definition's `workspace`, then the current directory)
    #[arg(short, long)]
    pub workspace: Option<PathBuf>,

    /// Write the JSON run report to this file
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Print the JSON run report to stdout instead of the summary
    #[arg(long)]
    pub json: bool,

    /// Run up to N independent stages at once
    #[arg(long)]
    pub parallel: Option<usize>,

    /// Fail patch stages on any per-file error
    #[arg(long)]
    pub strict: bool,

    /// Keep a backup of every rewritten file
    #[arg(long)]
    pub backup: bool,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,
}

impl RunCommand {
    /// `--workspace`, then the definition's workspace, then the current directory
    pub fn workspace_dir(&self, pipeline: &Pipeline) -> Result<PathBuf> {
        if let Some(dir) = self.workspace.clone().or_else(|| pipeline.workspace.clone()) {
            return Ok(dir);
        }
        std::env::current_dir().context("Failed to determine current directory")
    }

    /// Run context for `pipeline`, with command-line overrides applied
    pub fn context(&self, pipeline: &Pipeline, workspace: PathBuf, dry_run: bool) -> RunContext {
        let ctx = pipeline.context(workspace);
        let strict = ctx.strict || self.strict;
        let backup = ctx.backup || self.backup;
        ctx.with_variables(self.var.iter().cloned())
            .strict(strict)
            .backup(backup)
            .dry_run(dry_run)
    }

    pub fn strategy(&self, pipeline: &Pipeline) -> SchedulingStrategy {
        self.parallel
            .or(pipeline.settings.max_parallel)
            .map_or(SchedulingStrategy::Sequential, SchedulingStrategy::from_max_parallel)
    }
}

/// Validate a pipeline definition
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    pub file: PathBuf,

    /// Variable overrides (key=value), used to check template placeholders
    #[arg(long, value_parser = parse_key_value)]
    pub var: Vec<(String, String)>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a single run
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
