//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Declarative manifest patching and build pipeline orchestrator
#[derive(Debug, Parser, Clone)]
#[command(name = "repoforge")]
#[command(version)]
#[command(about = "Patch checked-out manifests and drive multi-stage builds", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline
    Run(RunCommand),

    /// Show what a run would do: patches are computed but not written, commands are not spawned
    DryRun(RunCommand),

    /// Validate a pipeline definition and print its run order
    Validate(ValidateCommand),

    /// Show run history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
