//! repoforge - declarative manifest patching and build pipeline orchestration

pub mod cli;
pub mod core;
pub mod error;
pub mod execution;
pub mod patch;
pub mod persistence;

// Re-export commonly used types
pub use crate::core::config::PipelineConfig;
pub use crate::core::{
    OverallStatus, PatchRule, PatchRuleSet, Pipeline, RunContext, RunReport, Stage, StageGraph,
    StageResult, StageStatus,
};
pub use crate::error::{PatchError, PipelineError, StageError};
pub use crate::execution::{
    CancelHandle, PipelineRunner, ProcessRunner, RunEvent, SchedulingStrategy, SubprocessRunner,
};
pub use crate::patch::{ManifestPatcher, PatchOptions, PatchOutcome};
