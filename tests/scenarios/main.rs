//! Scenario-based tests for repoforge

#[path = "../helpers.rs"]
mod helpers;

mod abort;
mod binary_files;
mod cancellation;
mod cycle_detection;
mod definitions;
mod dry_run;
mod idempotence;
mod parallel;
mod retry_behavior;
mod templating;
mod workspace_lock;
