//! Test: abort-pipeline failures stop the run

use crate::helpers::*;
use repoforge::core::{OverallStatus, SkipReason, StageStatus};

const PIPELINE: &str = r#"
name: "Test: Abort"
stages:
  - name: init
    program: repo
    args: [init]
  - name: sync
    program: repo
    args: [sync]
    depends_on: [init]
  - name: docs
    program: make
    args: [docs]
  - name: build
    program: make
    args: [build]
    depends_on: [sync]
"#;

#[tokio::test]
async fn test_abort_skips_everything_after_the_failure() {
    let dir = workspace_with(&[]);
    let pipeline = pipeline_from_yaml(PIPELINE);

    let (report, runner) =
        run_pipeline(&pipeline, dir.path(), MockRunner::new().script("sync", &[1])).await;

    assert_stage_status(&report, "init", StageStatus::Succeeded);
    assert_stage_status(&report, "sync", StageStatus::Failed);
    assert_skipped(&report, "build", SkipReason::Aborted);

    // Ties are broken by declaration order, so docs runs after sync even
    // though it does not depend on it
    assert_eq!(pipeline.graph.names(), vec!["init", "sync", "docs", "build"]);
    assert_skipped(&report, "docs", SkipReason::Aborted);
    assert_eq!(runner.call_count("docs"), 0);

    assert_eq!(report.overall_status, OverallStatus::Aborted);
    assert_eq!(report.overall_status.exit_code(), 1);
}

#[tokio::test]
async fn test_two_phase_init_continues_after_first_failure() {
    let yaml = r#"
name: "Test: Two Phase Init"
stages:
  - name: init
    program: repo
    args: [init]
    on_failure: continue
  - name: init-retry
    program: repo
    args: [init-retry]
    depends_on: [init]
  - name: sync
    program: repo
    args: [sync]
    depends_on: [init-retry]
"#;
    let dir = workspace_with(&[]);
    let pipeline = pipeline_from_yaml(yaml);

    let (report, runner) =
        run_pipeline(&pipeline, dir.path(), MockRunner::new().script("init", &[1])).await;

    assert_stage_status(&report, "init", StageStatus::Failed);
    assert_stage_status(&report, "init-retry", StageStatus::Succeeded);
    assert_stage_status(&report, "sync", StageStatus::Succeeded);
    assert_eq!(runner.calls(), vec!["init", "init-retry", "sync"]);
    // A failed continue stage still marks the run failed
    assert_eq!(report.overall_status, OverallStatus::Failed);
}
