//! Test: Retry behavior - attempts, backoff and exhaustion

use crate::helpers::*;
use repoforge::core::{OverallStatus, StageStatus};

const PIPELINE: &str = r#"
name: "Test: Retry"
stages:
  - name: fetch
    program: git
    args: [fetch]
    retry:
      max_attempts: 3
      backoff:
        fixed:
          delay_ms: 5
    on_failure: skip-dependents
  - name: build
    program: make
    args: [build]
    depends_on: [fetch]
"#;

/// Fail, fail, succeed: the stage succeeds on its third attempt
#[tokio::test]
async fn test_succeeds_on_third_attempt() {
    let dir = workspace_with(&[]);
    let pipeline = pipeline_from_yaml(PIPELINE);
    let runner = MockRunner::new().script("fetch", &[128, 128]);

    let (report, runner) = run_pipeline(&pipeline, dir.path(), runner).await;

    assert_stage_status(&report, "fetch", StageStatus::Succeeded);
    assert_eq!(report.stage("fetch").unwrap().attempts, 3);
    assert_eq!(runner.call_count("fetch"), 3);
    assert_stage_status(&report, "build", StageStatus::Succeeded);
    assert_eq!(report.overall_status, OverallStatus::Completed);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let dir = workspace_with(&[]);
    let pipeline = pipeline_from_yaml(PIPELINE);
    let runner = MockRunner::new().script("fetch", &[1, 1, 1, 0]);

    let (report, runner) = run_pipeline(&pipeline, dir.path(), runner).await;

    let fetch = report.stage("fetch").unwrap();
    assert_eq!(fetch.status, StageStatus::Failed);
    assert_eq!(fetch.attempts, 3);
    assert!(fetch.error.as_deref().unwrap().contains("retries exhausted after 3 attempts"));
    // The fourth scripted code is never reached
    assert_eq!(runner.call_count("fetch"), 3);
    assert_eq!(runner.call_count("build"), 0);
    assert_eq!(report.overall_status, OverallStatus::Failed);
}

#[tokio::test]
async fn test_default_is_a_single_attempt() {
    let yaml = r#"
name: "Test: No Retry"
stages:
  - name: sync
    program: repo
    args: [sync]
    on_failure: continue
"#;
    let dir = workspace_with(&[]);
    let pipeline = pipeline_from_yaml(yaml);

    let (report, runner) =
        run_pipeline(&pipeline, dir.path(), MockRunner::new().script("sync", &[1])).await;

    assert_eq!(report.stage("sync").unwrap().attempts, 1);
    assert_eq!(runner.call_count("sync"), 1);
    assert_eq!(report.overall_status, OverallStatus::Failed);
}
