//! Test: cancellation stops the run and keeps completed results

use crate::helpers::*;
use repoforge::core::{OverallStatus, SkipReason, StageStatus};
use repoforge::execution::{PipelineRunner, SchedulingStrategy};
use std::time::Duration;

#[tokio::test]
async fn test_cancel_during_running_stage() {
    let yaml = r#"
name: "Test: Cancel"
stages:
  - name: init
    program: repo
    args: [init]
  - name: sync
    program: repo
    args: [sync]
    depends_on: [init]
  - name: build
    program: make
    args: [build]
    depends_on: [sync]
"#;
    let dir = workspace_with(&[]);
    let pipeline = pipeline_from_yaml(yaml);
    let ctx = pipeline.context(dir.path());
    let engine =
        PipelineRunner::new(MockRunner::new().hang("sync"), SchedulingStrategy::Sequential);
    let handle = engine.cancel_handle();

    let (result, _) = tokio::join!(engine.run(&pipeline, &ctx), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    });
    let report = result.unwrap();

    assert!(report.cancelled);
    assert_stage_status(&report, "init", StageStatus::Succeeded);
    assert_stage_status(&report, "sync", StageStatus::Failed);
    assert_eq!(report.stage("sync").unwrap().error.as_deref(), Some("cancelled"));
    assert_skipped(&report, "build", SkipReason::Cancelled);
    assert_eq!(report.overall_status, OverallStatus::Aborted);
    assert_eq!(report.overall_status.exit_code(), 1);
}

#[tokio::test]
async fn test_cancel_interrupts_backoff() {
    let yaml = r#"
name: "Test: Cancel Backoff"
stages:
  - name: fetch
    program: git
    args: [fetch]
    retry:
      max_attempts: 5
      backoff:
        fixed:
          delay_ms: 60000
"#;
    let dir = workspace_with(&[]);
    let pipeline = pipeline_from_yaml(yaml);
    let ctx = pipeline.context(dir.path());
    let engine = PipelineRunner::new(
        MockRunner::new().script("fetch", &[1, 1, 1, 1, 1]),
        SchedulingStrategy::Sequential,
    );
    let handle = engine.cancel_handle();

    let run = async {
        tokio::join!(engine.run(&pipeline, &ctx), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        })
    };
    let (result, _) = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("backoff sleep was not interrupted");
    let report = result.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.stage("fetch").unwrap().attempts, 1);
    assert_eq!(engine.process_runner().call_count("fetch"), 1);
    assert_eq!(report.overall_status, OverallStatus::Aborted);
}
