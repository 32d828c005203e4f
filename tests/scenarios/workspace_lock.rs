//! Test: only one run at a time per workspace

use crate::helpers::*;
use repoforge::core::OverallStatus;
use repoforge::error::PipelineError;
use repoforge::execution::{PipelineRunner, SchedulingStrategy, LOCK_FILE_NAME};
use std::time::Duration;

const PIPELINE: &str = r#"
name: "Test: Lock"
stages:
  - name: sync
    program: repo
    args: [sync]
  - name: build
    program: make
    args: [build]
    depends_on: [sync]
"#;

#[tokio::test]
async fn test_second_concurrent_run_is_busy() {
    let dir = workspace_with(&[]);
    let pipeline = pipeline_from_yaml(PIPELINE);
    let ctx = pipeline.context(dir.path());

    let first = PipelineRunner::new(
        MockRunner::new().with_delay(Duration::from_millis(200)),
        SchedulingStrategy::Sequential,
    );
    let second = PipelineRunner::new(MockRunner::new(), SchedulingStrategy::Sequential);

    let (first_result, second_result) = tokio::join!(first.run(&pipeline, &ctx), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        second.run(&pipeline, &ctx).await
    });

    let err = second_result.unwrap_err();
    assert!(matches!(err, PipelineError::WorkspaceBusy { .. }), "got {:?}", err);
    assert!(second.process_runner().calls().is_empty());

    let report = first_result.unwrap();
    assert_eq!(report.overall_status, OverallStatus::Completed);
    assert_eq!(first.process_runner().calls(), vec!["sync", "build"]);

    // Released once the first run ends
    assert!(!dir.path().join(LOCK_FILE_NAME).exists());
}

#[tokio::test]
async fn test_stale_lock_is_not_broken() {
    let dir = workspace_with(&[(LOCK_FILE_NAME, "pid=4242\n")]);
    let pipeline = pipeline_from_yaml(PIPELINE);
    let engine = PipelineRunner::new(MockRunner::new(), SchedulingStrategy::Sequential);

    let err = engine.run(&pipeline, &pipeline.context(dir.path())).await.unwrap_err();

    match err {
        PipelineError::WorkspaceBusy { holder, .. } => assert!(holder.contains("4242")),
        other => panic!("expected WorkspaceBusy, got {:?}", other),
    }
    assert!(dir.path().join(LOCK_FILE_NAME).exists());
}
