//! Test: opt-in parallelism runs independent stages together

use crate::helpers::*;
use repoforge::core::{OverallStatus, StageStatus};
use repoforge::execution::SchedulingStrategy;
use std::time::Duration;

const DISJOINT: &str = r#"
name: "Test: Parallel"
stages:
  - name: firmware
    program: make
    args: [firmware]
    cwd: firmware
  - name: kernel
    program: make
    args: [kernel]
    cwd: linux
  - name: image
    program: make
    args: [image]
    cwd: output
    depends_on: [firmware, kernel]
"#;

const NESTED: &str = r#"
name: "Test: Nested"
stages:
  - name: kernel
    program: make
    args: [kernel]
    cwd: linux
  - name: modules
    program: make
    args: [modules]
    cwd: linux/modules
"#;

fn slow() -> MockRunner {
    MockRunner::new().with_delay(Duration::from_millis(100))
}

#[tokio::test]
async fn test_independent_stages_overlap() {
    let dir = workspace_with(&[]);
    let pipeline = pipeline_from_yaml(DISJOINT);
    let ctx = pipeline.context(dir.path());

    let (report, runner) =
        run_with_context(&pipeline, &ctx, slow(), SchedulingStrategy::Parallel(4)).await;

    assert_eq!(report.overall_status, OverallStatus::Completed);
    assert_eq!(runner.max_concurrency(), 2);
    // image waits for both of its dependencies
    assert_eq!(runner.calls().last().map(String::as_str), Some("image"));
    assert_stage_status(&report, "image", StageStatus::Succeeded);
}

#[tokio::test]
async fn test_nested_working_directories_do_not_overlap() {
    let dir = workspace_with(&[]);
    let pipeline = pipeline_from_yaml(NESTED);
    let ctx = pipeline.context(dir.path());

    let (report, runner) =
        run_with_context(&pipeline, &ctx, slow(), SchedulingStrategy::Parallel(4)).await;

    assert_eq!(report.overall_status, OverallStatus::Completed);
    assert_eq!(runner.max_concurrency(), 1);
}

#[tokio::test]
async fn test_sequential_is_the_default() {
    let dir = workspace_with(&[]);
    let pipeline = pipeline_from_yaml(DISJOINT);

    let (_, runner) = run_pipeline(&pipeline, dir.path(), slow()).await;

    assert_eq!(runner.max_concurrency(), 1);
    assert_eq!(runner.calls(), vec!["firmware", "kernel", "image"]);
}
