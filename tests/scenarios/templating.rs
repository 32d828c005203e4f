//! Test: Variable substitution into rules and commands

use crate::helpers::*;
use repoforge::core::OverallStatus;
use repoforge::error::PipelineError;
use repoforge::execution::{PipelineRunner, SchedulingStrategy};

const PIPELINE: &str = r#"
name: "Test: Templating"
variables:
  release_tag: N1SDP-2021.10.12
  build_kernel: "n"
patches:
  - id: bump-tag
    match: "N1SDP-2020.03.26"
    replace: "{{ release_tag }}"
stages:
  - name: checkout
    program: git
    args: ["{{ release_tag }}"]
  - name: patch
    patch: { root: "." }
    depends_on: [checkout]
  - name: kernel
    program: make
    args: [kernel]
    depends_on: [patch]
    when: build_kernel
"#;

#[tokio::test]
async fn test_variables_render_into_args_and_rules() {
    let dir = workspace_with(&[("default.xml", "N1SDP-2020.03.26")]);
    let pipeline = pipeline_from_yaml(PIPELINE);

    let (report, runner) = run_pipeline(&pipeline, dir.path(), MockRunner::new()).await;

    assert_eq!(report.overall_status, OverallStatus::Completed);
    assert_eq!(runner.calls(), vec!["N1SDP-2021.10.12"]);
    assert_eq!(read_file(dir.path(), "default.xml"), "N1SDP-2021.10.12");
}

#[tokio::test]
async fn test_override_enables_conditional_stage() {
    let dir = workspace_with(&[("default.xml", "N1SDP-2020.03.26")]);
    let pipeline = pipeline_from_yaml(PIPELINE);
    let ctx = pipeline
        .context(dir.path())
        .with_variable("build_kernel", "yes")
        .with_variable("release_tag", "N1SDP-2022.06.22");

    let (_, runner) =
        run_with_context(&pipeline, &ctx, MockRunner::new(), SchedulingStrategy::Sequential).await;

    assert_eq!(runner.calls(), vec!["N1SDP-2022.06.22", "kernel"]);
    assert_eq!(read_file(dir.path(), "default.xml"), "N1SDP-2022.06.22");
}

#[tokio::test]
async fn test_undefined_variable_fails_before_any_stage() {
    let yaml = r#"
name: "Test: Undefined"
stages:
  - name: init
    program: repo
    args: [init, -u, "{{ manifest_url }}"]
"#;
    let dir = workspace_with(&[]);
    let pipeline = pipeline_from_yaml(yaml);
    let engine = PipelineRunner::new(MockRunner::new(), SchedulingStrategy::Sequential);

    let err = engine.run(&pipeline, &pipeline.context(dir.path())).await.unwrap_err();

    match err {
        PipelineError::UndefinedVariable { name, .. } => assert_eq!(name, "manifest_url"),
        other => panic!("expected UndefinedVariable, got {:?}", other),
    }
    assert!(engine.process_runner().calls().is_empty());
}
