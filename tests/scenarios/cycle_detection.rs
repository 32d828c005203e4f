//! Test: malformed stage graphs are rejected before anything runs

use repoforge::core::config::PipelineConfig;
use repoforge::core::stage::{CommandSpec, Stage};
use repoforge::core::StageGraph;
use repoforge::error::PipelineError;

fn stage(name: &str, deps: &[&str]) -> Stage {
    Stage::command(name, CommandSpec::new("make").arg(name)).depends_on(deps.iter().copied())
}

#[test]
fn test_cycle_detected_names_its_members() {
    let err = StageGraph::build(vec![
        stage("fetch", &[]),
        stage("patch", &["build"]),
        stage("sync", &["patch"]),
        stage("build", &["sync"]),
    ])
    .unwrap_err();

    match err {
        PipelineError::CycleDetected { cycle } => {
            assert_eq!(cycle, vec!["patch", "sync", "build"]);
        }
        other => panic!("expected CycleDetected, got {:?}", other),
    }
}

#[test]
fn test_cycle_in_definition_fails_to_load() {
    let yaml = r#"
name: "Test: Cycle"
stages:
  - name: a
    program: make
    depends_on: [b]
  - name: b
    program: make
    depends_on: [a]
"#;
    let err = PipelineConfig::from_yaml(yaml).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::CycleDetected { .. })
    ));
}

#[test]
fn test_self_dependency_is_a_cycle() {
    let err = StageGraph::build(vec![stage("loop", &["loop"])]).unwrap_err();
    assert!(matches!(err, PipelineError::CycleDetected { .. }));
}

#[test]
fn test_unknown_dependency() {
    let err = StageGraph::build(vec![stage("build", &["sync"])]).unwrap_err();
    match err {
        PipelineError::UnknownDependency { stage, dependency } => {
            assert_eq!(stage, "build");
            assert_eq!(dependency, "sync");
        }
        other => panic!("expected UnknownDependency, got {:?}", other),
    }
}

#[test]
fn test_duplicate_stage() {
    let err = StageGraph::build(vec![stage("build", &[]), stage("build", &[])]).unwrap_err();
    assert!(matches!(err, PipelineError::DuplicateStage(name) if name == "build"));
}
