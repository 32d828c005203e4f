//! Test: dry runs compute the same changes as a real run without writing

use crate::helpers::*;
use repoforge::core::{OverallStatus, SkipReason};
use repoforge::execution::SchedulingStrategy;

const PIPELINE: &str = r#"
name: "Test: Dry Run"
variables:
  release_tag: N1SDP-2021.10.12
patches:
  - id: bump-tag
    match: "refs/tags/N1SDP-2020.03.26"
    replace: "refs/tags/{{ release_tag }}"
    scope: "**/*.xml"
stages:
  - name: init
    program: repo
    args: [init]
  - name: patch
    patch: { root: .repo/manifests }
    depends_on: [init]
  - name: sync
    program: repo
    args: [sync]
    depends_on: [patch]
"#;

fn manifests() -> tempfile::TempDir {
    workspace_with(&[
        (".repo/manifests/default.xml", r#"<default revision="refs/tags/N1SDP-2020.03.26" />"#),
        (
            ".repo/manifests/pinned-n1sdp.xml",
            r#"<project revision="refs/tags/N1SDP-2020.03.26" />"#,
        ),
        (".repo/manifests/README", "refs/tags/N1SDP-2020.03.26"),
    ])
}

#[tokio::test]
async fn test_dry_run_matches_real_run_and_writes_nothing() {
    let dir = manifests();
    let pipeline = pipeline_from_yaml(PIPELINE);
    let before = snapshot(dir.path());

    let ctx = pipeline.context(dir.path()).dry_run(true);
    let (dry, runner) =
        run_with_context(&pipeline, &ctx, MockRunner::new(), SchedulingStrategy::Sequential).await;

    assert_eq!(snapshot(dir.path()), before);
    assert!(runner.calls().is_empty());
    assert!(dry.dry_run);
    assert_skipped(&dry, "init", SkipReason::DryRun);
    assert_skipped(&dry, "sync", SkipReason::DryRun);
    assert_eq!(dry.overall_status, OverallStatus::Completed);

    let (real, _) = run_pipeline(&pipeline, dir.path(), MockRunner::new()).await;

    assert_eq!(dry.file_changes, real.file_changes);
    assert_eq!(real.file_changes.len(), 2);
    assert_ne!(snapshot(dir.path()), before);
    // Out-of-scope files are never touched
    assert_eq!(
        read_file(dir.path(), ".repo/manifests/README"),
        "refs/tags/N1SDP-2020.03.26"
    );
}

#[tokio::test]
async fn test_dry_run_against_missing_workspace_creates_nothing() {
    let yaml = r#"
name: "Test: Dry Run Fresh"
stages:
  - name: init
    program: repo
    args: [init]
"#;
    let parent = workspace_with(&[]);
    let workspace = parent.path().join("fresh");
    let pipeline = pipeline_from_yaml(yaml);

    let ctx = pipeline.context(&workspace).dry_run(true);
    let (report, _) =
        run_with_context(&pipeline, &ctx, MockRunner::new(), SchedulingStrategy::Sequential).await;

    assert_eq!(report.overall_status, OverallStatus::Completed);
    assert!(!workspace.exists());
}

#[tokio::test]
async fn test_retried_strict_patch_reports_each_file_once() {
    let yaml = r#"
name: "Test: Dry Run Retried Patch"
settings: { strict: true }
patches:
  - id: pin
    match: "master"
    replace: "n1sdp"
    scope: "*.xml"
stages:
  - name: patch
    patch: { root: manifests }
    retry: { max_attempts: 2 }
"#;
    let dir = workspace_with(&[
        ("manifests/a.xml", r#"<default revision="master" />"#),
        ("manifests/b.xml", r#"<project revision="master" />"#),
    ]);
    let locked = dir.path().join("manifests/b.xml");
    let mut perms = std::fs::metadata(&locked).unwrap().permissions();
    perms.set_readonly(true);
    std::fs::set_permissions(&locked, perms).unwrap();
    let pipeline = pipeline_from_yaml(yaml);

    let ctx = pipeline.context(dir.path()).dry_run(true);
    let (dry, _) =
        run_with_context(&pipeline, &ctx, MockRunner::new(), SchedulingStrategy::Sequential).await;
    let (real, _) = run_pipeline(&pipeline, dir.path(), MockRunner::new()).await;

    assert_eq!(dry.stage("patch").unwrap().attempts, 2);
    assert_eq!(real.stage("patch").unwrap().attempts, 2);
    let paths: Vec<_> = dry.file_changes.iter().map(|c| c.path.as_str()).collect();
    assert_eq!(paths, vec!["a.xml"]);
    assert_eq!(dry.file_changes, real.file_changes);
}
