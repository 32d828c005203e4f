//! Test: patch passes are idempotent and compose left to right

use crate::helpers::*;
use repoforge::core::{OverallStatus, StageStatus};

const MANIFEST: &str = r#"<manifest>
  <project name="linux" revision="refs/tags/N1SDP-2020.03.26" />
  <project name="scp-firmware" revision="refs/tags/N1SDP-2020.03.26" />
</manifest>
"#;

const PIPELINE: &str = r#"
name: "Test: Idempotence"
variables:
  release_tag: N1SDP-2021.10.12
patches:
  - id: bump-tag
    match: "refs/tags/N1SDP-2020.03.26"
    replace: "refs/tags/{{ release_tag }}"
    scope: "**/*.xml"
stages:
  - name: patch
    patch: { root: manifests }
"#;

#[tokio::test]
async fn test_second_run_changes_nothing() {
    let dir = workspace_with(&[("manifests/pinned-n1sdp.xml", MANIFEST)]);
    let pipeline = pipeline_from_yaml(PIPELINE);

    let (first, _) = run_pipeline(&pipeline, dir.path(), MockRunner::new()).await;
    assert_eq!(first.overall_status, OverallStatus::Completed);
    assert_eq!(first.file_changes.len(), 1);
    assert_eq!(first.file_changes[0].path, "pinned-n1sdp.xml");
    assert_eq!(first.file_changes[0].rules_applied, vec!["bump-tag"]);

    let patched = read_file(dir.path(), "manifests/pinned-n1sdp.xml");
    assert_eq!(patched.matches("refs/tags/N1SDP-2021.10.12").count(), 2);

    let (second, _) = run_pipeline(&pipeline, dir.path(), MockRunner::new()).await;
    assert_stage_status(&second, "patch", StageStatus::Succeeded);
    assert!(second.file_changes.is_empty());
    assert_eq!(read_file(dir.path(), "manifests/pinned-n1sdp.xml"), patched);
}

#[tokio::test]
async fn test_rules_fold_left() {
    let yaml = r#"
name: "Test: Fold Left"
patches:
  - id: first
    match: "alpha"
    replace: "beta"
  - id: second
    match: "beta"
    replace: "gamma"
stages:
  - name: patch
    patch: { root: "." }
"#;
    let dir = workspace_with(&[("default.xml", "alpha beta")]);
    let pipeline = pipeline_from_yaml(yaml);

    let (report, _) = run_pipeline(&pipeline, dir.path(), MockRunner::new()).await;

    // The second rule sees the output of the first
    assert_eq!(read_file(dir.path(), "default.xml"), "gamma gamma");
    assert_eq!(report.file_changes[0].rules_applied, vec!["first", "second"]);
}

#[tokio::test]
async fn test_non_overlapping_rules_commute() {
    let rules_ab = r#"
name: "Test: Commute"
patches:
  - { id: tag, match: "N1SDP-2020.03.26", replace: "N1SDP-2021.10.12" }
  - { id: branch, match: 'revision="master"', replace: 'revision="n1sdp"' }
stages:
  - name: patch
    patch: { root: "." }
"#;
    let rules_ba = r#"
name: "Test: Commute"
patches:
  - { id: branch, match: 'revision="master"', replace: 'revision="n1sdp"' }
  - { id: tag, match: "N1SDP-2020.03.26", replace: "N1SDP-2021.10.12" }
stages:
  - name: patch
    patch: { root: "." }
"#;
    let content = r#"<project revision="master" upstream="N1SDP-2020.03.26" />"#;
    let a = workspace_with(&[("default.xml", content)]);
    let b = workspace_with(&[("default.xml", content)]);

    run_pipeline(&pipeline_from_yaml(rules_ab), a.path(), MockRunner::new()).await;
    run_pipeline(&pipeline_from_yaml(rules_ba), b.path(), MockRunner::new()).await;

    assert_eq!(read_file(a.path(), "default.xml"), read_file(b.path(), "default.xml"));
}

#[tokio::test]
async fn test_non_idempotent_rule_leaves_file_untouched() {
    let yaml = r#"
name: "Test: Not Idempotent"
patches:
  - id: widen
    match: '(\d+)\.(\d+)'
    replace: '$1.$2.0'
    use_regex: true
stages:
  - name: patch
    patch: { root: "." }
    on_failure: continue
"#;
    let dir = workspace_with(&[("version.txt", "5.15")]);
    let pipeline = pipeline_from_yaml(yaml);

    let (report, _) = run_pipeline(&pipeline, dir.path(), MockRunner::new()).await;

    assert_eq!(read_file(dir.path(), "version.txt"), "5.15");
    assert_eq!(report.file_errors.len(), 1);
    assert_eq!(report.file_errors[0].path, "version.txt");
}
