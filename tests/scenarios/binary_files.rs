//! Test: binary and non-UTF-8 files are never rewritten

use crate::helpers::*;
use repoforge::core::{FileSkipReason, OverallStatus};

const PIPELINE: &str = r#"
name: "Test: Binary Files"
patches:
  - id: bump-tag
    match: "N1SDP-2020.03.26"
    replace: "N1SDP-2021.10.12"
stages:
  - name: patch
    patch: { root: "." }
"#;

#[tokio::test]
async fn test_binary_file_untouched_and_reported() {
    let dir = workspace_with(&[("default.xml", "N1SDP-2020.03.26")]);
    let blob: &[u8] = b"\x7fELF\0\0\0N1SDP-2020.03.26";
    write_file(dir.path(), "firmware/fip.bin", blob);
    write_file(dir.path(), "latin1.txt", b"caf\xe9 N1SDP-2020.03.26");
    let pipeline = pipeline_from_yaml(PIPELINE);

    let (report, _) = run_pipeline(&pipeline, dir.path(), MockRunner::new()).await;

    assert_eq!(report.overall_status, OverallStatus::Completed);
    assert_eq!(std::fs::read(dir.path().join("firmware/fip.bin")).unwrap(), blob);
    assert_eq!(
        std::fs::read(dir.path().join("latin1.txt")).unwrap(),
        b"caf\xe9 N1SDP-2020.03.26"
    );
    assert_eq!(read_file(dir.path(), "default.xml"), "N1SDP-2021.10.12");

    let reason = |path: &str| {
        report
            .skipped_files
            .iter()
            .find(|s| s.path == path)
            .map(|s| s.reason)
    };
    assert_eq!(reason("firmware/fip.bin"), Some(FileSkipReason::Binary));
    assert_eq!(reason("latin1.txt"), Some(FileSkipReason::InvalidUtf8));
    assert_eq!(report.file_changes.len(), 1);
}
