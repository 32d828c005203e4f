//! Test: the bundled pipeline definitions load and resolve

use repoforge::core::config::PipelineConfig;
use std::path::Path;

fn load(name: &str) -> PipelineConfig {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("pipelines").join(name);
    PipelineConfig::from_file(&path).unwrap()
}

#[test]
fn test_n1sdp_definition() {
    let config = load("n1sdp.yaml");
    let pipeline = config.to_pipeline().unwrap();

    assert_eq!(pipeline.graph.names()[..4], ["init", "init-again", "patch-manifests", "sync"]);
    assert_eq!(pipeline.graph.names().last(), Some(&"package"));
    assert!(pipeline.workspace.as_ref().unwrap().ends_with("work/n1sdp"));

    let ctx = pipeline.context("/srv/n1sdp");
    let prepared = pipeline.prepare(&ctx).unwrap();
    assert!(prepared.condition_met("build-kernel"));
}

#[test]
fn test_kernel_merge_definition() {
    let config = load("kernel-merge.yaml");
    let pipeline = config.to_pipeline().unwrap();

    let ctx = pipeline.context("/srv/linux");
    let prepared = pipeline.prepare(&ctx).unwrap();
    assert!(!prepared.condition_met("defconfig"));
    assert!(!prepared.condition_met("build"));
    assert_eq!(prepared.rules.rules()[0].replacement(), r#"CONFIG_LOCALVERSION="-n1sdp-5.15""#);
}
