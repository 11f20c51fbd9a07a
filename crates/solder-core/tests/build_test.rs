//! `make_build` over a project laid out on disk

use std::fs;

use pretty_assertions::assert_eq;
use serde_json::Value;
use solder_core::{make_build, CoreError, MergeConfig};
use solder_test_fixtures::{
    base_group, TestProject, BASE_PATH, BASE_SOURCE, DERIVED_PATH, DERIVED_SOURCE,
};

#[test]
fn test_build_pairs_trees_with_sources() {
    let project = TestProject::with_inheritance();
    let config = MergeConfig::new(project.root());

    let report = make_build(&config).unwrap();
    let build = serde_json::to_value(&report.build).unwrap();

    let inputs: Vec<_> = build["input"]["sources"]
        .as_object()
        .unwrap()
        .keys()
        .cloned()
        .collect();
    assert_eq!(inputs, vec![BASE_PATH, DERIVED_PATH]);
    assert_eq!(build["input"]["sources"][BASE_PATH]["content"], BASE_SOURCE);
    assert_eq!(build["input"]["sources"][DERIVED_PATH]["content"], DERIVED_SOURCE);

    let output = &build["output"]["sources"];
    assert_eq!(output[BASE_PATH]["id"], 0);
    assert_eq!(output[DERIVED_PATH]["id"], 1);
    assert_eq!(output[DERIVED_PATH]["ast"]["absolutePath"], DERIVED_PATH);
    assert_eq!(output[DERIVED_PATH]["ast"]["nodes"][1]["sourceUnit"], 7);
}

#[test]
fn test_snapshot_is_written() {
    let project = TestProject::with_inheritance();
    let config = MergeConfig::new(project.root());

    let report = make_build(&config).unwrap();
    let snapshot = project.root().join("build").join("astBuild.json");
    assert_eq!(report.diagnostics.snapshot.as_deref(), Some(snapshot.as_path()));

    let written: Value = serde_json::from_str(&fs::read_to_string(&snapshot).unwrap()).unwrap();
    assert_eq!(written.as_object().unwrap().len(), 2);
    assert_eq!(written[BASE_PATH]["id"], 0);
}

#[test]
fn test_snapshot_failure_does_not_abort() {
    let project = TestProject::with_inheritance();
    project.write_source("blocker", "not a directory");
    let mut config = MergeConfig::new(project.root());
    config.snapshot_path = "blocker/astBuild.json".into();

    let report = make_build(&config).unwrap();
    assert!(report.diagnostics.snapshot.is_none());
    assert_eq!(report.diagnostics.errors.len(), 1);
    assert_eq!(report.build.output.sources.len(), 2);
}

#[test]
fn test_missing_source_file_is_fatal() {
    let project = TestProject::new();
    project.write_ast("A", &base_group());

    let err = make_build(&MergeConfig::new(project.root())).unwrap_err();
    match err {
        CoreError::MissingArtifact(path) => assert!(path.ends_with(BASE_PATH)),
        other => panic!("expected a missing artifact, got {:?}", other),
    }
}

#[test]
fn test_missing_ast_dir_is_fatal() {
    let project = TestProject::with_inheritance();
    let mut config = MergeConfig::new(project.root());
    config.ast_output_dir = "not-compiled".into();

    assert!(matches!(
        make_build(&config),
        Err(CoreError::MissingArtifact(_))
    ));
}

#[test]
fn test_config_file_drives_build() {
    let project = TestProject::with_inheritance();
    project.write_source(
        "solder.toml",
        "root = \".\"\norder = \"dependency-count\"\nsnapshot_path = \"out/merged.json\"\n",
    );

    let config = MergeConfig::from_file(project.root().join("solder.toml")).unwrap();
    assert_eq!(config.root, project.root().join("."));

    let report = make_build(&config).unwrap();
    assert_eq!(report.diagnostics.order, vec![BASE_PATH, DERIVED_PATH]);
    assert!(project.root().join("out").join("merged.json").exists());
}
