// SPDX-License-Identifier: Apache-2.0

#![allow(missing_docs)]

use bidsflow_config::{Config, Error};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;

fn fixture(dir: &Path) -> (String, String) {
    let bids = dir.join("bids");
    let image = dir.join("app.sif");
    fs::create_dir_all(&bids).expect("bids dir");
    fs::write(&image, b"sif").expect("image");
    (
        bids.display().to_string(),
        image.display().to_string(),
    )
}

fn minimal_yaml(dir: &Path) -> String {
    let (bids, image) = fixture(dir);
    format!(
        r#"
common:
  bids_root: {bids}
  output_root: out
  scratch_root: work
  container_image: {image}
app:
  analysis_level: participant
"#
    )
}

#[test]
fn loads_minimal_document_with_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.yaml");
    fs::write(&path, minimal_yaml(dir.path())).expect("write config");

    let config = Config::load(&path).expect("load");
    assert_eq!(config.common.container_runtime, "apptainer");
    assert_eq!(config.jobs(), 1);
    assert_eq!(config.common.max_reprocess_iterations, 3);
    assert!(config.common.output_root.is_absolute());
    assert_eq!(config.log_root(), config.common.output_root.join("logs"));
    assert!(config.cluster.is_none());
    assert!(!config.app.image_locked);
}

#[test]
fn missing_file_is_config_missing() {
    let err = Config::load(Path::new("/nonexistent/config.yaml")).expect_err("must fail");
    assert!(matches!(err, Error::ConfigMissing { .. }));
}

#[test]
fn unparseable_document_is_malformed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.yaml");
    fs::write(&path, "common: [not, a, mapping").expect("write config");
    let err = Config::load(&path).expect_err("must fail");
    assert!(matches!(err, Error::ConfigMalformed { .. }));
}

#[test]
fn semantic_violations_are_collected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (bids, image) = fixture(dir.path());
    let path = dir.path().join("config.yaml");
    fs::write(
        &path,
        format!(
            r#"
common:
  bids_root: {bids}
  output_root: out
  scratch_root: work
  container_image: {image}
  jobs: -2
app:
  analysis_level: cohort
cluster:
  queue: batch
  walltime: 4:00
  memory: 8T
  cpus: 0
"#
        ),
    )
    .expect("write config");

    match Config::load(&path).expect_err("must fail") {
        Error::ConfigSemantic { errors } => {
            // jobs, analysis level, walltime, memory, cpus
            assert_eq!(errors.len(), 5, "unexpected errors: {errors:?}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn push_requires_output_ref() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.yaml");
    let mut doc = minimal_yaml(dir.path());
    doc.push_str("dataset:\n  input_ref: https://example.org/ds\n  push_results: true\n");
    fs::write(&path, doc).expect("write config");

    match Config::load(&path).expect_err("must fail") {
        Error::ConfigSemantic { errors } => assert_eq!(errors.len(), 1),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn json_documents_are_accepted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (bids, image) = fixture(dir.path());
    let path = dir.path().join("config.json");
    fs::write(
        &path,
        format!(
            r#"{{
  "common": {{
    "bids_root": "{bids}",
    "output_root": "out",
    "scratch_root": "work",
    "container_image": "{image}"
  }},
  "app": {{ "analysis_level": "group" }}
}}"#
        ),
    )
    .expect("write config");

    let config = Config::load(&path).expect("load");
    assert_eq!(config.app.analysis_level, "group");
}

#[test]
fn unknown_keys_do_not_fail_the_load() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.yaml");
    let mut doc = minimal_yaml(dir.path());
    doc.push_str("app_extra:\n  pilot: true\n");
    // An unknown top-level section and a legacy `pilot` key parse fine;
    // both are surfaced as warnings only.
    fs::write(&path, doc).expect("write config");
    let _ = Config::load(&path).expect("load");
}
