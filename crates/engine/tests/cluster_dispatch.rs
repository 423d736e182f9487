// SPDX-License-Identifier: Apache-2.0

#![allow(missing_docs)]

use bidsflow_config::Config;
use bidsflow_dataset::UnitId;
use bidsflow_engine::{
    Classification, ClusterDispatcher, CompletionOracle, PlanRequest, RecordLog, RunState,
    build_plan,
};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

fn write_stub(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write stub");
    let mut perms = fs::metadata(&path).expect("stub metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod stub");
    path
}

fn test_config(
    dir: &Path,
    subjects: &[&str],
    submit: &Path,
    status: &Path,
    monitor: bool,
) -> Config {
    let bids = dir.join("bids");
    let image = dir.join("app.sif");
    for subject in subjects {
        fs::create_dir_all(bids.join(subject)).expect("subject dir");
    }
    fs::write(&image, b"sif").expect("image");
    Config::from_yaml(&format!(
        "common:\n  bids_root: {}\n  output_root: {}\n  scratch_root: {}\n  container_image: {}\napp:\n  analysis_level: participant\ncluster:\n  queue: batch\n  walltime: 2:00:00\n  memory: 8G\n  cpus: 4\n  monitor: {monitor}\n  poll_interval: 50ms\n  scheduler:\n    submit: {}\n    status: {}\n    cancel: /bin/true\n",
        bids.display(),
        dir.join("out").display(),
        dir.join("work").display(),
        image.display(),
        submit.display(),
        status.display(),
    ))
    .expect("config")
}

#[tokio::test]
async fn scripts_are_written_and_jobs_submitted_in_plan_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let submit = write_stub(dir.path(), "fake-sbatch", "echo \"Submitted batch job $$\"");
    let status = write_stub(dir.path(), "fake-squeue", "exit 0");
    let config = test_config(dir.path(), &["sub-002", "sub-001"], &submit, &status, false);

    let oracle = CompletionOracle::new(&config, false);
    let outcome = build_plan(&config, &oracle, &PlanRequest::default()).expect("plan");

    let records = RecordLog::new();
    let dispatcher = ClusterDispatcher::new(
        &config,
        &oracle,
        records.clone(),
        CancellationToken::new(),
        false,
        "20260801_120000",
    )
    .expect("dispatcher");
    dispatcher.run(&outcome.plan).await.expect("dispatch");

    let snapshot = records.snapshot();
    assert_eq!(snapshot.len(), 2);
    // Submission order is plan order (natural sort).
    assert_eq!(snapshot[0].unit, UnitId::subject("001"));
    assert_eq!(snapshot[1].unit, UnitId::subject("002"));
    for record in &snapshot {
        assert_eq!(record.state, RunState::Submitted);
        assert!(record.job_id.is_some());
    }

    let jobs_dir = config.log_root().join("jobs");
    let scripts: Vec<_> = fs::read_dir(&jobs_dir)
        .expect("jobs dir")
        .filter_map(Result::ok)
        .collect();
    assert_eq!(scripts.len(), 2);
    let body =
        fs::read_to_string(jobs_dir.join("job_001_20260801_120000.sh")).expect("script body");
    assert!(body.starts_with("#!/bin/bash"));
    assert!(body.contains("#SBATCH --partition=batch"));
    assert!(body.contains("--participant-label 001"));
}

#[tokio::test]
async fn monitoring_finalizes_jobs_through_the_oracle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let submit = write_stub(dir.path(), "fake-sbatch", "echo \"Submitted batch job $$\"");
    // An empty status listing means every job is already terminal.
    let status = write_stub(dir.path(), "fake-squeue", "exit 0");
    let config = test_config(dir.path(), &["sub-001", "sub-002"], &submit, &status, true);

    // sub-001 produced outputs, sub-002 did not.
    let out = &config.common.output_root;
    fs::create_dir_all(out.join("sub-001")).expect("output dir");
    fs::write(out.join("sub-001/result.nii.gz"), b"data").expect("output file");

    let oracle = CompletionOracle::new(&config, false);
    let outcome = build_plan(&config, &oracle, &PlanRequest::default()).expect("plan");
    // sub-001's outputs pre-date the run, so the oracle would skip it;
    // force keeps both units in the plan for this test.
    assert_eq!(outcome.plan.len(), 1);
    let request = PlanRequest {
        force: true,
        ..PlanRequest::default()
    };
    let oracle_forced = CompletionOracle::new(&config, true);
    let outcome = build_plan(&config, &oracle_forced, &request).expect("plan");
    assert_eq!(outcome.plan.len(), 2);

    let records = RecordLog::new();
    let dispatcher = ClusterDispatcher::new(
        &config,
        &oracle,
        records.clone(),
        CancellationToken::new(),
        false,
        "20260801_120000",
    )
    .expect("dispatcher");
    dispatcher.run(&outcome.plan).await.expect("dispatch");

    let mut snapshot = records.snapshot();
    snapshot.sort_by(|a, b| a.unit.cmp(&b.unit));
    assert_eq!(
        snapshot[0].state,
        RunState::Completed(Classification::Success)
    );
    assert_eq!(
        snapshot[1].state,
        RunState::Completed(Classification::FailedOutputCheck)
    );
    assert!(oracle.marker_exists(&UnitId::subject("001")));
    assert!(!oracle.marker_exists(&UnitId::subject("002")));
}

#[tokio::test]
async fn failed_submission_is_recorded_and_does_not_stop_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let submit = write_stub(dir.path(), "fake-sbatch", "exit 1");
    let status = write_stub(dir.path(), "fake-squeue", "exit 0");
    let config = test_config(dir.path(), &["sub-001", "sub-002"], &submit, &status, false);

    let oracle = CompletionOracle::new(&config, false);
    let outcome = build_plan(&config, &oracle, &PlanRequest::default()).expect("plan");

    let records = RecordLog::new();
    let dispatcher = ClusterDispatcher::new(
        &config,
        &oracle,
        records.clone(),
        CancellationToken::new(),
        false,
        "20260801_120000",
    )
    .expect("dispatcher");
    dispatcher.run(&outcome.plan).await.expect("dispatch");

    let snapshot = records.snapshot();
    assert_eq!(snapshot.len(), 2);
    for record in snapshot {
        assert_eq!(
            record.state,
            RunState::Completed(Classification::SubmitFailed)
        );
    }
}

#[tokio::test]
async fn dry_run_writes_scripts_without_submitting() {
    let dir = tempfile::tempdir().expect("tempdir");
    // A submit stub that would make the test fail if it ever ran.
    let submit = write_stub(dir.path(), "fake-sbatch", "touch submitted; exit 0");
    let status = write_stub(dir.path(), "fake-squeue", "exit 0");
    let config = test_config(dir.path(), &["sub-001"], &submit, &status, false);

    let oracle = CompletionOracle::new(&config, false);
    let outcome = build_plan(&config, &oracle, &PlanRequest::default()).expect("plan");

    let records = RecordLog::new();
    let dispatcher = ClusterDispatcher::new(
        &config,
        &oracle,
        records.clone(),
        CancellationToken::new(),
        false,
        "20260801_120000",
    )
    .expect("dispatcher");
    let scripts = dispatcher.write_scripts(&outcome.plan).expect("scripts");
    assert_eq!(scripts.len(), 1);
    assert!(scripts[0].is_file());
    assert!(records.snapshot().is_empty());
    assert!(!dir.path().join("submitted").exists());
}
