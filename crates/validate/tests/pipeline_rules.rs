// SPDX-License-Identifier: Apache-2.0

#![allow(missing_docs)]

use bidsflow_dataset::UnitId;
use bidsflow_validate::{FindingReason, Pipeline, run_validators};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;

fn touch(path: &Path) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, b"").expect("touch");
}

#[test]
fn longitudinal_folder_count_and_missing_long_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bids = dir.path().join("bids");
    let out = dir.path().join("out");

    // Two anatomical sessions.
    touch(&bids.join("sub-01/ses-01/anat/sub-01_ses-01_T1w.nii.gz"));
    touch(&bids.join("sub-01/ses-02/anat/sub-01_ses-02_T1w.nii.gz"));

    // Three recon folders instead of the expected five, all with
    // sentinels; the longitudinal one lacks a .long hippocampal file.
    let fs_root = out.join("freesurfer");
    for folder in ["sub-01", "sub-01_ses-01", "sub-01_ses-01.long.sub-01"] {
        touch(&fs_root.join(folder).join("scripts/recon-all.done"));
    }
    touch(
        &fs_root
            .join("sub-01_ses-01.long.sub-01/mri/lh.amygNucVolumes-T1.long.v21.txt"),
    );

    let findings = run_validators(&bids, &out, None).expect("validate");
    let reasons: Vec<FindingReason> = findings.iter().map(|f| f.reason).collect();
    assert_eq!(
        reasons,
        vec![
            FindingReason::WrongFolderCount,
            FindingReason::MissingLongitudinalFile
        ],
        "findings: {findings:?}"
    );
    assert!(findings[0].detail.contains("expected 5, got 3"));
    assert!(findings[1].detail.contains("hippo"));
}

#[test]
fn single_session_subject_expects_one_folder() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bids = dir.path().join("bids");
    let out = dir.path().join("out");

    touch(&bids.join("sub-01/ses-01/anat/sub-01_ses-01_T1w.nii.gz"));
    touch(&out.join("freesurfer/sub-01/scripts/recon-all.done"));

    let findings = run_validators(&bids, &out, None).expect("validate");
    assert!(findings.is_empty(), "findings: {findings:?}");
}

#[test]
fn long_file_in_cross_sectional_folder_is_flagged() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bids = dir.path().join("bids");
    let out = dir.path().join("out");

    touch(&bids.join("sub-01/ses-01/anat/sub-01_ses-01_T1w.nii.gz"));
    let folder = out.join("freesurfer/sub-01");
    touch(&folder.join("scripts/recon-all.done"));
    touch(&folder.join("mri/lh.hippoSfVolumes-T1.long.v21.txt"));

    // The base folder is exempt; a cross-sectional session folder is not.
    let findings = run_validators(&bids, &out, None).expect("validate");
    assert!(findings.is_empty(), "findings: {findings:?}");

    touch(&bids.join("sub-02/ses-01/anat/sub-02_ses-01_T1w.nii.gz"));
    touch(&bids.join("sub-02/ses-02/anat/sub-02_ses-02_T1w.nii.gz"));
    let fs_root = out.join("freesurfer");
    for folder in [
        "sub-02",
        "sub-02_ses-01",
        "sub-02_ses-02",
        "sub-02_ses-01.long.sub-02",
        "sub-02_ses-02.long.sub-02",
    ] {
        touch(&fs_root.join(folder).join("scripts/recon-all.done"));
    }
    for folder in ["sub-02_ses-01.long.sub-02", "sub-02_ses-02.long.sub-02"] {
        touch(&fs_root.join(folder).join("mri/lh.hippoSfVolumes-T1.long.v21.txt"));
        touch(&fs_root.join(folder).join("mri/lh.amygNucVolumes-T1.long.v21.txt"));
    }
    touch(&fs_root.join("sub-02_ses-01/mri/lh.hippoSfVolumes-T1.long.v21.txt"));

    let findings = run_validators(&bids, &out, Some(Pipeline::Freesurfer)).expect("validate");
    let stray: Vec<_> = findings
        .iter()
        .filter(|f| f.reason == FindingReason::LongitudinalFileInCrossSectional)
        .collect();
    assert_eq!(stray.len(), 1, "findings: {findings:?}");
    assert_eq!(stray[0].unit, UnitId::subject("02"));
}

#[test]
fn cross_cohort_surface_rule() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bids = dir.path().join("bids");
    let out = dir.path().join("out");
    let fp = out.join("fmriprep");

    for subject in ["sub-01", "sub-02", "sub-03"] {
        touch(&bids.join(subject).join("func").join(format!(
            "{subject}_task-rest_bold.nii.gz"
        )));
        touch(&fp.join(subject).join("func").join(format!(
            "{subject}_task-rest_desc-preproc_bold.nii.gz"
        )));
    }
    // Two subjects have paired surface outputs; the third has none.
    for subject in ["sub-01", "sub-02"] {
        for hemi in ["hemi-L", "hemi-R"] {
            touch(&fp.join(subject).join("anat").join(format!(
                "{subject}_{hemi}_pial.surf.gii"
            )));
        }
    }

    let findings = run_validators(&bids, &out, None).expect("validate");
    assert_eq!(findings.len(), 1, "findings: {findings:?}");
    assert_eq!(
        findings[0].reason,
        FindingReason::InconsistentSurfaceAcrossCohort
    );
    assert_eq!(findings[0].unit, UnitId::subject("03"));
}

#[test]
fn hemisphere_pairing_is_required() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bids = dir.path().join("bids");
    let out = dir.path().join("out");
    let fp = out.join("fmriprep");

    touch(&bids.join("sub-01/func/sub-01_task-rest_bold.nii.gz"));
    touch(&fp.join("sub-01/func/sub-01_task-rest_desc-preproc_bold.nii.gz"));
    touch(&fp.join("sub-01/anat/sub-01_hemi-L_pial.surf.gii"));

    let findings = run_validators(&bids, &out, None).expect("validate");
    assert_eq!(findings.len(), 1, "findings: {findings:?}");
    assert_eq!(findings[0].reason, FindingReason::MissingHemispherePair);
    assert!(findings[0].detail.contains("hemi-R"));
}

#[test]
fn missing_preprocessed_bold_is_per_input_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bids = dir.path().join("bids");
    let out = dir.path().join("out");
    let fp = out.join("fmriprep");

    touch(&bids.join("sub-01/ses-01/func/sub-01_ses-01_task-rest_run-1_bold.nii.gz"));
    touch(&bids.join("sub-01/ses-01/func/sub-01_ses-01_task-rest_run-2_bold.nii.gz"));
    touch(&fp.join(
        "sub-01/ses-01/func/sub-01_ses-01_task-rest_run-1_space-MNI152_desc-preproc_bold.nii.gz",
    ));

    let findings = run_validators(&bids, &out, None).expect("validate");
    assert_eq!(findings.len(), 1, "findings: {findings:?}");
    assert_eq!(findings[0].reason, FindingReason::MissingPreprocessed);
    assert_eq!(findings[0].unit, UnitId::with_session("01", "01"));
    assert!(findings[0].detail.contains("run-2"));
}

#[test]
fn qsiprep_requires_dir_report_and_preprocessed_dwi() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bids = dir.path().join("bids");
    let out = dir.path().join("out");
    let qp = out.join("qsiprep");

    touch(&bids.join("sub-01/ses-01/dwi/sub-01_ses-01_dwi.nii.gz"));
    touch(&bids.join("sub-02/ses-01/dwi/sub-02_ses-01_dwi.nii.gz"));
    fs::create_dir_all(&qp).expect("qsiprep root");

    // sub-01 is complete.
    touch(&qp.join("sub-01.html"));
    touch(&qp.join("sub-01/ses-01/dwi/sub-01_ses-01_desc-preproc_dwi.nii.gz"));
    // sub-02 has nothing.

    let findings = run_validators(&bids, &out, Some(Pipeline::Qsiprep)).expect("validate");
    let reasons: Vec<FindingReason> = findings.iter().map(|f| f.reason).collect();
    assert_eq!(
        reasons,
        vec![
            FindingReason::MissingSubjectDir,
            FindingReason::MissingReport
        ],
        "findings: {findings:?}"
    );
    assert!(findings.iter().all(|f| f.unit == UnitId::subject("02")));
}

#[test]
fn qsirecon_requires_nonempty_session_dwi_dirs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bids = dir.path().join("bids");
    let out = dir.path().join("out");
    let qr = out.join("qsirecon");

    touch(&bids.join("sub-01/ses-01/dwi/sub-01_ses-01_dwi.nii.gz"));
    touch(&bids.join("sub-01/ses-02/dwi/sub-01_ses-02_dwi.nii.gz"));
    touch(&qr.join("sub-01/ses-01/dwi/sub-01_ses-01_space-T1w_dwimap.nii.gz"));
    fs::create_dir_all(qr.join("sub-01/ses-02/dwi")).expect("empty dwi dir");

    let findings = run_validators(&bids, &out, Some(Pipeline::Qsirecon)).expect("validate");
    assert_eq!(findings.len(), 1, "findings: {findings:?}");
    assert_eq!(findings[0].reason, FindingReason::EmptyOutputDir);
    assert_eq!(findings[0].unit, UnitId::with_session("01", "02"));

    fs::remove_dir_all(qr.join("sub-01/ses-02")).expect("remove");
    let findings = run_validators(&bids, &out, Some(Pipeline::Qsirecon)).expect("validate");
    assert_eq!(findings[0].reason, FindingReason::MissingReconOutput);
}

#[test]
fn validator_runs_are_stable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bids = dir.path().join("bids");
    let out = dir.path().join("out");

    touch(&bids.join("sub-01/ses-01/anat/sub-01_ses-01_T1w.nii.gz"));
    touch(&bids.join("sub-01/ses-01/dwi/sub-01_ses-01_dwi.nii.gz"));
    touch(&bids.join("sub-02/func/sub-02_task-rest_bold.nii.gz"));
    fs::create_dir_all(out.join("freesurfer")).expect("fs root");
    fs::create_dir_all(out.join("fmriprep")).expect("fp root");
    fs::create_dir_all(out.join("qsiprep")).expect("qp root");

    let first = run_validators(&bids, &out, None).expect("first run");
    let second = run_validators(&bids, &out, None).expect("second run");
    assert_eq!(first, second);
    assert!(!first.is_empty());
}
