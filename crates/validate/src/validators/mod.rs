// SPDX-License-Identifier: Apache-2.0

//! Per-pipeline output validators.
//!
//! Validators traverse the output root and compare it against the input
//! dataset index. They perform no mutation and no network I/O, and two
//! consecutive runs over an unchanged tree produce the same findings.
//! Dispatch is a tagged variant over [`Pipeline`], not dynamic lookup.

use crate::error::Error;
use crate::finding::{Finding, sort_findings};
use crate::pipeline::Pipeline;
use bidsflow_dataset::{DatasetIndex, UnitId, index_dataset};
use std::fs;
use std::path::{Path, PathBuf};

mod fmriprep;
mod freesurfer;
mod qsiprep;
mod qsirecon;

/// Inputs shared by every validator.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Index of the input dataset.
    pub dataset: &'a DatasetIndex,
    /// The derivatives/output tree to verify.
    pub output_root: &'a Path,
}

/// Runs one pipeline's validator.
#[must_use]
pub fn validate_pipeline(pipeline: Pipeline, ctx: &ValidationContext<'_>) -> Vec<Finding> {
    let mut findings = match pipeline {
        Pipeline::Fmriprep => fmriprep::validate(ctx),
        Pipeline::Qsiprep => qsiprep::validate(ctx),
        Pipeline::Freesurfer => freesurfer::validate(ctx),
        Pipeline::Qsirecon => qsirecon::validate(ctx),
    };
    sort_findings(&mut findings);
    findings
}

/// Pipelines with a conventional output directory under `output_root`.
#[must_use]
pub fn detect_pipelines(output_root: &Path) -> Vec<Pipeline> {
    Pipeline::ALL
        .into_iter()
        .filter(|p| p.detected(output_root))
        .collect()
}

/// Indexes the dataset and validates either one requested pipeline or
/// every detected one.
pub fn run_validators(
    dataset_root: &Path,
    output_root: &Path,
    only: Option<Pipeline>,
) -> Result<Vec<Finding>, Error> {
    let dataset = index_dataset(dataset_root)?;
    let ctx = ValidationContext {
        dataset: &dataset,
        output_root,
    };
    let pipelines = match only {
        Some(pipeline) => vec![pipeline],
        None => detect_pipelines(output_root),
    };
    let mut findings = Vec::new();
    for pipeline in pipelines {
        findings.extend(validate_pipeline(pipeline, &ctx));
    }
    sort_findings(&mut findings);
    Ok(findings)
}

/// The unit for a subject/session index key.
pub(crate) fn unit_for(subject: &str, session: Option<&str>) -> UnitId {
    match session {
        Some(session) => UnitId::with_session(subject, session),
        None => UnitId::subject(subject),
    }
}

/// The output scope of a subject/session below `subject_root`.
pub(crate) fn session_scope(subject_root: &Path, session: Option<&str>) -> PathBuf {
    match session {
        Some(session) => subject_root.join(format!("ses-{session}")),
        None => subject_root.to_path_buf(),
    }
}

/// Names of the regular files directly inside `dir`, sorted.
pub(crate) fn list_dir_files(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| e.file_name().to_str().map(ToOwned::to_owned))
        .filter(|n| !n.starts_with('.'))
        .collect();
    names.sort();
    names
}

/// File names in the subtree of `dir`, depth-bounded, sorted.
pub(crate) fn collect_file_names(dir: &Path, depth: usize) -> Vec<String> {
    fn inner(dir: &Path, depth: usize, out: &mut Vec<String>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.filter_map(Result::ok) {
            let Some(name) = entry.file_name().to_str().map(ToOwned::to_owned) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            if path.is_file() {
                out.push(name);
            } else if depth > 1 && path.is_dir() {
                inner(&path, depth - 1, out);
            }
        }
    }
    let mut out = Vec::new();
    inner(dir, depth, &mut out);
    out.sort();
    out
}

/// BIDS entity tokens of an input file name, with the modality suffix and
/// extensions removed: `sub-01_ses-02_task-rest_bold.nii.gz` with suffix
/// `bold` gives `[sub-01, ses-02, task-rest]`.
pub(crate) fn entity_tokens(name: &str, suffix: &str) -> Vec<String> {
    let stem = name.split('.').next().unwrap_or(name);
    let mut tokens: Vec<String> = stem.split('_').map(ToOwned::to_owned).collect();
    if tokens.last().map(String::as_str) == Some(suffix) {
        let _ = tokens.pop();
    }
    tokens
}

/// Whether `candidate` carries every entity in `tokens` plus the given
/// derivative tag (e.g. `desc-preproc_bold`). Entities are compared as
/// whole `_`-separated tokens, so `run-1` does not match `run-10`.
pub(crate) fn output_matches(candidate: &str, tokens: &[String], tag: &str) -> bool {
    if !candidate.contains(tag) {
        return false;
    }
    let stem = candidate.split('.').next().unwrap_or(candidate);
    let candidate_tokens: Vec<&str> = stem.split('_').collect();
    tokens
        .iter()
        .all(|token| candidate_tokens.contains(&token.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_tokens_strip_suffix_and_extensions() {
        assert_eq!(
            entity_tokens("sub-01_ses-02_task-rest_run-1_bold.nii.gz", "bold"),
            vec!["sub-01", "ses-02", "task-rest", "run-1"]
        );
    }

    #[test]
    fn output_matching_is_token_exact() {
        let tokens = entity_tokens("sub-01_task-rest_run-1_bold.nii.gz", "bold");
        assert!(output_matches(
            "sub-01_task-rest_run-1_space-MNI152_desc-preproc_bold.nii.gz",
            &tokens,
            "desc-preproc_bold"
        ));
        // run-1 must not match run-10.
        assert!(!output_matches(
            "sub-01_task-rest_run-10_space-MNI152_desc-preproc_bold.nii.gz",
            &tokens,
            "desc-preproc_bold"
        ));
        // The tag itself is required.
        assert!(!output_matches(
            "sub-01_task-rest_run-1_boldref.nii.gz",
            &tokens,
            "desc-preproc_bold"
        ));
    }
}
