// SPDX-License-Identifier: Apache-2.0

//! Diffusion-preprocessing completeness rules.
//!
//! Each diffusion subject needs a subject-level output directory and a
//! subject-level HTML report; each input DWI file needs a
//! `desc-preproc_dwi` counterpart in the same session's `dwi/`
//! subdirectory.

use super::{ValidationContext, entity_tokens, list_dir_files, output_matches, session_scope, unit_for};
use crate::finding::{Finding, FindingReason};
use crate::pipeline::Pipeline;
use bidsflow_dataset::UnitId;

fn is_dwi(name: &str) -> bool {
    name.ends_with("_dwi.nii.gz") || name.ends_with("_dwi.nii")
}

pub(crate) fn validate(ctx: &ValidationContext<'_>) -> Vec<Finding> {
    let root = Pipeline::Qsiprep.derivatives_root(ctx.output_root);
    let mut findings = Vec::new();

    for (subject, index) in &ctx.dataset.subjects {
        let has_dwi = index
            .sessions
            .values()
            .any(|files| files.dwi.iter().any(|f| is_dwi(f)));
        if !has_dwi {
            continue;
        }
        let subject_unit = UnitId::subject(subject);
        let subject_root = root.join(subject_unit.subject_dir());

        if !subject_root.is_dir() {
            findings.push(Finding::new(
                Pipeline::Qsiprep,
                subject_unit.clone(),
                FindingReason::MissingSubjectDir,
                format!("{} is missing", subject_root.display()),
            ));
        }
        if !root
            .join(format!("{}.html", subject_unit.subject_dir()))
            .is_file()
        {
            findings.push(Finding::new(
                Pipeline::Qsiprep,
                subject_unit.clone(),
                FindingReason::MissingReport,
                "subject-level HTML report is missing",
            ));
        }
        if !subject_root.is_dir() {
            // Without the subject directory the per-file pairings are
            // vacuously missing; one finding is enough.
            continue;
        }

        for (session, files) in &index.sessions {
            let unit = unit_for(subject, session.as_deref());
            let scope = session_scope(&subject_root, session.as_deref());
            let dwi_outputs = list_dir_files(&scope.join("dwi"));
            for input in files.dwi.iter().filter(|f| is_dwi(f)) {
                let tokens = entity_tokens(input, "dwi");
                let matched = dwi_outputs
                    .iter()
                    .any(|candidate| output_matches(candidate, &tokens, "desc-preproc_dwi"));
                if !matched {
                    findings.push(Finding::new(
                        Pipeline::Qsiprep,
                        unit.clone(),
                        FindingReason::MissingPreprocessed,
                        format!("no desc-preproc_dwi output for {input}"),
                    ));
                }
            }
        }
    }

    findings
}
