// SPDX-License-Identifier: Apache-2.0

//! Diffusion-reconstruction completeness rules.
//!
//! Every `sub-*/ses-*/dwi/` path implied by the input dataset must exist
//! under the reconstruction root and contain at least one data file.

use super::{ValidationContext, list_dir_files, session_scope, unit_for};
use crate::finding::{Finding, FindingReason};
use crate::pipeline::Pipeline;

fn is_dwi(name: &str) -> bool {
    name.ends_with("_dwi.nii.gz") || name.ends_with("_dwi.nii")
}

pub(crate) fn validate(ctx: &ValidationContext<'_>) -> Vec<Finding> {
    let root = Pipeline::Qsirecon.derivatives_root(ctx.output_root);
    let mut findings = Vec::new();

    for (subject, index) in &ctx.dataset.subjects {
        let subject_root = root.join(format!("sub-{subject}"));
        for (session, files) in &index.sessions {
            if !files.dwi.iter().any(|f| is_dwi(f)) {
                continue;
            }
            let unit = unit_for(subject, session.as_deref());
            let dwi_dir = session_scope(&subject_root, session.as_deref()).join("dwi");
            if !dwi_dir.is_dir() {
                findings.push(Finding::new(
                    Pipeline::Qsirecon,
                    unit,
                    FindingReason::MissingReconOutput,
                    format!("{} is missing", dwi_dir.display()),
                ));
            } else if list_dir_files(&dwi_dir).is_empty() {
                findings.push(Finding::new(
                    Pipeline::Qsirecon,
                    unit,
                    FindingReason::EmptyOutputDir,
                    format!("{} contains no data file", dwi_dir.display()),
                ));
            }
        }
    }

    findings
}
