// SPDX-License-Identifier: Apache-2.0

//! Functional-preprocessing completeness rules.
//!
//! Each input BOLD file must have a `desc-preproc_bold` counterpart in the
//! corresponding output session. Surface outputs must come in hemisphere
//! pairs, and surface coverage must be consistent across the cohort: once
//! any subject has surface outputs, every processed subject must.

use super::{
    ValidationContext, collect_file_names, entity_tokens, list_dir_files, output_matches,
    session_scope, unit_for,
};
use crate::finding::{Finding, FindingReason};
use crate::pipeline::Pipeline;
use bidsflow_dataset::UnitId;
use std::collections::BTreeMap;

fn is_bold(name: &str) -> bool {
    name.ends_with("_bold.nii.gz") || name.ends_with("_bold.nii")
}

fn is_surface(name: &str) -> bool {
    name.contains("hemi-L") || name.contains("hemi-R")
}

pub(crate) fn validate(ctx: &ValidationContext<'_>) -> Vec<Finding> {
    let root = Pipeline::Fmriprep.derivatives_root(ctx.output_root);
    let mut findings = Vec::new();
    // Surface-output count per processed subject, for the cohort rule.
    let mut surface_counts: BTreeMap<String, usize> = BTreeMap::new();

    for (subject, index) in &ctx.dataset.subjects {
        let mut processed = false;
        let mut surfaces = 0usize;
        let subject_root = root.join(format!("sub-{subject}"));

        for (session, files) in &index.sessions {
            let bold_inputs: Vec<&String> = files.func.iter().filter(|f| is_bold(f)).collect();
            if bold_inputs.is_empty() {
                continue;
            }
            processed = true;
            let unit = unit_for(subject, session.as_deref());
            let scope = session_scope(&subject_root, session.as_deref());
            let func_outputs = list_dir_files(&scope.join("func"));

            for input in bold_inputs {
                let tokens = entity_tokens(input, "bold");
                let matched = func_outputs
                    .iter()
                    .any(|candidate| output_matches(candidate, &tokens, "desc-preproc_bold"));
                if !matched {
                    findings.push(Finding::new(
                        Pipeline::Fmriprep,
                        unit.clone(),
                        FindingReason::MissingPreprocessed,
                        format!("no desc-preproc_bold output for {input}"),
                    ));
                }
            }

            // Hemisphere pairing within this session's outputs.
            let session_outputs = collect_file_names(&scope, 2);
            for name in &session_outputs {
                if !is_surface(name) {
                    continue;
                }
                surfaces += 1;
                let counterpart = if name.contains("hemi-L") {
                    name.replace("hemi-L", "hemi-R")
                } else {
                    name.replace("hemi-R", "hemi-L")
                };
                if !session_outputs.contains(&counterpart) {
                    findings.push(Finding::new(
                        Pipeline::Fmriprep,
                        unit.clone(),
                        FindingReason::MissingHemispherePair,
                        format!("{name} has no {counterpart}"),
                    ));
                }
            }
        }

        if processed {
            let _ = surface_counts.insert(subject.clone(), surfaces);
        }
    }

    // Cross-subject consistency: if any subject has surface outputs, all
    // must.
    if surface_counts.values().any(|&count| count > 0) {
        for (subject, &count) in &surface_counts {
            if count == 0 {
                findings.push(Finding::new(
                    Pipeline::Fmriprep,
                    UnitId::subject(subject),
                    FindingReason::InconsistentSurfaceAcrossCohort,
                    "other subjects have surface outputs, this one has none",
                ));
            }
        }
    }

    findings
}
