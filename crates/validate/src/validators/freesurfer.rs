// SPDX-License-Identifier: Apache-2.0

//! Structural-reconstruction completeness rules.
//!
//! For a subject with `N` anatomical sessions the reconstruction tree is
//! expected to hold one folder when `N = 1` and `2N + 1` folders when
//! `N >= 2` (N cross-sectional, one base template, N longitudinal). Every
//! folder must carry the `scripts/recon-all.done` sentinel. Longitudinal
//! folders must contain `.long`-tagged hippocampal and amygdala files;
//! cross-sectional folders must not contain `.long`-tagged files at all.

use super::{ValidationContext, collect_file_names};
use crate::finding::{Finding, FindingReason};
use crate::pipeline::Pipeline;
use bidsflow_dataset::UnitId;
use std::fs;
use std::path::Path;

/// `.long`-tagged structures required in every longitudinal folder.
const LONGITUDINAL_STRUCTURES: [&str; 2] = ["hippo", "amyg"];

/// Reconstruction folders belonging to `sub-X`: the base template
/// (`sub-X`), cross-sectional (`sub-X_ses-Y`), and longitudinal
/// (`sub-X_ses-Y.long.sub-X`) directories.
fn recon_folders(root: &Path, subject_dir: &str) -> Vec<String> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    let session_prefix = format!("{subject_dir}_ses-");
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().to_str().map(ToOwned::to_owned))
        .filter(|name| name == subject_dir || name.starts_with(&session_prefix))
        .collect();
    names.sort();
    names
}

pub(crate) fn validate(ctx: &ValidationContext<'_>) -> Vec<Finding> {
    let root = Pipeline::Freesurfer.derivatives_root(ctx.output_root);
    let mut findings = Vec::new();

    for (subject, index) in &ctx.dataset.subjects {
        let anat_sessions = index.anat_sessions();
        let n = anat_sessions.len();
        if n == 0 {
            continue;
        }
        let unit = UnitId::subject(subject);
        let subject_dir = unit.subject_dir();
        let folders = recon_folders(&root, &subject_dir);

        let expected = if n == 1 { 1 } else { 2 * n + 1 };
        if folders.len() != expected {
            findings.push(Finding::new(
                Pipeline::Freesurfer,
                unit.clone(),
                FindingReason::WrongFolderCount,
                format!("expected {expected}, got {}", folders.len()),
            ));
        }

        for folder in &folders {
            let folder_path = root.join(folder);
            if !folder_path.join("scripts").join("recon-all.done").is_file() {
                findings.push(Finding::new(
                    Pipeline::Freesurfer,
                    unit.clone(),
                    FindingReason::MissingCompletionSentinel,
                    format!("{folder}/scripts/recon-all.done is missing"),
                ));
            }

            let files = collect_file_names(&folder_path, 3);
            if folder.contains(".long.") {
                for structure in LONGITUDINAL_STRUCTURES {
                    let present = files
                        .iter()
                        .any(|f| f.contains(structure) && f.contains(".long"));
                    if !present {
                        findings.push(Finding::new(
                            Pipeline::Freesurfer,
                            unit.clone(),
                            FindingReason::MissingLongitudinalFile,
                            format!("{folder} has no .long {structure} file"),
                        ));
                    }
                }
            } else if folder != &subject_dir {
                // Cross-sectional folder: .long files do not belong here.
                if let Some(stray) = files.iter().find(|f| f.contains(".long")) {
                    findings.push(Finding::new(
                        Pipeline::Freesurfer,
                        unit.clone(),
                        FindingReason::LongitudinalFileInCrossSectional,
                        format!("{folder} contains {stray}"),
                    ));
                }
            }
        }
    }

    findings
}
