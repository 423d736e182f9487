// SPDX-License-Identifier: Apache-2.0

//! Validator findings.

use crate::pipeline::Pipeline;
use bidsflow_dataset::UnitId;

/// Why a unit's outputs are considered incomplete. Closed enumeration;
/// every validator rule maps onto exactly one reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FindingReason {
    /// The subject-level output directory is missing.
    MissingSubjectDir,
    /// The subject-level HTML report is missing.
    MissingReport,
    /// An input file has no matching preprocessed output.
    MissingPreprocessed,
    /// A surface file exists for one hemisphere but not the other.
    MissingHemispherePair,
    /// Some subjects in the cohort have surface outputs and this one has
    /// none.
    InconsistentSurfaceAcrossCohort,
    /// The number of reconstruction folders does not match the session
    /// count.
    WrongFolderCount,
    /// A reconstruction folder lacks its completion sentinel.
    MissingCompletionSentinel,
    /// A longitudinal folder lacks a required `.long`-tagged file.
    MissingLongitudinalFile,
    /// A cross-sectional folder contains a `.long`-tagged file.
    LongitudinalFileInCrossSectional,
    /// An expected reconstruction output directory is missing.
    MissingReconOutput,
    /// An output directory exists but contains no data file.
    EmptyOutputDir,
}

impl FindingReason {
    /// The reason's stable name, as written into reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            FindingReason::MissingSubjectDir => "MissingSubjectDir",
            FindingReason::MissingReport => "MissingReport",
            FindingReason::MissingPreprocessed => "MissingPreprocessed",
            FindingReason::MissingHemispherePair => "MissingHemispherePair",
            FindingReason::InconsistentSurfaceAcrossCohort => "InconsistentSurfaceAcrossCohort",
            FindingReason::WrongFolderCount => "WrongFolderCount",
            FindingReason::MissingCompletionSentinel => "MissingCompletionSentinel",
            FindingReason::MissingLongitudinalFile => "MissingLongitudinalFile",
            FindingReason::LongitudinalFileInCrossSectional => "LongitudinalFileInCrossSectional",
            FindingReason::MissingReconOutput => "MissingReconOutput",
            FindingReason::EmptyOutputDir => "EmptyOutputDir",
        }
    }
}

/// One structured record describing a missing or malformed output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// The pipeline whose rule was violated.
    pub pipeline: Pipeline,
    /// The affected unit.
    pub unit: UnitId,
    /// The rule that was violated.
    pub reason: FindingReason,
    /// Human-readable specifics (file names, expected counts).
    pub detail: String,
}

impl Finding {
    /// Creates a finding.
    #[must_use]
    pub fn new(
        pipeline: Pipeline,
        unit: UnitId,
        reason: FindingReason,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            pipeline,
            unit,
            reason,
            detail: detail.into(),
        }
    }

    /// The report line for this finding, e.g.
    /// `sub-001_ses-01: MissingPreprocessed (no match for ..._bold.nii.gz)`.
    #[must_use]
    pub fn render(&self) -> String {
        if self.detail.is_empty() {
            format!("{}: {}", self.unit, self.reason.as_str())
        } else {
            format!("{}: {} ({})", self.unit, self.reason.as_str(), self.detail)
        }
    }
}

/// Sorts findings into their stable order: pipeline, unit, reason, detail.
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        a.pipeline
            .cmp(&b.pipeline)
            .then_with(|| a.unit.cmp(&b.unit))
            .then_with(|| a.reason.cmp(&b.reason))
            .then_with(|| a.detail.cmp(&b.detail))
    });
}
