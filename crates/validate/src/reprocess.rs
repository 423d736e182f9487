// SPDX-License-Identifier: Apache-2.0

//! Reprocess-feedback engine: turns a report into units to run again.
//!
//! The caller decides whether to loop; this module only converts. Force is
//! implied downstream by report provenance.

use crate::error::Error;
use crate::finding::Finding;
use crate::pipeline::Pipeline;
use crate::report::IngestedReport;
use bidsflow_dataset::UnitId;

/// Units to reprocess from an ingested report, optionally restricted to
/// one pipeline's missing-data section.
///
/// Without a restriction the union of all pipelines is used. A restriction
/// that names a pipeline absent from the report is an error; shape (iii)
/// documents carry no per-pipeline sections at all, so any restriction on
/// them is rejected the same way.
pub fn units_from_report(
    report: &IngestedReport,
    pipeline: Option<Pipeline>,
) -> Result<Vec<UnitId>, Error> {
    let subjects: Vec<String> = match pipeline {
        Some(pipeline) => report
            .by_pipeline
            .get(pipeline.name())
            .cloned()
            .ok_or_else(|| Error::PipelineNotInReport {
                name: pipeline.name().to_owned(),
            })?,
        None => report.all_subjects.clone(),
    };
    let mut units: Vec<UnitId> = subjects
        .iter()
        .map(|label| UnitId::parse_label(label))
        .collect();
    units.sort();
    units.dedup();
    Ok(units)
}

/// Units to reprocess straight from an in-memory finding set (the
/// `--reprocess-missing` loop does not round-trip through a file).
#[must_use]
pub fn units_from_findings(findings: &[Finding]) -> Vec<UnitId> {
    let mut units: Vec<UnitId> = findings.iter().map(|f| f.unit.clone()).collect();
    units.sort();
    units.dedup();
    units
}
