// SPDX-License-Identifier: Apache-2.0

//! Validator reports: serialization and backward-compatible ingestion.
//!
//! The writer produces one shape; the reader accepts three. External
//! tooling has historically produced `{pipelines: {name: {subjects}}}`
//! and bare `{all_missing_subjects}` documents, and both still feed the
//! reprocessing loop.

use crate::error::Error;
use crate::finding::Finding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Filters that were in effect when the report was generated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportFilters {
    /// Pipeline restriction, when one was requested.
    #[serde(default)]
    pub pipeline: Option<String>,
    /// Explicit subject filter, when one was given.
    #[serde(default)]
    pub subjects: Vec<String>,
    /// Whether the run ignored oracle verdicts.
    #[serde(default)]
    pub force: bool,
}

/// Report header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Generator tag (`bidsflow <version>`).
    pub generator: String,
    /// ISO-8601 generation time.
    pub timestamp: String,
    /// Filters in effect during the run.
    #[serde(default)]
    pub filters: ReportFilters,
    /// Input dataset root.
    pub dataset_root: String,
    /// Output root that was verified.
    pub output_root: String,
}

/// Missing-data summary for one pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineMissing {
    /// One rendered line per finding.
    pub missing_items: Vec<String>,
    /// Number of findings.
    pub total_missing: usize,
    /// De-duplicated subject labels with at least one finding.
    pub subjects_with_missing_data: Vec<String>,
}

/// Flattened cross-pipeline summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Union of all pipelines' missing subjects, de-duplicated and in
    /// natural order.
    pub all_missing_subjects: Vec<String>,
}

/// A full validator report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Header.
    pub metadata: ReportMetadata,
    /// Per-pipeline missing-data sections.
    pub missing_data_by_pipeline: BTreeMap<String, PipelineMissing>,
    /// Flattened summary.
    pub summary: ReportSummary,
}

fn natural_dedup(mut values: Vec<String>) -> Vec<String> {
    values.sort_by(|a, b| natural_compare(a, b));
    values.dedup();
    values
}

fn natural_compare(a: &str, b: &str) -> std::cmp::Ordering {
    bidsflow_dataset::UnitId::subject(a).cmp(&bidsflow_dataset::UnitId::subject(b))
}

impl Report {
    /// Assembles a report from findings.
    #[must_use]
    pub fn from_findings(findings: &[Finding], metadata: ReportMetadata) -> Self {
        let mut by_pipeline: BTreeMap<String, PipelineMissing> = BTreeMap::new();
        for finding in findings {
            let entry = by_pipeline
                .entry(finding.pipeline.name().to_owned())
                .or_default();
            entry.missing_items.push(finding.render());
            entry
                .subjects_with_missing_data
                .push(finding.unit.subject_dir());
        }
        let mut all = Vec::new();
        for entry in by_pipeline.values_mut() {
            entry.total_missing = entry.missing_items.len();
            entry.subjects_with_missing_data =
                natural_dedup(std::mem::take(&mut entry.subjects_with_missing_data));
            all.extend(entry.subjects_with_missing_data.iter().cloned());
        }
        Report {
            metadata,
            missing_data_by_pipeline: by_pipeline,
            summary: ReportSummary {
                all_missing_subjects: natural_dedup(all),
            },
        }
    }

    /// Total number of findings across all pipelines.
    #[must_use]
    pub fn total_missing(&self) -> usize {
        self.missing_data_by_pipeline
            .values()
            .map(|p| p.total_missing)
            .sum()
    }

    /// Serializes the report as pretty JSON to `path`.
    pub fn write(&self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| Error::ReportWrite {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let body = serde_json::to_string_pretty(self).map_err(|e| Error::ReportWrite {
            path: path.to_path_buf(),
            source: std::io::Error::other(e),
        })?;
        fs::write(path, body).map_err(|source| Error::ReportWrite {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Subjects to reprocess, as read from a report of any accepted shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestedReport {
    /// Missing subjects per pipeline. Empty for shape (iii) documents,
    /// which only carry the flattened union.
    pub by_pipeline: BTreeMap<String, Vec<String>>,
    /// Union of missing subjects across pipelines.
    pub all_subjects: Vec<String>,
}

#[derive(Deserialize)]
struct ExternalPipelineEntry {
    #[serde(default)]
    subjects: Vec<String>,
}

#[derive(Deserialize)]
struct ExternalShape {
    pipelines: BTreeMap<String, ExternalPipelineEntry>,
}

#[derive(Deserialize)]
struct FlatShape {
    all_missing_subjects: Vec<String>,
}

/// Reads a report file, sniffing its shape.
pub fn read_report(path: &Path) -> Result<IngestedReport, Error> {
    if !path.is_file() {
        return Err(Error::ReportMissing {
            path: path.to_path_buf(),
        });
    }
    let body = fs::read_to_string(path).map_err(|e| Error::ReportRead {
        path: path.to_path_buf(),
        details: e.to_string(),
    })?;
    let value: serde_json::Value =
        serde_json::from_str(&body).map_err(|e| Error::ReportRead {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;
    ingest_value(value, path)
}

fn ingest_value(value: serde_json::Value, path: &Path) -> Result<IngestedReport, Error> {
    let read_err = |e: serde_json::Error| Error::ReportRead {
        path: path.to_path_buf(),
        details: e.to_string(),
    };

    if value.get("missing_data_by_pipeline").is_some() {
        let report: Report = serde_json::from_value(value).map_err(read_err)?;
        let by_pipeline: BTreeMap<String, Vec<String>> = report
            .missing_data_by_pipeline
            .into_iter()
            .map(|(name, entry)| (name, entry.subjects_with_missing_data))
            .collect();
        let all = if report.summary.all_missing_subjects.is_empty() {
            natural_dedup(by_pipeline.values().flatten().cloned().collect())
        } else {
            report.summary.all_missing_subjects
        };
        return Ok(IngestedReport {
            by_pipeline,
            all_subjects: all,
        });
    }

    if value.get("pipelines").is_some() {
        let shape: ExternalShape = serde_json::from_value(value).map_err(read_err)?;
        let by_pipeline: BTreeMap<String, Vec<String>> = shape
            .pipelines
            .into_iter()
            .map(|(name, entry)| (name, entry.subjects))
            .collect();
        let all = natural_dedup(by_pipeline.values().flatten().cloned().collect());
        return Ok(IngestedReport {
            by_pipeline,
            all_subjects: all,
        });
    }

    if value.get("all_missing_subjects").is_some() {
        let shape: FlatShape = serde_json::from_value(value).map_err(read_err)?;
        return Ok(IngestedReport {
            by_pipeline: BTreeMap::new(),
            all_subjects: natural_dedup(shape.all_missing_subjects),
        });
    }

    Err(Error::UnknownShape)
}
