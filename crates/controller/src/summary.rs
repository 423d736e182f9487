// SPDX-License-Identifier: Apache-2.0

//! End-of-run summary.

use bidsflow_engine::{Classification, RecordLog, RunRecord, RunState};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Everything the user sees at exit: counts, locations, and the exit
/// code the process should end with.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Units that left the planned state, across all rounds.
    pub planned: usize,
    /// Latest-record count per classification name.
    pub counts: BTreeMap<&'static str, usize>,
    /// Total wall-clock time.
    pub wall_clock: Duration,
    /// Where the logs live.
    pub log_root: PathBuf,
    /// The last written validator report, if any.
    pub report_path: Option<PathBuf>,
    /// Findings still open after the last verify pass.
    pub outstanding_findings: usize,
    /// Rendered commands, populated by `--dry-run` only.
    pub dry_run_commands: Vec<String>,
    /// Process exit code: 0 success, 1 unit failures or unresolved
    /// findings, 2 is reserved for configuration/planning errors.
    pub exit_code: i32,
}

/// The most recent record per unit, in first-seen (plan) order.
fn latest_records(records: &RecordLog) -> Vec<RunRecord> {
    let snapshot = records.snapshot();
    let mut latest: Vec<RunRecord> = Vec::new();
    for record in snapshot {
        match latest.iter_mut().find(|r| r.unit == record.unit) {
            Some(slot) => *slot = record,
            None => latest.push(record),
        }
    }
    latest
}

impl RunSummary {
    /// Builds the summary from the record log.
    #[must_use]
    pub fn from_records(
        records: &RecordLog,
        wall_clock: Duration,
        log_root: PathBuf,
        report_path: Option<PathBuf>,
        outstanding_findings: usize,
    ) -> Self {
        let latest = latest_records(records);
        let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut any_failure = false;
        for record in &latest {
            let name = match record.state {
                RunState::Completed(classification) => {
                    any_failure = any_failure || classification.is_failure();
                    classification.as_str()
                }
                RunState::Submitted => "submitted",
                RunState::Running => "running",
            };
            *counts.entry(name).or_insert(0) += 1;
        }
        let exit_code = i32::from(any_failure || outstanding_findings > 0);
        Self {
            planned: latest.len(),
            counts,
            wall_clock,
            log_root,
            report_path,
            outstanding_findings,
            dry_run_commands: Vec::new(),
            exit_code,
        }
    }

    /// Count for one classification, zero when absent.
    #[must_use]
    pub fn count(&self, classification: Classification) -> usize {
        self.counts.get(classification.as_str()).copied().unwrap_or(0)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.dry_run_commands.is_empty() {
            for command in &self.dry_run_commands {
                writeln!(f, "{command}")?;
            }
            return write!(f, "dry run: {} command(s), nothing executed", self.dry_run_commands.len());
        }
        writeln!(f, "run summary")?;
        writeln!(f, "  units attempted: {}", self.planned)?;
        for (name, count) in &self.counts {
            writeln!(f, "  {name}: {count}")?;
        }
        if self.outstanding_findings > 0 {
            writeln!(f, "  unresolved findings: {}", self.outstanding_findings)?;
        }
        writeln!(f, "  wall clock: {:.1}s", self.wall_clock.as_secs_f64())?;
        if let Some(report) = &self.report_path {
            writeln!(f, "  report: {}", report.display())?;
        }
        write!(f, "  logs: {}", self.log_root.display())
    }
}
