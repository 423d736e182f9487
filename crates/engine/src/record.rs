// SPDX-License-Identifier: Apache-2.0

//! Run records: one entry per unit that left the planned state.

use bidsflow_dataset::UnitId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

/// Terminal classification of one attempted unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Container exited zero and the expected outputs exist.
    Success,
    /// Container could not be spawned or exited non-zero.
    FailedContainer,
    /// Container exited zero but the oracle found no outputs.
    FailedOutputCheck,
    /// The oracle reported the unit done before dispatch.
    SkippedAlreadyDone,
    /// The unit was stopped by cancellation.
    Cancelled,
    /// The scheduler submit command failed or returned no job id.
    SubmitFailed,
    /// Cancellation reached the job before it started.
    CancelledSubmitted,
    /// Cancellation reached the job while it was running.
    CancelledRunning,
}

impl Classification {
    /// Whether this classification makes the run exit non-zero.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        !matches!(
            self,
            Classification::Success | Classification::SkippedAlreadyDone
        )
    }

    /// Stable lower-snake name used in summaries and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Classification::Success => "success",
            Classification::FailedContainer => "failed_container",
            Classification::FailedOutputCheck => "failed_output_check",
            Classification::SkippedAlreadyDone => "skipped_already_done",
            Classification::Cancelled => "cancelled",
            Classification::SubmitFailed => "submit_failed",
            Classification::CancelledSubmitted => "cancelled_submitted",
            Classification::CancelledRunning => "cancelled_running",
        }
    }
}

/// Lifecycle state of a run record.
///
/// Local units go straight to `Completed`; cluster units pass through
/// `Submitted` and, when monitoring is enabled, `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Handed to the external scheduler, not yet observed running.
    Submitted,
    /// Observed running by the scheduler status command.
    Running,
    /// Terminal.
    Completed(Classification),
}

impl RunState {
    /// The terminal classification, if this record is terminal.
    #[must_use]
    pub const fn classification(self) -> Option<Classification> {
        match self {
            RunState::Completed(classification) => Some(classification),
            _ => None,
        }
    }
}

/// Everything recorded about one attempted unit.
#[derive(Debug, Clone)]
pub struct RunRecord {
    /// The unit this record belongs to.
    pub unit: UnitId,
    /// When the unit left the planned state.
    pub started_at: DateTime<Utc>,
    /// When the unit reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Current lifecycle state.
    pub state: RunState,
    /// Container exit code, when one was observed.
    pub exit_code: Option<i32>,
    /// Per-unit log file, when one was opened.
    pub log_path: Option<PathBuf>,
    /// Scratch directory kept for debugging after a failure.
    pub retained_scratch: Option<PathBuf>,
    /// Scheduler job id, in cluster mode.
    pub job_id: Option<String>,
}

impl RunRecord {
    /// Creates a record in the given initial state, stamped now.
    #[must_use]
    pub fn new(unit: UnitId, state: RunState) -> Self {
        Self {
            unit,
            started_at: Utc::now(),
            finished_at: None,
            state,
            exit_code: None,
            log_path: None,
            retained_scratch: None,
            job_id: None,
        }
    }

    /// Creates a terminal record, stamped now on both ends.
    #[must_use]
    pub fn completed(unit: UnitId, classification: Classification) -> Self {
        let mut record = Self::new(unit, RunState::Completed(classification));
        record.finished_at = Some(record.started_at);
        record
    }

    /// Moves the record to a terminal state, stamping the finish time.
    pub fn complete(&mut self, classification: Classification) {
        self.state = RunState::Completed(classification);
        self.finished_at = Some(Utc::now());
    }
}

/// Shared, append-only log of run records.
///
/// Appends and updates take a mutex; readers see a consistent prefix at
/// any time. Cloning shares the log.
#[derive(Debug, Clone, Default)]
pub struct RecordLog {
    inner: Arc<Mutex<Vec<RunRecord>>>,
}

impl RecordLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record.
    pub fn append(&self, record: RunRecord) {
        self.inner.lock().push(record);
    }

    /// Mutates the most recent record of `unit` in place (a reprocessed
    /// unit has one record per round). Returns `false` when the unit has
    /// no record yet.
    pub fn update<F: FnOnce(&mut RunRecord)>(&self, unit: &UnitId, f: F) -> bool {
        let mut records = self.inner.lock();
        match records.iter_mut().rev().find(|r| &r.unit == unit) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    /// A point-in-time copy of all records.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RunRecord> {
        self.inner.lock().clone()
    }

    /// Units that currently have a record.
    #[must_use]
    pub fn recorded_units(&self) -> Vec<UnitId> {
        self.inner.lock().iter().map(|r| r.unit.clone()).collect()
    }
}
