// SPDX-License-Identifier: Apache-2.0

//! Cluster dispatcher: delegates execution to an external job scheduler.
//!
//! No in-process concurrency; the scheduler owns the parallelism. The
//! dispatcher is a single-threaded coordinator that writes one script per
//! unit, submits in plan order, and optionally polls job states until all
//! tracked jobs are terminal. Completion semantics are shared with the
//! local dispatcher: the same invocation builder produces the container
//! line and the same oracle confirms outputs before a marker is written.

use crate::error::Error;
use crate::invocation::{InvocationContext, build_invocation, filter_ambient_env};
use crate::oracle::{CompletionOracle, clear_marker, write_marker};
use crate::plan::Plan;
use crate::record::{Classification, RecordLog, RunRecord, RunState};
use bidsflow_config::{ClusterSection, Config};
use bidsflow_dataset::UnitId;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod script;

/// SLURM state tokens that mean "not started yet".
const PENDING_STATES: [&str; 3] = ["PENDING", "CONFIGURING", "SUSPENDED"];

/// SLURM state tokens that mean "in progress".
const RUNNING_STATES: [&str; 2] = ["RUNNING", "COMPLETING"];

/// SLURM state tokens that mean the job is over and did not succeed.
const FAILED_STATES: [&str; 8] = [
    "FAILED",
    "TIMEOUT",
    "CANCELLED",
    "NODE_FAIL",
    "OUT_OF_MEMORY",
    "PREEMPTED",
    "BOOT_FAIL",
    "DEADLINE",
];

/// How many consecutive status-command failures stop the monitor.
const MAX_POLL_FAILURES: u32 = 3;

/// Submits a plan to an external scheduler, one script per unit.
pub struct ClusterDispatcher<'a> {
    config: &'a Config,
    cluster: &'a ClusterSection,
    oracle: &'a CompletionOracle,
    records: RecordLog,
    cancel: CancellationToken,
    debug: bool,
    timestamp: String,
    passthrough_env: BTreeMap<String, String>,
}

impl<'a> ClusterDispatcher<'a> {
    /// Creates a dispatcher; fails when the configuration has no cluster
    /// section.
    pub fn new(
        config: &'a Config,
        oracle: &'a CompletionOracle,
        records: RecordLog,
        cancel: CancellationToken,
        debug: bool,
        timestamp: impl Into<String>,
    ) -> Result<Self, Error> {
        let cluster = config.cluster.as_ref().ok_or(Error::NoClusterSection)?;
        Ok(Self {
            config,
            cluster,
            oracle,
            records,
            cancel,
            debug,
            timestamp: timestamp.into(),
            passthrough_env: filter_ambient_env(std::env::vars()),
        })
    }

    /// Directory job scripts are written to.
    #[must_use]
    pub fn script_dir(&self) -> PathBuf {
        self.config.log_root().join("jobs")
    }

    /// Writes the job script for one unit and returns its path.
    pub fn write_script(&self, unit: &UnitId) -> Result<PathBuf, Error> {
        let bare = unit.bare();
        let job_scratch = self
            .config
            .common
            .scratch_root
            .join(format!("job_{bare}"));
        let scratch_dir = job_scratch.join("work");
        let clone_root = self
            .config
            .dataset
            .as_ref()
            .map(|_| job_scratch.join("dataset"));
        let ctx = InvocationContext {
            unit,
            scratch_dir: &scratch_dir,
            timestamp: &self.timestamp,
            debug: self.debug,
            bids_root: clone_root.as_deref(),
            passthrough_env: &self.passthrough_env,
        };
        let spec = build_invocation(self.config, &ctx);
        let body = script::render_job_script(self.config, self.cluster, unit, &spec, &job_scratch);

        let dir = self.script_dir();
        std::fs::create_dir_all(&dir).map_err(|source| Error::ScriptWrite {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(format!("job_{bare}_{}.sh", self.timestamp));
        std::fs::write(&path, body).map_err(|source| Error::ScriptWrite {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Writes every job script without submitting anything. Used by
    /// `--dry-run`.
    pub fn write_scripts(&self, plan: &Plan) -> Result<Vec<PathBuf>, Error> {
        plan.units().iter().map(|u| self.write_script(u)).collect()
    }

    /// Submits the plan in order, then optionally monitors to completion.
    pub async fn run(&self, plan: &Plan) -> Result<(), Error> {
        info!(units = plan.len(), "cluster dispatch starting");
        for unit in plan.units() {
            if self.cancel.is_cancelled() {
                self.records
                    .append(RunRecord::completed(unit.clone(), Classification::Cancelled));
                continue;
            }
            if plan.force() {
                if let Err(e) = clear_marker(self.oracle.marker_dir(), unit) {
                    warn!(unit = %unit, error = %e, "could not clear stale success marker");
                }
            }
            let script = self.write_script(unit)?;
            self.submit(unit, &script).await;
        }

        if self.cancel.is_cancelled() {
            self.cancel_outstanding().await;
            return Ok(());
        }
        if self.cluster.monitor {
            self.monitor().await?;
        }
        Ok(())
    }

    async fn submit(&self, unit: &UnitId, script: &std::path::Path) {
        let output = Command::new(&self.cluster.scheduler.submit)
            .arg(script)
            .output()
            .await;
        let mut record = RunRecord::new(unit.clone(), RunState::Submitted);
        match output {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                match stdout.split_whitespace().next_back() {
                    Some(job_id) => {
                        info!(unit = %unit, job_id, "job submitted");
                        record.job_id = Some(job_id.to_owned());
                    }
                    None => {
                        warn!(unit = %unit, "submit produced no job id");
                        record.complete(Classification::SubmitFailed);
                    }
                }
            }
            Ok(output) => {
                warn!(
                    unit = %unit,
                    code = ?output.status.code(),
                    stderr = %String::from_utf8_lossy(&output.stderr),
                    "submit command failed"
                );
                record.complete(Classification::SubmitFailed);
            }
            Err(e) => {
                warn!(unit = %unit, command = %self.cluster.scheduler.submit, error = %e, "could not spawn submit command");
                record.complete(Classification::SubmitFailed);
            }
        }
        self.records.append(record);
    }

    /// Jobs still tracked as submitted or running, in submission order.
    fn outstanding(&self) -> Vec<(UnitId, String, RunState)> {
        self.records
            .snapshot()
            .into_iter()
            .filter(|r| matches!(r.state, RunState::Submitted | RunState::Running))
            .filter_map(|r| r.job_id.clone().map(|id| (r.unit, id, r.state)))
            .collect()
    }

    async fn monitor(&self) -> Result<(), Error> {
        let mut poll_failures = 0;
        loop {
            if self.outstanding().is_empty() {
                return Ok(());
            }
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    self.cancel_outstanding().await;
                    return Ok(());
                }
                () = tokio::time::sleep(self.cluster.poll_interval) => {}
            }

            let outstanding = self.outstanding();
            let ids: Vec<String> = outstanding.iter().map(|(_, id, _)| id.clone()).collect();
            let states = match self.query_states(&ids).await {
                Ok(states) => {
                    poll_failures = 0;
                    states
                }
                Err(e) => {
                    poll_failures += 1;
                    warn!(error = %e, attempt = poll_failures, "scheduler status query failed");
                    if poll_failures >= MAX_POLL_FAILURES {
                        warn!("giving up on job monitoring; records keep their last observed state");
                        return Ok(());
                    }
                    continue;
                }
            };

            for (unit, job_id, _) in outstanding {
                match states.get(&job_id).map(String::as_str) {
                    Some(state) if PENDING_STATES.contains(&state) => {}
                    Some(state) if RUNNING_STATES.contains(&state) => {
                        let _ = self.records.update(&unit, |r| {
                            if r.state == RunState::Submitted {
                                info!(unit = %r.unit, job_id = %job_id, "job running");
                                r.state = RunState::Running;
                            }
                        });
                    }
                    Some(state) if FAILED_STATES.contains(&state) => {
                        warn!(unit = %unit, job_id = %job_id, state, "job failed");
                        let _ = self
                            .records
                            .update(&unit, |r| r.complete(Classification::FailedContainer));
                    }
                    Some("COMPLETED") | None => {
                        let classification = self.finalize_success(&unit)?;
                        let _ = self
                            .records
                            .update(&unit, |r| r.complete(classification));
                    }
                    Some(state) => {
                        warn!(unit = %unit, job_id = %job_id, state, "unrecognized job state");
                    }
                }
            }
        }
    }

    /// A job that finished cleanly still has to pass the output check
    /// before its marker is written, exactly like a local unit.
    fn finalize_success(&self, unit: &UnitId) -> Result<Classification, Error> {
        if self.oracle.outputs_present(unit) {
            write_marker(self.oracle.marker_dir(), unit, env!("CARGO_PKG_VERSION"))?;
            info!(unit = %unit, "job succeeded");
            Ok(Classification::Success)
        } else {
            warn!(unit = %unit, "job completed but expected outputs are missing");
            Ok(Classification::FailedOutputCheck)
        }
    }

    async fn query_states(&self, ids: &[String]) -> Result<HashMap<String, String>, std::io::Error> {
        let output = Command::new(&self.cluster.scheduler.status)
            .args(["-h", "-j", &ids.join(","), "-o", "%i %T"])
            .output()
            .await?;
        // A job unknown to the scheduler is simply absent from the output;
        // some schedulers also exit non-zero for it, so stdout is parsed
        // regardless of the exit status.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut states = HashMap::new();
        for line in stdout.lines() {
            let mut fields = line.split_whitespace();
            if let (Some(id), Some(state)) = (fields.next(), fields.next()) {
                let _ = states.insert(id.to_owned(), state.to_owned());
            }
        }
        Ok(states)
    }

    /// Cancels tracked jobs in reverse submission order.
    async fn cancel_outstanding(&self) {
        let mut outstanding = self.outstanding();
        outstanding.reverse();
        for (unit, job_id, state) in outstanding {
            let result = Command::new(&self.cluster.scheduler.cancel)
                .arg(&job_id)
                .output()
                .await;
            if let Err(e) = result {
                warn!(unit = %unit, job_id = %job_id, error = %e, "could not spawn cancel command");
            }
            let classification = if state == RunState::Submitted {
                Classification::CancelledSubmitted
            } else {
                Classification::CancelledRunning
            };
            info!(unit = %unit, job_id = %job_id, classification = classification.as_str(), "job cancelled");
            let _ = self.records.update(&unit, |r| r.complete(classification));
        }
    }
}
