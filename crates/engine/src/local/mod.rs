// SPDX-License-Identifier: Apache-2.0

//! Local dispatcher: runs a plan on this machine with a bounded worker
//! pool.
//!
//! The dispatcher itself is single-threaded; workers are cooperative async
//! tasks that each own one container process at a time. The work queue and
//! the record log are the only synchronization points. Plan order is the
//! dequeue order; completion order is unspecified.

use crate::annex::{DataladHelper, DatasetHelper, HelperError, is_content_addressed};
use crate::error::Error;
use crate::invocation::{
    CommandSpec, InvocationContext, LogSink, build_invocation, filter_ambient_env,
};
use crate::oracle::{CompletionOracle, clear_marker, write_marker};
use crate::plan::Plan;
use crate::record::{Classification, RecordLog, RunRecord, RunState};
use crate::scratch::{create_unit_scratch, remove_scratch};
use bidsflow_config::Config;
use bidsflow_dataset::UnitId;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::process::{ExitStatus, Stdio};
use std::rc::Rc;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

enum SpawnOutcome {
    Exited(ExitStatus),
    SpawnFailed(std::io::Error),
    Cancelled,
}

fn open_sinks(sink: &LogSink) -> std::io::Result<(Stdio, Stdio)> {
    fn open(path: &std::path::Path) -> std::io::Result<std::fs::File> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
    }
    match sink {
        LogSink::Combined(path) => {
            let file = open(path)?;
            let clone = file.try_clone()?;
            Ok((Stdio::from(file), Stdio::from(clone)))
        }
        LogSink::Split { stdout, stderr } => {
            Ok((Stdio::from(open(stdout)?), Stdio::from(open(stderr)?)))
        }
    }
}

/// Runs plans concurrently with `min(parallelism, |plan|)` workers.
pub struct LocalDispatcher<'a> {
    config: &'a Config,
    oracle: &'a CompletionOracle,
    records: RecordLog,
    cancel: CancellationToken,
    helper: Option<Rc<dyn DatasetHelper>>,
    helper_demoted: Cell<bool>,
    debug: bool,
    timestamp: String,
    passthrough_env: BTreeMap<String, String>,
}

impl<'a> LocalDispatcher<'a> {
    /// Creates a dispatcher. A content-addressed input dataset is detected
    /// here and enables the pre/post dataset helper steps.
    #[must_use]
    pub fn new(
        config: &'a Config,
        oracle: &'a CompletionOracle,
        records: RecordLog,
        cancel: CancellationToken,
        debug: bool,
        timestamp: impl Into<String>,
    ) -> Self {
        let helper: Option<Rc<dyn DatasetHelper>> =
            if is_content_addressed(&config.common.bids_root) {
                Some(Rc::new(DataladHelper::new()))
            } else {
                None
            };
        Self {
            config,
            oracle,
            records,
            cancel,
            helper,
            helper_demoted: Cell::new(false),
            debug,
            timestamp: timestamp.into(),
            passthrough_env: filter_ambient_env(std::env::vars()),
        }
    }

    /// Replaces the dataset helper (used by tests).
    #[must_use]
    pub fn with_helper(mut self, helper: Option<Rc<dyn DatasetHelper>>) -> Self {
        self.helper = helper;
        self
    }

    /// Executes the plan. Per-unit failures are recorded, never returned;
    /// the error path is reserved for run-invalidating conditions such as
    /// a marker collision.
    pub async fn run(&self, plan: &Plan) -> Result<(), Error> {
        if plan.is_empty() {
            return Ok(());
        }
        let workers = plan.parallelism().min(plan.len());
        info!(units = plan.len(), workers, "local dispatch starting");

        let (tx, rx) = flume::unbounded::<UnitId>();
        for unit in plan.units() {
            let _ = tx.send(unit.clone());
        }
        drop(tx);

        let force = plan.force();
        let results = futures::future::join_all(
            (0..workers).map(|_| self.worker(rx.clone(), force)),
        )
        .await;

        // Units still queued after cancellation never ran, but they left
        // the planned state; each gets a terminal record.
        if self.cancel.is_cancelled() {
            while let Ok(unit) = rx.try_recv() {
                self.records
                    .append(RunRecord::completed(unit, Classification::Cancelled));
            }
        }

        results.into_iter().collect::<Result<Vec<()>, Error>>()?;
        Ok(())
    }

    async fn worker(&self, rx: flume::Receiver<UnitId>, force: bool) -> Result<(), Error> {
        loop {
            let unit = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(()),
                unit = rx.recv_async() => match unit {
                    Ok(unit) => unit,
                    Err(_) => return Ok(()),
                },
            };
            self.run_unit(unit, force).await?;
        }
    }

    async fn run_unit(&self, unit: UnitId, force: bool) -> Result<(), Error> {
        let mut record = RunRecord::new(unit.clone(), RunState::Running);
        info!(unit = %unit, "starting unit");

        if force {
            if let Err(e) = clear_marker(self.oracle.marker_dir(), &unit) {
                warn!(unit = %unit, error = %e, "could not clear stale success marker");
            }
        }

        let scratch = match create_unit_scratch(&self.config.common.scratch_root, &unit) {
            Ok(path) => path,
            Err(e) => {
                warn!(unit = %unit, error = %e, "failed to set up scratch directory");
                record.complete(Classification::FailedContainer);
                self.records.append(record);
                return Ok(());
            }
        };

        let ctx = InvocationContext {
            unit: &unit,
            scratch_dir: &scratch,
            timestamp: &self.timestamp,
            debug: self.debug,
            bids_root: None,
            passthrough_env: &self.passthrough_env,
        };
        let spec = build_invocation(self.config, &ctx);
        record.log_path = Some(spec.sink.primary().to_path_buf());

        if let Some(helper) = self.active_helper() {
            if let Err(e) = helper
                .fetch_unit(&self.config.common.bids_root, &unit)
                .await
            {
                self.demote_helper(&e);
            }
        }

        let classification = match self.spawn_and_wait(&unit, &spec).await {
            SpawnOutcome::Cancelled => Classification::Cancelled,
            SpawnOutcome::SpawnFailed(e) => {
                warn!(unit = %unit, program = %spec.program, error = %e, "container spawn failed");
                Classification::FailedContainer
            }
            SpawnOutcome::Exited(status) => {
                record.exit_code = status.code();
                if status.success() {
                    self.confirm_and_mark(&unit).await?
                } else {
                    warn!(unit = %unit, code = ?status.code(), "container exited non-zero");
                    Classification::FailedContainer
                }
            }
        };

        let failed = matches!(
            classification,
            Classification::FailedContainer | Classification::FailedOutputCheck
        );
        if failed && !force {
            info!(unit = %unit, scratch = %scratch.display(), "retaining scratch for debugging");
            record.retained_scratch = Some(scratch);
        } else {
            remove_scratch(&scratch);
        }

        record.complete(classification);
        info!(unit = %unit, classification = classification.as_str(), "unit finished");
        self.records.append(record);
        Ok(())
    }

    /// Zero exit alone is not success: layers 2–4 of the oracle must see
    /// the expected outputs before the marker is written.
    async fn confirm_and_mark(&self, unit: &UnitId) -> Result<Classification, Error> {
        if !self.oracle.outputs_present(unit) {
            warn!(unit = %unit, "container exited zero but expected outputs are missing");
            return Ok(Classification::FailedOutputCheck);
        }
        write_marker(self.oracle.marker_dir(), unit, env!("CARGO_PKG_VERSION"))?;
        if self.config.dataset.is_some() {
            if let Some(helper) = self.active_helper() {
                let message = format!("bidsflow: outputs for {unit}");
                if let Err(e) = helper
                    .save_unit(&self.config.common.output_root, unit, &message)
                    .await
                {
                    self.demote_helper(&e);
                }
            }
        }
        Ok(Classification::Success)
    }

    async fn spawn_and_wait(&self, unit: &UnitId, spec: &CommandSpec) -> SpawnOutcome {
        let (stdout, stderr) = match open_sinks(&spec.sink) {
            Ok(sinks) => sinks,
            Err(e) => return SpawnOutcome::SpawnFailed(e),
        };
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .env_clear()
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return SpawnOutcome::SpawnFailed(e),
        };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                self.terminate(unit, &mut child).await;
                SpawnOutcome::Cancelled
            }
            status = child.wait() => match status {
                Ok(status) => SpawnOutcome::Exited(status),
                Err(e) => SpawnOutcome::SpawnFailed(e),
            },
        }
    }

    /// SIGTERM, a grace period, then SIGKILL.
    async fn terminate(&self, unit: &UnitId, child: &mut Child) {
        let grace = self.config.common.termination_grace;
        if let Some(pid) = child.id() {
            info!(unit = %unit, pid, "terminating container");
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            if tokio::time::timeout(grace, child.wait()).await.is_err() {
                warn!(unit = %unit, "grace period expired; killing container");
                let _ = child.kill().await;
            }
        } else {
            let _ = child.kill().await;
        }
    }

    fn active_helper(&self) -> Option<&Rc<dyn DatasetHelper>> {
        if self.helper_demoted.get() {
            None
        } else {
            self.helper.as_ref()
        }
    }

    /// On the first helper failure, local mode falls back to treating the
    /// dataset as a plain filesystem; the demotion is reported once.
    fn demote_helper(&self, error: &HelperError) {
        if !self.helper_demoted.get() {
            warn!(error = %error, "dataset helper failed; continuing without it");
            self.helper_demoted.set(true);
        }
    }
}
