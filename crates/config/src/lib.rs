// SPDX-License-Identifier: Apache-2.0

//! Configuration model for the bidsflow engine.
//!
//! Data Model:
//! - configuration document
//!   - `common`: dataset, output, scratch and image paths, parallelism
//!   - `app`: analysis level, pass-through arguments, extra bind mounts
//!   - `cluster` (optional): scheduler directives and monitoring
//!   - `dataset` (optional): content-addressed dataset references
//!
//! The document is loaded once per process invocation, resolved to absolute
//! paths, validated, and never mutated afterwards. Loader failures are fatal
//! and reported before any side effect.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod error;
mod io;
mod validate;

pub use error::Error;

/// Name of the reserved subdirectory of the output root holding success
/// markers and other engine-owned artifacts.
pub const RESERVED_DIR: &str = ".bidsflow";

/// The analysis level a BIDS App is invoked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisLevel {
    /// Per-subject processing; the unit selector flags are appended.
    Participant,
    /// Cohort-level processing.
    Group,
}

impl AnalysisLevel {
    /// The command-line token BIDS Apps expect for this level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            AnalysisLevel::Participant => "participant",
            AnalysisLevel::Group => "group",
        }
    }
}

/// One extra bind mount passed to the container runtime.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BindMount {
    /// Host path; must exist.
    pub source: PathBuf,
    /// Absolute path inside the container.
    pub target: PathBuf,
}

fn default_runtime() -> String {
    "apptainer".to_owned()
}

fn default_jobs() -> i64 {
    1
}

fn default_true() -> bool {
    true
}

fn default_reprocess_cap() -> u32 {
    3
}

fn default_grace() -> Duration {
    Duration::from_secs(10)
}

fn default_level() -> String {
    "participant".to_owned()
}

fn default_poll() -> Duration {
    Duration::from_secs(30)
}

/// The `common` section: where the data lives and how hard to push.
#[derive(Debug, Clone, Deserialize)]
pub struct CommonSection {
    /// Root of the input BIDS dataset.
    pub bids_root: PathBuf,
    /// Root of the derivatives/output tree.
    pub output_root: PathBuf,
    /// Root under which per-unit scratch directories are created.
    pub scratch_root: PathBuf,
    /// Path of the container image to run.
    pub container_image: PathBuf,
    /// Container runtime executable.
    #[serde(default = "default_runtime")]
    pub container_runtime: String,
    /// Log directory; defaults to `<output_root>/logs`.
    #[serde(default)]
    pub log_root: Option<PathBuf>,
    /// Auxiliary host roots mounted read-only at their own path
    /// (template archives, license directories).
    #[serde(default)]
    pub aux_mounts: Vec<PathBuf>,
    /// Number of concurrent local workers.
    #[serde(default = "default_jobs")]
    pub jobs: i64,
    /// Whether cluster jobs serialize dataset clone/push with an advisory
    /// lock.
    #[serde(default = "default_true")]
    pub locking: bool,
    /// Upper bound on `--reprocess-missing` rounds.
    #[serde(default = "default_reprocess_cap")]
    pub max_reprocess_iterations: u32,
    /// How long a terminated container may keep running before it is
    /// killed.
    #[serde(default = "default_grace", with = "humantime_serde")]
    pub termination_grace: Duration,
}

/// The `app` section: how one unit is handed to the pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    /// `participant` or `group`.
    #[serde(default = "default_level")]
    pub analysis_level: String,
    /// Pass-through arguments appended after the unit selector, in order.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra bind mounts beyond the fixed dataset/output/scratch ones.
    #[serde(default)]
    pub mounts: Vec<BindMount>,
    /// Glob template deciding unit completion; `{subject}` and `{session}`
    /// are substituted.
    #[serde(default)]
    pub output_pattern: Option<String>,
    /// Schedule one unit per session directory instead of per subject.
    #[serde(default)]
    pub session_aware: bool,
    /// Set by upstream tooling once app options were discovered from the
    /// image; honored as an opaque bit, never enforced here.
    #[serde(default)]
    pub image_locked: bool,
}

/// Scheduler command names, overridable for non-SLURM sites and tests.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SchedulerCommands {
    /// Submit command; its stdout's trailing token is the job id.
    #[serde(default = "SchedulerCommands::default_submit")]
    pub submit: String,
    /// Status command; invoked with the outstanding job ids.
    #[serde(default = "SchedulerCommands::default_status")]
    pub status: String,
    /// Cancel command; invoked with one job id.
    #[serde(default = "SchedulerCommands::default_cancel")]
    pub cancel: String,
}

impl SchedulerCommands {
    fn default_submit() -> String {
        "sbatch".to_owned()
    }
    fn default_status() -> String {
        "squeue".to_owned()
    }
    fn default_cancel() -> String {
        "scancel".to_owned()
    }
}

impl Default for SchedulerCommands {
    fn default() -> Self {
        Self {
            submit: Self::default_submit(),
            status: Self::default_status(),
            cancel: Self::default_cancel(),
        }
    }
}

/// The optional `cluster` section: directives for the external scheduler.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSection {
    /// Queue / partition name.
    pub queue: String,
    /// Walltime in `H:MM:SS` or `HH:MM:SS`.
    pub walltime: String,
    /// Memory request, `<n>M` or `<n>G`.
    pub memory: String,
    /// CPU count per job.
    pub cpus: u32,
    /// Job name base; the unit label is appended.
    #[serde(default = "default_job_name")]
    pub job_name: String,
    /// `module load` lines emitted at the top of each job script.
    #[serde(default)]
    pub modules: Vec<String>,
    /// Environment exported inside each job script and allow-listed for
    /// the container.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Scheduler stdout file pattern; defaults to `<log_root>/%x_%j.out`.
    #[serde(default)]
    pub stdout_pattern: Option<String>,
    /// Scheduler stderr file pattern; defaults to `<log_root>/%x_%j.err`.
    #[serde(default)]
    pub stderr_pattern: Option<String>,
    /// Poll job states after submission until all are terminal.
    #[serde(default)]
    pub monitor: bool,
    /// Interval between status polls.
    #[serde(default = "default_poll", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Advisory lock file serializing dataset clone/push across jobs.
    #[serde(default)]
    pub lock_path: Option<PathBuf>,
    /// Scheduler command names.
    #[serde(default)]
    pub scheduler: SchedulerCommands,
}

fn default_job_name() -> String {
    "bidsflow".to_owned()
}

/// The optional `dataset` section: content-addressed dataset references.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetSection {
    /// Reference of the input dataset (URL or path).
    pub input_ref: String,
    /// Reference of the dataset results are pushed to.
    #[serde(default)]
    pub output_ref: Option<String>,
    /// Create one branch per unit before running.
    #[serde(default)]
    pub per_unit_branch: bool,
    /// Push results after a successful unit.
    #[serde(default)]
    pub push_results: bool,
}

/// The validated, immutable configuration of one engine invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Paths and parallelism.
    pub common: CommonSection,
    /// Per-unit invocation shape.
    pub app: AppSection,
    /// External scheduler directives, when dispatching to a cluster.
    #[serde(default)]
    pub cluster: Option<ClusterSection>,
    /// Content-addressed dataset references.
    #[serde(default)]
    pub dataset: Option<DatasetSection>,
}

impl Config {
    /// The effective log directory.
    #[must_use]
    pub fn log_root(&self) -> PathBuf {
        self.common
            .log_root
            .clone()
            .unwrap_or_else(|| self.common.output_root.join("logs"))
    }

    /// The directory validator reports are written to.
    #[must_use]
    pub fn reports_dir(&self) -> PathBuf {
        self.log_root().join("reports")
    }

    /// The reserved directory holding success markers.
    #[must_use]
    pub fn marker_dir(&self) -> PathBuf {
        self.common.output_root.join(RESERVED_DIR)
    }

    /// Local worker count as validated (at least 1).
    #[must_use]
    pub fn jobs(&self) -> usize {
        usize::try_from(self.common.jobs).unwrap_or(1)
    }

    /// The analysis level as validated.
    #[must_use]
    pub fn analysis_level(&self) -> AnalysisLevel {
        match self.app.analysis_level.as_str() {
            "group" => AnalysisLevel::Group,
            _ => AnalysisLevel::Participant,
        }
    }

    /// Resolves every relative path in the document against `base`
    /// (the configuration file's directory).
    pub(crate) fn resolve_paths(&mut self, base: &Path) {
        fn absolutize(path: &mut PathBuf, base: &Path) {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        absolutize(&mut self.common.bids_root, base);
        absolutize(&mut self.common.output_root, base);
        absolutize(&mut self.common.scratch_root, base);
        absolutize(&mut self.common.container_image, base);
        if let Some(log_root) = &mut self.common.log_root {
            absolutize(log_root, base);
        }
        for aux in &mut self.common.aux_mounts {
            absolutize(aux, base);
        }
        for mount in &mut self.app.mounts {
            absolutize(&mut mount.source, base);
        }
        if let Some(cluster) = &mut self.cluster {
            if let Some(lock) = &mut cluster.lock_path {
                absolutize(lock, base);
            }
        }
    }
}
