// SPDX-License-Identifier: Apache-2.0

//! Content-addressed dataset helper.
//!
//! Datasets managed by a content store keep directory structure on disk
//! while file bodies live elsewhere. Around each unit the dispatcher may
//! run a pre-step (fetch the unit's data) and a post-step (save results).
//! The helper is a trait so dispatch tests run without the external tool.

use bidsflow_dataset::UnitId;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Why a helper invocation failed. Helper failures are never fatal to the
/// whole run; the dispatcher decides what to do with them.
#[derive(thiserror::Error, Debug)]
pub enum HelperError {
    /// The helper executable could not be spawned.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        /// The helper program name.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The helper ran but exited non-zero.
    #[error("`{program} {action}` exited with {code:?}")]
    Failed {
        /// The helper program name.
        program: String,
        /// The sub-command that failed.
        action: String,
        /// The observed exit code, if any.
        code: Option<i32>,
    },
}

/// Pre/post steps around a unit's container run.
#[async_trait::async_trait(?Send)]
pub trait DatasetHelper {
    /// Fetches the unit's file bodies before the run.
    async fn fetch_unit(&self, root: &Path, unit: &UnitId) -> Result<(), HelperError>;

    /// Saves the unit's results after a successful run.
    async fn save_unit(&self, root: &Path, unit: &UnitId, message: &str)
    -> Result<(), HelperError>;
}

/// Returns `true` when `root` looks content-addressed: a DataLad dataset
/// or a bare git-annex store.
#[must_use]
pub fn is_content_addressed(root: &Path) -> bool {
    root.join(".datalad").is_dir() || root.join(".git").join("annex").is_dir()
}

/// The DataLad command-line helper.
#[derive(Debug, Clone)]
pub struct DataladHelper {
    program: String,
}

impl DataladHelper {
    /// Creates a helper invoking `datalad`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: "datalad".to_owned(),
        }
    }

    async fn run(&self, action: &str, args: &[&str]) -> Result<(), HelperError> {
        debug!(program = %self.program, action, ?args, "running dataset helper");
        let status = Command::new(&self.program)
            .args(args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .map_err(|source| HelperError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(HelperError::Failed {
                program: self.program.clone(),
                action: action.to_owned(),
                code: status.code(),
            })
        }
    }
}

impl Default for DataladHelper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait(?Send)]
impl DatasetHelper for DataladHelper {
    async fn fetch_unit(&self, root: &Path, unit: &UnitId) -> Result<(), HelperError> {
        let root = root.display().to_string();
        let mut target = unit.subject_dir();
        if let Some(session_dir) = unit.session_dir() {
            target = format!("{target}/{session_dir}");
        }
        self.run("get", &["get", "-d", &root, &target]).await
    }

    async fn save_unit(
        &self,
        root: &Path,
        unit: &UnitId,
        message: &str,
    ) -> Result<(), HelperError> {
        let root = root.display().to_string();
        let target = unit.subject_dir();
        self.run("save", &["save", "-d", &root, "-m", message, &target])
            .await
    }
}
