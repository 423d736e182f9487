// SPDX-License-Identifier: Apache-2.0

//! Job script rendering.
//!
//! One script per unit, laid out in a fixed order: scheduler directives,
//! module loads and environment exports, the optional content-addressed
//! dataset steps, the container invocation, the optional push, scratch
//! cleanup. The advisory lock is held around clone and push only, never
//! across the container run.

use crate::invocation::CommandSpec;
use bidsflow_config::{ClusterSection, Config};
use bidsflow_dataset::UnitId;
use std::borrow::Cow;
use std::fmt::Write as _;
use std::path::Path;

fn quote(token: &str) -> String {
    shell_escape::escape(Cow::Borrowed(token)).into_owned()
}

/// Renders the full job script for one unit.
#[must_use]
pub fn render_job_script(
    config: &Config,
    cluster: &ClusterSection,
    unit: &UnitId,
    spec: &CommandSpec,
    job_scratch: &Path,
) -> String {
    let mut script = String::new();
    let log_root = config.log_root();
    let bare = unit.bare();

    let stdout_pattern = cluster
        .stdout_pattern
        .clone()
        .unwrap_or_else(|| log_root.join("%x_%j.out").display().to_string());
    let stderr_pattern = cluster
        .stderr_pattern
        .clone()
        .unwrap_or_else(|| log_root.join("%x_%j.err").display().to_string());

    let _ = writeln!(script, "#!/bin/bash");
    let _ = writeln!(script, "#SBATCH --job-name={}_{bare}", cluster.job_name);
    let _ = writeln!(script, "#SBATCH --partition={}", cluster.queue);
    let _ = writeln!(script, "#SBATCH --time={}", cluster.walltime);
    let _ = writeln!(script, "#SBATCH --mem={}", cluster.memory);
    let _ = writeln!(script, "#SBATCH --cpus-per-task={}", cluster.cpus);
    let _ = writeln!(script, "#SBATCH --output={stdout_pattern}");
    let _ = writeln!(script, "#SBATCH --error={stderr_pattern}");
    script.push('\n');
    let _ = writeln!(script, "set -euo pipefail");
    script.push('\n');

    for module in &cluster.modules {
        let _ = writeln!(script, "module load {}", quote(module));
    }
    for (key, value) in &cluster.env {
        let _ = writeln!(script, "export {key}={}", quote(value));
    }
    if !cluster.modules.is_empty() || !cluster.env.is_empty() {
        script.push('\n');
    }

    let scratch = quote(&job_scratch.display().to_string());
    let _ = writeln!(script, "JOB_SCRATCH={scratch}");
    let _ = writeln!(script, "mkdir -p \"$JOB_SCRATCH\"");
    let _ = writeln!(script, "trap 'rm -rf \"$JOB_SCRATCH\"' EXIT");
    script.push('\n');

    let dataset = config.dataset.as_ref();
    let use_lock = config.common.locking && dataset.is_some();
    if use_lock {
        let lock_path = cluster
            .lock_path
            .clone()
            .unwrap_or_else(|| log_root.join(".bidsflow_dataset.lock"));
        let _ = writeln!(script, "LOCK={}", quote(&lock_path.display().to_string()));
    }

    if let Some(dataset) = dataset {
        let input_ref = quote(&dataset.input_ref);
        if use_lock {
            let _ = writeln!(script, "(");
            let _ = writeln!(script, "  flock 9");
            let _ = writeln!(script, "  datalad clone {input_ref} \"$JOB_SCRATCH/dataset\"");
            let _ = writeln!(script, ") 9>\"$LOCK\"");
        } else {
            let _ = writeln!(script, "datalad clone {input_ref} \"$JOB_SCRATCH/dataset\"");
        }
        let mut target = unit.subject_dir();
        if let Some(session_dir) = unit.session_dir() {
            let _ = write!(target, "/{session_dir}");
        }
        // Structure only; file bodies are fetched by the pipeline on demand.
        let _ = writeln!(
            script,
            "datalad get -d \"$JOB_SCRATCH/dataset\" -n {}",
            quote(&target)
        );
        if dataset.per_unit_branch {
            let _ = writeln!(
                script,
                "git -C \"$JOB_SCRATCH/dataset\" checkout -b run/{bare}"
            );
        }
        script.push('\n');
    }

    let _ = writeln!(script, "{}", spec.render_shell());
    script.push('\n');

    if let Some(dataset) = dataset {
        if dataset.push_results {
            let output_ref = dataset.output_ref.as_deref().unwrap_or_default();
            let push = format!(
                "datalad push -d \"$JOB_SCRATCH/dataset\" --to {}",
                quote(output_ref)
            );
            if use_lock {
                let _ = writeln!(script, "(");
                let _ = writeln!(script, "  flock 9");
                let _ = writeln!(script, "  {push}");
                let _ = writeln!(script, ") 9>\"$LOCK\"");
            } else {
                let _ = writeln!(script, "{push}");
            }
        }
    }

    script
}
