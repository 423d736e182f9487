// SPDX-License-Identifier: Apache-2.0

//! Container invocation builder.
//!
//! Builds the exact argument vector and environment the container runtime
//! must execute for one unit. The builder is pure: no I/O, no side effects.
//! The dispatchers own spawn/wait semantics, which keeps command
//! construction testable without executing anything.

use bidsflow_config::Config;
use bidsflow_dataset::UnitId;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Guest mount point of the input dataset.
pub const GUEST_BIDS: &str = "/bids";

/// Guest mount point of the output root.
pub const GUEST_OUTPUT: &str = "/output";

/// Guest mount point of the per-unit scratch directory.
pub const GUEST_WORK: &str = "/work";

/// Environment variable names forwarded from the calling environment when
/// present. Everything else is dropped; the container starts clean.
pub const ENV_ALLOW_LIST: [&str; 3] = [
    "TEMPLATEFLOW_HOME",
    "APPTAINER_CACHEDIR",
    "SINGULARITY_CACHEDIR",
];

/// Where a unit's combined or split output streams go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    /// Both streams appended to one per-unit log file.
    Combined(PathBuf),
    /// Debug mode: stdout and stderr kept apart under the debug directory.
    Split {
        /// Destination of the container's stdout.
        stdout: PathBuf,
        /// Destination of the container's stderr.
        stderr: PathBuf,
    },
}

impl LogSink {
    /// The primary log path, used in run records.
    #[must_use]
    pub fn primary(&self) -> &Path {
        match self {
            LogSink::Combined(path) => path,
            LogSink::Split { stdout, .. } => stdout,
        }
    }
}

/// A fully specified command: program, argv, environment, working
/// directory, and output sinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable to spawn.
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Environment the child starts with (nothing else is inherited).
    pub env: Vec<(String, String)>,
    /// Working directory, when one is required.
    pub cwd: Option<PathBuf>,
    /// Where the child's output streams go.
    pub sink: LogSink,
}

impl CommandSpec {
    /// Renders the invocation as one shell line with environment
    /// assignments up front. Used by `--dry-run` and the job scripts.
    #[must_use]
    pub fn render_shell(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        for (key, value) in &self.env {
            parts.push(format!("{key}={}", quote(value)));
        }
        parts.push(quote(&self.program));
        parts.extend(self.args.iter().map(|a| quote(a)));
        parts.join(" ")
    }
}

fn quote(token: &str) -> String {
    shell_escape::escape(Cow::Borrowed(token)).into_owned()
}

/// Inputs the builder needs beyond the configuration.
#[derive(Debug, Clone)]
pub struct InvocationContext<'a> {
    /// The unit being dispatched.
    pub unit: &'a UnitId,
    /// This unit's private scratch directory on the host.
    pub scratch_dir: &'a Path,
    /// Run timestamp used in log file names.
    pub timestamp: &'a str,
    /// Debug mode: split output streams, kept under `debug/`.
    pub debug: bool,
    /// Input dataset root override (cluster jobs run against a per-job
    /// clone instead of the shared root).
    pub bids_root: Option<&'a Path>,
    /// Ambient environment, already filtered through [`ENV_ALLOW_LIST`].
    pub passthrough_env: &'a BTreeMap<String, String>,
}

/// Filters an ambient environment down to the allow-listed names.
#[must_use]
pub fn filter_ambient_env(
    ambient: impl IntoIterator<Item = (String, String)>,
) -> BTreeMap<String, String> {
    ambient
        .into_iter()
        .filter(|(key, _)| ENV_ALLOW_LIST.contains(&key.as_str()))
        .collect()
}

/// Builds the command descriptor for one unit.
#[must_use]
pub fn build_invocation(config: &Config, ctx: &InvocationContext<'_>) -> CommandSpec {
    let common = &config.common;
    let bids_root = ctx.bids_root.unwrap_or(&common.bids_root);

    let mut args: Vec<String> = vec!["run".to_owned(), "--cleanenv".to_owned()];
    let mut bind = |source: String, target: String| {
        args.push("-B".to_owned());
        args.push(format!("{source}:{target}"));
    };
    bind(
        bids_root.display().to_string(),
        format!("{GUEST_BIDS}:ro"),
    );
    bind(common.output_root.display().to_string(), GUEST_OUTPUT.to_owned());
    bind(ctx.scratch_dir.display().to_string(), GUEST_WORK.to_owned());
    for aux in &common.aux_mounts {
        bind(aux.display().to_string(), aux.display().to_string());
    }
    for mount in &config.app.mounts {
        bind(
            mount.source.display().to_string(),
            mount.target.display().to_string(),
        );
    }

    args.push(common.container_image.display().to_string());
    args.push(GUEST_BIDS.to_owned());
    args.push(GUEST_OUTPUT.to_owned());
    args.push(config.analysis_level().as_str().to_owned());
    args.push("--participant-label".to_owned());
    args.push(ctx.unit.subject_id().to_owned());
    if let Some(session) = ctx.unit.session_id() {
        args.push("--session-id".to_owned());
        args.push(session.to_owned());
    }
    args.extend(config.app.args.iter().cloned());

    let mut env: Vec<(String, String)> = vec![
        ("TMPDIR".to_owned(), GUEST_WORK.to_owned()),
        (
            "APPTAINER_CACHEDIR".to_owned(),
            common.scratch_root.join(".apptainer-cache").display().to_string(),
        ),
    ];
    for (key, value) in ctx.passthrough_env {
        if !env.iter().any(|(k, _)| k == key) {
            env.push((key.clone(), value.clone()));
        }
    }
    if let Some(cluster) = &config.cluster {
        for (key, value) in &cluster.env {
            if !env.iter().any(|(k, _)| k == key) {
                env.push((key.clone(), value.clone()));
            }
        }
    }

    let log_root = config.log_root();
    let bare = ctx.unit.bare();
    let sink = if ctx.debug {
        LogSink::Split {
            stdout: log_root.join("debug").join(format!(
                "unit_{bare}_{}.out",
                ctx.timestamp
            )),
            stderr: log_root.join("debug").join(format!(
                "unit_{bare}_{}.err",
                ctx.timestamp
            )),
        }
    } else {
        LogSink::Combined(log_root.join(format!("unit_{bare}_{}.log", ctx.timestamp)))
    };

    CommandSpec {
        program: common.container_runtime.clone(),
        args,
        env,
        cwd: None,
        sink,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidsflow_config::Config;
    use std::fs;

    fn test_config(dir: &Path, extra: &str) -> Config {
        let bids = dir.join("bids");
        let image = dir.join("app.sif");
        fs::create_dir_all(&bids).expect("bids");
        fs::write(&image, b"sif").expect("image");
        Config::from_yaml(&format!(
            "common:\n  bids_root: {}\n  output_root: {}\n  scratch_root: {}\n  container_image: {}\napp:\n  analysis_level: participant\n{extra}",
            bids.display(),
            dir.join("out").display(),
            dir.join("work").display(),
            image.display(),
        ))
        .expect("config")
    }

    fn ctx<'a>(
        unit: &'a UnitId,
        scratch: &'a Path,
        env: &'a BTreeMap<String, String>,
    ) -> InvocationContext<'a> {
        InvocationContext {
            unit,
            scratch_dir: scratch,
            timestamp: "20260801_120000",
            debug: false,
            bids_root: None,
            passthrough_env: env,
        }
    }

    #[test]
    fn fixed_mounts_come_first_and_selector_precedes_passthrough() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path(), "  args: [\"--nthreads\", \"4\"]\n");
        let unit = UnitId::subject("01");
        let scratch = dir.path().join("work/unit_01");
        let env = BTreeMap::new();
        let spec = build_invocation(&config, &ctx(&unit, &scratch, &env));

        assert_eq!(spec.program, "apptainer");
        assert_eq!(spec.args[0], "run");
        let binds: Vec<&String> = spec
            .args
            .iter()
            .zip(spec.args.iter().skip(1))
            .filter(|(flag, _)| flag.as_str() == "-B")
            .map(|(_, value)| value)
            .collect();
        assert!(binds[0].ends_with(":/bids:ro"));
        assert!(binds[1].ends_with(":/output"));
        assert!(binds[2].ends_with(":/work"));

        let label_at = spec
            .args
            .iter()
            .position(|a| a == "--participant-label")
            .expect("selector");
        assert_eq!(spec.args[label_at + 1], "01");
        let nthreads_at = spec
            .args
            .iter()
            .position(|a| a == "--nthreads")
            .expect("passthrough");
        assert!(nthreads_at > label_at);
    }

    #[test]
    fn session_units_get_a_session_selector() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path(), "");
        let unit = UnitId::with_session("01", "02");
        let scratch = dir.path().join("work/unit_01_02");
        let env = BTreeMap::new();
        let spec = build_invocation(&config, &ctx(&unit, &scratch, &env));

        let at = spec
            .args
            .iter()
            .position(|a| a == "--session-id")
            .expect("session selector");
        assert_eq!(spec.args[at + 1], "02");
    }

    #[test]
    fn environment_is_allow_listed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path(), "");
        let unit = UnitId::subject("01");
        let scratch = dir.path().join("work/unit_01");

        let ambient = filter_ambient_env(vec![
            ("TEMPLATEFLOW_HOME".to_owned(), "/tf".to_owned()),
            ("SECRET_TOKEN".to_owned(), "nope".to_owned()),
        ]);
        let spec = build_invocation(&config, &ctx(&unit, &scratch, &ambient));

        assert!(spec.env.iter().any(|(k, v)| k == "TEMPLATEFLOW_HOME" && v == "/tf"));
        assert!(!spec.env.iter().any(|(k, _)| k == "SECRET_TOKEN"));
        assert!(spec.env.iter().any(|(k, v)| k == "TMPDIR" && v == "/work"));
    }

    #[test]
    fn debug_mode_splits_the_sink() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path(), "");
        let unit = UnitId::subject("01");
        let scratch = dir.path().join("work/unit_01");
        let env = BTreeMap::new();
        let mut context = ctx(&unit, &scratch, &env);
        context.debug = true;
        let spec = build_invocation(&config, &context);

        match spec.sink {
            LogSink::Split { stdout, stderr } => {
                assert!(stdout.to_string_lossy().contains("debug/unit_01_"));
                assert!(stdout.to_string_lossy().ends_with(".out"));
                assert!(stderr.to_string_lossy().ends_with(".err"));
            }
            other => panic!("unexpected sink: {other:?}"),
        }
    }

    #[test]
    fn shell_rendering_quotes_awkward_tokens() {
        let spec = CommandSpec {
            program: "apptainer".to_owned(),
            args: vec!["run".to_owned(), "a b".to_owned()],
            env: vec![("TMPDIR".to_owned(), "/work".to_owned())],
            cwd: None,
            sink: LogSink::Combined(PathBuf::from("/tmp/x.log")),
        };
        assert_eq!(spec.render_shell(), "TMPDIR=/work apptainer run 'a b'");
    }
}
