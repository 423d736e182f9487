// SPDX-License-Identifier: Apache-2.0

//! bidsflow command-line entry point.
//!
//! Parses the CLI surface, loads the configuration, wires logging to
//! stderr and to `<log_root>/run_<ts>.log`, bridges Ctrl-C into the
//! cancellation token, and surfaces the orchestrator's exit code.

use bidsflow_config::Config;
use bidsflow_controller::{Backend, RunOptions, summary::RunSummary};
use bidsflow_validate::Pipeline;
use clap::Parser;
use std::path::PathBuf;
use tokio::runtime::Builder as RtBuilder;
use tokio::task::LocalSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, fmt};

/// Run BIDS App containers over a hierarchical dataset, locally or on a
/// cluster.
#[derive(Parser, Debug)]
#[command(name = "bidsflow", version)]
struct Cli {
    /// Configuration document (YAML or JSON).
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: PathBuf,

    /// Explicit subject filter; ids may carry the `sub-` prefix.
    #[arg(long, num_args = 1.., value_name = "ID")]
    subjects: Vec<String>,

    /// Plan from an existing validator report (implies force).
    #[arg(long, value_name = "PATH")]
    from_report: Option<PathBuf>,

    /// Restrict a multi-pipeline report or validation to one pipeline.
    #[arg(long, value_name = "NAME")]
    pipeline: Option<String>,

    /// Ignore "already done" verdicts and rerun everything planned.
    #[arg(long)]
    force: bool,

    /// Compute the plan, print the commands, and exit without executing.
    #[arg(long)]
    dry_run: bool,

    /// Run one random not-yet-done unit, with parallelism 1.
    #[arg(long)]
    pilot: bool,

    /// Parallelism override.
    #[arg(long, value_name = "N")]
    jobs: Option<usize>,

    /// Keep per-unit stdout/stderr apart under the debug log directory;
    /// forces parallelism 1 for local runs.
    #[arg(long)]
    debug: bool,

    /// Verify pipeline outputs after the run.
    #[arg(long)]
    validate: bool,

    /// Verify pipeline outputs without executing anything.
    #[arg(long, conflicts_with = "validate")]
    validate_only: bool,

    /// Dispatch, verify, and re-dispatch missing units until clean or the
    /// configured iteration cap is reached.
    #[arg(long)]
    reprocess_missing: bool,

    /// Force the local worker-pool backend.
    #[arg(long, conflicts_with = "cluster")]
    local: bool,

    /// Force the cluster scheduler backend.
    #[arg(long)]
    cluster: bool,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("BIDSFLOW_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
}

#[allow(clippy::print_stdout, clippy::print_stderr)]
fn real_main(cli: Cli) -> i32 {
    let pipeline = match cli.pipeline.as_deref().map(str::parse::<Pipeline>).transpose() {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("error: {e}");
            return 2;
        }
    };

    // The run log lives under the configured log root, so the document is
    // loaded under a bootstrap stderr subscriber before global logging is
    // installed.
    let bootstrap = fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .finish();
    let config = match tracing::subscriber::with_default(bootstrap, || Config::load(&cli.config)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{:?}", miette::Report::new(e));
            return 2;
        }
    };

    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let log_root = config.log_root();
    let mut _file_guard = None;
    let file_layer = {
        let _ = std::fs::create_dir_all(&log_root);
        match std::fs::File::create(log_root.join(format!("run_{timestamp}.log"))) {
            Ok(file) => {
                let (writer, guard) = tracing_appender::non_blocking(file);
                _file_guard = Some(guard);
                Some(fmt::layer().with_ansi(false).with_writer(writer))
            }
            Err(e) => {
                eprintln!("warning: cannot open run log under {}: {e}", log_root.display());
                None
            }
        }
    };
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    let options = RunOptions {
        subjects: cli.subjects,
        from_report: cli.from_report,
        pipeline,
        force: cli.force,
        dry_run: cli.dry_run,
        pilot: cli.pilot,
        jobs: cli.jobs,
        debug: cli.debug,
        validate: cli.validate,
        validate_only: cli.validate_only,
        reprocess_missing: cli.reprocess_missing,
        backend: if cli.local {
            Some(Backend::Local)
        } else if cli.cluster {
            Some(Backend::Cluster)
        } else {
            None
        },
    };

    let runtime = match RtBuilder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start the runtime: {e}");
            return 2;
        }
    };
    let cancel = CancellationToken::new();
    let local_set = LocalSet::new();
    let result: Result<RunSummary, _> = runtime.block_on(local_set.run_until(async {
        let interrupt_cancel = cancel.clone();
        let interrupt = tokio::task::spawn_local(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; cancelling the run");
                interrupt_cancel.cancel();
            }
        });
        let outcome = bidsflow_controller::run(&config, options, cancel.clone()).await;
        interrupt.abort();
        outcome
    }));

    match result {
        Ok(summary) => {
            println!("{summary}");
            summary.exit_code
        }
        Err(e) => {
            eprintln!("{:?}", miette::Report::new(e));
            2
        }
    }
}

fn main() {
    let cli = Cli::parse();
    std::process::exit(real_main(cli));
}
