// SPDX-License-Identifier: Apache-2.0

//! bidsflow orchestrator.
//!
//! The single entry point composing the loader, planner, dispatchers,
//! validators, and the reprocess loop into one run:
//!
//! loading, planning, dispatching, verifying, optionally replanning and
//! dispatching again, then summarizing.
//!
//! The orchestrator owns the cancellation token and the exit code.
//! Children receive immutable configuration and context and never hold a
//! reference back to the orchestrator.

use crate::summary::RunSummary;
use bidsflow_config::Config;
use bidsflow_engine::{
    ClusterDispatcher, CompletionOracle, LocalDispatcher, Plan, PlanRequest, RecordLog,
    build_plan,
    invocation::{InvocationContext, build_invocation, filter_ambient_env},
    scratch::unit_scratch_path,
};
use bidsflow_validate::{
    Finding, Pipeline, Report, ReportFilters, ReportMetadata, read_report, run_validators,
    units_from_findings, units_from_report,
};
use chrono::Utc;
use std::path::PathBuf;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod error;
pub mod summary;

pub use error::Error;

/// Which dispatch backend executes the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Bounded worker pool on this machine.
    Local,
    /// External job scheduler.
    Cluster,
}

/// Everything the command line hands to one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Explicit unit filter (`--subjects`).
    pub subjects: Vec<String>,
    /// Plan from an existing validator report (`--from-report`).
    pub from_report: Option<PathBuf>,
    /// Restrict a multi-pipeline report or validation to one pipeline
    /// (`--pipeline`).
    pub pipeline: Option<Pipeline>,
    /// Ignore oracle "done" verdicts (`--force`).
    pub force: bool,
    /// Compute the plan and print commands without executing
    /// (`--dry-run`).
    pub dry_run: bool,
    /// One random unit (`--pilot`).
    pub pilot: bool,
    /// Parallelism override (`--jobs`).
    pub jobs: Option<usize>,
    /// Per-unit split logs, parallelism 1 (`--debug`).
    pub debug: bool,
    /// Verify outputs after dispatch (`--validate`).
    pub validate: bool,
    /// Verify outputs without executing anything (`--validate-only`).
    pub validate_only: bool,
    /// Loop dispatch and verification until clean or capped
    /// (`--reprocess-missing`).
    pub reprocess_missing: bool,
    /// Backend override (`--local` / `--cluster`).
    pub backend: Option<Backend>,
}

impl RunOptions {
    fn wants_validation(&self) -> bool {
        self.validate || self.validate_only || self.reprocess_missing
    }
}

fn effective_backend(options: &RunOptions, config: &Config) -> Backend {
    options.backend.unwrap_or_else(|| {
        if config.cluster.is_some() {
            Backend::Cluster
        } else {
            Backend::Local
        }
    })
}

fn write_report(
    config: &Config,
    options: &RunOptions,
    findings: &[Finding],
    timestamp: &str,
) -> Result<PathBuf, Error> {
    let metadata = ReportMetadata {
        generator: format!("bidsflow {}", env!("CARGO_PKG_VERSION")),
        timestamp: Utc::now().to_rfc3339(),
        filters: ReportFilters {
            pipeline: options.pipeline.map(|p| p.name().to_owned()),
            subjects: options.subjects.clone(),
            force: options.force,
        },
        dataset_root: config.common.bids_root.display().to_string(),
        output_root: config.common.output_root.display().to_string(),
    };
    let report = Report::from_findings(findings, metadata);
    let name = match options.pipeline {
        Some(pipeline) => format!("report_{}_{timestamp}.json", pipeline.name()),
        None => format!("report_{timestamp}.json"),
    };
    let path = config.reports_dir().join(name);
    report.write(&path)?;
    info!(path = %path.display(), findings = findings.len(), "validator report written");
    Ok(path)
}

async fn dispatch(
    config: &Config,
    oracle: &CompletionOracle,
    backend: Backend,
    plan: &Plan,
    records: RecordLog,
    cancel: CancellationToken,
    debug: bool,
    timestamp: &str,
) -> Result<(), Error> {
    match backend {
        Backend::Local => {
            LocalDispatcher::new(config, oracle, records, cancel, debug, timestamp)
                .run(plan)
                .await?;
        }
        Backend::Cluster => {
            ClusterDispatcher::new(config, oracle, records, cancel, debug, timestamp)?
                .run(plan)
                .await?;
        }
    }
    Ok(())
}

fn render_dry_run(
    config: &Config,
    plan: &Plan,
    backend: Backend,
    options: &RunOptions,
    timestamp: &str,
) -> Result<Vec<String>, Error> {
    let passthrough = filter_ambient_env(std::env::vars());
    let mut commands = Vec::new();
    for unit in plan.units() {
        let scratch = unit_scratch_path(&config.common.scratch_root, unit);
        let ctx = InvocationContext {
            unit,
            scratch_dir: &scratch,
            timestamp,
            debug: options.debug,
            bids_root: None,
            passthrough_env: &passthrough,
        };
        commands.push(build_invocation(config, &ctx).render_shell());
    }
    if backend == Backend::Cluster {
        let oracle = CompletionOracle::new(config, false);
        let dispatcher = ClusterDispatcher::new(
            config,
            &oracle,
            RecordLog::new(),
            CancellationToken::new(),
            options.debug,
            timestamp,
        )?;
        for script in dispatcher.write_scripts(plan)? {
            commands.push(format!("# job script: {}", script.display()));
        }
    }
    Ok(commands)
}

/// Runs one orchestrator invocation to completion against an already
/// loaded configuration (the binary loads it first so the run log file
/// can be placed under the configured log root).
///
/// Fatal planning problems come back as `Err` (exit 2); everything else
/// is folded into the returned summary and its exit code.
pub async fn run(
    config: &Config,
    options: RunOptions,
    cancel: CancellationToken,
) -> Result<RunSummary, Error> {
    let started = Instant::now();
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let records = RecordLog::new();
    let log_root = config.log_root();

    let summarize = |records: &RecordLog, report: Option<PathBuf>, outstanding: usize| {
        RunSummary::from_records(
            records,
            started.elapsed(),
            log_root.clone(),
            report,
            outstanding,
        )
    };

    if options.validate_only {
        info!("verifying outputs (no execution)");
        let findings = run_validators(
            &config.common.bids_root,
            &config.common.output_root,
            options.pipeline,
        )?;
        let report = write_report(config, &options, &findings, &timestamp)?;
        return Ok(summarize(&records, Some(report), findings.len()));
    }

    info!("planning");
    let report_units = match &options.from_report {
        Some(path) => {
            let ingested = read_report(path)?;
            Some(units_from_report(&ingested, options.pipeline)?)
        }
        None => None,
    };
    let oracle = CompletionOracle::new(config, options.force || report_units.is_some());
    let request = PlanRequest {
        explicit_subjects: options.subjects.clone(),
        report_units,
        pilot: options.pilot,
        force: options.force,
        jobs_override: options.jobs,
        debug: options.debug,
    };
    let outcome = build_plan(config, &oracle, &request)?;
    for skipped in outcome.skipped {
        records.append(skipped);
    }
    let plan = outcome.plan;
    let backend = effective_backend(&options, config);
    info!(
        units = plan.len(),
        provenance = plan.provenance().as_str(),
        backend = ?backend,
        "plan ready"
    );

    if options.dry_run {
        let mut summary = summarize(&records, None, 0);
        summary.dry_run_commands = render_dry_run(config, &plan, backend, &options, &timestamp)?;
        summary.exit_code = 0;
        return Ok(summary);
    }

    if plan.is_empty() && !options.wants_validation() {
        info!("nothing to do");
        return Ok(summarize(&records, None, 0));
    }

    info!("dispatching");
    dispatch(
        config,
        &oracle,
        backend,
        &plan,
        records.clone(),
        cancel.clone(),
        options.debug,
        &timestamp,
    )
    .await?;

    let mut report_path = None;
    let mut outstanding = 0;
    if options.wants_validation() && !cancel.is_cancelled() {
        let mut round: u32 = 0;
        loop {
            info!(round, "verifying outputs");
            let findings = run_validators(
                &config.common.bids_root,
                &config.common.output_root,
                options.pipeline,
            )?;
            report_path = Some(write_report(config, &options, &findings, &timestamp)?);
            outstanding = findings.len();
            if findings.is_empty() || !options.reprocess_missing || cancel.is_cancelled() {
                break;
            }
            round += 1;
            if round > config.common.max_reprocess_iterations {
                warn!(
                    cap = config.common.max_reprocess_iterations,
                    "reprocess iteration cap reached with findings remaining"
                );
                break;
            }

            info!(round, "replanning from findings");
            let units = units_from_findings(&findings);
            let oracle = CompletionOracle::new(config, true);
            let request = PlanRequest {
                report_units: Some(units),
                jobs_override: options.jobs,
                debug: options.debug,
                ..PlanRequest::default()
            };
            let outcome = build_plan(config, &oracle, &request)?;
            dispatch(
                config,
                &oracle,
                backend,
                &outcome.plan,
                records.clone(),
                cancel.clone(),
                options.debug,
                &timestamp,
            )
            .await?;
        }
    }

    info!("summarizing");
    Ok(summarize(&records, report_path, outstanding))
}
