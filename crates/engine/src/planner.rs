// SPDX-License-Identifier: Apache-2.0

//! Work planner: combines walker output, oracle verdicts, and user
//! filters into the final plan.
//!
//! Exactly one filter source is active at a time, priority highest first:
//! report re-ingest, explicit subject list, pilot sampling, everything.
//! Lower-priority sources that were also requested are reported as
//! overridden and ignored.

use crate::error::Error;
use crate::oracle::{Completion, CompletionOracle, read_marker};
use crate::plan::{Plan, Provenance};
use crate::record::{Classification, RunRecord};
use bidsflow_config::Config;
use bidsflow_dataset::{UnitId, WalkOptions, scan_dataset};
use rand::seq::IndexedRandom;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// User-provided inputs to one planning pass.
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    /// Subjects named on the command line, with or without the `sub-`
    /// prefix.
    pub explicit_subjects: Vec<String>,
    /// Units re-ingested from a validator report.
    pub report_units: Option<Vec<UnitId>>,
    /// Sample one random unit from the post-oracle survivors.
    pub pilot: bool,
    /// Ignore oracle "done" verdicts.
    pub force: bool,
    /// Parallelism override from the command line.
    pub jobs_override: Option<usize>,
    /// Debug mode clamps parallelism to one.
    pub debug: bool,
}

/// A finished planning pass: the immutable plan plus records for the
/// units that were skipped as already done.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    /// The plan handed to a dispatcher.
    pub plan: Plan,
    /// One `skipped_already_done` record per unit the oracle excluded.
    pub skipped: Vec<RunRecord>,
}

/// Probes that `dir` exists (creating it if needed) and is writable.
fn ensure_writable(dir: &Path) -> Result<(), Error> {
    fs::create_dir_all(dir).map_err(|e| Error::Preflight {
        path: dir.to_path_buf(),
        details: format!("cannot create: {e}"),
    })?;
    let probe = dir.join(".bidsflow_write_probe");
    fs::write(&probe, b"probe").map_err(|e| Error::Preflight {
        path: dir.to_path_buf(),
        details: format!("not writable: {e}"),
    })?;
    let _ = fs::remove_file(&probe);
    Ok(())
}

fn resolve_report_units(
    report_units: &[UnitId],
    available: &[UnitId],
) -> Result<Vec<UnitId>, Error> {
    let mut resolved = Vec::new();
    let mut missing = Vec::new();
    for wanted in report_units {
        if wanted.session_id().is_some() {
            if available.contains(wanted) {
                resolved.push(wanted.clone());
            } else {
                missing.push(wanted.label());
            }
            continue;
        }
        let subject_units: Vec<UnitId> = available
            .iter()
            .filter(|u| u.subject_id() == wanted.subject_id())
            .cloned()
            .collect();
        if subject_units.is_empty() {
            missing.push(wanted.label());
        } else {
            resolved.extend(subject_units);
        }
    }
    if missing.is_empty() {
        Ok(resolved)
    } else {
        Err(Error::UnknownSubjects { subjects: missing })
    }
}

/// Builds the final, de-duplicated, ordered plan.
///
/// Also performs the one-time preflight: the output, scratch, and log
/// roots must be writable before dispatch begins.
pub fn build_plan(
    config: &Config,
    oracle: &CompletionOracle,
    request: &PlanRequest,
) -> Result<PlanOutcome, Error> {
    ensure_writable(&config.common.output_root)?;
    ensure_writable(&config.common.scratch_root)?;
    ensure_writable(&config.log_root())?;

    let report_active = request.report_units.is_some();
    let explicit_active = !report_active && !request.explicit_subjects.is_empty();
    let pilot_active = !report_active && !explicit_active && request.pilot;
    if report_active && !request.explicit_subjects.is_empty() {
        warn!("--subjects is overridden by --from-report");
    }
    if request.pilot && (report_active || explicit_active) {
        warn!("--pilot is overridden by a higher-priority unit filter");
    }

    let explicit_ids: Vec<String> = request
        .explicit_subjects
        .iter()
        .map(|raw| UnitId::subject(raw).subject_id().to_owned())
        .collect();
    let walk_options = WalkOptions {
        session_aware: config.app.session_aware,
        subject_filter: explicit_active.then(|| explicit_ids.clone()),
    };
    let scan = scan_dataset(&config.common.bids_root, &walk_options)?;
    if !scan.unmatched_filters.is_empty() {
        return Err(Error::UnknownSubjects {
            subjects: scan
                .unmatched_filters
                .iter()
                .map(|id| UnitId::subject(id).label())
                .collect(),
        });
    }

    let (candidates, provenance) = if let Some(report_units) = &request.report_units {
        (
            resolve_report_units(report_units, &scan.units)?,
            Provenance::FromReport,
        )
    } else if explicit_active {
        (scan.units, Provenance::Explicit)
    } else if pilot_active {
        (scan.units, Provenance::Pilot)
    } else {
        (scan.units, Provenance::Fresh)
    };

    // Report re-ingest implies reprocessing; the oracle is not consulted.
    let mut skipped = Vec::new();
    let mut survivors = Vec::new();
    if report_active {
        survivors = candidates;
    } else {
        for unit in candidates {
            match oracle.classify(&unit) {
                Completion::Done => {
                    match read_marker(oracle.marker_dir(), &unit) {
                        Some(marker) => info!(
                            unit = %unit,
                            tool_version = %marker.tool_version,
                            finished_at = %marker.finished_at,
                            "already done, skipping"
                        ),
                        None => info!(unit = %unit, "outputs present, skipping"),
                    }
                    skipped.push(RunRecord::completed(
                        unit,
                        Classification::SkippedAlreadyDone,
                    ));
                }
                Completion::NotDone => survivors.push(unit),
                Completion::ForceRerun => {
                    info!(unit = %unit, "force: rerunning regardless of completion state");
                    survivors.push(unit);
                }
            }
        }
    }

    if pilot_active {
        let mut rng = rand::rng();
        survivors = survivors.choose(&mut rng).cloned().into_iter().collect();
    }

    let mut parallelism = request.jobs_override.unwrap_or_else(|| config.jobs());
    if pilot_active || request.debug {
        parallelism = 1;
    }

    let plan = Plan::new(survivors, provenance, request.force, parallelism);
    Ok(PlanOutcome { plan, skipped })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::write_marker;
    use std::fs;
    use std::path::Path;

    fn test_config(dir: &Path) -> Config {
        let bids = dir.join("bids");
        let image = dir.join("app.sif");
        for subject in ["sub-001", "sub-002", "sub-003"] {
            fs::create_dir_all(bids.join(subject)).expect("subject dir");
        }
        fs::write(&image, b"sif").expect("image");
        Config::from_yaml(&format!(
            "common:\n  bids_root: {}\n  output_root: {}\n  scratch_root: {}\n  container_image: {}\n  jobs: 4\napp:\n  analysis_level: participant\n",
            bids.display(),
            dir.join("out").display(),
            dir.join("work").display(),
            image.display(),
        ))
        .expect("config")
    }

    fn labels(plan: &Plan) -> Vec<String> {
        plan.units().iter().map(UnitId::label).collect()
    }

    #[test]
    fn fresh_plan_is_deterministic_and_duplicate_free() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());
        let oracle = CompletionOracle::new(&config, false);
        let request = PlanRequest::default();

        let first = build_plan(&config, &oracle, &request).expect("plan");
        let second = build_plan(&config, &oracle, &request).expect("plan");
        assert_eq!(labels(&first.plan), labels(&second.plan));
        assert_eq!(
            labels(&first.plan),
            vec!["sub-001", "sub-002", "sub-003"]
        );
        assert_eq!(first.plan.provenance(), Provenance::Fresh);
        assert_eq!(first.plan.parallelism(), 4);
    }

    #[test]
    fn marker_skips_exactly_the_marked_unit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());
        let oracle = CompletionOracle::new(&config, false);
        write_marker(oracle.marker_dir(), &UnitId::subject("001"), "0.1.0").expect("marker");

        let outcome = build_plan(&config, &oracle, &PlanRequest::default()).expect("plan");
        assert_eq!(labels(&outcome.plan), vec!["sub-002", "sub-003"]);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].unit, UnitId::subject("001"));
        assert_eq!(
            outcome.skipped[0].state.classification(),
            Some(Classification::SkippedAlreadyDone)
        );
    }

    #[test]
    fn force_dominates_markers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());
        let oracle = CompletionOracle::new(&config, true);
        write_marker(oracle.marker_dir(), &UnitId::subject("001"), "0.1.0").expect("marker");

        let request = PlanRequest {
            force: true,
            ..PlanRequest::default()
        };
        let outcome = build_plan(&config, &oracle, &request).expect("plan");
        assert_eq!(outcome.plan.len(), 3);
        assert!(outcome.skipped.is_empty());
        assert!(outcome.plan.force());
    }

    #[test]
    fn explicit_filter_restricts_and_unknown_subject_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());
        let oracle = CompletionOracle::new(&config, false);

        let request = PlanRequest {
            explicit_subjects: vec!["sub-002".to_owned(), "001".to_owned()],
            ..PlanRequest::default()
        };
        let outcome = build_plan(&config, &oracle, &request).expect("plan");
        assert_eq!(labels(&outcome.plan), vec!["sub-001", "sub-002"]);
        assert_eq!(outcome.plan.provenance(), Provenance::Explicit);

        let request = PlanRequest {
            explicit_subjects: vec!["sub-999".to_owned()],
            ..PlanRequest::default()
        };
        match build_plan(&config, &oracle, &request).expect_err("must fail") {
            Error::UnknownSubjects { subjects } => {
                assert_eq!(subjects, vec!["sub-999".to_owned()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn report_units_override_oracle_and_explicit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());
        let oracle = CompletionOracle::new(&config, false);
        write_marker(oracle.marker_dir(), &UnitId::subject("002"), "0.1.0").expect("marker");

        let request = PlanRequest {
            explicit_subjects: vec!["sub-001".to_owned()],
            report_units: Some(vec![UnitId::subject("002"), UnitId::subject("003")]),
            ..PlanRequest::default()
        };
        let outcome = build_plan(&config, &oracle, &request).expect("plan");
        // The marked unit is still planned: report provenance implies force.
        assert_eq!(labels(&outcome.plan), vec!["sub-002", "sub-003"]);
        assert_eq!(outcome.plan.provenance(), Provenance::FromReport);
        assert!(outcome.plan.force());
        assert!(outcome.skipped.is_empty());
    }

    #[test]
    fn pilot_selects_one_survivor_and_clamps_parallelism() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config(dir.path());
        let oracle = CompletionOracle::new(&config, false);

        let request = PlanRequest {
            pilot: true,
            ..PlanRequest::default()
        };
        let outcome = build_plan(&config, &oracle, &request).expect("plan");
        assert_eq!(outcome.plan.len(), 1);
        assert_eq!(outcome.plan.parallelism(), 1);
        assert_eq!(outcome.plan.provenance(), Provenance::Pilot);
    }

    #[test]
    fn empty_dataset_yields_an_empty_plan() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bids = dir.path().join("empty-bids");
        let image = dir.path().join("app.sif");
        fs::create_dir_all(&bids).expect("bids");
        fs::write(&image, b"sif").expect("image");
        let config = Config::from_yaml(&format!(
            "common:\n  bids_root: {}\n  output_root: {}\n  scratch_root: {}\n  container_image: {}\napp:\n  analysis_level: participant\n",
            bids.display(),
            dir.path().join("out").display(),
            dir.path().join("work").display(),
            image.display(),
        ))
        .expect("config");
        let oracle = CompletionOracle::new(&config, false);
        let outcome = build_plan(&config, &oracle, &PlanRequest::default()).expect("plan");
        assert!(outcome.plan.is_empty());
    }
}
