// SPDX-License-Identifier: Apache-2.0

//! Errors for the engine crate.
//!
//! Per-unit problems (container exit, missing outputs, failed submission)
//! are not errors: they are recorded in the unit's run record and the
//! dispatcher continues. Only failures that invalidate the whole run are
//! surfaced here.

use miette::Diagnostic;
use std::path::PathBuf;

/// Errors that can occur while planning or dispatching a run.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// The dataset could not be enumerated.
    #[error("dataset walk failed: {0}")]
    #[diagnostic(code(bidsflow::engine::walk))]
    Walk(#[from] bidsflow_dataset::Error),

    /// An explicit or report-derived filter named subjects the dataset
    /// does not contain.
    #[error("no such subject(s) in the dataset: {}", subjects.join(", "))]
    #[diagnostic(code(bidsflow::engine::unknown_subjects))]
    UnknownSubjects {
        /// The offending ids, rendered with their `sub-` prefix.
        subjects: Vec<String>,
    },

    /// A root directory required for dispatch is missing or not writable.
    #[error("preflight check failed for `{path}`: {details}")]
    #[diagnostic(code(bidsflow::engine::preflight))]
    Preflight {
        /// The directory that failed the probe.
        path: PathBuf,
        /// A description of the failure.
        details: String,
    },

    /// A success marker for this unit already exists at write time.
    ///
    /// Markers are created with create-exclusive semantics; a collision
    /// means the same unit was dispatched twice and the run is aborted.
    #[error("success marker for {unit} already exists; unit was scheduled twice")]
    #[diagnostic(code(bidsflow::engine::marker_collision))]
    MarkerCollision {
        /// The rendered unit label.
        unit: String,
    },

    /// A success marker could not be written.
    #[error("failed to write success marker for {unit}: {source}")]
    #[diagnostic(code(bidsflow::engine::marker_write))]
    MarkerWrite {
        /// The rendered unit label.
        unit: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A cluster job script could not be written.
    #[error("failed to write job script `{path}`: {source}")]
    #[diagnostic(code(bidsflow::engine::script_write))]
    ScriptWrite {
        /// The script path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The cluster section is required for cluster dispatch but absent.
    #[error("cluster dispatch requested but the configuration has no cluster section")]
    #[diagnostic(code(bidsflow::engine::no_cluster_section))]
    NoClusterSection,
}
