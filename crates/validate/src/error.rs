// SPDX-License-Identifier: Apache-2.0

//! Errors for the validate crate.

use std::path::PathBuf;

/// Errors that can occur while validating outputs or handling reports.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The report file does not exist.
    #[error("report file not found: {path}")]
    ReportMissing {
        /// The path given on the command line.
        path: PathBuf,
    },

    /// The report file could not be read or parsed as JSON.
    #[error("failed to read report {path}: {details}")]
    ReportRead {
        /// The report path.
        path: PathBuf,
        /// A description of the failure.
        details: String,
    },

    /// The report parsed as JSON but matches none of the accepted shapes.
    #[error(
        "unrecognized report shape: expected `missing_data_by_pipeline`, `pipelines`, or `all_missing_subjects` at the top level"
    )]
    UnknownShape,

    /// A `--pipeline` restriction named a pipeline the report does not
    /// cover.
    #[error("report has no missing-data section for pipeline `{name}`")]
    PipelineNotInReport {
        /// The requested pipeline name.
        name: String,
    },

    /// An unknown pipeline name was given.
    #[error("unknown pipeline `{name}`; supported: fmriprep, qsiprep, freesurfer, qsirecon")]
    UnknownPipeline {
        /// The offending name.
        name: String,
    },

    /// A report could not be written.
    #[error("failed to write report {path}: {source}")]
    ReportWrite {
        /// The destination path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The input dataset could not be indexed.
    #[error("dataset indexing failed: {0}")]
    Dataset(#[from] bidsflow_dataset::Error),
}
