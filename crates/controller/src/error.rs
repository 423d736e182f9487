// SPDX-License-Identifier: Apache-2.0

//! Errors for the controller crate.
//!
//! Everything surfaced here is fatal to the run and maps to exit code 2;
//! per-unit problems live in run records instead.

use miette::Diagnostic;

/// Errors that can occur while orchestrating a run.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// Configuration loading or validation failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] bidsflow_config::Error),

    /// Planning or dispatch failed in a run-invalidating way.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] bidsflow_engine::Error),

    /// Report handling or validation failed.
    #[error("{0}")]
    Validate(#[from] bidsflow_validate::Error),
}
