// SPDX-License-Identifier: Apache-2.0

//! Errors for the config crate.

use miette::Diagnostic;
use std::path::PathBuf;

/// Errors that can occur while loading or validating a configuration
/// document.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// The configuration file does not exist.
    #[error("configuration file not found: {path}")]
    #[diagnostic(code(bidsflow::config::missing))]
    ConfigMissing {
        /// The path that was given on the command line.
        path: PathBuf,
    },

    /// The configuration file exists but could not be read.
    #[error("failed to read configuration file {path}: {details}")]
    #[diagnostic(code(bidsflow::config::unreadable))]
    FileRead {
        /// The file that could not be read.
        path: PathBuf,
        /// A description of the I/O failure.
        details: String,
    },

    /// The document could not be deserialized.
    #[error("{format} parse error: {details}")]
    #[diagnostic(code(bidsflow::config::malformed))]
    ConfigMalformed {
        /// The format that was attempted (e.g. "YAML").
        format: String,
        /// The parser's description of the problem.
        details: String,
    },

    /// The document parsed but violates one or more semantic rules.
    #[error("invalid configuration ({} problem{})", errors.len(), if errors.len() == 1 { "" } else { "s" })]
    #[diagnostic(code(bidsflow::config::semantic))]
    ConfigSemantic {
        /// Every rule violation found, so users fix them in one pass.
        #[related]
        errors: Vec<Error>,
    },

    /// A single semantic rule violation.
    #[error("{message}")]
    Invalid {
        /// What rule was violated and by which key.
        message: String,
    },
}

impl Error {
    /// Shorthand for a single semantic rule violation.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::Invalid {
            message: message.into(),
        }
    }
}
