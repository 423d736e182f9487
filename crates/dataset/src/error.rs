// SPDX-License-Identifier: Apache-2.0

//! Errors for the dataset crate.

use std::path::PathBuf;

/// Errors that can occur while enumerating a dataset.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The dataset root does not exist or is not a directory.
    #[error("dataset root `{path}` is not a directory")]
    NotADirectory {
        /// The offending path.
        path: PathBuf,
    },

    /// A directory listing failed.
    #[error("failed to list `{path}`: {source}")]
    Unreadable {
        /// The directory that could not be listed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
