// SPDX-License-Identifier: Apache-2.0

//! The closed family of supported pipelines.

use crate::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Pipelines this engine can verify outputs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Pipeline {
    /// Functional preprocessing (fMRIPrep).
    Fmriprep,
    /// Diffusion preprocessing (QSIPrep).
    Qsiprep,
    /// Structural reconstruction (FreeSurfer recon-all, cross-sectional
    /// and longitudinal).
    Freesurfer,
    /// Diffusion reconstruction (QSIRecon).
    Qsirecon,
}

impl Pipeline {
    /// All supported pipelines, in validation order.
    pub const ALL: [Pipeline; 4] = [
        Pipeline::Fmriprep,
        Pipeline::Qsiprep,
        Pipeline::Freesurfer,
        Pipeline::Qsirecon,
    ];

    /// The canonical lower-case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Pipeline::Fmriprep => "fmriprep",
            Pipeline::Qsiprep => "qsiprep",
            Pipeline::Freesurfer => "freesurfer",
            Pipeline::Qsirecon => "qsirecon",
        }
    }

    /// The pipeline's derivatives root: `<output_root>/<name>` when that
    /// directory exists, otherwise the output root itself (newer BIDS Apps
    /// write their derivatives directly into the output directory).
    #[must_use]
    pub fn derivatives_root(self, output_root: &Path) -> PathBuf {
        let nested = output_root.join(self.name());
        if nested.is_dir() {
            nested
        } else {
            output_root.to_path_buf()
        }
    }

    /// Whether any conventional trace of this pipeline exists under the
    /// output root.
    #[must_use]
    pub fn detected(self, output_root: &Path) -> bool {
        output_root.join(self.name()).is_dir()
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Pipeline {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fmriprep" => Ok(Pipeline::Fmriprep),
            "qsiprep" => Ok(Pipeline::Qsiprep),
            "freesurfer" | "recon-all" => Ok(Pipeline::Freesurfer),
            "qsirecon" => Ok(Pipeline::Qsirecon),
            other => Err(Error::UnknownPipeline {
                name: other.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("fMRIPrep".parse::<Pipeline>().ok(), Some(Pipeline::Fmriprep));
        assert_eq!("QSIPREP".parse::<Pipeline>().ok(), Some(Pipeline::Qsiprep));
        assert!("eddy".parse::<Pipeline>().is_err());
    }

    #[test]
    fn derivatives_root_prefers_the_nested_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(
            Pipeline::Fmriprep.derivatives_root(dir.path()),
            dir.path().to_path_buf()
        );
        std::fs::create_dir_all(dir.path().join("fmriprep")).expect("mkdir");
        assert_eq!(
            Pipeline::Fmriprep.derivatives_root(dir.path()),
            dir.path().join("fmriprep")
        );
    }
}
