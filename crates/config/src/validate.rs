// SPDX-License-Identifier: Apache-2.0

//! Semantic validation for [`Config`].

use crate::error::Error;
use crate::{ClusterSection, Config, DatasetSection};

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Accepts `H:MM:SS` and `HH:MM:SS`.
fn walltime_ok(walltime: &str) -> bool {
    let parts: Vec<&str> = walltime.split(':').collect();
    let [hours, minutes, seconds] = parts.as_slice() else {
        return false;
    };
    if !(1..=2).contains(&hours.len()) || minutes.len() != 2 || seconds.len() != 2 {
        return false;
    }
    if !is_digits(hours) || !is_digits(minutes) || !is_digits(seconds) {
        return false;
    }
    minutes.parse::<u8>().is_ok_and(|m| m < 60) && seconds.parse::<u8>().is_ok_and(|s| s < 60)
}

/// Accepts `<n>M` and `<n>G`.
fn memory_ok(memory: &str) -> bool {
    match memory.as_bytes() {
        [digits @ .., unit] if (*unit == b'M' || *unit == b'G') && !digits.is_empty() => {
            digits.iter().all(u8::is_ascii_digit)
        }
        _ => false,
    }
}

fn validate_cluster(cluster: &ClusterSection, errors: &mut Vec<Error>) {
    if !walltime_ok(&cluster.walltime) {
        errors.push(Error::invalid(format!(
            "cluster.walltime `{}` must match H:MM:SS or HH:MM:SS",
            cluster.walltime
        )));
    }
    if !memory_ok(&cluster.memory) {
        errors.push(Error::invalid(format!(
            "cluster.memory `{}` must be a number followed by M or G",
            cluster.memory
        )));
    }
    if cluster.cpus < 1 {
        errors.push(Error::invalid("cluster.cpus must be at least 1"));
    }
    if cluster.queue.is_empty() {
        errors.push(Error::invalid("cluster.queue must not be empty"));
    }
}

fn validate_dataset(dataset: &DatasetSection, errors: &mut Vec<Error>) {
    if dataset.input_ref.is_empty() {
        errors.push(Error::invalid("dataset.input_ref must not be empty"));
    }
    let output_missing = dataset
        .output_ref
        .as_deref()
        .is_none_or(|output_ref| output_ref.is_empty());
    if dataset.push_results && output_missing {
        errors.push(Error::invalid(
            "dataset.output_ref is required when dataset.push_results is set",
        ));
    }
}

impl Config {
    /// Validates semantic rules, returning every violation at once inside
    /// [`Error::ConfigSemantic`].
    ///
    /// Writability of the output, scratch, and log roots is deliberately
    /// not checked here: the planner probes those once, at plan time.
    pub fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();

        if !self.common.bids_root.is_dir() {
            errors.push(Error::invalid(format!(
                "common.bids_root `{}` is not a readable directory",
                self.common.bids_root.display()
            )));
        }
        if !self.common.container_image.is_file() {
            errors.push(Error::invalid(format!(
                "common.container_image `{}` is not a readable file",
                self.common.container_image.display()
            )));
        }
        if self.common.jobs < 1 {
            errors.push(Error::invalid(format!(
                "common.jobs must be at least 1, got {}",
                self.common.jobs
            )));
        }
        if self.common.container_runtime.is_empty() {
            errors.push(Error::invalid("common.container_runtime must not be empty"));
        }

        match self.app.analysis_level.as_str() {
            "participant" | "group" => {}
            other => errors.push(Error::invalid(format!(
                "app.analysis_level `{other}` is not one of: participant, group"
            ))),
        }
        for mount in &self.app.mounts {
            if !mount.source.exists() {
                errors.push(Error::invalid(format!(
                    "app.mounts source `{}` does not exist",
                    mount.source.display()
                )));
            }
            if !mount.target.is_absolute() {
                errors.push(Error::invalid(format!(
                    "app.mounts target `{}` must be an absolute path inside the container",
                    mount.target.display()
                )));
            }
        }

        if let Some(cluster) = &self.cluster {
            validate_cluster(cluster, &mut errors);
        }
        if let Some(dataset) = &self.dataset {
            validate_dataset(dataset, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::ConfigSemantic { errors })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walltime_shapes() {
        assert!(walltime_ok("4:00:00"));
        assert!(walltime_ok("48:30:59"));
        assert!(!walltime_ok("4:00"));
        assert!(!walltime_ok("100:00:00"));
        assert!(!walltime_ok("4:60:00"));
        assert!(!walltime_ok("4:00:0x"));
    }

    #[test]
    fn memory_shapes() {
        assert!(memory_ok("8G"));
        assert!(memory_ok("32000M"));
        assert!(!memory_ok("8"));
        assert!(!memory_ok("G"));
        assert!(!memory_ok("8T"));
        assert!(!memory_ok("8g"));
    }
}
