// SPDX-License-Identifier: Apache-2.0

//! Completion oracle: decides whether a unit's outputs already exist.
//!
//! Policy is a layered cascade; the first layer that answers "yes" wins:
//!
//! 1. success marker under the reserved directory,
//! 2. the configured glob pattern with `{subject}` / `{session}` substituted,
//! 3. conventional output locations of the known pipelines,
//! 4. a subject directory containing at least one regular file.
//!
//! I/O errors while probing never raise; they are logged and the probe
//! conservatively answers "no". Traversal depth is bounded.

use crate::error::Error;
use bidsflow_config::Config;
use bidsflow_dataset::UnitId;
use chrono::Utc;
use globset::Glob;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name suffix of success markers.
pub const MARKER_SUFFIX: &str = "_success";

/// Maximum directory depth probed below the output root.
pub const PROBE_DEPTH: usize = 3;

/// Output directory names of the pipelines this engine knows about.
const KNOWN_PIPELINE_DIRS: [&str; 4] = ["fmriprep", "qsiprep", "freesurfer", "qsirecon"];

/// The oracle's verdict for one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Outputs exist; the unit can be skipped.
    Done,
    /// No evidence of completed outputs.
    NotDone,
    /// The force flag overrides whatever the other layers say.
    ForceRerun,
}

/// Parsed body of a success marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    /// Version of the tool that wrote the marker.
    pub tool_version: String,
    /// ISO-8601 completion time.
    pub finished_at: String,
}

/// The marker file path for `unit` under `marker_dir`.
#[must_use]
pub fn marker_path(marker_dir: &Path, unit: &UnitId) -> PathBuf {
    marker_dir.join(format!("{}{MARKER_SUFFIX}", unit.bare()))
}

/// Writes the success marker for `unit` with create-exclusive semantics.
///
/// A pre-existing marker means the unit was scheduled twice; that aborts
/// the run.
pub fn write_marker(marker_dir: &Path, unit: &UnitId, tool_version: &str) -> Result<(), Error> {
    use std::io::Write as _;

    fs::create_dir_all(marker_dir).map_err(|source| Error::MarkerWrite {
        unit: unit.label(),
        source,
    })?;
    let path = marker_path(marker_dir, unit);
    let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(Error::MarkerCollision { unit: unit.label() });
        }
        Err(source) => {
            return Err(Error::MarkerWrite {
                unit: unit.label(),
                source,
            });
        }
    };
    let body = format!(
        "tool_version = {tool_version}\nfinished_at = {}\n",
        Utc::now().to_rfc3339()
    );
    file.write_all(body.as_bytes())
        .map_err(|source| Error::MarkerWrite {
            unit: unit.label(),
            source,
        })
}

/// Removes a stale marker before a forced rerun. Create-exclusive marker
/// writes guard against the same unit being scheduled twice within one
/// run; a marker left by an earlier run is not a collision.
pub fn clear_marker(marker_dir: &Path, unit: &UnitId) -> std::io::Result<()> {
    match fs::remove_file(marker_path(marker_dir, unit)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Reads the marker for `unit`, if one exists and parses.
#[must_use]
pub fn read_marker(marker_dir: &Path, unit: &UnitId) -> Option<Marker> {
    let body = fs::read_to_string(marker_path(marker_dir, unit)).ok()?;
    let mut tool_version = None;
    let mut finished_at = None;
    for line in body.lines() {
        if let Some((key, value)) = line.split_once('=') {
            match key.trim() {
                "tool_version" => tool_version = Some(value.trim().to_owned()),
                "finished_at" => finished_at = Some(value.trim().to_owned()),
                _ => {}
            }
        }
    }
    Some(Marker {
        tool_version: tool_version?,
        finished_at: finished_at?,
    })
}

/// Decision procedure for "is this unit already done?".
#[derive(Debug, Clone)]
pub struct CompletionOracle {
    output_root: PathBuf,
    marker_dir: PathBuf,
    pattern: Option<String>,
    force: bool,
}

impl CompletionOracle {
    /// Builds the oracle from the loaded configuration.
    #[must_use]
    pub fn new(config: &Config, force: bool) -> Self {
        Self {
            output_root: config.common.output_root.clone(),
            marker_dir: config.marker_dir(),
            pattern: config.app.output_pattern.clone(),
            force,
        }
    }

    /// The reserved marker directory this oracle consults.
    #[must_use]
    pub fn marker_dir(&self) -> &Path {
        &self.marker_dir
    }

    /// Whether the success marker for `unit` exists.
    #[must_use]
    pub fn marker_exists(&self, unit: &UnitId) -> bool {
        marker_path(&self.marker_dir, unit).is_file()
    }

    /// Full cascade: marker, pattern, generic locations, subject directory.
    #[must_use]
    pub fn classify(&self, unit: &UnitId) -> Completion {
        if self.force {
            return Completion::ForceRerun;
        }
        if self.marker_exists(unit) {
            return Completion::Done;
        }
        if self.outputs_present(unit) {
            Completion::Done
        } else {
            Completion::NotDone
        }
    }

    /// Layers 2–4 only, used to confirm outputs after a container run.
    /// The marker layer is deliberately excluded so a stale marker can
    /// never vouch for a fresh run.
    #[must_use]
    pub fn outputs_present(&self, unit: &UnitId) -> bool {
        self.pattern_matches(unit)
            || self.generic_outputs_present(unit)
            || self.subject_dir_has_regular_file(unit)
    }

    fn pattern_matches(&self, unit: &UnitId) -> bool {
        let Some(template) = &self.pattern else {
            return false;
        };
        let mut pattern = template.replace("{subject}", unit.subject_id());
        if let Some(session) = unit.session_id() {
            pattern = pattern.replace("{session}", session);
        }
        let matcher = match Glob::new(&pattern) {
            Ok(glob) => glob.compile_matcher(),
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "invalid output pattern; treating as no match");
                return false;
            }
        };
        let match_full_path = pattern.contains('/');
        let mut hit = false;
        walk_bounded(&self.output_root, PROBE_DEPTH, &mut |rel, name, _is_file| {
            if match_full_path {
                hit = hit || matcher.is_match(rel);
            } else {
                hit = hit || matcher.is_match(name);
            }
            !hit
        });
        hit
    }

    /// Conventional output locations: the subject directory itself, the
    /// per-pipeline subject directories, per-modality directories, and the
    /// subject HTML report.
    fn generic_outputs_present(&self, unit: &UnitId) -> bool {
        let subject_dir = unit.subject_dir();
        let mut roots = vec![self.output_root.clone()];
        roots.extend(
            KNOWN_PIPELINE_DIRS
                .iter()
                .map(|p| self.output_root.join(p)),
        );

        for root in &roots {
            if root.join(format!("{subject_dir}.html")).is_file() {
                return true;
            }
            let candidate = root.join(&subject_dir);
            let scope = match unit.session_id() {
                Some(session) => candidate.join(format!("ses-{session}")),
                None => candidate,
            };
            if dir_nonempty(&scope) {
                return true;
            }
            for modality in ["anat", "func", "dwi", "fmap"] {
                if dir_nonempty(&scope.join(modality)) {
                    return true;
                }
            }
        }
        false
    }

    fn subject_dir_has_regular_file(&self, unit: &UnitId) -> bool {
        let scope = match unit.session_id() {
            Some(session) => self
                .output_root
                .join(unit.subject_dir())
                .join(format!("ses-{session}")),
            None => self.output_root.join(unit.subject_dir()),
        };
        if !scope.is_dir() {
            return false;
        }
        let mut found = false;
        walk_bounded(&scope, PROBE_DEPTH, &mut |_, _, is_file| {
            found = found || is_file;
            !found
        });
        found
    }
}

/// Whether `path` is a directory with at least one visible entry.
fn dir_nonempty(path: &Path) -> bool {
    let Ok(mut entries) = fs::read_dir(path) else {
        return false;
    };
    entries.any(|e| {
        e.ok()
            .and_then(|e| e.file_name().to_str().map(|n| !n.starts_with('.')))
            .unwrap_or(false)
    })
}

/// Depth-bounded walk. The callback receives the path relative to `root`,
/// the entry name, and whether the entry is a regular file; it returns
/// `false` to stop early. I/O errors are logged and skipped.
fn walk_bounded(root: &Path, max_depth: usize, visit: &mut dyn FnMut(&str, &str, bool) -> bool) {
    fn inner(
        root: &Path,
        dir: &Path,
        depth: usize,
        visit: &mut dyn FnMut(&str, &str, bool) -> bool,
    ) -> bool {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(path = %dir.display(), error = %e, "skipping unreadable directory");
                return true;
            }
        };
        for entry in entries.filter_map(Result::ok) {
            let Some(name) = entry.file_name().to_str().map(ToOwned::to_owned) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            let rel = path
                .strip_prefix(root)
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|_| name.clone());
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !visit(&rel, &name, is_file) {
                return false;
            }
            if depth > 1 && path.is_dir() && !inner(root, &path, depth - 1, visit) {
                return false;
            }
        }
        true
    }
    let _ = inner(root, root, max_depth, visit);
}
