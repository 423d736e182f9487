// SPDX-License-Identifier: Apache-2.0

//! Dataset walker: enumerates units of work from a BIDS directory tree.

use crate::error::Error;
use crate::unit::{SESSION_PREFIX, SUBJECT_PREFIX, UnitId};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Options controlling a dataset scan.
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// When set, each subject contributes one unit per session directory.
    pub session_aware: bool,
    /// Restrict the scan to these subjects (ids without the `sub-` prefix).
    pub subject_filter: Option<Vec<String>>,
}

/// The result of a dataset scan.
#[derive(Debug, Clone)]
pub struct DatasetScan {
    /// Units in natural-sort order, duplicate-free.
    pub units: Vec<UnitId>,
    /// Filter entries that matched no subject directory.
    pub unmatched_filters: Vec<String>,
}

/// Lists the entries of `dir` whose names start with `prefix`, skipping
/// hidden entries. Symbolic links are followed once via `fs::metadata`.
fn prefixed_dirs(dir: &Path, prefix: &str) -> Result<Vec<String>, Error> {
    let entries = fs::read_dir(dir).map_err(|source| Error::Unreadable {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| Error::Unreadable {
            path: dir.to_path_buf(),
            source,
        })?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with('.') || !name.starts_with(prefix) {
            continue;
        }
        match fs::metadata(entry.path()) {
            Ok(meta) if meta.is_dir() => names.push(name.to_owned()),
            Ok(_) => {}
            // A dangling symlink is not a unit; skip it.
            Err(_) => {}
        }
    }
    names.sort_by(|a, b| natord::compare(a, b));
    Ok(names)
}

/// Enumerates units of work from the dataset at `root`.
///
/// Guarantees deterministic natural-sort order and no hidden directories.
/// In session-aware mode a subject with zero session directories yields zero
/// units and a warning; otherwise every subject is one unit.
pub fn scan_dataset(root: &Path, options: &WalkOptions) -> Result<DatasetScan, Error> {
    if !root.is_dir() {
        return Err(Error::NotADirectory {
            path: root.to_path_buf(),
        });
    }

    let wanted: Option<BTreeSet<&str>> = options
        .subject_filter
        .as_ref()
        .map(|ids| ids.iter().map(String::as_str).collect());

    let mut matched: BTreeSet<&str> = BTreeSet::new();
    let mut units = Vec::new();
    for name in prefixed_dirs(root, SUBJECT_PREFIX)? {
        let subject = name
            .strip_prefix(SUBJECT_PREFIX)
            .unwrap_or(name.as_str())
            .to_owned();
        if let Some(wanted) = &wanted {
            match wanted.get(subject.as_str()) {
                Some(entry) => {
                    let _ = matched.insert(*entry);
                }
                None => continue,
            }
        }
        if options.session_aware {
            let sessions = prefixed_dirs(&root.join(&name), SESSION_PREFIX)?;
            if sessions.is_empty() {
                warn!(subject = %name, "session-aware scan found no sessions; skipping subject");
                continue;
            }
            for session in sessions {
                units.push(UnitId::with_session(&subject, &session));
            }
        } else {
            units.push(UnitId::subject(&subject));
        }
    }

    units.sort();
    units.dedup();

    let unmatched_filters = match wanted {
        Some(wanted) => wanted
            .difference(&matched)
            .map(|s| (*s).to_owned())
            .collect(),
        None => Vec::new(),
    };

    Ok(DatasetScan {
        units,
        unmatched_filters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn mkdirs(root: &Path, paths: &[&str]) {
        for p in paths {
            fs::create_dir_all(root.join(p)).expect("create fixture dir");
        }
    }

    #[test]
    fn lists_subjects_in_natural_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        mkdirs(dir.path(), &["sub-10", "sub-2", "sub-1", ".hidden", "code"]);
        let scan = scan_dataset(dir.path(), &WalkOptions::default()).expect("scan");
        let labels: Vec<String> = scan.units.iter().map(UnitId::label).collect();
        assert_eq!(labels, vec!["sub-1", "sub-2", "sub-10"]);
    }

    #[test]
    fn session_aware_expands_sessions() {
        let dir = tempfile::tempdir().expect("tempdir");
        mkdirs(
            dir.path(),
            &["sub-01/ses-02", "sub-01/ses-01", "sub-02/ses-01", "sub-03"],
        );
        let options = WalkOptions {
            session_aware: true,
            subject_filter: None,
        };
        let scan = scan_dataset(dir.path(), &options).expect("scan");
        let labels: Vec<String> = scan.units.iter().map(UnitId::label).collect();
        // sub-03 has no sessions and yields no unit in session-aware mode.
        assert_eq!(
            labels,
            vec!["sub-01_ses-01", "sub-01_ses-02", "sub-02_ses-01"]
        );
    }

    #[test]
    fn subject_without_sessions_is_a_unit_when_not_session_aware() {
        let dir = tempfile::tempdir().expect("tempdir");
        mkdirs(dir.path(), &["sub-01"]);
        let scan = scan_dataset(dir.path(), &WalkOptions::default()).expect("scan");
        assert_eq!(scan.units, vec![UnitId::subject("01")]);
    }

    #[test]
    fn filter_restricts_and_reports_unmatched() {
        let dir = tempfile::tempdir().expect("tempdir");
        mkdirs(dir.path(), &["sub-01", "sub-02", "sub-03"]);
        let options = WalkOptions {
            session_aware: false,
            subject_filter: Some(vec!["02".to_owned(), "99".to_owned()]),
        };
        let scan = scan_dataset(dir.path(), &options).expect("scan");
        assert_eq!(scan.units, vec![UnitId::subject("02")]);
        assert_eq!(scan.unmatched_filters, vec!["99".to_owned()]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope");
        let err = scan_dataset(&missing, &WalkOptions::default()).expect_err("must fail");
        assert!(matches!(err, Error::NotADirectory { .. }));
    }
}
