// SPDX-License-Identifier: Apache-2.0

//! Modality-level index of a dataset.
//!
//! Validators compare the files a pipeline was given against the files it
//! produced. This index captures the input side: per subject, per session,
//! the file names found under each modality directory. Only directory
//! listings are consulted, never file contents, so content-addressed
//! datasets with unfetched file bodies index exactly like plain ones.

use crate::error::Error;
use crate::unit::{SESSION_PREFIX, SUBJECT_PREFIX};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// File names per modality directory of one subject/session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModalityFiles {
    /// Files under `anat/`.
    pub anat: Vec<String>,
    /// Files under `func/`.
    pub func: Vec<String>,
    /// Files under `dwi/`.
    pub dwi: Vec<String>,
    /// Files under `fmap/`.
    pub fmap: Vec<String>,
}

impl ModalityFiles {
    /// Returns `true` when no modality directory contained any file.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.anat.is_empty() && self.func.is_empty() && self.dwi.is_empty() && self.fmap.is_empty()
    }
}

/// Index of one subject. The `None` session key holds modality directories
/// found directly under the subject (datasets without sessions).
#[derive(Debug, Clone, Default)]
pub struct SubjectIndex {
    /// Modality files keyed by session id (without the `ses-` prefix).
    pub sessions: BTreeMap<Option<String>, ModalityFiles>,
}

impl SubjectIndex {
    /// Session ids that contain at least one anatomical file.
    #[must_use]
    pub fn anat_sessions(&self) -> Vec<Option<String>> {
        self.sessions
            .iter()
            .filter(|(_, files)| !files.anat.is_empty())
            .map(|(session, _)| session.clone())
            .collect()
    }
}

/// Index of a whole dataset, keyed by subject id (without the `sub-`
/// prefix).
#[derive(Debug, Clone, Default)]
pub struct DatasetIndex {
    /// Per-subject indexes.
    pub subjects: BTreeMap<String, SubjectIndex>,
}

const MODALITIES: [&str; 4] = ["anat", "func", "dwi", "fmap"];

fn list_files(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| e.file_name().to_str().map(ToOwned::to_owned))
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort_by(|a, b| natord::compare(a, b));
    names
}

fn modality_files(dir: &Path) -> ModalityFiles {
    let mut files = ModalityFiles::default();
    for modality in MODALITIES {
        let listed = list_files(&dir.join(modality));
        match modality {
            "anat" => files.anat = listed,
            "func" => files.func = listed,
            "dwi" => files.dwi = listed,
            _ => files.fmap = listed,
        }
    }
    files
}

fn subdirs_with_prefix(dir: &Path, prefix: &str) -> Result<Vec<String>, Error> {
    let entries = fs::read_dir(dir).map_err(|source| Error::Unreadable {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|e| e.file_name().to_str().map(ToOwned::to_owned))
        .filter(|name| !name.starts_with('.') && name.starts_with(prefix))
        .filter(|name| dir.join(name).is_dir())
        .collect();
    names.sort_by(|a, b| natord::compare(a, b));
    Ok(names)
}

/// Builds a [`DatasetIndex`] for the dataset at `root`.
pub fn index_dataset(root: &Path) -> Result<DatasetIndex, Error> {
    if !root.is_dir() {
        return Err(Error::NotADirectory {
            path: root.to_path_buf(),
        });
    }
    let mut index = DatasetIndex::default();
    for subject_dir in subdirs_with_prefix(root, SUBJECT_PREFIX)? {
        let subject_id = subject_dir
            .strip_prefix(SUBJECT_PREFIX)
            .unwrap_or(&subject_dir)
            .to_owned();
        let subject_path = root.join(&subject_dir);
        let mut subject = SubjectIndex::default();

        let sessions = subdirs_with_prefix(&subject_path, SESSION_PREFIX)?;
        if sessions.is_empty() {
            let files = modality_files(&subject_path);
            if !files.is_empty() {
                let _ = subject.sessions.insert(None, files);
            }
        } else {
            for session_dir in sessions {
                let session_id = session_dir
                    .strip_prefix(SESSION_PREFIX)
                    .unwrap_or(&session_dir)
                    .to_owned();
                let files = modality_files(&subject_path.join(&session_dir));
                let _ = subject.sessions.insert(Some(session_id), files);
            }
        }
        let _ = index.subjects.insert(subject_id, subject);
    }
    Ok(index)
}
