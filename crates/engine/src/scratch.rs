// SPDX-License-Identifier: Apache-2.0

//! Per-unit scratch directories.
//!
//! Workers never share scratch: isolation comes from disjoint sub-paths
//! keyed on the unit id, so no locking is needed.

use bidsflow_dataset::UnitId;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// The scratch sub-directory for `unit`.
#[must_use]
pub fn unit_scratch_path(scratch_root: &Path, unit: &UnitId) -> PathBuf {
    scratch_root.join(format!("unit_{}", unit.bare()))
}

/// Creates a fresh scratch directory for `unit`, removing any leftover
/// from an earlier attempt first.
pub fn create_unit_scratch(scratch_root: &Path, unit: &UnitId) -> io::Result<PathBuf> {
    let path = unit_scratch_path(scratch_root, unit);
    if path.exists() {
        fs::remove_dir_all(&path)?;
    }
    fs::create_dir_all(&path)?;
    Ok(path)
}

/// Removes a scratch directory, logging rather than failing: scratch
/// cleanup must not change a unit's outcome.
pub fn remove_scratch(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove scratch directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recreates_stale_scratch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let unit = UnitId::subject("01");
        let first = create_unit_scratch(dir.path(), &unit).expect("create");
        fs::write(first.join("leftover"), b"junk").expect("write");

        let second = create_unit_scratch(dir.path(), &unit).expect("recreate");
        assert_eq!(first, second);
        assert!(!second.join("leftover").exists());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let unit = UnitId::subject("01");
        let path = create_unit_scratch(dir.path(), &unit).expect("create");
        remove_scratch(&path);
        remove_scratch(&path);
        assert!(!path.exists());
    }
}
