// SPDX-License-Identifier: Apache-2.0

//! BIDS dataset enumeration and the unit-of-work model.
//!
//! Data Model:
//! - dataset root
//!   - subjects (`sub-XXX` directories)
//!     - sessions (`ses-YYY` directories, optional)
//!       - modality directories (`anat`, `func`, `dwi`, `fmap`)
//!
//! A unit of work is a `(subject, optional session)` pair. Units are the
//! atomic scheduling granularity of the engine: the planner orders them, the
//! dispatchers consume them, and the validators report on them.

pub mod error;
pub mod index;
pub mod unit;
pub mod walker;

pub use error::Error;
pub use index::{DatasetIndex, ModalityFiles, SubjectIndex, index_dataset};
pub use unit::UnitId;
pub use walker::{DatasetScan, WalkOptions, scan_dataset};
