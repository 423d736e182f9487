// SPDX-License-Identifier: Apache-2.0

//! The bidsflow execution engine.
//!
//! Data Model:
//! - plan (ordered, duplicate-free units + provenance + force)
//!   - units of work (subject, optional session)
//!     - run records (one per unit that left the planned state)
//!
//! The engine owns everything between a loaded configuration and a set of
//! run records: the completion oracle, the work planner, the pure container
//! invocation builder, and the two dispatch backends. Both backends share
//! the builder and the oracle, so a unit that is "done" locally is also
//! "done" after a cluster run.

pub mod annex;
pub mod cluster;
pub mod error;
pub mod invocation;
pub mod local;
pub mod oracle;
pub mod plan;
pub mod planner;
pub mod record;
pub mod scratch;

pub use cluster::ClusterDispatcher;
pub use error::Error;
pub use local::LocalDispatcher;
pub use oracle::{Completion, CompletionOracle};
pub use plan::{Plan, Provenance};
pub use planner::{PlanOutcome, PlanRequest, build_plan};
pub use record::{Classification, RecordLog, RunRecord, RunState};
