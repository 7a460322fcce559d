// src/dag/mod.rs

//! Operation graph and scheduling.
//!
//! - [`graph`] holds the validated, immutable set of operations and their
//!   prerequisite edges.
//! - [`scheduler`] decides per (job, operation) pair whether to run, skip or
//!   wait, writing its decisions back through the status tracker.
//! - [`plan`] provides the result types of a scheduling pass.

pub mod graph;
pub mod plan;
pub mod scheduler;

pub use graph::{OperationDefinition, OperationGraph};
pub use plan::{
    DeadSubmissions, Eligibility, PairDecision, PairKey, Plan, PlanSummary, WorkUnit,
};
pub use scheduler::Scheduler;
