// src/engine/mod.rs

//! Pass driver.
//!
//! A pass ties the pieces together:
//! - reconcile outstanding submissions with the backend,
//! - plan with the [`Scheduler`](crate::dag::Scheduler),
//! - claim the planned pairs (`eligible -> submitted`),
//! - hand the batch to the [`SubmissionBackend`](crate::exec::SubmissionBackend)
//!   and record what came back.
//!
//! The async shell lives in [`pass`]; the summary types in [`report`].

pub mod pass;
pub mod report;

/// Options for a single pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassOptions {
    /// Plan only: the backend is neither polled nor handed any work.
    ///
    /// Planning itself still writes what it observes: pairs move to
    /// `eligible`, to `completed` when their post-conditions hold, and to
    /// `error` when a predicate fails.
    pub dry_run: bool,
}

pub use pass::Engine;
pub use report::{PairFailure, PassReport, PassSummary};
