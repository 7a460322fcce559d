// src/exec/mod.rs

//! Submission layer.
//!
//! - [`backend`] provides the `SubmissionBackend` trait the pass driver talks
//!   to, together with handles, outcomes and queue states.
//! - [`local`] runs operation commands as local processes with
//!   `tokio::process::Command`.
//! - [`queue`] hands bundles of units to a cluster scheduler through
//!   configurable shell commands.

pub mod backend;
pub mod local;
pub mod queue;

pub use backend::{
    BatchOutcome, QueueState, SubmissionBackend, SubmissionHandle, SubmissionOutcome,
};
pub use local::LocalBackend;
pub use queue::ShellQueueBackend;
