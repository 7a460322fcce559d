// src/exec/backend.rs

//! Pluggable submission backend abstraction.
//!
//! The pass driver hands claimed work units to a `SubmissionBackend` instead
//! of spawning processes itself. That keeps the engine independent of where
//! the work actually runs:
//!
//! - [`LocalBackend`](super::LocalBackend) runs the operation command in the
//!   job workspace and reports the result right away.
//! - [`ShellQueueBackend`](super::ShellQueueBackend) hands bundles to a
//!   cluster scheduler and returns handles that are polled on later passes.
//! - Tests provide their own implementation that never spawns a process.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::dag::{PairKey, WorkUnit};
use crate::errors::Result;
use crate::types::BackendKind;

/// Opaque, backend-assigned identifier of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionHandle(String);

impl SubmissionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubmissionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What happened to one unit of a submitted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Ran to completion (local execution).
    Completed,
    /// Ran and failed; carries failure detail.
    Failed(String),
    /// Accepted by a queue; completion is observed later.
    Queued(SubmissionHandle),
    /// Not accepted; the pair goes back to `pending`.
    Rejected(String),
}

/// Queue-side view of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueState {
    Queued,
    Running,
    Finished,
    Failed(String),
    /// The backend no longer knows the handle.
    Unknown,
}

/// Per-unit outcomes of a batch.
///
/// A unit missing from the map is treated as rejected.
pub type BatchOutcome = BTreeMap<PairKey, SubmissionOutcome>;

/// Trait abstracting where claimed work units run.
pub trait SubmissionBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Hand a batch of units to the backend.
    ///
    /// An `Err` means nothing in the batch was accepted.
    fn submit(
        &mut self,
        batch: Vec<WorkUnit>,
    ) -> Pin<Box<dyn Future<Output = Result<BatchOutcome>> + Send + '_>>;

    /// Ask the backend about an earlier submission.
    fn poll<'a>(
        &'a mut self,
        handle: &'a SubmissionHandle,
    ) -> Pin<Box<dyn Future<Output = Result<QueueState>> + Send + 'a>>;
}

impl<B: SubmissionBackend + ?Sized> SubmissionBackend for Box<B> {
    fn kind(&self) -> BackendKind {
        (**self).kind()
    }

    fn submit(
        &mut self,
        batch: Vec<WorkUnit>,
    ) -> Pin<Box<dyn Future<Output = Result<BatchOutcome>> + Send + '_>> {
        (**self).submit(batch)
    }

    fn poll<'a>(
        &'a mut self,
        handle: &'a SubmissionHandle,
    ) -> Pin<Box<dyn Future<Output = Result<QueueState>> + Send + 'a>> {
        (**self).poll(handle)
    }
}
