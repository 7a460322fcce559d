// src/status/tracker.rs

//! Validated, atomic status transitions backed by the job store.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::anyhow;
use serde_json::Value;
use tracing::debug;

use crate::errors::{FlowError, Result};
use crate::exec::SubmissionHandle;
use crate::job::{Document, JobId, JobStore};
use crate::status::record::{RunRecord, Status};

/// Reserved document key holding the run records of a job, keyed by
/// operation name.
pub const STATUS_NAMESPACE: &str = "_status";

/// Result of a compare-and-transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Swap {
    /// The record had the expected status and was moved.
    Applied(RunRecord),
    /// Someone else moved the record first; carries the current record.
    Stale(RunRecord),
}

impl Swap {
    pub fn is_applied(&self) -> bool {
        matches!(self, Swap::Applied(_))
    }

    pub fn record(&self) -> &RunRecord {
        match self {
            Swap::Applied(r) | Swap::Stale(r) => r,
        }
    }

    pub fn into_record(self) -> RunRecord {
        match self {
            Swap::Applied(r) | Swap::Stale(r) => r,
        }
    }
}

/// Reads and moves run records.
///
/// Every read-check-write runs under a per-job mutex because all records of
/// a job share one document. The store's job lock extends this to trackers
/// in other processes (or other trackers over the same workspace).
pub struct StatusTracker {
    store: Arc<dyn JobStore>,
    locks: Mutex<HashMap<JobId, Arc<Mutex<()>>>>,
}

impl fmt::Debug for StatusTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusTracker")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl StatusTracker {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Current record of the pair; a pair never seen before reads as a fresh
    /// `pending` record (not persisted).
    pub fn get_status(&self, job: &JobId, operation: &str) -> Result<RunRecord> {
        let document = self.store.get_document(job)?;
        Ok(read_record(&document, operation)?.unwrap_or_default())
    }

    /// All persisted records of a job.
    pub fn records(&self, job: &JobId) -> Result<BTreeMap<String, RunRecord>> {
        let document = self.store.get_document(job)?;
        let Some(namespace) = namespace(&document)? else {
            return Ok(BTreeMap::new());
        };
        namespace
            .iter()
            .map(|(op, value)| Ok((op.clone(), serde_json::from_value(value.clone())?)))
            .collect()
    }

    /// Persist a `pending` record for the pair if none exists yet.
    pub fn ensure_record(&self, job: &JobId, operation: &str) -> Result<RunRecord> {
        self.update(job, operation, |current| match current {
            Some(record) => Ok((None, record)),
            None => {
                let record = RunRecord::pending();
                Ok((Some(record.clone()), record))
            }
        })
    }

    /// Move the pair to `to`, validating against the state machine.
    pub fn transition(
        &self,
        job: &JobId,
        operation: &str,
        to: Status,
        handle: Option<SubmissionHandle>,
    ) -> Result<RunRecord> {
        self.apply(job, operation, None, to, handle, None)
            .map(Swap::into_record)
    }

    /// Move the pair to `error`, keeping `message` as failure detail.
    pub fn fail(&self, job: &JobId, operation: &str, message: impl Into<String>) -> Result<RunRecord> {
        self.apply(job, operation, None, Status::Error, None, Some(message.into()))
            .map(Swap::into_record)
    }

    /// Move the pair to `to` only if it is currently `expected`.
    ///
    /// A mismatch is not an error: it means another pass got there first and
    /// is reported as [`Swap::Stale`].
    pub fn compare_and_transition(
        &self,
        job: &JobId,
        operation: &str,
        expected: Status,
        to: Status,
        handle: Option<SubmissionHandle>,
    ) -> Result<Swap> {
        self.apply(job, operation, Some(expected), to, handle, None)
    }

    /// [`compare_and_transition`](Self::compare_and_transition) into `error`.
    pub fn compare_and_fail(
        &self,
        job: &JobId,
        operation: &str,
        expected: Status,
        message: impl Into<String>,
    ) -> Result<Swap> {
        self.apply(
            job,
            operation,
            Some(expected),
            Status::Error,
            None,
            Some(message.into()),
        )
    }

    /// Record the backend handle of a `submitted` pair.
    pub fn attach_handle(
        &self,
        job: &JobId,
        operation: &str,
        handle: SubmissionHandle,
    ) -> Result<RunRecord> {
        self.update(job, operation, |current| {
            let current = current.unwrap_or_default();
            if current.status != Status::Submitted {
                return Err(invalid(job, operation, current.status, Status::Submitted));
            }
            let mut next = current;
            next.handle = Some(handle);
            next.updated_at = chrono::Utc::now();
            Ok((Some(next.clone()), next))
        })
    }

    /// Explicit retry: put the pair back to `pending` from any state.
    pub fn reset(&self, job: &JobId, operation: &str) -> Result<RunRecord> {
        self.update(job, operation, |current| {
            let current = current.unwrap_or_default();
            if current.status == Status::Pending {
                return Ok((Some(current.clone()), current));
            }
            let next = current.advanced(Status::Pending, None, None);
            debug!(job = %job, op = operation, from = %current.status, "explicit reset to pending");
            Ok((Some(next.clone()), next))
        })
    }

    /// Explicit external completion, for operations whose completion cannot
    /// be detected from post-conditions.
    pub fn mark_completed(&self, job: &JobId, operation: &str) -> Result<RunRecord> {
        self.update(job, operation, |current| {
            let current = current.unwrap_or_default();
            if current.status == Status::Completed {
                return Ok((None, current));
            }
            if !current.status.can_transition_to(Status::Completed) {
                return Err(invalid(job, operation, current.status, Status::Completed));
            }
            let next = current.advanced(Status::Completed, None, None);
            Ok((Some(next.clone()), next))
        })
    }

    fn apply(
        &self,
        job: &JobId,
        operation: &str,
        expected: Option<Status>,
        to: Status,
        handle: Option<SubmissionHandle>,
        message: Option<String>,
    ) -> Result<Swap> {
        self.update(job, operation, |current| {
            let current = current.unwrap_or_default();
            if let Some(expected) = expected {
                if current.status != expected {
                    return Ok((None, Swap::Stale(current)));
                }
            }
            if !current.status.can_transition_to(to) {
                return Err(invalid(job, operation, current.status, to));
            }
            debug!(job = %job, op = operation, from = %current.status, to = %to, "status transition");
            let next = current.advanced(to, handle, message);
            Ok((Some(next.clone()), Swap::Applied(next)))
        })
    }

    /// Run `f` on the current record under both job locks and persist the
    /// record it returns, if any.
    fn update<T>(
        &self,
        job: &JobId,
        operation: &str,
        f: impl FnOnce(Option<RunRecord>) -> Result<(Option<RunRecord>, T)>,
    ) -> Result<T> {
        let lock = self.job_lock(job);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _file_lock = self.store.lock_job(job)?;

        let mut document = self.store.get_document(job)?;
        let current = read_record(&document, operation)?;
        let (next, out) = f(current)?;
        if let Some(record) = next {
            write_record(&mut document, operation, &record)?;
            self.store.set_document(job, document)?;
        }
        Ok(out)
    }

    fn job_lock(&self, job: &JobId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(job.clone()).or_default())
    }
}

fn invalid(job: &JobId, operation: &str, from: Status, to: Status) -> FlowError {
    FlowError::InvalidTransition {
        job: job.to_string(),
        operation: operation.to_string(),
        from,
        to,
    }
}

fn namespace(document: &Document) -> Result<Option<&serde_json::Map<String, Value>>> {
    match document.get(STATUS_NAMESPACE) {
        None => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(anyhow!("reserved document key `{STATUS_NAMESPACE}` is not an object").into()),
    }
}

fn read_record(document: &Document, operation: &str) -> Result<Option<RunRecord>> {
    match namespace(document)?.and_then(|ns| ns.get(operation)) {
        Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        None => Ok(None),
    }
}

fn write_record(document: &mut Document, operation: &str, record: &RunRecord) -> Result<()> {
    let slot = document
        .entry(STATUS_NAMESPACE)
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    let Value::Object(namespace) = slot else {
        return Err(anyhow!("reserved document key `{STATUS_NAMESPACE}` is not an object").into());
    };
    namespace.insert(operation.to_string(), serde_json::to_value(record)?);
    Ok(())
}
