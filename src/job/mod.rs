// src/job/mod.rs

//! Jobs, their documents, and the stores that own them.
//!
//! The engine treats a job as an opaque id plus a workspace directory. Its
//! document is a JSON mapping owned by a [`JobStore`]; condition predicates
//! read it through a [`JobView`], which never hands out mutable access.

pub mod store;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fs::FileSystem;

pub use store::{FsJobStore, InMemoryJobStore, JobStore};

/// Key/value document attached to a job.
pub type Document = serde_json::Map<String, Value>;

/// Number of hex characters kept from the statepoint hash.
const JOB_ID_LEN: usize = 32;

/// Opaque job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the id of a job from its statepoint.
    ///
    /// `serde_json::Map` keeps keys sorted, so equal statepoints always
    /// serialize, and therefore hash, identically.
    pub fn from_statepoint(statepoint: &Document) -> Self {
        let canonical = Value::Object(statepoint.clone()).to_string();
        let hex = blake3::hash(canonical.as_bytes()).to_hex();
        Self(hex.as_str()[..JOB_ID_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A unit of work: an id and the directory its files live in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub workspace: PathBuf,
}

impl Job {
    pub fn new(id: impl Into<JobId>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            workspace: workspace.into(),
        }
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Read-only view of a job handed to condition predicates.
#[derive(Clone, Copy)]
pub struct JobView<'a> {
    pub job: &'a Job,
    pub document: &'a Document,
    fs: &'a dyn FileSystem,
}

impl<'a> JobView<'a> {
    pub fn new(job: &'a Job, document: &'a Document, fs: &'a dyn FileSystem) -> Self {
        Self { job, document, fs }
    }

    pub fn id(&self) -> &JobId {
        &self.job.id
    }

    pub fn workspace(&self) -> &Path {
        &self.job.workspace
    }

    /// Whether `rel` (relative to the job workspace) exists.
    pub fn file_exists(&self, rel: impl AsRef<Path>) -> bool {
        self.fs.exists(&self.job.workspace.join(rel))
    }

    /// Read a workspace file as UTF-8.
    pub fn read_file(&self, rel: impl AsRef<Path>) -> anyhow::Result<String> {
        self.fs.read_to_string(&self.job.workspace.join(rel))
    }

    /// Look up a document value. Dots address nested objects (`"fit.chi2"`).
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        lookup(self.document, key)
    }
}

impl fmt::Debug for JobView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobView")
            .field("job", &self.job.id)
            .finish_non_exhaustive()
    }
}

fn lookup<'a>(document: &'a Document, key: &str) -> Option<&'a Value> {
    if let Some(value) = document.get(key) {
        return Some(value);
    }
    let mut parts = key.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}
