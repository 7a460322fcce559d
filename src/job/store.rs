// src/job/store.rs

//! Job storage backends.
//!
//! The engine only needs `get_document` / `set_document`; listing and
//! opening jobs is used by the CLI and by tests to populate a project.

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::errors::{FlowError, Result};
use crate::fs::{FileLock, FileSystem};
use crate::fs::mock::MockFileSystem;
use crate::job::{Document, Job, JobId};

pub const STATEPOINT_FILE: &str = "statepoint.json";
pub const DOCUMENT_FILE: &str = "document.json";
pub const LOCK_FILE: &str = ".jobflow.lock";

/// Persistent key/value storage for job documents.
pub trait JobStore: Send + Sync + Debug {
    fn get_document(&self, id: &JobId) -> Result<Document>;
    fn set_document(&self, id: &JobId, document: Document) -> Result<()>;

    /// Create (or reopen) the job identified by `statepoint`.
    fn open_job(&self, statepoint: Document) -> Result<Job>;

    /// Look up an existing job.
    fn job(&self, id: &JobId) -> Result<Job>;

    /// All jobs, ordered by id.
    fn jobs(&self) -> Result<Vec<Job>>;

    /// Filesystem holding the job workspaces.
    fn filesystem(&self) -> &dyn FileSystem;

    /// Lock the job's document against writers in other processes.
    ///
    /// Stores only reachable from this process rely on the tracker's
    /// in-process mutex and lock nothing here.
    fn lock_job(&self, _id: &JobId) -> Result<FileLock> {
        Ok(FileLock::unlocked())
    }
}

/// Documents kept in memory; workspaces live on the given filesystem
/// (a [`MockFileSystem`] by default).
#[derive(Debug)]
pub struct InMemoryJobStore {
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
    documents: Mutex<HashMap<JobId, Document>>,
}

impl InMemoryJobStore {
    pub fn new(root: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            root: root.into(),
            fs,
            documents: Mutex::new(HashMap::new()),
        }
    }

    /// Register a job under an explicit id (no statepoint).
    pub fn insert_job(&self, id: impl Into<JobId>) -> Result<Job> {
        let id = id.into();
        let job = Job::new(id.clone(), self.root.join(id.as_str()));
        self.fs.create_dir_all(&job.workspace)?;
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default();
        Ok(job)
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new("workspace", Arc::new(MockFileSystem::new()))
    }
}

impl JobStore for InMemoryJobStore {
    fn get_document(&self, id: &JobId) -> Result<Document> {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| FlowError::JobNotFound(id.to_string()))
    }

    fn set_document(&self, id: &JobId, document: Document) -> Result<()> {
        let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        match documents.get_mut(id) {
            Some(slot) => {
                *slot = document;
                Ok(())
            }
            None => Err(FlowError::JobNotFound(id.to_string())),
        }
    }

    fn open_job(&self, statepoint: Document) -> Result<Job> {
        let id = JobId::from_statepoint(&statepoint);
        let job = self.insert_job(id)?;
        let payload = serde_json::to_vec_pretty(&statepoint)?;
        self.fs.write(&job.workspace.join(STATEPOINT_FILE), &payload)?;
        Ok(job)
    }

    fn job(&self, id: &JobId) -> Result<Job> {
        let documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        if documents.contains_key(id) {
            Ok(Job::new(id.clone(), self.root.join(id.as_str())))
        } else {
            Err(FlowError::JobNotFound(id.to_string()))
        }
    }

    fn jobs(&self) -> Result<Vec<Job>> {
        let documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<&JobId> = documents.keys().collect();
        ids.sort();
        Ok(ids
            .into_iter()
            .map(|id| Job::new(id.clone(), self.root.join(id.as_str())))
            .collect())
    }

    fn filesystem(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }
}

/// On-disk store: `<root>/<job id>/{statepoint.json,document.json}`.
#[derive(Debug, Clone)]
pub struct FsJobStore {
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl FsJobStore {
    pub fn new(root: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            root: root.into(),
            fs,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn workspace_of(&self, id: &JobId) -> PathBuf {
        self.root.join(id.as_str())
    }

    fn is_job_dir(&self, dir: &Path) -> bool {
        self.fs.is_dir(dir) && self.fs.exists(&dir.join(STATEPOINT_FILE))
    }
}

impl JobStore for FsJobStore {
    fn get_document(&self, id: &JobId) -> Result<Document> {
        let workspace = self.workspace_of(id);
        if !self.is_job_dir(&workspace) {
            return Err(FlowError::JobNotFound(id.to_string()));
        }
        let path = workspace.join(DOCUMENT_FILE);
        if !self.fs.exists(&path) {
            return Ok(Document::new());
        }
        let contents = self.fs.read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn set_document(&self, id: &JobId, document: Document) -> Result<()> {
        let workspace = self.workspace_of(id);
        if !self.is_job_dir(&workspace) {
            return Err(FlowError::JobNotFound(id.to_string()));
        }
        let payload = serde_json::to_vec_pretty(&document)?;
        self.fs.write(&workspace.join(DOCUMENT_FILE), &payload)?;
        Ok(())
    }

    fn open_job(&self, statepoint: Document) -> Result<Job> {
        let id = JobId::from_statepoint(&statepoint);
        let workspace = self.workspace_of(&id);
        let sp_path = workspace.join(STATEPOINT_FILE);
        if !self.fs.exists(&sp_path) {
            debug!(job = %id, "initialising job workspace");
            self.fs.create_dir_all(&workspace)?;
            self.fs.write(&sp_path, &serde_json::to_vec_pretty(&statepoint)?)?;
        }
        Ok(Job::new(id, workspace))
    }

    fn job(&self, id: &JobId) -> Result<Job> {
        let workspace = self.workspace_of(id);
        if self.is_job_dir(&workspace) {
            Ok(Job::new(id.clone(), workspace))
        } else {
            Err(FlowError::JobNotFound(id.to_string()))
        }
    }

    fn jobs(&self) -> Result<Vec<Job>> {
        if !self.fs.is_dir(&self.root) {
            return Ok(Vec::new());
        }
        let mut jobs: Vec<Job> = self
            .fs
            .read_dir(&self.root)?
            .into_iter()
            .filter(|dir| self.is_job_dir(dir))
            .filter_map(|dir| {
                let id = dir.file_name()?.to_str()?.to_string();
                Some(Job::new(id, dir))
            })
            .collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(jobs)
    }

    fn filesystem(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    fn lock_job(&self, id: &JobId) -> Result<FileLock> {
        let workspace = self.workspace_of(id);
        if !self.is_job_dir(&workspace) {
            return Err(FlowError::JobNotFound(id.to_string()));
        }
        Ok(self.fs.lock_exclusive(&workspace.join(LOCK_FILE))?)
    }
}
