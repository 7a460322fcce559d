// src/dag/plan.rs

//! Result types of a scheduling pass.

use std::collections::HashSet;
use std::fmt;

use crate::directives::Directives;
use crate::job::{Job, JobId};

/// Identifies one (job, operation) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    pub job: JobId,
    pub operation: String,
}

impl PairKey {
    pub fn new(job: impl Into<JobId>, operation: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            operation: operation.into(),
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.job, self.operation)
    }
}

/// A planned pair, carrying what a backend needs to run it.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkUnit {
    pub job: Job,
    pub operation: String,
    pub cmd: Option<String>,
    pub directives: Directives,
}

impl WorkUnit {
    pub fn key(&self) -> PairKey {
        PairKey::new(self.job.id.clone(), self.operation.clone())
    }
}

/// Why a pair was or was not planned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    /// A prerequisite is not completed.
    Blocked,
    /// Post-conditions hold or the record is completed.
    AlreadyDone,
    /// Emitted for submission.
    Ready,
    /// A submission for the pair is outstanding.
    Conflicting,
    /// Pre-conditions are false.
    Waiting,
    /// The record is in `error` and waits for an explicit retry.
    Failed,
    /// A predicate failed during this pass; the record is now `error`.
    Errored(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairDecision {
    pub key: PairKey,
    pub eligibility: Eligibility,
}

/// Counts of decisions in a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub ready: usize,
    pub already_done: usize,
    pub blocked: usize,
    pub waiting: usize,
    pub conflicting: usize,
    pub failed: usize,
    pub errored: usize,
}

/// Output of one scheduling pass: the emitted units (job-major, topological
/// within a job) and a decision for every pair considered.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub units: Vec<WorkUnit>,
    pub decisions: Vec<PairDecision>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn summary(&self) -> PlanSummary {
        let mut s = PlanSummary::default();
        for d in &self.decisions {
            match d.eligibility {
                Eligibility::Ready => s.ready += 1,
                Eligibility::AlreadyDone => s.already_done += 1,
                Eligibility::Blocked => s.blocked += 1,
                Eligibility::Waiting => s.waiting += 1,
                Eligibility::Conflicting => s.conflicting += 1,
                Eligibility::Failed => s.failed += 1,
                Eligibility::Errored(_) => s.errored += 1,
            }
        }
        s
    }

    pub fn decision(&self, key: &PairKey) -> Option<&Eligibility> {
        self.decisions
            .iter()
            .find(|d| &d.key == key)
            .map(|d| &d.eligibility)
    }
}

/// Outstanding submissions the backend no longer knows about.
pub type DeadSubmissions = HashSet<PairKey>;
