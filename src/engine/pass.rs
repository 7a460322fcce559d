// src/engine/pass.rs

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::condition::ConditionEvaluator;
use crate::dag::{DeadSubmissions, OperationGraph, PairKey, Scheduler, WorkUnit};
use crate::errors::Result;
use crate::exec::{QueueState, SubmissionBackend, SubmissionHandle, SubmissionOutcome};
use crate::job::{Job, JobView};
use crate::status::{Status, StatusTracker, Swap};
use crate::types::BackendKind;

use super::PassOptions;
use super::report::PassReport;

/// Drives scheduling passes: reconcile, plan, claim, submit, record.
///
/// All state lives in the job documents, so an engine can be dropped and
/// rebuilt between passes (or processes) without losing anything.
pub struct Engine<B: SubmissionBackend> {
    graph: OperationGraph,
    tracker: Arc<StatusTracker>,
    backend: B,
    evaluator: ConditionEvaluator,
}

impl<B: SubmissionBackend> fmt::Debug for Engine<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("graph", &self.graph)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

impl<B: SubmissionBackend> Engine<B> {
    pub fn new(graph: OperationGraph, tracker: Arc<StatusTracker>, backend: B) -> Self {
        Self {
            graph,
            tracker,
            backend,
            evaluator: ConditionEvaluator::new(),
        }
    }

    pub fn graph(&self) -> &OperationGraph {
        &self.graph
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn scheduler(&self) -> Scheduler<'_> {
        Scheduler::new(&self.graph, &self.tracker)
    }

    /// One pass over `jobs`.
    ///
    /// Store failures abort the pass; everything pair-specific (predicate
    /// errors, failed runs, rejected submissions) is recorded per pair and
    /// reported in the returned summary.
    pub async fn run_pass(&mut self, jobs: &[Job], options: PassOptions) -> Result<PassReport> {
        info!(jobs = jobs.len(), dry_run = options.dry_run, "starting pass");
        let mut report = PassReport {
            dry_run: options.dry_run,
            passes: 1,
            ..PassReport::default()
        };

        let dead = if options.dry_run {
            DeadSubmissions::new()
        } else {
            self.reconcile(jobs, &mut report).await?
        };
        let plan = self.scheduler().plan_with_dead(jobs, &dead)?;
        report.absorb_plan(&plan);

        if options.dry_run || plan.is_empty() {
            return Ok(report);
        }

        let claimed = self.claim(plan.units, &mut report)?;
        if !claimed.is_empty() {
            self.submit(claimed, &mut report).await?;
        }

        info!(
            submitted = report.summary.submitted,
            completed = report.summary.completed,
            errored = report.summary.errored,
            reverted = report.summary.reverted,
            "pass finished"
        );
        Ok(report)
    }

    /// Repeat passes while the local backend keeps finishing work, so
    /// dependents of freshly completed operations run in the same
    /// invocation. Queued backends get a single pass.
    pub async fn run_until_idle(
        &mut self,
        jobs: &[Job],
        max_passes: usize,
        stop: Option<&AtomicBool>,
    ) -> Result<PassReport> {
        let mut total = PassReport::default();
        for pass in 1..=max_passes.max(1) {
            if stop.is_some_and(|s| s.load(Ordering::SeqCst)) {
                info!(pass, "stop requested; not starting another pass");
                break;
            }
            let report = self.run_pass(jobs, PassOptions::default()).await?;
            let progressed = report.summary.submitted > 0;
            total.merge(report);

            if !progressed || self.backend.kind() != BackendKind::Local {
                break;
            }
            debug!(pass, "work finished this pass; planning again");
        }
        Ok(total)
    }

    /// Bring outstanding records in line with what the backend reports.
    ///
    /// Returns the pairs whose submissions the backend no longer knows; the
    /// planner resets those instead of treating them as conflicting.
    async fn reconcile(&mut self, jobs: &[Job], report: &mut PassReport) -> Result<DeadSubmissions> {
        let mut dead = DeadSubmissions::new();
        let mut polled: HashMap<SubmissionHandle, QueueState> = HashMap::new();

        for job in jobs {
            for (op, record) in self.tracker.records(&job.id)? {
                if !record.status.is_outstanding() || self.graph.operation(&op).is_none() {
                    continue;
                }
                let key = PairKey::new(job.id.clone(), op.clone());

                let Some(handle) = record.handle.clone() else {
                    // Claimed by a pass that has not recorded a handle yet:
                    // a local run in progress, possibly in another process,
                    // or one that was killed. Only `reset` releases it.
                    debug!(job = %job.id, op = %op, status = %record.status, "outstanding without a handle; leaving it to its owner");
                    continue;
                };

                let state = match polled.get(&handle) {
                    Some(state) => state.clone(),
                    None => match self.backend.poll(&handle).await {
                        Ok(state) => {
                            polled.insert(handle.clone(), state.clone());
                            state
                        }
                        Err(err) => {
                            warn!(job = %job.id, op = %op, handle = %handle, error = %err, "poll failed; leaving record as is");
                            continue;
                        }
                    },
                };
                debug!(job = %job.id, op = %op, handle = %handle, state = ?state, "polled submission");

                match state {
                    QueueState::Queued => {}
                    QueueState::Running => {
                        if record.status == Status::Submitted {
                            self.tracker.compare_and_transition(
                                &job.id,
                                &op,
                                Status::Submitted,
                                Status::Active,
                                None,
                            )?;
                        }
                    }
                    QueueState::Finished => {
                        self.confirm_completion(job, &op, record.status, report)?;
                    }
                    QueueState::Failed(message) => {
                        self.fail_pair(&key, record.status, message, report)?;
                    }
                    QueueState::Unknown => {
                        warn!(job = %job.id, op = %op, handle = %handle, "backend does not know the submission");
                        dead.insert(key);
                    }
                }
            }
        }
        Ok(dead)
    }

    /// `eligible -> submitted` for every unit; lost claims are dropped.
    fn claim(&self, units: Vec<WorkUnit>, report: &mut PassReport) -> Result<Vec<WorkUnit>> {
        let mut claimed = Vec::with_capacity(units.len());
        for unit in units {
            match self.tracker.compare_and_transition(
                &unit.job.id,
                &unit.operation,
                Status::Eligible,
                Status::Submitted,
                None,
            )? {
                Swap::Applied(_) => claimed.push(unit),
                Swap::Stale(current) => {
                    debug!(job = %unit.job.id, op = %unit.operation, status = %current.status, "lost claim");
                    report.summary.conflicting += 1;
                }
            }
        }
        Ok(claimed)
    }

    async fn submit(&mut self, batch: Vec<WorkUnit>, report: &mut PassReport) -> Result<()> {
        info!(units = batch.len(), backend = ?self.backend.kind(), "submitting batch");
        let units: BTreeMap<PairKey, WorkUnit> =
            batch.iter().map(|u| (u.key(), u.clone())).collect();

        let mut outcomes = match self.backend.submit(batch).await {
            Ok(outcomes) => outcomes,
            Err(err) => {
                warn!(error = %err, units = units.len(), "batch submission failed; reverting claimed pairs");
                for key in units.keys() {
                    self.revert(key, report)?;
                }
                return Ok(());
            }
        };

        for (key, unit) in units {
            match outcomes.remove(&key) {
                Some(SubmissionOutcome::Queued(handle)) => {
                    self.tracker
                        .attach_handle(&key.job, &key.operation, handle)?;
                    report.summary.submitted += 1;
                }
                Some(SubmissionOutcome::Completed) => {
                    report.summary.submitted += 1;
                    self.confirm_completion(&unit.job, &unit.operation, Status::Submitted, report)?;
                }
                Some(SubmissionOutcome::Failed(message)) => {
                    report.summary.submitted += 1;
                    self.fail_pair(&key, Status::Submitted, message, report)?;
                }
                Some(SubmissionOutcome::Rejected(reason)) => {
                    debug!(job = %key.job, op = %key.operation, reason = %reason, "unit rejected");
                    self.revert(&key, report)?;
                }
                None => {
                    warn!(job = %key.job, op = %key.operation, "backend returned no outcome for unit");
                    self.revert(&key, report)?;
                }
            }
        }
        Ok(())
    }

    /// The backend says the work finished. Operations with post-conditions
    /// only complete when those hold.
    fn confirm_completion(
        &self,
        job: &Job,
        op: &str,
        expected: Status,
        report: &mut PassReport,
    ) -> Result<()> {
        let key = PairKey::new(job.id.clone(), op);
        let def = self.graph.require(op)?;

        let verdict = if def.post.is_empty() {
            Ok(true)
        } else {
            let store = self.tracker.store();
            let document = store.get_document(&job.id)?;
            let view = JobView::new(job, &document, store.filesystem());
            self.evaluator.check_post(&view, def)
        };

        match verdict {
            Ok(true) => {
                let swap = self.tracker.compare_and_transition(
                    &job.id,
                    op,
                    expected,
                    Status::Completed,
                    None,
                )?;
                if swap.is_applied() {
                    debug!(job = %job.id, op = %op, "operation completed");
                    report.summary.completed += 1;
                }
            }
            Ok(false) => {
                self.fail_pair(
                    &key,
                    expected,
                    "operation finished but its post-conditions do not hold".to_string(),
                    report,
                )?;
            }
            Err(err) => self.fail_pair(&key, expected, err.to_string(), report)?,
        }
        Ok(())
    }

    fn fail_pair(
        &self,
        key: &PairKey,
        expected: Status,
        message: String,
        report: &mut PassReport,
    ) -> Result<()> {
        let swap = self
            .tracker
            .compare_and_fail(&key.job, &key.operation, expected, message.clone())?;
        if swap.is_applied() {
            warn!(job = %key.job, op = %key.operation, error = %message, "operation failed");
            report.record_failure(key.clone(), message);
        }
        Ok(())
    }

    fn revert(&self, key: &PairKey, report: &mut PassReport) -> Result<()> {
        let swap = self.tracker.compare_and_transition(
            &key.job,
            &key.operation,
            Status::Submitted,
            Status::Pending,
            None,
        )?;
        if swap.is_applied() {
            report.summary.reverted += 1;
        }
        Ok(())
    }
}
