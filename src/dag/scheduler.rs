// src/dag/scheduler.rs

use tracing::{debug, info, warn};

use crate::condition::ConditionEvaluator;
use crate::dag::graph::{OperationDefinition, OperationGraph};
use crate::dag::plan::{DeadSubmissions, Eligibility, PairDecision, PairKey, Plan, WorkUnit};
use crate::errors::{FlowError, Result};
use crate::job::{Job, JobView};
use crate::status::{RunRecord, Status, StatusTracker, Swap};

/// Decides, for a set of jobs, which operations are ready to run.
///
/// The scheduler itself is stateless; everything it learns is written back
/// through the [`StatusTracker`], so planning twice without an external
/// change gives the same answer and never emits a pair that is completed or
/// already submitted.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler<'a> {
    graph: &'a OperationGraph,
    tracker: &'a StatusTracker,
    evaluator: ConditionEvaluator,
}

impl<'a> Scheduler<'a> {
    pub fn new(graph: &'a OperationGraph, tracker: &'a StatusTracker) -> Self {
        Self {
            graph,
            tracker,
            evaluator: ConditionEvaluator::new(),
        }
    }

    pub fn graph(&self) -> &'a OperationGraph {
        self.graph
    }

    /// Plan every (job, operation) pair, job-major in input order and
    /// topological within a job.
    ///
    /// Predicate failures put the pair into `error` and never abort the pass;
    /// store failures do.
    pub fn plan(&self, jobs: &[Job]) -> Result<Plan> {
        self.plan_with_dead(jobs, &DeadSubmissions::new())
    }

    /// Like [`plan`](Self::plan), resetting outstanding pairs listed in
    /// `dead` instead of reporting them as conflicting.
    pub fn plan_with_dead(&self, jobs: &[Job], dead: &DeadSubmissions) -> Result<Plan> {
        let mut plan = Plan::default();

        for job in jobs {
            for op in self.graph.operations() {
                let key = PairKey::new(job.id.clone(), op.name.clone());
                let eligibility = match self.decide(job, op, &key, dead) {
                    Ok(eligibility) => eligibility,
                    Err(err @ FlowError::ConditionEvaluation { .. }) => {
                        let message = err.to_string();
                        self.record_error(&key, &message)?;
                        Eligibility::Errored(message)
                    }
                    Err(err) => return Err(err),
                };

                debug!(job = %job.id, op = %op.name, decision = ?eligibility, "planned pair");
                if eligibility == Eligibility::Ready {
                    plan.units.push(WorkUnit {
                        job: job.clone(),
                        operation: op.name.clone(),
                        cmd: op.cmd.clone(),
                        directives: op.directives.clone(),
                    });
                }
                plan.decisions.push(PairDecision { key, eligibility });
            }
        }

        let s = plan.summary();
        info!(
            jobs = jobs.len(),
            ready = s.ready,
            done = s.already_done,
            blocked = s.blocked,
            waiting = s.waiting,
            conflicting = s.conflicting,
            errored = s.errored,
            "scheduling pass planned"
        );
        Ok(plan)
    }

    fn decide(
        &self,
        job: &Job,
        op: &OperationDefinition,
        key: &PairKey,
        dead: &DeadSubmissions,
    ) -> Result<Eligibility> {
        let mut record = self.tracker.ensure_record(&job.id, &op.name)?;
        match record.status {
            Status::Completed => return Ok(Eligibility::AlreadyDone),
            Status::Error => return Ok(Eligibility::Failed),
            _ => {}
        }

        let store = self.tracker.store();
        let document = store.get_document(&job.id)?;
        let view = JobView::new(job, &document, store.filesystem());

        if self.evaluator.check_post(&view, op)? {
            let swap = self.tracker.compare_and_transition(
                &job.id,
                &op.name,
                record.status,
                Status::Completed,
                None,
            )?;
            return Ok(match swap {
                Swap::Applied(_) => {
                    debug!(job = %job.id, op = %op.name, "post-conditions hold; marked completed");
                    Eligibility::AlreadyDone
                }
                Swap::Stale(current) => settled(&current),
            });
        }

        if !self
            .graph
            .prerequisites_satisfied(&view, &op.name, self.tracker, &self.evaluator)?
        {
            self.demote(job, op, &record)?;
            return Ok(Eligibility::Blocked);
        }

        if !self.evaluator.check_pre(&view, op)? {
            self.demote(job, op, &record)?;
            return Ok(Eligibility::Waiting);
        }

        if record.status.is_outstanding() {
            if !dead.contains(key) {
                return Ok(Eligibility::Conflicting);
            }
            match self.tracker.compare_and_transition(
                &job.id,
                &op.name,
                record.status,
                Status::Pending,
                None,
            )? {
                Swap::Applied(reset) => {
                    warn!(job = %job.id, op = %op.name, from = %record.status, "submission is gone from the backend; reset to pending");
                    record = reset;
                }
                Swap::Stale(current) => return Ok(settled(&current)),
            }
        }

        match record.status {
            Status::Eligible => Ok(Eligibility::Ready),
            _ => match self.tracker.compare_and_transition(
                &job.id,
                &op.name,
                Status::Pending,
                Status::Eligible,
                None,
            )? {
                Swap::Applied(_) => Ok(Eligibility::Ready),
                Swap::Stale(current) => Ok(settled(&current)),
            },
        }
    }

    /// An `eligible` pair whose conditions stopped holding goes back to
    /// `pending`.
    fn demote(&self, job: &Job, op: &OperationDefinition, record: &RunRecord) -> Result<()> {
        if record.status == Status::Eligible {
            self.tracker.compare_and_transition(
                &job.id,
                &op.name,
                Status::Eligible,
                Status::Pending,
                None,
            )?;
        }
        Ok(())
    }

    fn record_error(&self, key: &PairKey, message: &str) -> Result<()> {
        let current = self.tracker.get_status(&key.job, &key.operation)?;
        if current.status.is_stable() {
            return Ok(());
        }
        warn!(job = %key.job, op = %key.operation, error = %message, "condition evaluation failed");
        self.tracker
            .compare_and_fail(&key.job, &key.operation, current.status, message)?;
        Ok(())
    }
}

/// Eligibility of a pair another pass moved under our feet.
fn settled(current: &RunRecord) -> Eligibility {
    match current.status {
        Status::Completed => Eligibility::AlreadyDone,
        Status::Error => Eligibility::Failed,
        _ => Eligibility::Conflicting,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::condition::Predicate;
    use crate::fs::mock::MockFileSystem;
    use crate::job::{InMemoryJobStore, JobStore};

    struct Fixture {
        fs: MockFileSystem,
        store: Arc<InMemoryJobStore>,
        tracker: StatusTracker,
    }

    fn fixture() -> Fixture {
        let fs = MockFileSystem::new();
        let store = Arc::new(InMemoryJobStore::new("ws", Arc::new(fs.clone())));
        let tracker = StatusTracker::new(store.clone());
        Fixture { fs, store, tracker }
    }

    fn simulate_analyze() -> OperationGraph {
        OperationGraph::new([
            OperationDefinition::new("simulate")
                .with_pre(Predicate::file_exists("input.dat"))
                .with_post(Predicate::file_exists("output.dat")),
            OperationDefinition::new("analyze")
                .after("simulate")
                .with_pre(Predicate::file_exists("output.dat"))
                .with_post(Predicate::file_exists("report.txt")),
        ])
        .unwrap()
    }

    #[test]
    fn ready_pairs_become_eligible_and_are_reemitted() {
        let f = fixture();
        let job = f.store.insert_job("j1").unwrap();
        f.fs.add_file("ws/j1/input.dat", "1");
        let graph = simulate_analyze();
        let scheduler = Scheduler::new(&graph, &f.tracker);

        let plan = scheduler.plan(std::slice::from_ref(&job)).unwrap();
        assert_eq!(plan.units.len(), 1);
        assert_eq!(plan.units[0].operation, "simulate");
        assert_eq!(
            plan.decision(&PairKey::new("j1", "analyze")),
            Some(&Eligibility::Blocked)
        );
        assert_eq!(
            f.tracker.get_status(&job.id, "simulate").unwrap().status,
            Status::Eligible
        );

        let again = scheduler.plan(std::slice::from_ref(&job)).unwrap();
        assert_eq!(again.units.len(), 1);
    }

    #[test]
    fn eligible_pair_falls_back_to_pending_when_pre_stops_holding() {
        let f = fixture();
        let job = f.store.insert_job("j1").unwrap();
        f.fs.add_file("ws/j1/input.dat", "1");
        let graph = simulate_analyze();
        let scheduler = Scheduler::new(&graph, &f.tracker);
        scheduler.plan(std::slice::from_ref(&job)).unwrap();

        f.fs.remove("ws/j1/input.dat");
        let plan = scheduler.plan(std::slice::from_ref(&job)).unwrap();
        assert!(plan.is_empty());
        assert_eq!(
            plan.decision(&PairKey::new("j1", "simulate")),
            Some(&Eligibility::Waiting)
        );
        assert_eq!(
            f.tracker.get_status(&job.id, "simulate").unwrap().status,
            Status::Pending
        );
    }

    #[test]
    fn outstanding_pairs_conflict_until_reported_dead() {
        let f = fixture();
        let job = f.store.insert_job("j1").unwrap();
        f.fs.add_file("ws/j1/input.dat", "1");
        let graph = simulate_analyze();
        let scheduler = Scheduler::new(&graph, &f.tracker);
        scheduler.plan(std::slice::from_ref(&job)).unwrap();
        f.tracker
            .transition(&job.id, "simulate", Status::Submitted, None)
            .unwrap();

        let plan = scheduler.plan(std::slice::from_ref(&job)).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.summary().conflicting, 1);

        let dead: DeadSubmissions = [PairKey::new("j1", "simulate")].into_iter().collect();
        let plan = scheduler
            .plan_with_dead(std::slice::from_ref(&job), &dead)
            .unwrap();
        assert_eq!(plan.units.len(), 1);
    }

    #[test]
    fn observed_post_conditions_complete_outstanding_pairs() {
        let f = fixture();
        let job = f.store.insert_job("j1").unwrap();
        f.fs.add_file("ws/j1/input.dat", "1");
        let graph = simulate_analyze();
        let scheduler = Scheduler::new(&graph, &f.tracker);
        scheduler.plan(std::slice::from_ref(&job)).unwrap();
        f.tracker
            .transition(&job.id, "simulate", Status::Submitted, None)
            .unwrap();

        f.fs.add_file("ws/j1/output.dat", "2");
        let plan = scheduler.plan(std::slice::from_ref(&job)).unwrap();
        assert_eq!(
            f.tracker.get_status(&job.id, "simulate").unwrap().status,
            Status::Completed
        );
        assert_eq!(plan.units.len(), 1);
        assert_eq!(plan.units[0].operation, "analyze");
    }

    #[test]
    fn predicate_failure_marks_only_that_pair() {
        let f = fixture();
        let jobs = [f.store.insert_job("a").unwrap(), f.store.insert_job("b").unwrap()];
        let graph = OperationGraph::new([OperationDefinition::new("check").with_pre(
            Predicate::custom("only_b", |view| {
                if view.id().as_str() == "a" {
                    anyhow::bail!("corrupt input");
                }
                Ok(true)
            }),
        )])
        .unwrap();
        let scheduler = Scheduler::new(&graph, &f.tracker);

        let plan = scheduler.plan(&jobs).unwrap();
        assert_eq!(plan.units.len(), 1);
        assert_eq!(plan.units[0].job.id.as_str(), "b");
        assert!(matches!(
            plan.decision(&PairKey::new("a", "check")),
            Some(Eligibility::Errored(_))
        ));

        let record = f.tracker.get_status(&jobs[0].id, "check").unwrap();
        assert_eq!(record.status, Status::Error);
        assert!(record.message.unwrap().contains("corrupt input"));

        let plan = scheduler.plan(&jobs).unwrap();
        assert_eq!(
            plan.decision(&PairKey::new("a", "check")),
            Some(&Eligibility::Failed)
        );
    }

    #[test]
    fn prerequisite_must_still_satisfy_its_post_conditions() {
        let f = fixture();
        let job = f.store.insert_job("j1").unwrap();
        f.fs.add_file("ws/j1/output.dat", "1");
        let graph = simulate_analyze();
        let scheduler = Scheduler::new(&graph, &f.tracker);

        let plan = scheduler.plan(std::slice::from_ref(&job)).unwrap();
        assert_eq!(plan.units.len(), 1);
        assert_eq!(plan.units[0].operation, "analyze");

        // Output disappears: simulate stays completed, but analyze is blocked.
        f.fs.remove("ws/j1/output.dat");
        let plan = scheduler.plan(std::slice::from_ref(&job)).unwrap();
        assert_eq!(
            plan.decision(&PairKey::new("j1", "analyze")),
            Some(&Eligibility::Blocked)
        );
        assert_eq!(
            f.tracker.get_status(&job.id, "analyze").unwrap().status,
            Status::Pending
        );
        assert!(f.store.get_document(&job.id).unwrap().contains_key("_status"));
    }

    #[test]
    fn broken_prerequisite_check_blocks_the_dependent() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let f = fixture();
        let job = f.store.insert_job("j1").unwrap();
        let broken = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&broken);
        let graph = OperationGraph::new([
            OperationDefinition::new("simulate").with_post(Predicate::custom(
                "output_readable",
                move |_| {
                    if flag.load(Ordering::SeqCst) {
                        anyhow::bail!("unreadable output");
                    }
                    Ok(true)
                },
            )),
            OperationDefinition::new("analyze").after("simulate"),
        ])
        .unwrap();
        let scheduler = Scheduler::new(&graph, &f.tracker);

        let plan = scheduler.plan(std::slice::from_ref(&job)).unwrap();
        assert_eq!(plan.units.len(), 1);
        assert_eq!(plan.units[0].operation, "analyze");

        broken.store(true, Ordering::SeqCst);
        let plan = scheduler.plan(std::slice::from_ref(&job)).unwrap();
        assert_eq!(
            plan.decision(&PairKey::new("j1", "analyze")),
            Some(&Eligibility::Blocked)
        );
        assert_eq!(plan.summary().errored, 0);
        assert_eq!(
            f.tracker.get_status(&job.id, "analyze").unwrap().status,
            Status::Pending
        );

        broken.store(false, Ordering::SeqCst);
        let plan = scheduler.plan(std::slice::from_ref(&job)).unwrap();
        assert_eq!(plan.units.len(), 1);
        assert_eq!(plan.units[0].operation, "analyze");
    }
}
