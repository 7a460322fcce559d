// tests/engine_pass.rs

mod common;
use crate::common::{
    FakeLocalBackend, FakeQueueBackend, MemoryProject, init_tracing, jobs, with_timeout,
};

use std::error::Error;

use jobflow::condition::Predicate;
use jobflow::dag::{OperationDefinition, OperationGraph, PairKey};
use jobflow::engine::{Engine, PassOptions};
use jobflow::exec::{QueueState, SubmissionHandle};
use jobflow::status::Status;

type TestResult = Result<(), Box<dyn Error>>;

fn compute_graph() -> OperationGraph {
    OperationGraph::new([OperationDefinition::new("compute")
        .with_cmd("./compute.sh")
        .with_post(Predicate::file_exists("out.txt"))])
    .expect("compute graph is valid")
}

#[tokio::test]
async fn queued_submission_follows_the_backend_to_completion() -> TestResult {
    init_tracing();
    let project = MemoryProject::new();
    let jobs = jobs(&project, &["j1", "j2"]);
    let queue = FakeQueueBackend::new();
    let mut engine = Engine::new(compute_graph(), project.tracker.clone(), queue.clone());

    let report = with_timeout(engine.run_pass(&jobs, PassOptions::default())).await?;
    assert_eq!(report.summary.submitted, 2);
    let h1 = queue.handle_of("j1", "compute").ok_or("no handle for j1")?;
    let h2 = queue.handle_of("j2", "compute").ok_or("no handle for j2")?;
    let record = project.tracker.get_status(&jobs[0].id, "compute")?;
    assert_eq!(record.status, Status::Submitted);
    assert_eq!(record.handle, Some(h1.clone()));

    // Still queued: no second submission.
    let report = with_timeout(engine.run_pass(&jobs, PassOptions::default())).await?;
    assert_eq!(report.summary.submitted, 0);
    assert_eq!(report.summary.conflicting, 2);
    assert_eq!(queue.submissions().len(), 2);

    queue.set_state(&h1, QueueState::Running);
    queue.set_state(&h2, QueueState::Running);
    with_timeout(engine.run_pass(&jobs, PassOptions::default())).await?;
    assert_eq!(
        project.tracker.get_status(&jobs[0].id, "compute")?.status,
        Status::Active
    );

    // j1 wrote its output, j2 did not.
    project.touch("j1", "out.txt");
    queue.set_state(&h1, QueueState::Finished);
    queue.set_state(&h2, QueueState::Finished);
    let report = with_timeout(engine.run_pass(&jobs, PassOptions::default())).await?;
    assert_eq!(report.summary.completed, 1);
    assert_eq!(report.summary.errored, 1);
    assert_eq!(report.failures[0].key, PairKey::new("j2", "compute"));
    assert_eq!(report.exit_code(), 1);

    assert_eq!(
        project.tracker.get_status(&jobs[0].id, "compute")?.status,
        Status::Completed
    );
    let failed = project.tracker.get_status(&jobs[1].id, "compute")?;
    assert_eq!(failed.status, Status::Error);
    assert_eq!(queue.submissions().len(), 2);
    Ok(())
}

#[tokio::test]
async fn queue_failure_is_recorded_with_its_message() -> TestResult {
    init_tracing();
    let project = MemoryProject::new();
    let jobs = jobs(&project, &["j1"]);
    let queue = FakeQueueBackend::new();
    let mut engine = Engine::new(compute_graph(), project.tracker.clone(), queue.clone());

    with_timeout(engine.run_pass(&jobs, PassOptions::default())).await?;
    let handle = queue.handle_of("j1", "compute").ok_or("no handle")?;
    queue.set_state(&handle, QueueState::Failed("node failure".to_string()));

    let report = with_timeout(engine.run_pass(&jobs, PassOptions::default())).await?;
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].summary, "node failure");
    let record = project.tracker.get_status(&jobs[0].id, "compute")?;
    assert_eq!(record.status, Status::Error);
    assert_eq!(record.message.as_deref(), Some("node failure"));
    Ok(())
}

#[tokio::test]
async fn forgotten_submission_is_reset_and_resubmitted() -> TestResult {
    init_tracing();
    let project = MemoryProject::new();
    let jobs = jobs(&project, &["j1"]);
    let queue = FakeQueueBackend::new();
    let mut engine = Engine::new(compute_graph(), project.tracker.clone(), queue.clone());

    with_timeout(engine.run_pass(&jobs, PassOptions::default())).await?;
    let first = queue.handle_of("j1", "compute").ok_or("no handle")?;
    assert_eq!(first, SubmissionHandle::new("fake-1"));
    queue.forget(&first);

    let report = with_timeout(engine.run_pass(&jobs, PassOptions::default())).await?;
    assert_eq!(report.summary.submitted, 1);
    assert_eq!(
        queue.submissions(),
        vec![PairKey::new("j1", "compute"), PairKey::new("j1", "compute")]
    );
    let record = project.tracker.get_status(&jobs[0].id, "compute")?;
    assert_eq!(record.status, Status::Submitted);
    assert_eq!(record.handle, Some(SubmissionHandle::new("fake-2")));
    Ok(())
}

#[tokio::test]
async fn forgotten_submission_with_outputs_completes() -> TestResult {
    init_tracing();
    let project = MemoryProject::new();
    let jobs = jobs(&project, &["j1"]);
    let queue = FakeQueueBackend::new();
    let mut engine = Engine::new(compute_graph(), project.tracker.clone(), queue.clone());

    with_timeout(engine.run_pass(&jobs, PassOptions::default())).await?;
    let handle = queue.handle_of("j1", "compute").ok_or("no handle")?;
    queue.forget(&handle);
    project.touch("j1", "out.txt");

    let report = with_timeout(engine.run_pass(&jobs, PassOptions::default())).await?;
    assert_eq!(report.summary.submitted, 0);
    assert_eq!(report.summary.already_done, 1);
    assert_eq!(queue.submissions().len(), 1);
    assert_eq!(
        project.tracker.get_status(&jobs[0].id, "compute")?.status,
        Status::Completed
    );
    Ok(())
}

#[tokio::test]
async fn one_poll_per_handle_per_pass() -> TestResult {
    init_tracing();
    let project = MemoryProject::new();
    let jobs = jobs(&project, &["j1", "j2", "j3"]);
    let queue = FakeQueueBackend::new();
    let mut engine = Engine::new(compute_graph(), project.tracker.clone(), queue.clone());

    with_timeout(engine.run_pass(&jobs, PassOptions::default())).await?;
    assert_eq!(queue.poll_count(), 0);

    with_timeout(engine.run_pass(&jobs, PassOptions::default())).await?;
    assert_eq!(queue.poll_count(), 3);
    Ok(())
}

#[tokio::test]
async fn failed_batch_reverts_claims_to_pending() -> TestResult {
    init_tracing();
    let project = MemoryProject::new();
    let jobs = jobs(&project, &["j1", "j2"]);
    let mut engine = Engine::new(
        compute_graph(),
        project.tracker.clone(),
        FakeLocalBackend::new().failing(),
    );

    let report = with_timeout(engine.run_pass(&jobs, PassOptions::default())).await?;
    assert_eq!(report.summary.submitted, 0);
    assert_eq!(report.summary.reverted, 2);
    assert_eq!(report.exit_code(), 0);
    for job in &jobs {
        let record = project.tracker.get_status(&job.id, "compute")?;
        assert_eq!(record.status, Status::Pending);
        assert_eq!(record.handle, None);
    }
    Ok(())
}

#[tokio::test]
async fn dry_run_plans_without_submitting() -> TestResult {
    init_tracing();
    let project = MemoryProject::new();
    let jobs = jobs(&project, &["j1"]);
    let backend = FakeLocalBackend::new();
    let executed = backend.executed();
    let mut engine = Engine::new(compute_graph(), project.tracker.clone(), backend);

    let report = with_timeout(engine.run_pass(&jobs, PassOptions { dry_run: true })).await?;
    assert!(report.dry_run);
    assert_eq!(report.planned, vec![PairKey::new("j1", "compute")]);
    assert_eq!(report.summary.submitted, 0);
    assert!(executed.lock().unwrap().is_empty());
    assert_eq!(
        project.tracker.get_status(&jobs[0].id, "compute")?.status,
        Status::Eligible
    );

    // A later real pass picks up the eligible pair.
    with_timeout(engine.run_pass(&jobs, PassOptions::default())).await?;
    assert_eq!(executed.lock().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn unconditioned_operation_runs_once_per_job() -> TestResult {
    init_tracing();
    let project = MemoryProject::new();
    let jobs = jobs(&project, &["a", "b"]);
    let graph = OperationGraph::new([OperationDefinition::new("setup").with_cmd("true")])?;
    let backend = FakeLocalBackend::new();
    let executed = backend.executed();
    let mut engine = Engine::new(graph, project.tracker.clone(), backend);

    let first = with_timeout(engine.run_until_idle(&jobs, 10, None)).await?;
    assert_eq!(first.summary.completed, 2);
    let second = with_timeout(engine.run_until_idle(&jobs, 10, None)).await?;
    assert_eq!(second.summary.submitted, 0);
    assert_eq!(second.summary.already_done, 2);
    assert_eq!(
        *executed.lock().unwrap(),
        vec![PairKey::new("a", "setup"), PairKey::new("b", "setup")]
    );
    Ok(())
}

#[tokio::test]
async fn stop_flag_prevents_further_passes() -> TestResult {
    use std::sync::atomic::AtomicBool;

    init_tracing();
    let project = MemoryProject::new();
    let jobs = jobs(&project, &["j1"]);
    let backend = FakeLocalBackend::new();
    let executed = backend.executed();
    let mut engine = Engine::new(compute_graph(), project.tracker.clone(), backend);

    let stop = AtomicBool::new(true);
    let report = with_timeout(engine.run_until_idle(&jobs, 10, Some(&stop))).await?;
    assert_eq!(report.passes, 0);
    assert!(executed.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test]
async fn claim_without_handle_waits_for_an_explicit_reset() -> TestResult {
    init_tracing();
    let project = MemoryProject::new();
    let jobs = jobs(&project, &["j1"]);
    let id = &jobs[0].id;

    // Another run claimed the pair and has not reported back yet.
    project.tracker.transition(id, "compute", Status::Eligible, None)?;
    project.tracker.transition(id, "compute", Status::Submitted, None)?;

    let fs = project.fs.clone();
    let backend = FakeLocalBackend::new().with_on_run(move |unit| {
        fs.add_file(unit.job.workspace.join("out.txt"), "done");
        jobflow::exec::SubmissionOutcome::Completed
    });
    let executed = backend.executed();
    let mut engine = Engine::new(compute_graph(), project.tracker.clone(), backend);

    let report = with_timeout(engine.run_until_idle(&jobs, 10, None)).await?;
    assert_eq!(report.summary.submitted, 0);
    assert_eq!(report.summary.conflicting, 1);
    assert!(executed.lock().unwrap().is_empty());
    assert_eq!(project.tracker.get_status(id, "compute")?.status, Status::Submitted);

    // The owner is known to be gone: release the pair by hand.
    project.tracker.reset(id, "compute")?;
    let report = with_timeout(engine.run_pass(&jobs, PassOptions::default())).await?;
    assert_eq!(report.summary.completed, 1);
    assert_eq!(executed.lock().unwrap().len(), 1);
    assert_eq!(project.tracker.get_status(id, "compute")?.status, Status::Completed);
    Ok(())
}

#[tokio::test]
async fn unreachable_queue_never_causes_a_resubmission() -> TestResult {
    init_tracing();
    let project = MemoryProject::new();
    let jobs = jobs(&project, &["j1"]);
    let queue = FakeQueueBackend::new();
    let mut engine = Engine::new(compute_graph(), project.tracker.clone(), queue.clone());

    with_timeout(engine.run_pass(&jobs, PassOptions::default())).await?;
    let handle = queue.handle_of("j1", "compute").ok_or("no handle")?;

    queue.set_unreachable(true);
    for _ in 0..2 {
        let report = with_timeout(engine.run_pass(&jobs, PassOptions::default())).await?;
        assert_eq!(report.summary.submitted, 0);
        assert_eq!(report.summary.conflicting, 1);
    }
    assert_eq!(queue.submissions().len(), 1);
    let record = project.tracker.get_status(&jobs[0].id, "compute")?;
    assert_eq!(record.status, Status::Submitted);
    assert_eq!(record.handle, Some(handle.clone()));

    // Back online: the original submission is followed as usual.
    queue.set_unreachable(false);
    queue.set_state(&handle, QueueState::Running);
    with_timeout(engine.run_pass(&jobs, PassOptions::default())).await?;
    assert_eq!(
        project.tracker.get_status(&jobs[0].id, "compute")?.status,
        Status::Active
    );
    assert_eq!(queue.submissions().len(), 1);
    Ok(())
}

#[tokio::test]
async fn dry_run_does_not_poll_or_reset_submissions() -> TestResult {
    init_tracing();
    let project = MemoryProject::new();
    let jobs = jobs(&project, &["j1"]);
    let queue = FakeQueueBackend::new();
    let mut engine = Engine::new(compute_graph(), project.tracker.clone(), queue.clone());

    with_timeout(engine.run_pass(&jobs, PassOptions::default())).await?;
    let handle = queue.handle_of("j1", "compute").ok_or("no handle")?;
    queue.forget(&handle);

    let report = with_timeout(engine.run_pass(&jobs, PassOptions { dry_run: true })).await?;
    assert_eq!(queue.poll_count(), 0);
    assert_eq!(report.summary.conflicting, 1);
    let record = project.tracker.get_status(&jobs[0].id, "compute")?;
    assert_eq!(record.status, Status::Submitted);
    assert_eq!(record.handle, Some(handle));
    Ok(())
}
