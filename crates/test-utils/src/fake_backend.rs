use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use jobflow::dag::{PairKey, WorkUnit};
use jobflow::errors::{FlowError, Result};
use jobflow::exec::{
    BatchOutcome, QueueState, SubmissionBackend, SubmissionHandle, SubmissionOutcome,
};
use jobflow::types::BackendKind;

type RunHook = Arc<dyn Fn(&WorkUnit) -> SubmissionOutcome + Send + Sync>;

/// A fake local backend that:
/// - records which pairs were "run"
/// - reports `Completed` for each unit, or whatever the `on_run` hook says.
///
/// The hook is where tests stage the files a real command would produce.
#[derive(Clone, Default)]
pub struct FakeLocalBackend {
    executed: Arc<Mutex<Vec<PairKey>>>,
    on_run: Option<RunHook>,
    fail_batches: bool,
}

impl FakeLocalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_on_run(
        mut self,
        hook: impl Fn(&WorkUnit) -> SubmissionOutcome + Send + Sync + 'static,
    ) -> Self {
        self.on_run = Some(Arc::new(hook));
        self
    }

    /// Every `submit` fails as a whole.
    pub fn failing(mut self) -> Self {
        self.fail_batches = true;
        self
    }

    /// Shared log of executed pairs; stays valid after the backend moved into
    /// an engine.
    pub fn executed(&self) -> Arc<Mutex<Vec<PairKey>>> {
        Arc::clone(&self.executed)
    }
}

impl SubmissionBackend for FakeLocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn submit(
        &mut self,
        batch: Vec<WorkUnit>,
    ) -> Pin<Box<dyn Future<Output = Result<BatchOutcome>> + Send + '_>> {
        let executed = Arc::clone(&self.executed);
        let on_run = self.on_run.clone();
        let fail = self.fail_batches;

        Box::pin(async move {
            if fail {
                return Err(FlowError::Submission("fake backend is down".to_string()));
            }
            let mut outcomes = BatchOutcome::new();
            for unit in batch {
                executed.lock().unwrap().push(unit.key());
                let outcome = match &on_run {
                    Some(hook) => hook(&unit),
                    None => SubmissionOutcome::Completed,
                };
                outcomes.insert(unit.key(), outcome);
            }
            Ok(outcomes)
        })
    }

    fn poll<'a>(
        &'a mut self,
        handle: &'a SubmissionHandle,
    ) -> Pin<Box<dyn Future<Output = Result<QueueState>> + Send + 'a>> {
        Box::pin(async move {
            Err(FlowError::Other(anyhow::anyhow!(
                "fake local backend cannot poll {handle}"
            )))
        })
    }
}

/// A fake cluster queue: every unit gets its own handle in state `Queued`,
/// and tests move handles through states with [`set_state`](Self::set_state).
#[derive(Clone, Default)]
pub struct FakeQueueBackend {
    next_id: Arc<Mutex<u64>>,
    states: Arc<Mutex<HashMap<SubmissionHandle, QueueState>>>,
    handles: Arc<Mutex<HashMap<PairKey, SubmissionHandle>>>,
    submissions: Arc<Mutex<Vec<PairKey>>>,
    polls: Arc<Mutex<usize>>,
    unreachable: Arc<Mutex<bool>>,
}

impl FakeQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle of the latest submission of a pair.
    pub fn handle_of(&self, job: &str, operation: &str) -> Option<SubmissionHandle> {
        self.handles
            .lock()
            .unwrap()
            .get(&PairKey::new(job, operation))
            .cloned()
    }

    pub fn set_state(&self, handle: &SubmissionHandle, state: QueueState) {
        self.states.lock().unwrap().insert(handle.clone(), state);
    }

    /// Forget a submission, as a queue does once a job leaves its history.
    pub fn forget(&self, handle: &SubmissionHandle) {
        self.states.lock().unwrap().remove(handle);
    }

    /// While set, every poll fails, like a scheduler controller that is
    /// restarting.
    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock().unwrap() = unreachable;
    }

    /// Every pair ever submitted, in order.
    pub fn submissions(&self) -> Vec<PairKey> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn poll_count(&self) -> usize {
        *self.polls.lock().unwrap()
    }
}

impl SubmissionBackend for FakeQueueBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Queued
    }

    fn submit(
        &mut self,
        batch: Vec<WorkUnit>,
    ) -> Pin<Box<dyn Future<Output = Result<BatchOutcome>> + Send + '_>> {
        Box::pin(async move {
            let mut outcomes = BatchOutcome::new();
            for unit in batch {
                let handle = {
                    let mut next = self.next_id.lock().unwrap();
                    *next += 1;
                    SubmissionHandle::new(format!("fake-{}", *next))
                };
                self.states
                    .lock()
                    .unwrap()
                    .insert(handle.clone(), QueueState::Queued);
                self.handles
                    .lock()
                    .unwrap()
                    .insert(unit.key(), handle.clone());
                self.submissions.lock().unwrap().push(unit.key());
                outcomes.insert(unit.key(), SubmissionOutcome::Queued(handle));
            }
            Ok(outcomes)
        })
    }

    fn poll<'a>(
        &'a mut self,
        handle: &'a SubmissionHandle,
    ) -> Pin<Box<dyn Future<Output = Result<QueueState>> + Send + 'a>> {
        Box::pin(async move {
            *self.polls.lock().unwrap() += 1;
            if *self.unreachable.lock().unwrap() {
                return Err(FlowError::Other(anyhow::anyhow!(
                    "queue controller unreachable"
                )));
            }
            Ok(self
                .states
                .lock()
                .unwrap()
                .get(handle)
                .cloned()
                .unwrap_or(QueueState::Unknown))
        })
    }
}
