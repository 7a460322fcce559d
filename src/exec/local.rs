// src/exec/local.rs

//! Local process backend.
//!
//! Each unit runs as `<executable> -c <cmd>` in its job workspace. Units of a
//! batch run concurrently, bounded by `parallelism`, and the batch resolves
//! once every process has exited.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::dag::WorkUnit;
use crate::errors::{FlowError, Result};
use crate::exec::backend::{
    BatchOutcome, QueueState, SubmissionBackend, SubmissionHandle, SubmissionOutcome,
};
use crate::types::BackendKind;

/// Lines of stderr kept as failure detail.
const STDERR_TAIL: usize = 20;

#[derive(Debug, Clone)]
pub struct LocalBackend {
    parallelism: usize,
}

impl LocalBackend {
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
        }
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SubmissionBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn submit(
        &mut self,
        batch: Vec<WorkUnit>,
    ) -> Pin<Box<dyn Future<Output = Result<BatchOutcome>> + Send + '_>> {
        let limit = Arc::new(Semaphore::new(self.parallelism));

        Box::pin(async move {
            let mut running = JoinSet::new();
            for unit in batch {
                let limit = Arc::clone(&limit);
                running.spawn(async move {
                    let _permit = limit.acquire_owned().await;
                    let outcome = run_unit(&unit).await;
                    (unit.key(), outcome)
                });
            }

            let mut outcomes = BatchOutcome::new();
            while let Some(joined) = running.join_next().await {
                match joined {
                    Ok((key, outcome)) => {
                        outcomes.insert(key, outcome);
                    }
                    // The pair is missing from the outcome and gets reverted.
                    Err(err) => warn!(error = %err, "local runner task did not finish"),
                }
            }
            Ok(outcomes)
        })
    }

    fn poll<'a>(
        &'a mut self,
        handle: &'a SubmissionHandle,
    ) -> Pin<Box<dyn Future<Output = Result<QueueState>> + Send + 'a>> {
        // Handles come from some other backend; this one cannot vouch for
        // them either way.
        Box::pin(async move {
            Err(FlowError::Other(anyhow!(
                "local backend cannot poll submission {handle}"
            )))
        })
    }
}

async fn run_unit(unit: &WorkUnit) -> SubmissionOutcome {
    let Some(cmd) = unit.cmd.as_deref() else {
        debug!(job = %unit.job.id, op = %unit.operation, "operation has no command; nothing to run");
        return SubmissionOutcome::Completed;
    };

    match run_command(unit, cmd).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(
                job = %unit.job.id,
                op = %unit.operation,
                error = %err,
                "operation execution error"
            );
            SubmissionOutcome::Failed(format!("{err:#}"))
        }
    }
}

async fn run_command(unit: &WorkUnit, cmd: &str) -> anyhow::Result<SubmissionOutcome> {
    info!(
        job = %unit.job.id,
        op = %unit.operation,
        cmd = %cmd,
        "starting operation process"
    );

    let mut command = Command::new(&unit.directives.executable);
    command
        .arg("-c")
        .arg(cmd)
        .current_dir(&unit.job.workspace)
        .env("JOBFLOW_JOB_ID", unit.job.id.as_str())
        .env("JOBFLOW_OPERATION", &unit.operation)
        .envs(unit.directives.to_env())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().with_context(|| {
        format!(
            "spawning process for operation '{}' in {}",
            unit.operation,
            unit.job.workspace.display()
        )
    })?;

    // Always drain both pipes so the child never blocks on a full buffer.
    if let Some(stdout) = child.stdout.take() {
        let job = unit.job.id.clone();
        let op = unit.operation.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(job = %job, op = %op, "stdout: {}", line);
            }
        });
    }

    let stderr_tail = child.stderr.take().map(|stderr| {
        let job = unit.job.id.clone();
        let op = unit.operation.clone();
        tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(job = %job, op = %op, "stderr: {}", line);
                if tail.len() == STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail
        })
    });

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of operation '{}'", unit.operation))?;
    let tail = match stderr_tail {
        Some(handle) => handle.await.unwrap_or_default(),
        None => VecDeque::new(),
    };

    let code = status.code().unwrap_or(-1);
    info!(
        job = %unit.job.id,
        op = %unit.operation,
        exit_code = code,
        success = status.success(),
        "operation process exited"
    );

    if status.success() {
        return Ok(SubmissionOutcome::Completed);
    }
    let mut detail = format!("exited with code {code}");
    if !tail.is_empty() {
        detail.push('\n');
        detail.push_str(&Vec::from(tail).join("\n"));
    }
    Ok(SubmissionOutcome::Failed(detail))
}
