// src/exec/queue.rs

//! Cluster queue backend driven by shell commands.
//!
//! Units are grouped into bundles. Each bundle becomes one shell script that
//! is piped to `submit_cmd` (e.g. `sbatch --parsable`); the first line the
//! command prints is the submission handle. `poll_cmd` is run with `{handle}`
//! substituted and its output mapped to a [`QueueState`].
//!
//! A submission only counts as gone when the poll command says so by
//! printing `UNKNOWN` (or `NOT_FOUND`). A poll command that fails, or prints
//! nothing it recognises, leaves the record alone until a later pass.
//!
//! The aggregated directives of a bundle are exported to the submit command
//! as `JOBFLOW_*` environment variables, so a wrapper script can translate
//! them into scheduler flags.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use anyhow::{Context, anyhow};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::model::BackendSection;
use crate::dag::WorkUnit;
use crate::directives::Directives;
use crate::errors::{FlowError, Result};
use crate::exec::backend::{
    BatchOutcome, QueueState, SubmissionBackend, SubmissionHandle, SubmissionOutcome,
};
use crate::types::{Aggregation, BackendKind};

#[derive(Debug, Clone)]
pub struct ShellQueueBackend {
    submit_cmd: String,
    poll_cmd: String,
    bundle_size: usize,
    aggregation: Aggregation,
}

impl ShellQueueBackend {
    pub fn new(submit_cmd: impl Into<String>, poll_cmd: impl Into<String>) -> Self {
        Self {
            submit_cmd: submit_cmd.into(),
            poll_cmd: poll_cmd.into(),
            bundle_size: 1,
            aggregation: Aggregation::Serial,
        }
    }

    pub fn with_bundle_size(mut self, bundle_size: usize) -> Self {
        self.bundle_size = bundle_size.max(1);
        self
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Build from a validated `[backend]` section.
    pub fn from_config(cfg: &BackendSection) -> Result<Self> {
        let (Some(submit), Some(poll)) = (cfg.submit_cmd.as_deref(), cfg.poll_cmd.as_deref())
        else {
            return Err(FlowError::Config(
                "queued backend needs both `submit_cmd` and `poll_cmd`".to_string(),
            ));
        };
        let aggregation = if cfg.parallel_bundles {
            Aggregation::Parallel
        } else {
            Aggregation::Serial
        };
        Ok(Self::new(submit, poll)
            .with_bundle_size(cfg.bundle_size)
            .with_aggregation(aggregation))
    }

    async fn submit_bundle(&self, bundle: &[WorkUnit]) -> anyhow::Result<BundleResult> {
        let script = render_script(bundle, self.aggregation);
        let directives = Directives::aggregate_all(bundle.iter().map(|u| &u.directives), self.aggregation)
            .unwrap_or_default();

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.submit_cmd)
            .envs(directives.to_env())
            .env("JOBFLOW_BUNDLE_SIZE", bundle.len().to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning submit command `{}`", self.submit_cmd))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(script.as_bytes())
                .await
                .context("writing bundle script to submit command")?;
        }

        let output = child
            .wait_with_output()
            .await
            .context("waiting for submit command")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Ok(BundleResult::Rejected(format!(
                "submit command exited with code {}: {stderr}",
                output.status.code().unwrap_or(-1)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
            Some(id) => Ok(BundleResult::Queued(SubmissionHandle::new(id))),
            None => Ok(BundleResult::Rejected(
                "submit command printed no handle".to_string(),
            )),
        }
    }
}

enum BundleResult {
    Queued(SubmissionHandle),
    Rejected(String),
}

impl SubmissionBackend for ShellQueueBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Queued
    }

    fn submit(
        &mut self,
        batch: Vec<WorkUnit>,
    ) -> Pin<Box<dyn Future<Output = Result<BatchOutcome>> + Send + '_>> {
        Box::pin(async move {
            let mut outcomes = BatchOutcome::new();

            for bundle in batch.chunks(self.bundle_size) {
                let outcome = match self.submit_bundle(bundle).await {
                    Ok(BundleResult::Queued(handle)) => {
                        info!(handle = %handle, units = bundle.len(), "bundle submitted");
                        SubmissionOutcome::Queued(handle)
                    }
                    Ok(BundleResult::Rejected(reason)) => {
                        warn!(units = bundle.len(), reason = %reason, "bundle rejected");
                        SubmissionOutcome::Rejected(reason)
                    }
                    // Nothing accepted yet: fail the batch as a whole.
                    Err(err) if outcomes.is_empty() => {
                        return Err(FlowError::Submission(format!("{err:#}")));
                    }
                    Err(err) => {
                        warn!(error = %err, units = bundle.len(), "bundle could not be submitted");
                        SubmissionOutcome::Rejected(format!("{err:#}"))
                    }
                };
                for unit in bundle {
                    outcomes.insert(unit.key(), outcome.clone());
                }
            }

            Ok(outcomes)
        })
    }

    fn poll<'a>(
        &'a mut self,
        handle: &'a SubmissionHandle,
    ) -> Pin<Box<dyn Future<Output = Result<QueueState>> + Send + 'a>> {
        Box::pin(async move {
            let cmd = self.poll_cmd.replace("{handle}", &shell_quote(handle.as_str()));
            let output = Command::new("sh")
                .arg("-c")
                .arg(&cmd)
                .stdin(Stdio::null())
                .output()
                .await
                .with_context(|| format!("running poll command `{cmd}`"))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                return Err(FlowError::Other(anyhow!(
                    "poll command for {handle} exited with code {}: {stderr}",
                    output.status.code().unwrap_or(-1)
                )));
            }
            let stdout = String::from_utf8_lossy(&output.stdout);
            parse_queue_state(&stdout).ok_or_else(|| {
                FlowError::Other(anyhow!(
                    "poll command for {handle} printed no known state: {:?}",
                    stdout.trim()
                ))
            })
        })
    }
}

/// Map the first non-empty line printed by a poll command.
///
/// Accepts both plain words and the long/short state names printed by common
/// cluster schedulers. `None` when there is nothing recognisable.
pub fn parse_queue_state(output: &str) -> Option<QueueState> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let word = line
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();

    let state = match word.as_str() {
        "pending" | "queued" | "pd" | "configuring" | "cf" | "held" | "h" => QueueState::Queued,
        "running" | "r" | "completing" | "cg" => QueueState::Running,
        "completed" | "cd" | "done" | "finished" => QueueState::Finished,
        "failed" | "f" | "cancelled" | "ca" | "timeout" | "to" | "node_fail" | "nf"
        | "out_of_memory" | "oom" | "boot_fail" | "bf" | "preempted" | "pr" => {
            QueueState::Failed(line.to_string())
        }
        "unknown" | "not_found" | "notfound" => QueueState::Unknown,
        other => {
            debug!(state = %other, "unrecognised queue state");
            return None;
        }
    };
    Some(state)
}

/// Shell script running every unit of a bundle.
fn render_script(bundle: &[WorkUnit], aggregation: Aggregation) -> String {
    let mut script = String::from("#!/bin/sh\n");
    script.push_str(&format!("# jobflow bundle: {} operation(s)\n", bundle.len()));

    for unit in bundle {
        let Some(cmd) = unit.cmd.as_deref() else {
            script.push_str(&format!("# {}: no command\n", unit.key()));
            continue;
        };
        script.push_str(&format!(
            "(cd {} && JOBFLOW_JOB_ID={} JOBFLOW_OPERATION={} {} -c {})",
            shell_quote(&unit.job.workspace.to_string_lossy()),
            shell_quote(unit.job.id.as_str()),
            shell_quote(&unit.operation),
            shell_quote(&unit.directives.executable),
            shell_quote(cmd),
        ));
        if aggregation == Aggregation::Parallel {
            script.push_str(" &");
        }
        script.push('\n');
    }

    if aggregation == Aggregation::Parallel {
        script.push_str("wait\n");
    }
    script
}

fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}
