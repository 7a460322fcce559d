// src/lib.rs

pub mod cli;
pub mod condition;
pub mod config;
pub mod dag;
pub mod directives;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod job;
pub mod logging;
pub mod status;
pub mod types;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use tracing::{debug, info};

use crate::cli::{CliArgs, Command};
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::OperationGraph;
use crate::engine::{Engine, PassOptions};
use crate::exec::{LocalBackend, ShellQueueBackend, SubmissionBackend};
use crate::fs::{FileSystem, RealFileSystem};
use crate::job::{FsJobStore, Job, JobId, JobStore};
use crate::status::StatusTracker;
use crate::types::BackendKind;

/// High-level entry point used by `main.rs`.
///
/// Returns the process exit code: 0 for a clean pass, 1 when a pair entered
/// `error`. Fatal problems (config, graph, store) are returned as errors.
pub async fn run(args: CliArgs) -> Result<i32> {
    let cfg = load_and_validate(&args.config)?;
    let graph = OperationGraph::from_config(&cfg)?;

    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let store: Arc<dyn JobStore> = Arc::new(FsJobStore::new(cfg.workspace(), fs));
    let tracker = Arc::new(StatusTracker::new(Arc::clone(&store)));
    let jobs = select_jobs(store.as_ref(), &args.jobs)?;
    info!(jobs = jobs.len(), operations = graph.len(), "project loaded");

    match args.command.clone().unwrap_or_default() {
        Command::Run { once, max_passes } => {
            let mut engine = Engine::new(graph, tracker, build_backend(&cfg)?);

            // Ctrl-C → finish the current pass, start no new one.
            let stop = Arc::new(AtomicBool::new(false));
            {
                let stop = Arc::clone(&stop);
                tokio::spawn(async move {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        eprintln!("failed to listen for Ctrl+C: {e}");
                        return;
                    }
                    stop.store(true, Ordering::SeqCst);
                });
            }

            let report = if once {
                engine.run_pass(&jobs, PassOptions::default()).await?
            } else {
                engine.run_until_idle(&jobs, max_passes, Some(&stop)).await?
            };
            print!("{}", report.render(args.debug));
            Ok(report.exit_code())
        }
        Command::Plan => {
            let mut engine = Engine::new(graph, tracker, build_backend(&cfg)?);
            let report = engine
                .run_pass(&jobs, PassOptions { dry_run: true })
                .await?;
            print!("{}", report.render(args.debug));
            Ok(report.exit_code())
        }
        Command::Status => {
            print_status(&graph, &tracker, &jobs)?;
            Ok(0)
        }
        Command::Reset { operation, all } => {
            graph.require(&operation)?;
            ensure_targeted(&args, all)?;
            for job in &jobs {
                let before = tracker.get_status(&job.id, &operation)?;
                tracker.reset(&job.id, &operation)?;
                println!("{}/{}: {} -> pending", job.id, operation, before.status);
            }
            Ok(0)
        }
        Command::MarkCompleted { operation, all } => {
            graph.require(&operation)?;
            ensure_targeted(&args, all)?;
            for job in &jobs {
                let before = tracker.get_status(&job.id, &operation)?;
                tracker.mark_completed(&job.id, &operation)?;
                println!("{}/{}: {} -> completed", job.id, operation, before.status);
            }
            Ok(0)
        }
    }
}

/// Backend selected by `[backend].kind`.
pub fn build_backend(cfg: &ConfigFile) -> Result<Box<dyn SubmissionBackend>> {
    let backend: Box<dyn SubmissionBackend> = match cfg.backend.kind {
        BackendKind::Local => Box::new(LocalBackend::new(cfg.backend.parallelism)),
        BackendKind::Queued => Box::new(ShellQueueBackend::from_config(&cfg.backend)?),
    };
    debug!(kind = ?cfg.backend.kind, "submission backend ready");
    Ok(backend)
}

/// All jobs, or the ones named with `--job`, in the order given.
fn select_jobs(store: &dyn JobStore, ids: &[String]) -> Result<Vec<Job>> {
    if ids.is_empty() {
        return Ok(store.jobs()?);
    }
    let mut jobs = Vec::with_capacity(ids.len());
    for id in ids {
        jobs.push(store.job(&JobId::new(id.as_str()))?);
    }
    Ok(jobs)
}

fn ensure_targeted(args: &CliArgs, all: bool) -> Result<()> {
    if args.jobs.is_empty() && !all {
        bail!("select jobs with --job <ID> or pass --all");
    }
    Ok(())
}

/// One line per (job, operation) pair, operations in topological order.
fn print_status(graph: &OperationGraph, tracker: &StatusTracker, jobs: &[Job]) -> Result<()> {
    let width = graph
        .topological_order()
        .iter()
        .map(String::len)
        .max()
        .unwrap_or(0);

    for job in jobs {
        println!("{}", job.id);
        for op in graph.topological_order() {
            let record = tracker.get_status(&job.id, op)?;
            let mut line = format!("  {op:<width$}  {:<9}  {}", record.status, record.updated_at.to_rfc3339());
            if let Some(handle) = &record.handle {
                line.push_str(&format!("  handle={handle}"));
            }
            if let Some(message) = &record.message {
                line.push_str(&format!("  {}", message.lines().next().unwrap_or_default()));
            }
            println!("{line}");
        }
    }
    Ok(())
}
