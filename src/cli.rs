// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `jobflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "jobflow",
    version,
    about = "Run the operations of a research project whose conditions are met.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the project file (TOML).
    #[arg(long, value_name = "PATH", default_value = "jobflow.toml", global = true)]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `JOBFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    /// Print full failure detail instead of one line per error.
    #[arg(long, global = true)]
    pub debug: bool,

    /// Restrict to these job ids (repeatable). Default: all jobs.
    #[arg(long = "job", value_name = "ID", global = true)]
    pub jobs: Vec<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Plan and submit eligible operations (the default).
    Run {
        /// Run exactly one pass, even with the local backend.
        #[arg(long)]
        once: bool,

        /// Upper bound on passes with the local backend.
        #[arg(long, value_name = "N", default_value_t = 100)]
        max_passes: usize,
    },

    /// Show what would run, without polling or submitting anything.
    ///
    /// Eligibility and observed completions are still recorded.
    Plan,

    /// Print the status of every (job, operation) pair.
    Status,

    /// Put a pair back to `pending` so it is retried.
    Reset {
        /// Operation name.
        #[arg(long = "op", value_name = "NAME")]
        operation: String,

        /// Apply to every job when no `--job` is given.
        #[arg(long)]
        all: bool,
    },

    /// Mark a pair completed by hand (for operations without post-conditions).
    MarkCompleted {
        /// Operation name.
        #[arg(long = "op", value_name = "NAME")]
        operation: String,

        /// Apply to every job when no `--job` is given.
        #[arg(long)]
        all: bool,
    },
}

impl Default for Command {
    fn default() -> Self {
        Command::Run {
            once: false,
            max_passes: 100,
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
