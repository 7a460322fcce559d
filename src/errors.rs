// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::status::Status;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// The prerequisite edges of the project contain a cycle.
    #[error("cyclic dependency between operations: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// A prerequisite names an operation the project does not define.
    #[error("operation '{operation}' requires unknown operation '{missing}'")]
    UnknownOperation { operation: String, missing: String },

    /// A status change that the run-record state machine does not allow.
    #[error("invalid transition for job {job}, operation '{operation}': {from} -> {to}")]
    InvalidTransition {
        job: String,
        operation: String,
        from: Status,
        to: Status,
    },

    /// A pre- or post-condition failed to evaluate.
    #[error("condition {condition} of operation '{operation}' failed for job {job}: {message}")]
    ConditionEvaluation {
        job: String,
        operation: String,
        condition: String,
        message: String,
    },

    /// The submission backend rejected a batch as a whole.
    #[error("submission failed: {0}")]
    Submission(String),

    #[error("invalid directive '{name}': {message}")]
    Directive { name: String, message: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FlowError {
    /// Errors that reject the project definition before anything is scheduled.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            FlowError::Config(_)
                | FlowError::CyclicDependency { .. }
                | FlowError::UnknownOperation { .. }
                | FlowError::Directive { .. }
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FlowError>;
