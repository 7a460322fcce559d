// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::dag::OperationGraph;
use crate::errors::{FlowError, Result};
use crate::types::BackendKind;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = FlowError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.project, raw.backend, raw.operation))
    }
}

/// Run every check a project file has to pass before anything is scheduled.
pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_operations(cfg)?;
    validate_backend(cfg)?;
    validate_operations(cfg)?;
    validate_graph(cfg)?;
    Ok(())
}

fn ensure_has_operations(cfg: &RawConfigFile) -> Result<()> {
    if cfg.operation.is_empty() {
        return Err(FlowError::Config(
            "config must contain at least one [operation.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_backend(cfg: &RawConfigFile) -> Result<()> {
    let backend = &cfg.backend;
    if backend.parallelism == 0 {
        return Err(FlowError::Config(
            "[backend].parallelism must be >= 1 (got 0)".to_string(),
        ));
    }
    if backend.bundle_size == 0 {
        return Err(FlowError::Config(
            "[backend].bundle_size must be >= 1 (got 0)".to_string(),
        ));
    }
    if backend.kind == BackendKind::Queued {
        for (field, value) in [("submit_cmd", &backend.submit_cmd), ("poll_cmd", &backend.poll_cmd)] {
            if value.as_deref().is_none_or(|v| v.trim().is_empty()) {
                return Err(FlowError::Config(format!(
                    "[backend].{field} is required when kind = \"queued\""
                )));
            }
        }
    }
    Ok(())
}

fn validate_operations(cfg: &RawConfigFile) -> Result<()> {
    for (name, op) in &cfg.operation {
        if name.trim().is_empty() {
            return Err(FlowError::Config("operation names must not be empty".to_string()));
        }
        if op.cmd.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(FlowError::Config(format!(
                "operation '{name}' has an empty `cmd`"
            )));
        }
        op.directives.validate().map_err(|err| match err {
            FlowError::Directive { name: item, message } => FlowError::Directive {
                name: format!("{name}.{item}"),
                message,
            },
            other => other,
        })?;
    }
    Ok(())
}

/// Unknown prerequisites and cycles are reported by graph construction.
fn validate_graph(cfg: &RawConfigFile) -> Result<()> {
    let definitions = cfg
        .operation
        .iter()
        .map(|(name, op)| op.to_definition(name));
    OperationGraph::new(definitions)?;
    Ok(())
}
