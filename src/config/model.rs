// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::condition::Predicate;
use crate::dag::OperationDefinition;
use crate::directives::Directives;
use crate::types::BackendKind;

/// Project file exactly as read from TOML, before validation.
///
/// ```toml
/// [project]
/// workspace = "workspace"
///
/// [backend]
/// kind = "local"
/// parallelism = 4
///
/// [operation.simulate]
/// cmd = "./simulate.sh"
/// pre = [{ file_exists = "input.dat" }]
/// post = [{ file_exists = "output.dat" }]
///
/// [operation.analyze]
/// cmd = "./analyze.sh"
/// after = ["simulate"]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub project: ProjectSection,

    #[serde(default)]
    pub backend: BackendSection,

    /// All operations from `[operation.<name>]`, keyed by name.
    #[serde(default)]
    pub operation: BTreeMap<String, OperationConfig>,
}

/// A project file that passed validation.
///
/// Only constructed through `TryFrom<RawConfigFile>`, so holding one means
/// the operation graph is acyclic, every prerequisite resolves, and the
/// backend and directives are sane.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub project: ProjectSection,
    pub backend: BackendSection,
    pub operation: BTreeMap<String, OperationConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        project: ProjectSection,
        backend: BackendSection,
        operation: BTreeMap<String, OperationConfig>,
    ) -> Self {
        Self {
            project,
            backend,
            operation,
        }
    }

    /// Operation definitions in name order.
    pub fn operation_definitions(&self) -> Vec<OperationDefinition> {
        self.operation
            .iter()
            .map(|(name, cfg)| cfg.to_definition(name))
            .collect()
    }

    /// Resolve a relative workspace against `base` (the config file's
    /// directory).
    pub fn with_base_dir(mut self, base: &Path) -> Self {
        if self.project.workspace.is_relative() {
            self.project.workspace = base.join(&self.project.workspace);
        }
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.project.workspace
    }
}

/// `[project]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectSection {
    /// Directory holding one sub-directory per job.
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,

    #[serde(default)]
    pub name: Option<String>,
}

fn default_workspace() -> PathBuf {
    PathBuf::from("workspace")
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            name: None,
        }
    }
}

/// `[backend]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSection {
    /// `"local"` (default) or `"queued"`.
    #[serde(default)]
    pub kind: BackendKind,

    /// Local processes running at once.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Queued only: reads a bundle script on stdin, prints the handle.
    #[serde(default)]
    pub submit_cmd: Option<String>,

    /// Queued only: prints the state of `{handle}`.
    #[serde(default)]
    pub poll_cmd: Option<String>,

    /// Queued only: units per submission.
    #[serde(default = "default_bundle_size")]
    pub bundle_size: usize,

    /// Queued only: run the units of a bundle side by side.
    #[serde(default)]
    pub parallel_bundles: bool,
}

fn default_parallelism() -> usize {
    1
}

fn default_bundle_size() -> usize {
    1
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            parallelism: default_parallelism(),
            submit_cmd: None,
            poll_cmd: None,
            bundle_size: default_bundle_size(),
            parallel_bundles: false,
        }
    }
}

/// `[operation.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationConfig {
    /// Shell command, run in the job workspace.
    #[serde(default)]
    pub cmd: Option<String>,

    /// Prerequisite operations.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub pre: Vec<ConditionSpec>,

    #[serde(default)]
    pub post: Vec<ConditionSpec>,

    #[serde(default)]
    pub directives: Directives,
}

impl OperationConfig {
    pub fn to_definition(&self, name: &str) -> OperationDefinition {
        OperationDefinition {
            name: name.to_string(),
            cmd: self.cmd.clone(),
            pre: self.pre.iter().map(Predicate::from).collect(),
            post: self.post.iter().map(Predicate::from).collect(),
            after: self.after.clone(),
            directives: self.directives.clone(),
        }
    }
}

/// Condition as written in the project file, e.g. `{ file_exists = "out.dat" }`
/// or `{ doc_equals = { key = "converged", value = true } }`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionSpec {
    FileExists(PathBuf),
    DocKey(String),
    DocEquals { key: String, value: Value },
    Not(Box<ConditionSpec>),
}

impl From<&ConditionSpec> for Predicate {
    fn from(spec: &ConditionSpec) -> Self {
        match spec {
            ConditionSpec::FileExists(path) => Predicate::FileExists(path.clone()),
            ConditionSpec::DocKey(key) => Predicate::DocKey(key.clone()),
            ConditionSpec::DocEquals { key, value } => Predicate::DocEquals {
                key: key.clone(),
                value: value.clone(),
            },
            ConditionSpec::Not(inner) => Predicate::Not(Box::new(Predicate::from(inner.as_ref()))),
        }
    }
}
