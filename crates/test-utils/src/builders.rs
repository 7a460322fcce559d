#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use jobflow::config::{
    BackendSection, ConditionSpec, ConfigFile, OperationConfig, ProjectSection, RawConfigFile,
};
use jobflow::directives::Directives;
use jobflow::types::BackendKind;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                project: ProjectSection::default(),
                backend: BackendSection::default(),
                operation: BTreeMap::new(),
            },
        }
    }

    pub fn with_operation(mut self, name: &str, op: OperationConfig) -> Self {
        self.config.operation.insert(name.to_string(), op);
        self
    }

    pub fn with_workspace(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.project.workspace = dir.into();
        self
    }

    pub fn with_backend_kind(mut self, kind: BackendKind) -> Self {
        self.config.backend.kind = kind;
        self
    }

    pub fn with_queue_commands(mut self, submit: &str, poll: &str) -> Self {
        self.config.backend.kind = BackendKind::Queued;
        self.config.backend.submit_cmd = Some(submit.to_string());
        self.config.backend.poll_cmd = Some(poll.to_string());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `OperationConfig`.
pub struct OperationConfigBuilder {
    op: OperationConfig,
}

impl OperationConfigBuilder {
    pub fn new() -> Self {
        Self {
            op: OperationConfig::default(),
        }
    }

    pub fn cmd(mut self, cmd: &str) -> Self {
        self.op.cmd = Some(cmd.to_string());
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.op.after.push(dep.to_string());
        self
    }

    pub fn pre_file(mut self, path: &str) -> Self {
        self.op.pre.push(ConditionSpec::FileExists(path.into()));
        self
    }

    pub fn post_file(mut self, path: &str) -> Self {
        self.op.post.push(ConditionSpec::FileExists(path.into()));
        self
    }

    pub fn pre(mut self, spec: ConditionSpec) -> Self {
        self.op.pre.push(spec);
        self
    }

    pub fn post(mut self, spec: ConditionSpec) -> Self {
        self.op.post.push(spec);
        self
    }

    pub fn directives(mut self, directives: Directives) -> Self {
        self.op.directives = directives;
        self
    }

    pub fn build(self) -> OperationConfig {
        self.op
    }
}

impl Default for OperationConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
