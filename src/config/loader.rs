// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Read and deserialize a project file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a project file and validate it.
///
/// A relative `[project].workspace` is resolved against the directory the
/// file lives in, so `jobflow --config sub/jobflow.toml` works from anywhere.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let raw_config = load_from_path(path)?;
    let config = ConfigFile::try_from(raw_config)?;

    let base = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let config = config.with_base_dir(base);
    debug!(
        path = %path.display(),
        operations = config.operation.len(),
        workspace = %config.workspace().display(),
        "loaded project config"
    );
    Ok(config)
}

/// `jobflow.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("jobflow.toml")
}
