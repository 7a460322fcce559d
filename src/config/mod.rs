// src/config/mod.rs

//! Project file loading and validation.
//!
//! - [`model`] defines the TOML-backed data model.
//! - [`loader`] reads a project file from disk.
//! - [`validate`] turns a raw file into a [`ConfigFile`], rejecting bad
//!   backends, directives and operation graphs.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    BackendSection, ConditionSpec, ConfigFile, OperationConfig, ProjectSection, RawConfigFile,
};
pub use validate::validate_config;
