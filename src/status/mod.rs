// src/status/mod.rs

//! Per (job, operation) lifecycle tracking.
//!
//! - [`record`] defines [`Status`], its transition table, and the persisted
//!   [`RunRecord`].
//! - [`tracker`] applies validated, atomic transitions against a job store.

pub mod record;
pub mod tracker;

pub use record::{RunRecord, Status};
pub use tracker::{STATUS_NAMESPACE, StatusTracker, Swap};
