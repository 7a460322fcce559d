// src/directives.rs

//! Per-operation resource requests.
//!
//! Directives describe what an operation needs from the machine it runs on.
//! They are validated when the project is loaded, aggregated when several
//! units share one queue submission, and exported to the submitted process
//! as environment variables.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{FlowError, Result};
use crate::types::Aggregation;

const ENV_PREFIX: &str = "JOBFLOW_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Directives {
    /// Processes requested. Superseded by `nranks * omp_num_threads` when
    /// either of those is set.
    pub np: u32,
    pub ngpu: u32,
    /// MPI ranks.
    pub nranks: u32,
    pub omp_num_threads: u32,
    /// Shell used to run the operation command (`<executable> -c <cmd>`).
    pub executable: String,
    /// Hours.
    pub walltime: f64,
    /// Gigabytes.
    pub memory: f64,
    pub processor_fraction: f64,
    /// Backend-specific items, passed through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for Directives {
    fn default() -> Self {
        Self {
            np: 1,
            ngpu: 0,
            nranks: 0,
            omp_num_threads: 0,
            executable: "sh".to_string(),
            walltime: 12.0,
            memory: 4.0,
            processor_fraction: 1.0,
            extra: BTreeMap::new(),
        }
    }
}

impl Directives {
    pub fn validate(&self) -> Result<()> {
        if self.np < 1 {
            return Err(invalid("np", "must be at least 1"));
        }
        if self.executable.trim().is_empty() {
            return Err(invalid("executable", "must not be empty"));
        }
        if !(self.walltime > 0.0) {
            return Err(invalid("walltime", format!("must be positive, got {}", self.walltime)));
        }
        if !(self.memory > 0.0) {
            return Err(invalid("memory", format!("must be positive, got {}", self.memory)));
        }
        if !(self.processor_fraction > 0.0 && self.processor_fraction <= 1.0) {
            return Err(invalid(
                "processor_fraction",
                format!("must be in (0, 1], got {}", self.processor_fraction),
            ));
        }
        Ok(())
    }

    /// Combine with the directives of another unit in the same bundle.
    ///
    /// Serial bundles run one unit after the other, so only walltime adds up.
    /// Parallel bundles run side by side, so resources add up and walltime is
    /// the longest one. `executable`, `processor_fraction` and extra items
    /// keep the first unit's value.
    pub fn aggregate(&self, other: &Directives, mode: Aggregation) -> Directives {
        let mut extra = other.extra.clone();
        extra.extend(self.extra.clone());

        match mode {
            Aggregation::Serial => Directives {
                np: self.np.max(other.np),
                ngpu: self.ngpu.max(other.ngpu),
                nranks: self.nranks.max(other.nranks),
                omp_num_threads: self.omp_num_threads.max(other.omp_num_threads),
                executable: self.executable.clone(),
                walltime: self.walltime + other.walltime,
                memory: self.memory.max(other.memory),
                processor_fraction: self.processor_fraction,
                extra,
            },
            Aggregation::Parallel => Directives {
                np: self.np + other.np,
                ngpu: self.ngpu + other.ngpu,
                nranks: self.nranks + other.nranks,
                omp_num_threads: self.omp_num_threads + other.omp_num_threads,
                executable: self.executable.clone(),
                walltime: self.walltime.max(other.walltime),
                memory: self.memory + other.memory,
                processor_fraction: self.processor_fraction,
                extra,
            },
        }
    }

    /// Fold a bundle; `None` for an empty bundle.
    pub fn aggregate_all<'a>(
        items: impl IntoIterator<Item = &'a Directives>,
        mode: Aggregation,
    ) -> Option<Directives> {
        let mut items = items.into_iter();
        let first = items.next()?.clone();
        Some(items.fold(first, |acc, d| acc.aggregate(d, mode)))
    }

    /// Processes actually requested.
    pub fn finalized_np(&self) -> u32 {
        if self.nranks > 0 || self.omp_num_threads > 0 {
            self.nranks.max(1) * self.omp_num_threads.max(1)
        } else {
            self.np
        }
    }

    /// Environment exported to submitted work.
    pub fn to_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            (format!("{ENV_PREFIX}NP"), self.finalized_np().to_string()),
            (format!("{ENV_PREFIX}NGPU"), self.ngpu.to_string()),
            (format!("{ENV_PREFIX}NRANKS"), self.nranks.to_string()),
            (format!("{ENV_PREFIX}WALLTIME"), self.walltime.to_string()),
            (format!("{ENV_PREFIX}MEMORY"), self.memory.to_string()),
            (
                format!("{ENV_PREFIX}PROCESSOR_FRACTION"),
                self.processor_fraction.to_string(),
            ),
        ];
        if self.omp_num_threads > 0 {
            env.push(("OMP_NUM_THREADS".to_string(), self.omp_num_threads.to_string()));
        }
        for (key, value) in &self.extra {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            env.push((format!("{ENV_PREFIX}{}", key.to_uppercase()), rendered));
        }
        env
    }
}

fn invalid(name: &str, message: impl Into<String>) -> FlowError {
    FlowError::Directive {
        name: name.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn busy() -> Directives {
        Directives {
            np: 4,
            ngpu: 10,
            nranks: 5,
            omp_num_threads: 20,
            executable: "Non Default Path".to_string(),
            walltime: 64.0,
            memory: 32.0,
            processor_fraction: 0.5,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn defaults_are_valid() {
        let d = Directives::default();
        assert_eq!(d.np, 1);
        assert_eq!(d.walltime, 12.0);
        assert_eq!(d.memory, 4.0);
        d.validate().unwrap();
    }

    #[test]
    fn validation_rejects_out_of_range_values() {
        let cases = [
            Directives { np: 0, ..Default::default() },
            Directives { walltime: 0.0, ..Default::default() },
            Directives { memory: -1.0, ..Default::default() },
            Directives { processor_fraction: 1.5, ..Default::default() },
            Directives { processor_fraction: 0.0, ..Default::default() },
            Directives { executable: " ".into(), ..Default::default() },
        ];
        for d in cases {
            assert!(matches!(d.validate(), Err(FlowError::Directive { .. })), "{d:?}");
        }
    }

    #[test]
    fn serial_aggregation_adds_walltime_only() {
        let d = busy().aggregate(&busy(), Aggregation::Serial);
        assert_eq!(d.finalized_np(), 100);
        assert_eq!(d.ngpu, 10);
        assert_eq!(d.nranks, 5);
        assert_eq!(d.omp_num_threads, 20);
        assert_eq!(d.executable, "Non Default Path");
        assert_eq!(d.walltime, 128.0);
        assert_eq!(d.memory, 32.0);
        assert_eq!(d.processor_fraction, 0.5);
    }

    #[test]
    fn parallel_aggregation_adds_resources() {
        let d = busy().aggregate(&busy(), Aggregation::Parallel);
        assert_eq!(d.finalized_np(), 400);
        assert_eq!(d.ngpu, 20);
        assert_eq!(d.nranks, 10);
        assert_eq!(d.omp_num_threads, 40);
        assert_eq!(d.walltime, 64.0);
        assert_eq!(d.memory, 64.0);
        assert_eq!(d.processor_fraction, 0.5);
    }

    #[test]
    fn aggregation_keeps_first_executable() {
        let a = Directives { executable: "bash".into(), ..Default::default() };
        let b = Directives { executable: "zsh".into(), ..Default::default() };
        let agg = Directives::aggregate_all([&a, &b], Aggregation::Parallel).unwrap();
        assert_eq!(agg.executable, "bash");
        assert!(Directives::aggregate_all([], Aggregation::Serial).is_none());
    }

    #[test]
    fn finalized_np_follows_ranks_and_threads() {
        let mut d = Directives { np: 2, ..Default::default() };
        assert_eq!(d.finalized_np(), 2);
        d.nranks = 2;
        d.omp_num_threads = 4;
        assert_eq!(d.finalized_np(), 8);
        d.omp_num_threads = 0;
        assert_eq!(d.finalized_np(), 2);
    }

    #[test]
    fn extra_items_round_trip_through_toml() {
        let d: Directives = toml::from_str("np = 2\npartition = \"gpu\"").unwrap();
        assert_eq!(d.np, 2);
        assert_eq!(d.extra["partition"], Value::from("gpu"));

        let env = d.to_env();
        assert!(env.contains(&("JOBFLOW_PARTITION".to_string(), "gpu".to_string())));
        assert!(env.contains(&("JOBFLOW_NP".to_string(), "2".to_string())));
    }
}
