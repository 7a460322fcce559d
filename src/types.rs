use std::str::FromStr;

use serde::Deserialize;

/// Which kind of submission backend a project uses.
///
/// - `Local`: operations run as child processes of `jobflow` and their
///   outcome is known when the batch returns.
/// - `Queued`: operations are handed to a cluster queue; the batch returns
///   handles and completion is detected on later passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Queued,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Local
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "queued" => Ok(BackendKind::Queued),
            other => Err(format!(
                "invalid backend kind: {other} (expected \"local\" or \"queued\")"
            )),
        }
    }
}

/// How the resource directives of several operations are combined when they
/// are bundled into one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Operations run one after another: walltimes add up.
    Serial,
    /// Operations run side by side: processors, GPUs and memory add up.
    Parallel,
}

impl Default for Aggregation {
    fn default() -> Self {
        Aggregation::Serial
    }
}
