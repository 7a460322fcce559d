#![allow(dead_code)]

pub use jobflow_test_utils::builders;
pub use jobflow_test_utils::fake_backend::{FakeLocalBackend, FakeQueueBackend};
pub use jobflow_test_utils::{MemoryProject, init_tracing, with_timeout};

use jobflow::dag::{OperationDefinition, OperationGraph};
use jobflow::condition::Predicate;
use jobflow::job::Job;

/// `simulate` turns `input.dat` into `output.dat`; `analyze` turns
/// `output.dat` into `report.txt`.
pub fn simulate_analyze_graph() -> OperationGraph {
    OperationGraph::new([
        OperationDefinition::new("simulate")
            .with_cmd("./simulate.sh")
            .with_pre(Predicate::file_exists("input.dat"))
            .with_post(Predicate::file_exists("output.dat")),
        OperationDefinition::new("analyze")
            .with_cmd("./analyze.sh")
            .after("simulate")
            .with_pre(Predicate::file_exists("output.dat"))
            .with_post(Predicate::file_exists("report.txt")),
    ])
    .expect("simulate/analyze graph is valid")
}

/// Register `ids` as jobs of the project.
pub fn jobs(project: &MemoryProject, ids: &[&str]) -> Vec<Job> {
    ids.iter()
        .map(|id| project.store.insert_job(*id).expect("insert job"))
        .collect()
}
