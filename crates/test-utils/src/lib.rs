pub mod builders;
pub mod fake_backend;

use std::sync::{Arc, Once};
use tracing_subscriber::{EnvFilter, fmt};

use jobflow::fs::mock::MockFileSystem;
use jobflow::job::InMemoryJobStore;
use jobflow::status::StatusTracker;

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// In-memory project: a mock filesystem, a store rooted at `ws/`, and a
/// tracker over that store.
pub struct MemoryProject {
    pub fs: MockFileSystem,
    pub store: Arc<InMemoryJobStore>,
    pub tracker: Arc<StatusTracker>,
}

impl MemoryProject {
    pub fn new() -> Self {
        let fs = MockFileSystem::new();
        let store = Arc::new(InMemoryJobStore::new("ws", Arc::new(fs.clone())));
        let tracker = Arc::new(StatusTracker::new(store.clone()));
        Self { fs, store, tracker }
    }

    /// Stage a file inside a job workspace.
    pub fn touch(&self, job: &str, rel: &str) {
        self.fs.add_file(format!("ws/{job}/{rel}"), "x");
    }

    pub fn remove(&self, job: &str, rel: &str) {
        self.fs.remove(format!("ws/{job}/{rel}"));
    }
}

impl Default for MemoryProject {
    fn default() -> Self {
        Self::new()
    }
}
