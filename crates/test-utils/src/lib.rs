pub mod builders;
pub mod fake_runtime;

use std::sync::{Mutex, Once};

use stevedore::engine::TaskEventObserver;
use stevedore::model::{TaskEvent, TaskStep};
use tracing_subscriber::{fmt, EnvFilter};

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
            .with_test_writer() // print only for failing tests unless --nocapture
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

/// Observer that keeps everything it is shown.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    steps: Mutex<Vec<TaskStep>>,
    events: Mutex<Vec<TaskEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> Vec<TaskStep> {
        self.steps.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl TaskEventObserver for RecordingObserver {
    fn on_step_starting(&self, step: &TaskStep) {
        self.steps.lock().unwrap().push(step.clone());
    }

    fn on_event(&self, event: &TaskEvent) {
        if let TaskEvent::StepStarting { step } = event {
            self.on_step_starting(step);
        }
        self.events.lock().unwrap().push(event.clone());
    }
}
