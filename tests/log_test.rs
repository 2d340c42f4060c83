// file: tests/log_test.rs
// version: 1.0.0
// guid: 5d6e7f8a-9b0c-4d1e-8f2a-3b4c5d6e7f8a

//! The log file holds every transition as it happens, in order

mod common;

use chrono::DateTime;
use common::{CountingStage, HealthyHost};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use vps_bootstrap::config::{BootstrapConfig, LoggingConfig};
use vps_bootstrap::executor::DryRunExecutor;
use vps_bootstrap::logging::init_logger;
use vps_bootstrap::runner::StageRunner;
use vps_bootstrap::stage::{Stage, StageContext, StageOutput};
use vps_bootstrap::state::FileStateStore;

/// Copies the log file from inside its body, as if the process died there
struct SnapshotStage {
    log: PathBuf,
    seen: Arc<Mutex<String>>,
}

#[async_trait::async_trait]
impl Stage for SnapshotStage {
    fn id(&self) -> &str {
        "C"
    }

    fn description(&self) -> &str {
        "log snapshot"
    }

    fn depends_on(&self) -> Option<&str> {
        Some("B")
    }

    async fn execute(&self, _ctx: &StageContext<'_>) -> anyhow::Result<StageOutput> {
        let content = std::fs::read_to_string(&self.log)?;
        *self.seen.lock().unwrap() = content;
        Ok(StageOutput::done())
    }
}

#[tokio::test]
async fn test_transitions_are_on_disk_before_the_next_stage_finishes() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("logs").join("bootstrap.log");
    let logging = LoggingConfig {
        file: log.clone(),
        ..LoggingConfig::default()
    };
    let opened = init_logger(&logging, true, true).unwrap();
    assert_eq!(opened.as_deref(), Some(log.as_path()));

    let seen = Arc::new(Mutex::new(String::new()));
    let stages: Vec<Box<dyn Stage>> = vec![
        Box::new(CountingStage::new("A", None)),
        Box::new(CountingStage::new("B", Some("A"))),
        Box::new(SnapshotStage {
            log: log.clone(),
            seen: seen.clone(),
        }),
    ];

    let config = BootstrapConfig::default();
    let store = FileStateStore::new(dir.path().join("state"));
    let executor = DryRunExecutor::new();
    let probe = HealthyHost;
    let runner = StageRunner::new(&config, stages, &store, &executor, &probe).unwrap();
    assert!(runner.run().await.unwrap().is_success());

    let content = seen.lock().unwrap().clone();
    let lines: Vec<&str> = content.lines().collect();

    let position = |needle: &str| {
        lines
            .iter()
            .position(|l| l.contains(needle))
            .unwrap_or_else(|| panic!("'{}' missing from log:\n{}", needle, content))
    };
    let start_a = position("[1/3] Starting");
    let start_b = position("[2/3] Starting");
    let start_c = position("[3/3] Starting");
    let completed_a = position("Completed counting stage");
    assert!(start_a < completed_a);
    assert!(completed_a < start_b);
    assert!(start_b < start_c);

    // nothing after the point where C was "interrupted"
    assert!(!content.contains("Completed log snapshot"));

    let mut previous = None;
    for line in &lines {
        let stamp = line.split_whitespace().next().unwrap();
        let parsed = DateTime::parse_from_rfc3339(stamp)
            .unwrap_or_else(|e| panic!("bad timestamp in '{}': {}", line, e));
        if let Some(prev) = previous {
            assert!(parsed >= prev, "timestamps went backwards at '{}'", line);
        }
        previous = Some(parsed);
    }
}
