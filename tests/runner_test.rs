// file: tests/runner_test.rs
// version: 1.1.0
// guid: 4c5d6e7f-8a9b-4c0d-9e1f-2a3b4c5d6e7f

//! Stage runner behavior across repeated invocations against one state file

mod common;

use common::{Counters, CountingStage, HealthyHost};
use std::path::Path;
use tempfile::TempDir;
use vps_bootstrap::config::BootstrapConfig;
use vps_bootstrap::executor::DryRunExecutor;
use vps_bootstrap::interruption::StopSignal;
use vps_bootstrap::runner::{exit_codes, FailureKind, RunOutcome, StageRunner};
use vps_bootstrap::stage::Stage;
use vps_bootstrap::state::{FileStateStore, RunStateStore};

/// One orchestrator invocation: fresh store handle, runner and stage objects
async fn invoke(state_file: &Path, config: &BootstrapConfig, stages: Vec<Box<dyn Stage>>) -> RunOutcome {
    let store = FileStateStore::new(state_file);
    let executor = DryRunExecutor::new();
    let probe = HealthyHost;
    let runner = StageRunner::new(config, stages, &store, &executor, &probe).unwrap();
    runner.run().await.unwrap()
}

fn chain(ids: &[&str], counters: &[Counters]) -> Vec<Box<dyn Stage>> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| {
            let dep = if i == 0 { None } else { Some(ids[i - 1]) };
            Box::new(CountingStage::new(id, dep).with_counters(&counters[i])) as Box<dyn Stage>
        })
        .collect()
}

#[tokio::test]
async fn test_completed_stage_is_never_re_executed() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    let config = BootstrapConfig::default();
    let counters = vec![Counters::default(), Counters::default()];

    let first = invoke(&state, &config, chain(&["A", "B"], &counters)).await;
    assert_eq!(first.exit_code(), exit_codes::SUCCESS);

    let second = invoke(&state, &config, chain(&["A", "B"], &counters)).await;
    assert_eq!(second.exit_code(), exit_codes::SUCCESS);
    assert_eq!(second.report().skipped(), vec!["A", "B"]);

    assert_eq!(counters[0].runs(), 1);
    assert_eq!(counters[1].runs(), 1);
}

#[tokio::test]
async fn test_dependency_must_be_completed_first() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    let config = BootstrapConfig::default();
    let counters = Counters::default();

    // B declared ahead of its prerequisite
    let stages: Vec<Box<dyn Stage>> = vec![
        Box::new(CountingStage::new("B", Some("A")).with_counters(&counters)),
        Box::new(CountingStage::new("A", None)),
    ];
    let outcome = invoke(&state, &config, stages).await;

    assert_eq!(outcome.exit_code(), exit_codes::DEPENDENCY_VIOLATION);
    assert_eq!(outcome.failure().unwrap().kind, FailureKind::DependencyViolation);
    assert_eq!(counters.runs(), 0);
    assert!(!FileStateStore::new(&state).is_completed("B"));
}

#[tokio::test]
async fn test_forced_stage_reruns_itself_and_later_stages_only() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    let counters = vec![Counters::default(), Counters::default(), Counters::default()];

    let config = BootstrapConfig::default();
    invoke(&state, &config, chain(&["A", "B", "C"], &counters)).await;

    let mut forced = BootstrapConfig::default();
    forced.general.force_stage = Some("B".to_string());
    let outcome = invoke(&state, &forced, chain(&["A", "B", "C"], &counters)).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.report().skipped(), vec!["A"]);
    assert_eq!(counters[0].runs(), 1);
    assert_eq!(counters[1].runs(), 2);
    assert_eq!(counters[2].runs(), 2);

    let store = FileStateStore::new(&state);
    for id in ["A", "B", "C"] {
        assert!(store.is_completed(id));
    }
}

#[tokio::test]
async fn test_failure_rolls_back_once_and_is_retried() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    let config = BootstrapConfig::default();
    let a = Counters::default();
    let b = Counters::default();

    let stages = || -> Vec<Box<dyn Stage>> {
        vec![
            Box::new(CountingStage::new("A", None).with_counters(&a)),
            Box::new(CountingStage::new("B", Some("A")).with_counters(&b).failing(usize::MAX)),
        ]
    };

    let outcome = invoke(&state, &config, stages()).await;
    assert_eq!(outcome.exit_code(), exit_codes::STAGE_FAILED);
    let failure = outcome.failure().unwrap();
    assert_eq!(failure.stage_id, "B");
    assert_eq!(failure.kind, FailureKind::StageBody);
    assert_eq!(b.rollbacks(), 1);
    assert!(!FileStateStore::new(&state).is_completed("B"));

    let outcome = invoke(&state, &config, stages()).await;
    assert!(!outcome.is_success());
    assert_eq!(b.runs(), 2);
    assert_eq!(b.rollbacks(), 2);
    assert_eq!(a.runs(), 1);
}

#[tokio::test]
async fn test_failed_rollback_keeps_original_cause() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    let config = BootstrapConfig::default();
    let b = Counters::default();

    let stages: Vec<Box<dyn Stage>> = vec![
        Box::new(CountingStage::new("A", None)),
        Box::new(
            CountingStage::new("B", Some("A"))
                .with_counters(&b)
                .failing(1)
                .failing_rollback(),
        ),
    ];
    let outcome = invoke(&state, &config, stages).await;

    assert_eq!(outcome.exit_code(), exit_codes::STAGE_FAILED);
    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::StageBody);
    assert!(failure.message.contains("B failed on attempt 1"));
    assert!(failure
        .rollback_error
        .as_deref()
        .unwrap()
        .contains("could not remove its fragment"));
    assert_eq!(b.rollbacks(), 1);

    let store = FileStateStore::new(&state);
    assert!(store.is_completed("A"));
    assert!(!store.is_completed("B"));
}

#[tokio::test]
async fn test_unreadable_state_stops_before_any_body() {
    let dir = TempDir::new().unwrap();
    let counters = vec![Counters::default()];

    // the state path names a directory, so it cannot be read
    let store = FileStateStore::new(dir.path());
    let config = BootstrapConfig::default();
    let executor = DryRunExecutor::new();
    let probe = HealthyHost;
    let runner = StageRunner::new(&config, chain(&["A"], &counters), &store, &executor, &probe).unwrap();

    assert!(runner.run().await.is_err());
    assert_eq!(counters[0].runs(), 0);
}

#[tokio::test]
async fn test_hand_edited_state_with_binary_byte_still_skips() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    std::fs::write(&state, b"A_COMPLETED\n# edited \xff\n").unwrap();
    let counters = vec![Counters::default(), Counters::default()];

    let outcome = invoke(&state, &BootstrapConfig::default(), chain(&["A", "B"], &counters)).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.report().skipped(), vec!["A"]);
    assert_eq!(counters[0].runs(), 0);
    assert_eq!(counters[1].runs(), 1);
}

#[tokio::test]
async fn test_run_resumes_after_reboot() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    let config = BootstrapConfig::default();
    let a = Counters::default();
    let b = Counters::default();

    let stages = || -> Vec<Box<dyn Stage>> {
        vec![
            Box::new(CountingStage::new("A", None).with_counters(&a).rebooting()),
            Box::new(CountingStage::new("B", Some("A")).with_counters(&b)),
        ]
    };

    let outcome = invoke(&state, &config, stages()).await;
    assert_eq!(outcome.exit_code(), exit_codes::AWAITING_REBOOT);
    match &outcome {
        RunOutcome::AwaitingReboot { stage_id, reason, .. } => {
            assert_eq!(stage_id, "A");
            assert_eq!(reason, "kernel upgraded");
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(b.runs(), 0);

    // parameters were persisted together with the completion marker
    let store = FileStateStore::new(&state);
    assert!(store.is_completed("A"));
    assert_eq!(store.get_parameter("A_RUNS").as_deref(), Some("1"));

    let outcome = invoke(&state, &config, stages()).await;
    assert!(outcome.is_success());
    assert_eq!(outcome.report().skipped(), vec!["A"]);
    assert_eq!(a.runs(), 1);
    assert_eq!(b.runs(), 1);
}

#[tokio::test]
async fn test_interrupt_finishes_current_stage_then_stops() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    let config = BootstrapConfig::default();
    let a = Counters::default();
    let b = Counters::default();
    let stop = StopSignal::new();

    let stages: Vec<Box<dyn Stage>> = vec![
        Box::new(CountingStage::new("A", None).with_counters(&a).stopping(&stop)),
        Box::new(CountingStage::new("B", Some("A")).with_counters(&b)),
    ];
    let store = FileStateStore::new(&state);
    let executor = DryRunExecutor::new();
    let probe = HealthyHost;
    let runner = StageRunner::new(&config, stages, &store, &executor, &probe)
        .unwrap()
        .with_stop_signal(stop);
    let outcome = runner.run().await.unwrap();

    assert_eq!(outcome.exit_code(), exit_codes::INTERRUPTED);
    match &outcome {
        RunOutcome::Interrupted { next_stage, .. } => assert_eq!(next_stage, "B"),
        other => panic!("unexpected outcome {:?}", other),
    }
    // the running stage was allowed to commit
    assert!(store.is_completed("A"));
    assert_eq!(b.runs(), 0);

    let stages: Vec<Box<dyn Stage>> = vec![
        Box::new(CountingStage::new("A", None).with_counters(&a)),
        Box::new(CountingStage::new("B", Some("A")).with_counters(&b)),
    ];
    let outcome = invoke(&state, &config, stages).await;
    assert!(outcome.is_success());
    assert_eq!(a.runs(), 1);
    assert_eq!(b.runs(), 1);
}

#[tokio::test]
async fn test_fresh_process_resumes_after_last_completed_stage() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    let config = BootstrapConfig::default();
    let counters = vec![Counters::default(), Counters::default(), Counters::default()];

    // a previous process finished A and B, then died before C started
    let store = FileStateStore::new(&state);
    store.mark_completed("A").unwrap();
    store.mark_completed("B").unwrap();

    let outcome = invoke(&state, &config, chain(&["A", "B", "C"], &counters)).await;
    assert!(outcome.is_success());
    assert_eq!(outcome.report().skipped(), vec!["A", "B"]);
    assert_eq!(outcome.report().executed(), vec!["C"]);
    assert_eq!(counters[2].runs(), 1);
}

#[tokio::test]
async fn test_four_stage_scenario_with_transient_failure() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    let config = BootstrapConfig::default();
    let counters: Vec<Counters> = (0..4).map(|_| Counters::default()).collect();

    let stages = || -> Vec<Box<dyn Stage>> {
        vec![
            Box::new(CountingStage::new("A", None).with_counters(&counters[0])),
            Box::new(CountingStage::new("B", Some("A")).with_counters(&counters[1]).failing(1)),
            Box::new(CountingStage::new("C", Some("B")).with_counters(&counters[2])),
            Box::new(CountingStage::new("D", Some("C")).with_counters(&counters[3])),
        ]
    };

    // run 1: A completes, B fails and is rolled back
    let outcome = invoke(&state, &config, stages()).await;
    assert_ne!(outcome.exit_code(), exit_codes::SUCCESS);
    assert_eq!(counters[1].rollbacks(), 1);
    let snapshot = FileStateStore::new(&state).snapshot().unwrap();
    assert_eq!(snapshot.completed.iter().collect::<Vec<_>>(), vec!["A"]);

    // run 2: A skipped, B through D run
    let outcome = invoke(&state, &config, stages()).await;
    assert_eq!(outcome.exit_code(), exit_codes::SUCCESS);
    assert_eq!(outcome.report().skipped(), vec!["A"]);
    assert_eq!(outcome.report().executed(), vec!["B", "C", "D"]);

    let snapshot = FileStateStore::new(&state).snapshot().unwrap();
    assert_eq!(snapshot.completed.len(), 4);
    assert_eq!(counters[0].runs(), 1);
    assert_eq!(counters[1].runs(), 2);
    assert_eq!(counters[1].rollbacks(), 1);
}

#[tokio::test]
async fn test_dry_run_leaves_state_file_untouched() {
    use vps_bootstrap::state::MemoryStateStore;

    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    let file_store = FileStateStore::new(&state);
    file_store.mark_completed("A").unwrap();
    let before = std::fs::read_to_string(&state).unwrap();

    let counters = vec![Counters::default(), Counters::default()];
    let memory = MemoryStateStore::from_snapshot(file_store.snapshot().unwrap());
    let config = BootstrapConfig::default();
    let executor = DryRunExecutor::new();
    let probe = HealthyHost;
    let runner = StageRunner::new(&config, chain(&["A", "B"], &counters), &memory, &executor, &probe).unwrap();

    assert!(runner.run().await.unwrap().is_success());
    assert!(memory.is_completed("B"));
    assert_eq!(std::fs::read_to_string(&state).unwrap(), before);
    assert_eq!(counters[0].runs(), 0);
}
