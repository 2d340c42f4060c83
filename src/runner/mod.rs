// file: src/runner/mod.rs
// version: 2.1.0
// guid: g7h8i9j0-k1l2-3456-7890-abcdef123456

//! Stage runner: walks the stage list against durable run state
//!
//! Ordering is derived entirely from run state: a stage only starts once
//! its dependency is recorded as completed, whether that happened in this
//! process or in an earlier one. That is what makes the run safe to resume
//! after a reboot or a manual re-invocation.

pub mod outcome;

pub use outcome::{exit_codes, FailureKind, RunFailure, RunOutcome, RunReport};

use crate::config::BootstrapConfig;
use crate::error::{BootstrapError, Result};
use crate::executor::CommandExecutor;
use crate::interruption::StopSignal;
use crate::preconditions::HostProbe;
use crate::stage::{Stage, StageContext, StageRecord, StageStatus};
use crate::state::{validate_stage_id, RunStateStore};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Sequential, re-entrant stage runner
pub struct StageRunner<'a> {
    config: &'a BootstrapConfig,
    stages: Vec<Box<dyn Stage>>,
    state: &'a dyn RunStateStore,
    executor: &'a dyn CommandExecutor,
    probe: &'a dyn HostProbe,
    stop: StopSignal,
    run_id: Uuid,
}

impl<'a> StageRunner<'a> {
    /// Build a runner, rejecting stage lists that can never run correctly
    pub fn new(
        config: &'a BootstrapConfig,
        stages: Vec<Box<dyn Stage>>,
        state: &'a dyn RunStateStore,
        executor: &'a dyn CommandExecutor,
        probe: &'a dyn HostProbe,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for stage in &stages {
            validate_stage_id(stage.id())?;
            if !seen.insert(stage.id().to_string()) {
                return Err(BootstrapError::config(format!(
                    "duplicate stage id {}",
                    stage.id()
                )));
            }
        }

        for stage in &stages {
            if let Some(dep) = stage.depends_on() {
                if !seen.contains(dep) {
                    return Err(BootstrapError::config(format!(
                        "{} depends on unknown stage {}",
                        stage.id(),
                        dep
                    )));
                }
            }
        }

        if let Some(forced) = &config.general.force_stage {
            if !seen.contains(forced.as_str()) {
                return Err(BootstrapError::invalid_argument(format!(
                    "cannot force unknown stage {} (known: {})",
                    forced,
                    stages.iter().map(|s| s.id()).collect::<Vec<_>>().join(", ")
                )));
            }
        }

        Ok(Self {
            config,
            stages,
            state,
            executor,
            probe,
            stop: StopSignal::new(),
            run_id: Uuid::new_v4(),
        })
    }

    /// Honour operator stop requests between stages
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn stage_ids(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.id()).collect()
    }

    /// Execute the stage list
    ///
    /// Stage failures, precondition failures, dependency violations, reboot
    /// suspensions and operator stops are returned as [`RunOutcome`]s. An
    /// `Err` means run state itself could not be read or written.
    pub async fn run(&self) -> Result<RunOutcome> {
        let span = tracing::info_span!("run", run_id = %self.run_id);
        self.run_stages().instrument(span).await
    }

    /// Completion as recorded in run state. Unreadable state is an error
    /// here, never "not completed".
    fn completed(&self, stage_id: &str) -> Result<bool> {
        Ok(self.state.snapshot()?.completed.contains(stage_id))
    }

    async fn run_stages(&self) -> Result<RunOutcome> {
        let total = self.stages.len();
        let mut report = RunReport::default();
        let mut forcing = false;

        info!(
            "Starting bootstrap run: {} stages, state at {}{}",
            total,
            self.state.location(),
            if self.executor.is_dry_run() { " (dry run)" } else { "" }
        );

        for (index, stage) in self.stages.iter().enumerate() {
            let id = stage.id();
            let started = Instant::now();

            if self.stop.is_requested() {
                warn!(stage = id, "Stopping before {} at operator request", id);
                return Ok(RunOutcome::Interrupted {
                    next_stage: id.to_string(),
                    report,
                });
            }

            // forcing a stage re-runs it and every stage after it
            if self.config.general.force_stage.as_deref() == Some(id) {
                forcing = true;
            }
            if forcing && self.completed(id)? {
                warn!(stage = id, "Forced re-run: clearing completion marker");
                self.state.clear_completion(id)?;
            }

            if let Some(dep) = stage.depends_on() {
                if !self.completed(dep)? {
                    let message = format!("prerequisite {} is not completed", dep);
                    error!(stage = id, "Dependency violation: {}", message);
                    report.push(record(id, StageStatus::Failed, started));
                    return Ok(RunOutcome::Failed {
                        failure: RunFailure {
                            stage_id: id.to_string(),
                            kind: FailureKind::DependencyViolation,
                            message,
                            rollback_error: None,
                        },
                        report,
                    });
                }
            }

            if self.completed(id)? {
                info!(stage = id, "[{}/{}] Skipping {}: already completed", index + 1, total, stage.description());
                report.push(record(id, StageStatus::Skipped, started));
                continue;
            }

            let ctx = StageContext {
                run_id: self.run_id,
                config: self.config,
                state: self.state,
                executor: self.executor,
                probe: self.probe,
                stage_id: id,
                stage_number: index + 1,
                total_stages: total,
            };

            if !forcing {
                match stage.already_applied(&ctx).await {
                    Ok(true) => {
                        info!(stage = id, "[{}/{}] Skipping {}: already applied on this host", index + 1, total, stage.description());
                        self.state.mark_completed(id)?;
                        report.push(record(id, StageStatus::Skipped, started));
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        debug!(stage = id, "Idempotency check inconclusive, running stage: {:#}", e);
                    }
                }
            }

            info!(stage = id, "[{}/{}] Starting {}", index + 1, total, stage.description());

            let checks = stage.preconditions(&ctx).await;
            if !checks.passed() {
                let message = checks.failure_summary();
                error!(stage = id, "Preconditions not met: {}", message);
                report.push(record(id, StageStatus::Failed, started));
                return Ok(RunOutcome::Failed {
                    failure: RunFailure {
                        stage_id: id.to_string(),
                        kind: FailureKind::Precondition,
                        message,
                        rollback_error: None,
                    },
                    report,
                });
            }

            match stage.execute(&ctx).await {
                Ok(output) => {
                    for (key, value) in &output.params {
                        self.state.set_parameter(key, value)?;
                    }
                    self.state.mark_completed(id)?;
                    info!(stage = id, "Completed {} in {:.1?}", stage.description(), started.elapsed());
                    report.push(record(id, StageStatus::Completed, started));

                    if let Some(reason) = output.reboot_required {
                        warn!(stage = id, "Reboot required before continuing: {}", reason);
                        return Ok(RunOutcome::AwaitingReboot {
                            stage_id: id.to_string(),
                            reason,
                            report,
                        });
                    }
                }
                Err(err) => {
                    let message = format!("{:#}", err);
                    error!(stage = id, "Stage failed: {}", message);

                    warn!(stage = id, "Rolling back {}", stage.description());
                    let rollback_error = match stage.rollback(&ctx).await {
                        Ok(()) => {
                            info!(stage = id, "Rollback finished");
                            None
                        }
                        Err(e) => {
                            warn!(stage = id, "Rollback failed: {:#}", e);
                            Some(format!("{:#}", e))
                        }
                    };

                    self.state.clear_completion(id)?;
                    report.push(record(id, StageStatus::Failed, started));
                    return Ok(RunOutcome::Failed {
                        failure: RunFailure {
                            stage_id: id.to_string(),
                            kind: FailureKind::StageBody,
                            message,
                            rollback_error,
                        },
                        report,
                    });
                }
            }
        }

        info!("All {} stages completed", total);
        Ok(RunOutcome::Completed { report })
    }
}

fn record(stage_id: &str, status: StageStatus, started: Instant) -> StageRecord {
    StageRecord {
        stage_id: stage_id.to_string(),
        status,
        duration: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::DryRunExecutor;
    use crate::preconditions::testing::FixedProbe;
    use crate::preconditions::{CheckResult, PreconditionReport};
    use crate::stage::StageOutput;
    use crate::state::MemoryStateStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ScriptedStage {
        id: &'static str,
        dep: Option<&'static str>,
        runs: Arc<AtomicUsize>,
        applied: bool,
        precondition_fails: bool,
    }

    impl ScriptedStage {
        fn new(id: &'static str, dep: Option<&'static str>) -> Self {
            Self {
                id,
                dep,
                runs: Arc::new(AtomicUsize::new(0)),
                applied: false,
                precondition_fails: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl Stage for ScriptedStage {
        fn id(&self) -> &str {
            self.id
        }

        fn description(&self) -> &str {
            "scripted stage"
        }

        fn depends_on(&self) -> Option<&str> {
            self.dep
        }

        async fn preconditions(&self, _ctx: &StageContext<'_>) -> PreconditionReport {
            PreconditionReport {
                results: vec![CheckResult {
                    name: "disk".to_string(),
                    passed: !self.precondition_fails,
                    reason: "test".to_string(),
                }],
            }
        }

        async fn already_applied(&self, _ctx: &StageContext<'_>) -> anyhow::Result<bool> {
            Ok(self.applied)
        }

        async fn execute(&self, _ctx: &StageContext<'_>) -> anyhow::Result<StageOutput> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(StageOutput::done())
        }
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let config = BootstrapConfig::default();
        let state = MemoryStateStore::new();
        let executor = DryRunExecutor::new();
        let probe = FixedProbe::default();

        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(ScriptedStage::new("A", None)),
            Box::new(ScriptedStage::new("A", None)),
        ];
        assert!(StageRunner::new(&config, stages, &state, &executor, &probe).is_err());
    }

    #[test]
    fn test_rejects_unknown_dependency_and_force_target() {
        let mut config = BootstrapConfig::default();
        let state = MemoryStateStore::new();
        let executor = DryRunExecutor::new();
        let probe = FixedProbe::default();

        let stages: Vec<Box<dyn Stage>> = vec![Box::new(ScriptedStage::new("B", Some("A")))];
        assert!(StageRunner::new(&config, stages, &state, &executor, &probe).is_err());

        config.general.force_stage = Some("Z".to_string());
        let stages: Vec<Box<dyn Stage>> = vec![Box::new(ScriptedStage::new("A", None))];
        assert!(matches!(
            StageRunner::new(&config, stages, &state, &executor, &probe),
            Err(BootstrapError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_precondition_failure_stops_before_body() {
        let config = BootstrapConfig::default();
        let state = MemoryStateStore::new();
        let executor = DryRunExecutor::new();
        let probe = FixedProbe::default();

        let mut stage = ScriptedStage::new("A", None);
        stage.precondition_fails = true;
        let runs = stage.runs.clone();

        let runner = StageRunner::new(&config, vec![Box::new(stage)], &state, &executor, &probe).unwrap();
        let outcome = runner.run().await.unwrap();

        assert_eq!(outcome.exit_code(), exit_codes::PRECONDITION_FAILED);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(!state.is_completed("A"));
    }

    #[tokio::test]
    async fn test_already_applied_is_adopted_without_running() {
        let config = BootstrapConfig::default();
        let state = MemoryStateStore::new();
        let executor = DryRunExecutor::new();
        let probe = FixedProbe::default();

        let mut stage = ScriptedStage::new("A", None);
        stage.applied = true;
        let runs = stage.runs.clone();

        let runner = StageRunner::new(&config, vec![Box::new(stage)], &state, &executor, &probe).unwrap();
        let outcome = runner.run().await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.report().skipped(), vec!["A"]);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(state.is_completed("A"));
    }

    #[tokio::test]
    async fn test_forced_stage_ignores_already_applied() {
        let mut config = BootstrapConfig::default();
        config.general.force_stage = Some("A".to_string());
        let state = MemoryStateStore::new();
        state.mark_completed("A").unwrap();
        let executor = DryRunExecutor::new();
        let probe = FixedProbe::default();

        let mut stage = ScriptedStage::new("A", None);
        stage.applied = true;
        let runs = stage.runs.clone();

        let runner = StageRunner::new(&config, vec![Box::new(stage)], &state, &executor, &probe).unwrap();
        assert!(runner.run().await.unwrap().is_success());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
