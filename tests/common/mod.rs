// file: tests/common/mod.rs
// version: 1.1.0
// guid: 3b4c5d6e-7f8a-4b9c-8d0e-1f2a3b4c5d6e

//! Shared fakes for the integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vps_bootstrap::interruption::StopSignal;
use vps_bootstrap::preconditions::{HostProbe, OsRelease};
use vps_bootstrap::stage::{Stage, StageContext, StageOutput};

/// Probe describing a healthy host
pub struct HealthyHost;

#[async_trait::async_trait]
impl HostProbe for HealthyHost {
    fn available_disk_mb(&self, _path: &Path) -> vps_bootstrap::Result<u64> {
        Ok(100_000)
    }

    fn total_memory_mb(&self) -> vps_bootstrap::Result<u64> {
        Ok(8192)
    }

    fn cpu_cores(&self) -> vps_bootstrap::Result<usize> {
        Ok(4)
    }

    fn os_release(&self) -> vps_bootstrap::Result<OsRelease> {
        Ok(OsRelease {
            id: "ubuntu".to_string(),
            version_id: "24.04".to_string(),
            pretty_name: "Ubuntu 24.04 LTS".to_string(),
        })
    }

    fn is_root(&self) -> bool {
        true
    }

    async fn can_reach(&self, _host: &str, _port: u16, _limit: Duration) -> bool {
        true
    }
}

/// Call counters shared between a stage and the test observing it
#[derive(Debug, Clone, Default)]
pub struct Counters {
    pub runs: Arc<AtomicUsize>,
    pub rollbacks: Arc<AtomicUsize>,
}

impl Counters {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

/// Stage whose body counts its executions and can fail or ask for a reboot
pub struct CountingStage {
    pub id: String,
    pub depends_on: Option<String>,
    pub counters: Counters,
    /// Number of leading attempts that fail; `usize::MAX` always fails
    pub fail_attempts: usize,
    pub reboot: bool,
    pub rollback_fails: bool,
    /// Raised from inside the body, as Ctrl+C would be mid-stage
    pub stop: Option<StopSignal>,
}

impl CountingStage {
    pub fn new(id: &str, depends_on: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            depends_on: depends_on.map(String::from),
            counters: Counters::default(),
            fail_attempts: 0,
            reboot: false,
            rollback_fails: false,
            stop: None,
        }
    }

    pub fn with_counters(mut self, counters: &Counters) -> Self {
        self.counters = counters.clone();
        self
    }

    pub fn failing(mut self, attempts: usize) -> Self {
        self.fail_attempts = attempts;
        self
    }

    pub fn rebooting(mut self) -> Self {
        self.reboot = true;
        self
    }

    pub fn stopping(mut self, stop: &StopSignal) -> Self {
        self.stop = Some(stop.clone());
        self
    }

    pub fn failing_rollback(mut self) -> Self {
        self.rollback_fails = true;
        self
    }
}

#[async_trait::async_trait]
impl Stage for CountingStage {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "counting stage"
    }

    fn depends_on(&self) -> Option<&str> {
        self.depends_on.as_deref()
    }

    async fn execute(&self, _ctx: &StageContext<'_>) -> anyhow::Result<StageOutput> {
        let attempt = self.counters.runs.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(stop) = &self.stop {
            stop.request();
        }
        if attempt <= self.fail_attempts {
            anyhow::bail!("{} failed on attempt {}", self.id, attempt);
        }

        let output = StageOutput::done().with_param(format!("{}_RUNS", self.id), attempt.to_string());
        if self.reboot {
            Ok(output.with_reboot("kernel upgraded"))
        } else {
            Ok(output)
        }
    }

    async fn rollback(&self, _ctx: &StageContext<'_>) -> anyhow::Result<()> {
        self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        if self.rollback_fails {
            anyhow::bail!("{} rollback could not remove its fragment", self.id);
        }
        Ok(())
    }
}
