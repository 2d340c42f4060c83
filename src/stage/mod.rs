// file: src/stage/mod.rs
// version: 2.0.0
// guid: h8i9j0k1-l2m3-4567-8901-bcdef234567

//! Stage abstraction: a named unit of provisioning work

use crate::config::BootstrapConfig;
use crate::executor::{CommandExecutor, CommandSpec};
use crate::preconditions::{HostProbe, PreconditionReport};
use crate::state::RunStateStore;
use anyhow::Context;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Run parameter holding the administrative account name
pub const PARAM_ADMIN_USER: &str = "ADMIN_USER";

/// Run parameter holding the SSH port chosen for the host
pub const PARAM_SSH_PORT: &str = "SSH_PORT";

/// Context passed to each stage
pub struct StageContext<'a> {
    /// Identifier of this orchestrator invocation, for log correlation
    pub run_id: Uuid,

    pub config: &'a BootstrapConfig,

    pub state: &'a dyn RunStateStore,

    pub executor: &'a dyn CommandExecutor,

    pub probe: &'a dyn HostProbe,

    pub stage_id: &'a str,

    /// Current stage number (1-based)
    pub stage_number: usize,

    pub total_stages: usize,
}

impl<'a> StageContext<'a> {
    /// Account name chosen by an earlier stage, falling back to configuration
    pub fn admin_user(&self) -> String {
        self.state
            .get_parameter(PARAM_ADMIN_USER)
            .unwrap_or_else(|| self.config.account.admin_user.clone())
    }

    /// SSH port recorded by an earlier stage, falling back to configuration
    pub fn ssh_port(&self) -> u16 {
        self.state
            .get_parameter(PARAM_SSH_PORT)
            .and_then(|p| p.parse().ok())
            .unwrap_or(self.config.account.ssh_port)
    }

    /// Run a command, failing on a non-zero exit
    pub async fn exec(&self, spec: CommandSpec) -> anyhow::Result<String> {
        Ok(self.executor.run_checked(&spec).await?)
    }

    /// Run a command as a boolean query
    pub async fn query(&self, spec: CommandSpec) -> anyhow::Result<bool> {
        Ok(self.executor.check(&spec.read_only()).await?)
    }

    /// One action of a stage body; its failure fails the whole stage
    pub async fn step<T, F>(&self, name: &str, action: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        info!(stage = self.stage_id, "  -> {}", name);
        action
            .await
            .with_context(|| format!("{} failed during '{}'", self.stage_id, name))
    }

    /// Like [`step`](Self::step), but recorded as a checkpoint so a re-run
    /// of this stage skips it
    pub async fn checkpointed_step<F>(&self, name: &str, action: F) -> anyhow::Result<()>
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        if self.state.has_checkpoint(self.stage_id, name) {
            info!(stage = self.stage_id, "  -> {} (already done)", name);
            return Ok(());
        }

        self.step(name, action).await?;
        self.state.mark_checkpoint(self.stage_id, name)?;
        debug!(stage = self.stage_id, "Checkpoint recorded: {}", name);
        Ok(())
    }
}

/// What a successful stage body produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutput {
    /// Run parameters persisted before the stage is marked completed
    pub params: BTreeMap<String, String>,

    /// Set when the host must reboot before the next stage may run
    pub reboot_required: Option<String>,
}

impl StageOutput {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_reboot(mut self, reason: impl Into<String>) -> Self {
        self.reboot_required = Some(reason.into());
        self
    }
}

/// Lifecycle of a stage within one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    /// Already completed in run state, or already applied on the host
    Skipped,
    Running,
    Completed,
    Failed,
}

/// Record of one stage's handling in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub stage_id: String,
    pub status: StageStatus,
    pub duration: Duration,
}

/// Trait for provisioning stages
#[async_trait::async_trait]
pub trait Stage: Send + Sync {
    /// Unique identifier, also the run state key
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    /// Stage that must be completed before this one may run
    fn depends_on(&self) -> Option<&str> {
        None
    }

    /// Host checks run before the body; an empty report passes
    async fn preconditions(&self, _ctx: &StageContext<'_>) -> PreconditionReport {
        PreconditionReport::default()
    }

    /// Whether the stage's work is already present on the host even though
    /// run state does not record it
    async fn already_applied(&self, _ctx: &StageContext<'_>) -> anyhow::Result<bool> {
        Ok(false)
    }

    /// The provisioning action
    async fn execute(&self, ctx: &StageContext<'_>) -> anyhow::Result<StageOutput>;

    /// Best-effort compensation after a failed body
    async fn rollback(&self, ctx: &StageContext<'_>) -> anyhow::Result<()> {
        info!(stage = ctx.stage_id, "No rollback actions defined");
        Ok(())
    }
}
