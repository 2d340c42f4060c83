// file: src/stages/system.rs
// version: 1.0.0
// guid: 6b7c8d9e-0f1a-4b2c-9d3e-4f5a6b7c8d9e

//! STAGE_1: host verification and package baseline

use super::util;
use crate::interruption::RebootDetector;
use crate::preconditions::{CheckOptions, PreconditionChecker, PreconditionReport};
use crate::stage::{Stage, StageContext, StageOutput};
use tracing::{info, warn};

/// Packages every later stage relies on
pub const BASE_PACKAGES: &[&str] = &[
    "ca-certificates",
    "curl",
    "gnupg",
    "lsb-release",
    "software-properties-common",
    "unattended-upgrades",
];

pub struct SystemPrepStage;

#[async_trait::async_trait]
impl Stage for SystemPrepStage {
    fn id(&self) -> &str {
        "STAGE_1"
    }

    fn description(&self) -> &str {
        "System preparation"
    }

    async fn preconditions(&self, ctx: &StageContext<'_>) -> PreconditionReport {
        let options = CheckOptions {
            skip_os_check: ctx.config.general.skip_os_check,
            require_root: !ctx.executor.is_dry_run(),
        };
        PreconditionChecker::new(&ctx.config.requirements, ctx.probe)
            .run_all(options)
            .await
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> anyhow::Result<StageOutput> {
        ctx.step("refresh package index", util::apt_update(ctx)).await?;
        ctx.checkpointed_step("updates_applied", util::apt_upgrade(ctx))
            .await?;
        ctx.step("install base packages", util::apt_install(ctx, BASE_PACKAGES))
            .await?;

        let output = StageOutput::done();
        match RebootDetector::from_config(ctx.config).pending() {
            Some(reason) => {
                warn!(stage = ctx.stage_id, "Reboot pending: {}", reason);
                Ok(output.with_reboot(reason))
            }
            None => {
                info!(stage = ctx.stage_id, "No reboot required");
                Ok(output)
            }
        }
    }

    async fn rollback(&self, ctx: &StageContext<'_>) -> anyhow::Result<()> {
        warn!(
            stage = ctx.stage_id,
            "Package changes are not reverted; re-run to retry the remaining updates"
        );
        Ok(())
    }
}
