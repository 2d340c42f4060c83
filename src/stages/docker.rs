// file: src/stages/docker.rs
// version: 1.0.0
// guid: 9e0f1a2b-3c4d-4e5f-8a6b-7c8d9e0f1a2b

//! STAGE_4: container engine

use super::util;
use crate::executor::CommandSpec;
use crate::stage::{Stage, StageContext, StageOutput};
use tracing::{debug, warn};

pub const DOCKER_PACKAGES: &[&str] = &["docker.io", "docker-compose-v2"];

pub struct DockerStage;

impl DockerStage {
    async fn in_docker_group(ctx: &StageContext<'_>, user: &str) -> anyhow::Result<bool> {
        let output = ctx
            .executor
            .run(&CommandSpec::new("id").args(["-nG", user]).read_only())
            .await?;
        Ok(output.success() && output.stdout.split_whitespace().any(|g| g == "docker"))
    }
}

#[async_trait::async_trait]
impl Stage for DockerStage {
    fn id(&self) -> &str {
        "STAGE_4"
    }

    fn description(&self) -> &str {
        "Docker engine"
    }

    fn depends_on(&self) -> Option<&str> {
        Some("STAGE_3")
    }

    async fn already_applied(&self, ctx: &StageContext<'_>) -> anyhow::Result<bool> {
        if !util::is_service_active(ctx, "docker").await? {
            return Ok(false);
        }
        if !ctx.query(CommandSpec::new("docker").args(["compose", "version"])).await? {
            debug!(stage = ctx.stage_id, "Docker is running but the compose plugin is missing");
            return Ok(false);
        }
        Self::in_docker_group(ctx, &ctx.admin_user()).await
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> anyhow::Result<StageOutput> {
        let user = ctx.admin_user();

        ctx.step("install docker engine", util::apt_install(ctx, DOCKER_PACKAGES))
            .await?;
        ctx.step("enable docker service", util::enable_service(ctx, "docker"))
            .await?;
        ctx.step("grant docker access", async {
            ctx.exec(CommandSpec::new("usermod").args(["-aG", "docker", user.as_str()]))
                .await?;
            anyhow::Ok(())
        })
        .await?;
        ctx.step("verify docker", async {
            ctx.exec(CommandSpec::new("docker").arg("info")).await?;
            anyhow::Ok(())
        })
        .await?;

        Ok(StageOutput::done())
    }

    async fn rollback(&self, ctx: &StageContext<'_>) -> anyhow::Result<()> {
        warn!(
            stage = ctx.stage_id,
            "Docker packages were left installed; re-run to retry the installation"
        );
        Ok(())
    }
}
