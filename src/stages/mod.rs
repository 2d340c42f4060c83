// file: src/stages/mod.rs
// version: 1.1.0
// guid: 5a6b7c8d-9e0f-4a1b-8c2d-3e4f5a6b7c8d

//! The provisioning stages, in execution order

pub mod account;
pub mod deploy;
pub mod docker;
pub mod security;
pub mod system;

pub use account::AccountStage;
pub use deploy::DeployStage;
pub use docker::DockerStage;
pub use security::SecurityStage;
pub use system::SystemPrepStage;

use crate::executor::CommandSpec;
use crate::stage::{Stage, StageContext};

/// Every stage in declared order; each depends on the one before it
pub fn default_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(SystemPrepStage),
        Box::new(AccountStage),
        Box::new(SecurityStage),
        Box::new(DockerStage),
        Box::new(DeployStage),
    ]
}

/// Shared host actions used by the stage bodies
pub mod util {
    use super::*;
    use tracing::warn;

    fn apt(args: &[&str]) -> CommandSpec {
        CommandSpec::new("apt-get")
            .args(args.iter().copied())
            .env("DEBIAN_FRONTEND", "noninteractive")
    }

    /// Install packages non-interactively
    pub async fn apt_install(ctx: &StageContext<'_>, packages: &[&str]) -> anyhow::Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        let mut args = vec!["install", "-y", "--no-install-recommends"];
        args.extend_from_slice(packages);
        ctx.exec(apt(&args)).await?;
        Ok(())
    }

    pub async fn apt_update(ctx: &StageContext<'_>) -> anyhow::Result<()> {
        ctx.exec(apt(&["update"])).await?;
        Ok(())
    }

    /// Upgrade installed packages, keeping existing config files
    pub async fn apt_upgrade(ctx: &StageContext<'_>) -> anyhow::Result<()> {
        ctx.exec(apt(&[
            "-o",
            "Dpkg::Options::=--force-confold",
            "-y",
            "upgrade",
        ]))
        .await?;
        Ok(())
    }

    pub async fn is_package_installed(ctx: &StageContext<'_>, package: &str) -> anyhow::Result<bool> {
        let spec = CommandSpec::new("dpkg-query")
            .args(["-W", "-f=${Status}", package])
            .read_only();
        let output = ctx.executor.run(&spec).await?;
        Ok(output.success() && output.stdout.contains("install ok installed"))
    }

    pub async fn is_service_active(ctx: &StageContext<'_>, service: &str) -> anyhow::Result<bool> {
        ctx.query(CommandSpec::new("systemctl").args(["is-active", "--quiet", service]))
            .await
    }

    pub async fn enable_service(ctx: &StageContext<'_>, service: &str) -> anyhow::Result<()> {
        ctx.exec(CommandSpec::new("systemctl").args(["enable", "--now", service]))
            .await?;
        Ok(())
    }

    pub async fn restart_service(ctx: &StageContext<'_>, service: &str) -> anyhow::Result<()> {
        ctx.exec(CommandSpec::new("systemctl").args(["restart", service]))
            .await?;
        Ok(())
    }

    /// Restart sshd so it listens on the configured port
    ///
    /// With socket activation (Ubuntu 24.04) the port is bound by
    /// `ssh.socket`, regenerated from sshd_config on daemon-reload.
    pub async fn restart_ssh(ctx: &StageContext<'_>) -> anyhow::Result<()> {
        ctx.exec(CommandSpec::new("systemctl").arg("daemon-reload"))
            .await?;
        if is_service_active(ctx, "ssh.socket").await? {
            restart_service(ctx, "ssh.socket").await?;
        }
        restart_service(ctx, "ssh").await
    }

    /// Whether something accepts TCP connections on the port
    pub async fn is_port_listening(ctx: &StageContext<'_>, port: u16) -> anyhow::Result<bool> {
        let spec = CommandSpec::new("ss")
            .arg("-Hltn")
            .arg(format!("sport = :{}", port))
            .read_only();
        let output = ctx.executor.run(&spec).await?;
        Ok(output.success() && !output.stdout.trim().is_empty())
    }

    pub async fn user_exists(ctx: &StageContext<'_>, user: &str) -> anyhow::Result<bool> {
        ctx.query(CommandSpec::new("id").args(["-u", user])).await
    }

    /// Outcome of a series of independent rollback actions
    ///
    /// Every action is attempted; the first failure is kept and returned
    /// by [`finish`](Self::finish), later ones are only logged.
    #[derive(Debug, Default)]
    pub struct Compensation {
        first_error: Option<anyhow::Error>,
    }

    impl Compensation {
        pub fn record<T>(
            &mut self,
            ctx: &StageContext<'_>,
            action: &str,
            result: anyhow::Result<T>,
        ) -> Option<T> {
            match result {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(stage = ctx.stage_id, "Rollback action '{}' failed: {:#}", action, e);
                    if self.first_error.is_none() {
                        self.first_error = Some(e.context(format!("rollback action '{}' failed", action)));
                    }
                    None
                }
            }
        }

        pub fn finish(self) -> anyhow::Result<()> {
            match self.first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }
}
