// file: src/stages/security.rs
// version: 1.1.0
// guid: 8d9e0f1a-2b3c-4d4e-9f5a-6b7c8d9e0f1a

//! STAGE_3: intrusion prevention and firewall

use super::util;
use crate::config::DEFAULT_SSH_PORT;
use crate::executor::CommandSpec;
use crate::render::{Fail2banJail, FAIL2BAN_JAIL};
use crate::stage::{Stage, StageContext, StageOutput};
use std::path::Path;
use tracing::{info, warn};

pub struct SecurityStage;

impl SecurityStage {
    /// Ports to allow, using the SSH port recorded by the account stage
    ///
    /// The default SSH port stays open until sshd is seen listening on the
    /// new one.
    async fn allowed_ports(ctx: &StageContext<'_>) -> anyhow::Result<Vec<u16>> {
        let ssh_port = ctx.ssh_port();
        let mut ports = ctx.config.firewall_ports(ssh_port);

        if ssh_port != DEFAULT_SSH_PORT && !util::is_port_listening(ctx, ssh_port).await? {
            warn!(
                stage = ctx.stage_id,
                "sshd is not confirmed on port {}; keeping port {} open",
                ssh_port,
                DEFAULT_SSH_PORT
            );
            ports.push(DEFAULT_SSH_PORT);
            ports.sort_unstable();
            ports.dedup();
        }
        Ok(ports)
    }

    async fn configure_fail2ban(ctx: &StageContext<'_>) -> anyhow::Result<()> {
        let jail = Fail2banJail::from_config(ctx.config, ctx.ssh_port());
        ctx.executor
            .write_file(Path::new(FAIL2BAN_JAIL), &jail.render(), 0o644)
            .await?;
        util::enable_service(ctx, "fail2ban").await?;
        util::restart_service(ctx, "fail2ban").await
    }

    async fn configure_firewall(ctx: &StageContext<'_>, ports: &[u16]) -> anyhow::Result<()> {
        ctx.exec(CommandSpec::new("ufw").args(["default", "deny", "incoming"]))
            .await?;
        ctx.exec(CommandSpec::new("ufw").args(["default", "allow", "outgoing"]))
            .await?;

        for port in ports {
            ctx.exec(CommandSpec::new("ufw").arg("allow").arg(format!("{}/tcp", port)))
                .await?;
        }

        ctx.exec(CommandSpec::new("ufw").args(["--force", "enable"]))
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Stage for SecurityStage {
    fn id(&self) -> &str {
        "STAGE_3"
    }

    fn description(&self) -> &str {
        "Fail2Ban and firewall"
    }

    fn depends_on(&self) -> Option<&str> {
        Some("STAGE_2")
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> anyhow::Result<StageOutput> {
        ctx.step("install fail2ban and ufw", util::apt_install(ctx, &["fail2ban", "ufw"]))
            .await?;
        ctx.step("configure fail2ban", Self::configure_fail2ban(ctx))
            .await?;
        let ports = ctx.step("check ssh port", Self::allowed_ports(ctx)).await?;
        ctx.step("configure firewall", Self::configure_firewall(ctx, &ports))
            .await?;

        info!(stage = ctx.stage_id, "Firewall allows TCP ports {:?}", ports);
        Ok(StageOutput::done())
    }

    async fn rollback(&self, ctx: &StageContext<'_>) -> anyhow::Result<()> {
        let mut undo = util::Compensation::default();

        let removed = undo.record(
            ctx,
            "remove fail2ban jail",
            ctx.executor.remove_file(Path::new(FAIL2BAN_JAIL)).await.map_err(Into::into),
        );
        if removed == Some(true) {
            undo.record(ctx, "restart fail2ban", util::restart_service(ctx, "fail2ban").await);
        }

        warn!(
            stage = ctx.stage_id,
            "Firewall rules were left as they are; inspect them with 'ufw status verbose'"
        );
        undo.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::PARAM_SSH_PORT;
    use crate::stages::testing::{Harness, RecordingExecutor};
    use crate::state::RunStateStore;

    #[tokio::test]
    async fn test_firewall_rules_follow_recorded_ssh_port() {
        let mut harness = Harness::new();
        harness.config.deploy.enable_portainer = true;
        harness.state.set_parameter(PARAM_SSH_PORT, "2222").unwrap();
        let executor =
            RecordingExecutor::default().with_stdout("ss -Hltn", "LISTEN 0 128 0.0.0.0:2222 0.0.0.0:*\n");
        let ctx = harness.context(&executor, "STAGE_3");

        SecurityStage.execute(&ctx).await.unwrap();

        let commands = executor.commands();
        let allows: Vec<&String> = commands.iter().filter(|c| c.starts_with("ufw allow")).collect();
        assert_eq!(
            allows,
            vec!["ufw allow 80/tcp", "ufw allow 443/tcp", "ufw allow 2222/tcp", "ufw allow 9443/tcp"]
        );

        // rules exist before the firewall is switched on
        let enable = commands.iter().position(|c| c == "ufw --force enable").unwrap();
        let last_allow = commands.iter().rposition(|c| c.starts_with("ufw allow")).unwrap();
        assert!(last_allow < enable);

        let written = executor.written.lock().unwrap();
        assert!(written[Path::new(FAIL2BAN_JAIL)].contains("port = 2222"));
    }

    #[tokio::test]
    async fn test_default_ssh_port_kept_until_new_port_listens() {
        let harness = Harness::new();
        harness.state.set_parameter(PARAM_SSH_PORT, "2222").unwrap();
        // nothing listening on 2222 yet
        let executor = RecordingExecutor::default();
        let ctx = harness.context(&executor, "STAGE_3");

        SecurityStage.execute(&ctx).await.unwrap();
        assert!(executor.ran("ufw allow 22/tcp"));
        assert!(executor.ran("ufw allow 2222/tcp"));
    }

    #[tokio::test]
    async fn test_default_port_needs_no_listening_check() {
        let harness = Harness::new();
        let executor = RecordingExecutor::default();
        let ctx = harness.context(&executor, "STAGE_3");

        SecurityStage.execute(&ctx).await.unwrap();
        assert!(executor.ran("ufw allow 22/tcp"));
        assert!(!executor.ran("ss"));
    }

    #[tokio::test]
    async fn test_rollback_reports_stuck_jail() {
        let harness = Harness::new();
        let executor = RecordingExecutor::default().with_stuck_file(Path::new(FAIL2BAN_JAIL));
        let ctx = harness.context(&executor, "STAGE_3");

        let err = SecurityStage.rollback(&ctx).await.unwrap_err();
        assert!(format!("{:#}", err).contains("remove fail2ban jail"));
        assert!(!executor.ran("ufw"));
    }

    #[tokio::test]
    async fn test_rollback_keeps_firewall() {
        let harness = Harness::new();
        let executor = RecordingExecutor::default();
        let ctx = harness.context(&executor, "STAGE_3");

        SecurityStage.rollback(&ctx).await.unwrap();
        assert_eq!(executor.removed.lock().unwrap().len(), 1);
        assert!(executor.ran("systemctl restart fail2ban"));
        assert!(!executor.ran("ufw"));
    }
}
