// file: src/stages/account.rs
// version: 1.1.0
// guid: 7c8d9e0f-1a2b-4c3d-8e4f-5a6b7c8d9e0f

//! STAGE_2: administrative account and SSH hardening

use super::util;
use crate::config::{validate_username, DEFAULT_SSH_PORT};
use crate::executor::CommandSpec;
use crate::render::{sudoers_fragment, sudoers_path, sudoers_staging_path, SshdHardening, SSHD_DROPIN};
use crate::stage::{Stage, StageContext, StageOutput, PARAM_ADMIN_USER, PARAM_SSH_PORT};
use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub struct AccountStage;

impl AccountStage {
    fn home_dir(user: &str) -> PathBuf {
        PathBuf::from("/home").join(user)
    }

    async fn ensure_account(ctx: &StageContext<'_>, user: &str) -> anyhow::Result<()> {
        if util::user_exists(ctx, user).await? {
            info!(stage = ctx.stage_id, "Account {} already exists", user);
        } else {
            ctx.exec(CommandSpec::new("adduser").args(["--disabled-password", "--gecos", "", user]))
                .await?;
        }
        ctx.exec(CommandSpec::new("usermod").args(["-aG", "sudo", user]))
            .await?;
        Ok(())
    }

    /// Validate the fragment under a name sudo ignores, then rename it into
    /// place; a rejected fragment never reaches the live include directory
    async fn install_sudoers(ctx: &StageContext<'_>, user: &str) -> anyhow::Result<()> {
        let staged = sudoers_staging_path(user);
        let fragment = sudoers_fragment(user, ctx.config.account.passwordless_sudo);
        ctx.executor.write_file(&staged, &fragment, 0o440).await?;

        let checked = ctx
            .exec(CommandSpec::new("visudo").arg("-cf").arg(staged.to_string_lossy()))
            .await;
        if let Err(e) = checked {
            if let Err(cleanup) = ctx.executor.remove_file(&staged).await {
                warn!(stage = ctx.stage_id, "Could not remove {}: {}", staged.display(), cleanup);
            }
            return Err(e.context("generated sudoers fragment was rejected"));
        }

        ctx.executor.rename_file(&staged, &sudoers_path(user)).await?;
        Ok(())
    }

    async fn install_authorized_keys(ctx: &StageContext<'_>, user: &str) -> anyhow::Result<()> {
        let source = &ctx.config.account.authorized_keys_source;
        let keys = match read_keys(source) {
            Ok(keys) => keys,
            Err(e) if ctx.executor.is_dry_run() => {
                warn!(stage = ctx.stage_id, "{:#}", e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let ssh_dir = Self::home_dir(user).join(".ssh");
        let owner = format!("{0}:{0}", user);
        ctx.exec(
            CommandSpec::new("install")
                .args(["-d", "-m", "700", "-o", user, "-g", user])
                .arg(ssh_dir.to_string_lossy()),
        )
        .await?;

        let target = ssh_dir.join("authorized_keys");
        ctx.executor.write_file(&target, &keys, 0o600).await?;
        ctx.exec(CommandSpec::new("chown").arg(owner).arg(target.to_string_lossy()))
            .await?;
        Ok(())
    }

    async fn harden_sshd(ctx: &StageContext<'_>, user: &str, port: u16) -> anyhow::Result<()> {
        let settings = SshdHardening::for_admin(user, port);
        ctx.executor
            .write_file(Path::new(SSHD_DROPIN), &settings.render(), 0o644)
            .await?;
        ctx.exec(CommandSpec::new("sshd").arg("-t"))
            .await
            .context("sshd rejected the hardened configuration")?;
        util::restart_ssh(ctx).await?;

        if !ctx.executor.is_dry_run() && !util::is_port_listening(ctx, port).await? {
            anyhow::bail!("sshd is not listening on port {} after the restart", port);
        }
        Ok(())
    }

    /// Removing the drop-in puts sshd back on the default port; an active
    /// firewall from an earlier run must let it through
    async fn reopen_default_port(ctx: &StageContext<'_>) -> anyhow::Result<()> {
        let status = CommandSpec::new("ufw").arg("status").read_only();
        let active = match ctx.executor.run(&status).await {
            Ok(output) => output.success() && output.stdout.contains("Status: active"),
            // ufw not installed yet
            Err(_) => false,
        };
        if active {
            warn!(
                stage = ctx.stage_id,
                "Allowing port {}/tcp so sshd stays reachable", DEFAULT_SSH_PORT
            );
            ctx.exec(CommandSpec::new("ufw").arg("allow").arg(format!("{}/tcp", DEFAULT_SSH_PORT)))
                .await?;
        }
        Ok(())
    }
}

/// Keys from the source file; refuses an empty set since password login
/// is disabled afterwards
fn read_keys(source: &Path) -> anyhow::Result<String> {
    let content = std::fs::read_to_string(source)
        .with_context(|| format!("cannot read authorized keys from {}", source.display()))?;

    let keys: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();
    if keys.is_empty() {
        anyhow::bail!(
            "{} holds no public keys; refusing to disable password login",
            source.display()
        );
    }

    Ok(format!("{}\n", keys.join("\n")))
}

#[async_trait::async_trait]
impl Stage for AccountStage {
    fn id(&self) -> &str {
        "STAGE_2"
    }

    fn description(&self) -> &str {
        "Admin account and SSH hardening"
    }

    fn depends_on(&self) -> Option<&str> {
        Some("STAGE_1")
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> anyhow::Result<StageOutput> {
        let user = ctx.admin_user();
        validate_username(&user)?;
        let port = ctx.config.account.ssh_port;

        ctx.step("ensure admin account", Self::ensure_account(ctx, &user))
            .await?;
        ctx.step("install sudoers fragment", Self::install_sudoers(ctx, &user))
            .await?;
        ctx.step("install authorized keys", Self::install_authorized_keys(ctx, &user))
            .await?;
        ctx.step("harden ssh daemon", Self::harden_sshd(ctx, &user, port))
            .await?;

        Ok(StageOutput::done()
            .with_param(PARAM_ADMIN_USER, user)
            .with_param(PARAM_SSH_PORT, port.to_string()))
    }

    async fn rollback(&self, ctx: &StageContext<'_>) -> anyhow::Result<()> {
        let user = ctx.admin_user();
        let mut undo = util::Compensation::default();

        undo.record(
            ctx,
            "remove sshd drop-in",
            ctx.executor.remove_file(Path::new(SSHD_DROPIN)).await.map_err(Into::into),
        );
        undo.record(
            ctx,
            "remove sudoers fragment",
            ctx.executor.remove_file(&sudoers_path(&user)).await.map_err(Into::into),
        );
        undo.record(
            ctx,
            "remove staged sudoers fragment",
            ctx.executor.remove_file(&sudoers_staging_path(&user)).await.map_err(Into::into),
        );
        undo.record(ctx, "restart ssh", util::restart_ssh(ctx).await);
        undo.record(ctx, "reopen default ssh port", Self::reopen_default_port(ctx).await);

        info!(
            stage = ctx.stage_id,
            "Account {} and its home directory were kept", user
        );
        undo.finish()
    }
}
