// file: src/stages/deploy.rs
// version: 1.0.0
// guid: 0f1a2b3c-4d5e-4f6a-9b7c-8d9e0f1a2b3c

//! STAGE_5: hand the service stack over to docker compose

use crate::executor::{CommandSpec, Principal};
use crate::handoff::StackEnv;
use crate::preconditions::{CheckResult, PreconditionReport};
use crate::stage::{Stage, StageContext, StageOutput};
use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::info;

const COMPOSE_NAME: &str = "docker-compose.yml";
const ENV_NAME: &str = ".env";

pub struct DeployStage;

impl DeployStage {
    fn compose_command(ctx: &StageContext<'_>, user: &str) -> CommandSpec {
        let dir = &ctx.config.deploy.project_dir;
        let mut spec = CommandSpec::new("docker")
            .arg("compose")
            .arg("--project-directory")
            .arg(dir.to_string_lossy())
            .arg("-f")
            .arg(dir.join(COMPOSE_NAME).to_string_lossy());
        if ctx.config.deploy.enable_portainer {
            spec = spec.args(["--profile", "portainer"]);
        }
        spec.as_principal(Principal::User(user.to_string()))
    }

    fn file_present(name: &str, path: &Path) -> CheckResult {
        if path.is_file() {
            CheckResult {
                name: name.to_string(),
                passed: true,
                reason: format!("{} found", path.display()),
            }
        } else {
            CheckResult {
                name: name.to_string(),
                passed: false,
                reason: format!("{} does not exist", path.display()),
            }
        }
    }

    async fn install_files(ctx: &StageContext<'_>, user: &str) -> anyhow::Result<()> {
        let deploy = &ctx.config.deploy;
        let owner = format!("{0}:{0}", user);

        ctx.exec(
            CommandSpec::new("install")
                .args(["-d", "-m", "750", "-o", user, "-g", user])
                .arg(deploy.project_dir.to_string_lossy()),
        )
        .await?;

        let targets: [(&PathBuf, &str, u32); 2] = [
            (&deploy.compose_file, COMPOSE_NAME, 0o644),
            (&deploy.env_file, ENV_NAME, 0o600),
        ];
        for (source, name, mode) in targets {
            let contents = std::fs::read_to_string(source)
                .with_context(|| format!("cannot read {}", source.display()))?;
            let target = deploy.project_dir.join(name);
            ctx.executor.write_file(&target, &contents, mode).await?;
            ctx.exec(CommandSpec::new("chown").arg(owner.as_str()).arg(target.to_string_lossy()))
                .await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Stage for DeployStage {
    fn id(&self) -> &str {
        "STAGE_5"
    }

    fn description(&self) -> &str {
        "Service stack deployment"
    }

    fn depends_on(&self) -> Option<&str> {
        Some("STAGE_4")
    }

    async fn preconditions(&self, ctx: &StageContext<'_>) -> PreconditionReport {
        PreconditionReport {
            results: vec![
                Self::file_present("compose file", &ctx.config.deploy.compose_file),
                Self::file_present("environment file", &ctx.config.deploy.env_file),
            ],
        }
    }

    async fn execute(&self, ctx: &StageContext<'_>) -> anyhow::Result<StageOutput> {
        let user = ctx.admin_user();

        ctx.step("validate stack environment", async {
            StackEnv::load(&ctx.config.deploy.env_file)?.validate()?;
            anyhow::Ok(())
        })
        .await?;
        ctx.step("install stack files", Self::install_files(ctx, &user))
            .await?;
        ctx.step("start service stack", async {
            ctx.exec(Self::compose_command(ctx, &user).args(["up", "-d"]))
                .await?;
            anyhow::Ok(())
        })
        .await?;

        info!(
            stage = ctx.stage_id,
            "Stack running from {} as {}",
            ctx.config.deploy.project_dir.display(),
            user
        );
        Ok(StageOutput::done())
    }

    async fn rollback(&self, ctx: &StageContext<'_>) -> anyhow::Result<()> {
        let user = ctx.admin_user();
        ctx.exec(Self::compose_command(ctx, &user).arg("down"))
            .await
            .context("could not stop the partially started stack")?;
        info!(stage = ctx.stage_id, "Stack stopped; volumes and files were kept");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::{Harness, RecordingExecutor};
    use std::fs;
    use tempfile::TempDir;

    const ENV: &str = "N8N_HOST=example.com\nN8N_PROTOCOL=https\nN8N_BASIC_AUTH_USER=a\nN8N_BASIC_AUTH_PASSWORD=b\nPOSTGRES_USER=u\nPOSTGRES_PASSWORD=p\nPOSTGRES_DB=d\nSSL_EMAIL=ops@example.com\n";

    fn harness(dir: &TempDir, env: &str) -> Harness {
        let compose = dir.path().join("compose.yml");
        let env_file = dir.path().join("stack.env");
        fs::write(&compose, "services: {}\n").unwrap();
        fs::write(&env_file, env).unwrap();

        let mut harness = Harness::new();
        harness.config.deploy.compose_file = compose;
        harness.config.deploy.env_file = env_file;
        harness.config.deploy.project_dir = PathBuf::from("/opt/stack");
        harness
    }

    #[tokio::test]
    async fn test_deploys_as_admin_user() {
        let dir = TempDir::new().unwrap();
        let mut harness = harness(&dir, ENV);
        harness.config.deploy.enable_portainer = true;
        let executor = RecordingExecutor::default();
        let ctx = harness.context(&executor, "STAGE_5");

        assert!(DeployStage.preconditions(&ctx).await.passed());
        DeployStage.execute(&ctx).await.unwrap();

        assert!(executor.ran(
            "[as deploy] docker compose --project-directory /opt/stack -f /opt/stack/docker-compose.yml --profile portainer up -d"
        ));
        let written = executor.written.lock().unwrap();
        assert_eq!(written[Path::new("/opt/stack/.env")], ENV);
        assert_eq!(written[Path::new("/opt/stack/docker-compose.yml")], "services: {}\n");
    }

    #[tokio::test]
    async fn test_invalid_env_stops_before_any_change() {
        let dir = TempDir::new().unwrap();
        let harness = harness(&dir, "N8N_HOST=example.com\n");
        let executor = RecordingExecutor::default();
        let ctx = harness.context(&executor, "STAGE_5");

        let err = DeployStage.execute(&ctx).await.unwrap_err();
        assert!(format!("{:#}", err).contains("POSTGRES_DB is missing"));
        assert!(executor.commands().is_empty());
    }

    #[tokio::test]
    async fn test_missing_inputs_fail_preconditions() {
        let dir = TempDir::new().unwrap();
        let mut harness = Harness::new();
        harness.config.deploy.compose_file = dir.path().join("absent.yml");
        harness.config.deploy.env_file = dir.path().join("absent.env");
        let executor = RecordingExecutor::default();
        let ctx = harness.context(&executor, "STAGE_5");

        let report = DeployStage.preconditions(&ctx).await;
        assert_eq!(report.failures().len(), 2);
    }

    #[tokio::test]
    async fn test_rollback_takes_stack_down() {
        let dir = TempDir::new().unwrap();
        let harness = harness(&dir, ENV);
        let executor = RecordingExecutor::default();
        let ctx = harness.context(&executor, "STAGE_5");

        DeployStage.rollback(&ctx).await.unwrap();
        assert!(executor.ran("[as deploy] docker compose --project-directory /opt/stack"));
        assert!(executor.commands()[0].ends_with(" down"));
    }
}
