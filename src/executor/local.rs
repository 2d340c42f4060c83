// file: src/executor/local.rs
// version: 2.1.0
// guid: local001-2345-6789-abcd-ef0123456789

//! Local command execution on the host being provisioned

use super::{CommandExecutor, CommandOutput, CommandSpec, Principal};
use crate::error::{BootstrapError, Result};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Executes commands directly on this machine
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }

    fn build(spec: &CommandSpec) -> Command {
        let mut cmd = match &spec.principal {
            Principal::Root => {
                let mut cmd = Command::new(&spec.program);
                cmd.args(&spec.args);
                cmd
            }
            Principal::User(user) => {
                let mut cmd = Command::new("runuser");
                cmd.args(["-u", user.as_str(), "--", spec.program.as_str()])
                    .args(&spec.args);
                cmd
            }
        };

        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

#[async_trait::async_trait]
impl CommandExecutor for LocalExecutor {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!("Executing local command: {}", spec.display());

        if which::which(&spec.program).is_err() {
            return Err(BootstrapError::process(
                spec.display(),
                None,
                format!("command not found: {}", spec.program),
            ));
        }

        let output = Self::build(spec).output().await.map_err(|e| {
            BootstrapError::process(spec.display(), None, format!("Failed to execute command: {}", e))
        })?;

        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        debug!("Command finished with exit code {:?}", result.exit_code);
        Ok(result)
    }

    async fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<()> {
        debug!("Writing {} (mode {:o})", path.display(), mode);

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(dir).await?;

        let file_name = path
            .file_name()
            .ok_or_else(|| BootstrapError::invalid_argument(format!("not a file path: {}", path.display())))?;
        let mut tmp_name = std::ffi::OsString::from(".");
        tmp_name.push(file_name);
        tmp_name.push(".vps-bootstrap.tmp");
        let tmp = dir.join(tmp_name);

        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(mode)).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn rename_file(&self, from: &Path, to: &Path) -> Result<()> {
        debug!("Moving {} to {}", from.display(), to.display());
        tokio::fs::rename(from, to).await?;
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!("Removed {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
