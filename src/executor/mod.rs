// file: src/executor/mod.rs
// version: 3.1.0
// guid: bb371682-35cb-4f34-b318-8bf69ec125bd

//! Host command execution
//!
//! Stage bodies never spawn processes or touch files directly; they go
//! through a [`CommandExecutor`], which can run a command as an alternate
//! principal and which has a dry-run variant that mutates nothing.

pub mod dry_run;
pub mod local;

pub use dry_run::DryRunExecutor;
pub use local::LocalExecutor;

use crate::error::{BootstrapError, Result};
use std::fmt;
use std::path::Path;
use tracing::error;

/// Account a command runs as
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Principal {
    /// The orchestrator's own (root) identity
    #[default]
    Root,
    /// An unprivileged account, entered through `runuser`
    User(String),
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::Root => write!(f, "root"),
            Principal::User(name) => write!(f, "{}", name),
        }
    }
}

/// A command to run on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub principal: Principal,
    /// Queries that never change the host; dry runs still execute them
    pub read_only: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            principal: Principal::Root,
            read_only: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn as_principal(mut self, principal: Principal) -> Self {
        self.principal = principal;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Shell-like rendering for logs
    pub fn display(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().map(|a| {
            if a.is_empty() || a.contains(char::is_whitespace) {
                format!("'{}'", a)
            } else {
                a.clone()
            }
        }));
        let command = parts.join(" ");

        match &self.principal {
            Principal::Root => command,
            Principal::User(user) => format!("[as {}] {}", user, command),
        }
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Capability through which stages act on the host
#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run a command to completion, whatever its exit status
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Write a file atomically with the given permission bits
    async fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<()>;

    /// Remove a file; returns false if it did not exist
    async fn remove_file(&self, path: &Path) -> Result<bool>;

    /// Move a file over its destination in one rename
    async fn rename_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// Whether host mutations are being simulated
    fn is_dry_run(&self) -> bool {
        false
    }

    /// Run a command and fail on a non-zero exit, returning stdout
    async fn run_checked(&self, spec: &CommandSpec) -> Result<String> {
        let output = self.run(spec).await?;

        if !output.success() {
            error!(
                "Command '{}' failed with exit code {:?}",
                spec.display(),
                output.exit_code
            );
            if !output.stdout.trim().is_empty() {
                error!("STDOUT: {}", output.stdout.trim());
            }
            if !output.stderr.trim().is_empty() {
                error!("STDERR: {}", output.stderr.trim());
            }

            let detail = if output.stderr.trim().is_empty() {
                output.stdout
            } else {
                output.stderr
            };
            return Err(BootstrapError::process(
                spec.display(),
                output.exit_code,
                detail.trim(),
            ));
        }

        Ok(output.stdout)
    }

    /// Run a command intended as a boolean check
    async fn check(&self, spec: &CommandSpec) -> Result<bool> {
        Ok(self.run(spec).await?.success())
    }
}
