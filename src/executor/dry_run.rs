// file: src/executor/dry_run.rs
// version: 1.1.0
// guid: 8a3f5d1c-e2b7-4c96-9f04-6d1e7b2a5c83

//! Dry-run executor: reports intended mutations without performing them

use super::{CommandExecutor, CommandOutput, CommandSpec, LocalExecutor};
use crate::error::Result;
use std::path::Path;
use tracing::info;

/// Logs every mutating action instead of running it
///
/// Read-only queries still reach the host so that idempotency checks see
/// the real machine.
#[derive(Debug, Clone, Default)]
pub struct DryRunExecutor {
    inner: LocalExecutor,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CommandExecutor for DryRunExecutor {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        if spec.read_only {
            return self.inner.run(spec).await;
        }

        info!("DRY RUN: would execute: {}", spec.display());
        Ok(CommandOutput {
            exit_code: Some(0),
            ..Default::default()
        })
    }

    async fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<()> {
        info!(
            "DRY RUN: would write {} (mode {:o}, {} bytes)",
            path.display(),
            mode,
            contents.len()
        );
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> Result<bool> {
        info!("DRY RUN: would remove {}", path.display());
        Ok(path.exists())
    }

    async fn rename_file(&self, from: &Path, to: &Path) -> Result<()> {
        info!("DRY RUN: would move {} to {}", from.display(), to.display());
        Ok(())
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}
