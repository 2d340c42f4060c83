// file: src/interruption.rs
// version: 1.1.0
// guid: 4c8e1f2a-6b3d-4e7f-9a05-b1d2c3e4f5a6

//! Suspension handling: reboot detection, operator stop requests and
//! resume instructions

use crate::config::BootstrapConfig;
use crate::error::Result;
use crate::executor::{CommandExecutor, CommandSpec};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Operator request to stop the run at the next stage boundary
///
/// Clones share one flag. The runner checks it before starting each stage;
/// a stage body that is already running is never cut short.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    requested: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop; returns true if a stop was already requested
    pub fn request(&self) -> bool {
        self.requested.swap(true, Ordering::SeqCst)
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Reads the host's reboot-required marker
#[derive(Debug, Clone)]
pub struct RebootDetector {
    marker: PathBuf,
}

impl RebootDetector {
    pub fn new(marker: impl Into<PathBuf>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn from_config(config: &BootstrapConfig) -> Self {
        Self::new(&config.reboot.marker_path)
    }

    /// Package list written next to the marker by the package manager
    fn packages_path(&self) -> PathBuf {
        let mut name = self.marker.as_os_str().to_os_string();
        name.push(".pkgs");
        PathBuf::from(name)
    }

    /// Reason a reboot is pending, if one is
    pub fn pending(&self) -> Option<String> {
        if !self.marker.exists() {
            return None;
        }

        let packages: Vec<String> = fs::read_to_string(self.packages_path())
            .map(|content| {
                let mut pkgs: Vec<String> = content
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(String::from)
                    .collect();
                pkgs.sort();
                pkgs.dedup();
                pkgs
            })
            .unwrap_or_default();

        if packages.is_empty() {
            Some("system updates require a reboot".to_string())
        } else {
            Some(format!(
                "system updates require a reboot (packages: {})",
                packages.join(", ")
            ))
        }
    }
}

/// Exact command that resumes the run after the interruption
pub fn resume_command(config_path: Option<&Path>, config: &BootstrapConfig) -> String {
    let mut parts = vec!["sudo".to_string(), "vps-bootstrap".to_string()];
    if let Some(path) = config_path {
        parts.push(format!("--config {}", path.display()));
    }
    parts.push(format!("--state-file {}", config.general.state_file.display()));
    parts.push("run".to_string());
    if config.general.skip_os_check {
        parts.push("--skip-os-check".to_string());
    }
    parts.join(" ")
}

/// Operator-facing text explaining how to continue
pub fn resume_instructions(stage_id: &str, reason: &str, resume: &str, rebooting: bool) -> String {
    let mut text = String::new();
    text.push_str(&format!("{} completed, but {}.\n", stage_id, reason));
    if rebooting {
        text.push_str("The host is rebooting now.\n");
    } else {
        text.push_str("Reboot the host:\n\n    sudo reboot\n\n");
    }
    text.push_str(&format!(
        "After it comes back, resume the remaining stages with:\n\n    {}\n",
        resume
    ));
    text
}

/// Schedule a reboot when configured to; returns whether one was requested
///
/// Only called after run state for the finished stage has been persisted.
pub async fn maybe_reboot(config: &BootstrapConfig, executor: &dyn CommandExecutor) -> Result<bool> {
    if !config.reboot.auto_reboot {
        return Ok(false);
    }
    if executor.is_dry_run() {
        info!("DRY RUN: would reboot the host");
        return Ok(false);
    }

    warn!("Rebooting the host to continue provisioning");
    executor
        .run_checked(&CommandSpec::new("systemctl").arg("reboot"))
        .await?;
    Ok(true)
}
