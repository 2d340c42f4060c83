// file: src/config/mod.rs
// version: 2.1.0
// guid: a1b2c3d4-e5f6-7a8b-9c0d-1e2f3a4b5c6d

//! Configuration for the bootstrap orchestrator
//!
//! A single immutable [`BootstrapConfig`] is assembled once at startup from
//! defaults, an optional TOML file, `VPS_BOOTSTRAP_*` environment variables
//! and command line flags (see [`loader::ConfigLoader`]). Stages receive it by
//! reference and never consult the environment themselves.

pub mod loader;

use crate::error::{BootstrapError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

/// Port sshd listens on before the account stage moves it
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Complete orchestrator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BootstrapConfig {
    #[validate(nested)]
    pub general: GeneralConfig,
    #[validate(nested)]
    pub requirements: RequirementsConfig,
    #[validate(nested)]
    pub logging: LoggingConfig,
    #[validate(nested)]
    pub account: AccountConfig,
    #[validate(nested)]
    pub security: SecurityConfig,
    pub deploy: DeployConfig,
    pub reboot: RebootConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GeneralConfig {
    /// Durable run state file
    pub state_file: PathBuf,
    /// Simulate without mutating the host or the run state
    pub dry_run: bool,
    /// Prompt for run parameters instead of accepting defaults
    pub interactive: bool,
    /// Skip the platform identity check
    pub skip_os_check: bool,
    /// Stage to force re-execution of
    pub force_stage: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("/var/lib/vps-bootstrap/state"),
            dry_run: false,
            interactive: false,
            skip_os_check: false,
            force_stage: None,
        }
    }
}

/// Host requirements verified before any mutating action
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RequirementsConfig {
    #[validate(range(min = 1))]
    pub min_disk_mb: u64,
    /// Filesystem the disk check measures
    pub disk_path: PathBuf,
    #[validate(range(min = 1))]
    pub min_memory_mb: u64,
    #[validate(range(min = 1, max = 1024))]
    pub min_cpu_cores: usize,
    pub connectivity_host: String,
    #[validate(range(min = 1))]
    pub connectivity_port: u16,
    #[validate(range(min = 1, max = 300))]
    pub connectivity_timeout_secs: u64,
    /// Expected `ID` from /etc/os-release
    pub expected_os_id: String,
    /// Accepted `VERSION_ID` values; empty accepts any release
    pub supported_versions: Vec<String>,
}

impl Default for RequirementsConfig {
    fn default() -> Self {
        Self {
            min_disk_mb: 10 * 1024,
            disk_path: PathBuf::from("/"),
            min_memory_mb: 1024,
            min_cpu_cores: 1,
            connectivity_host: "archive.ubuntu.com".to_string(),
            connectivity_port: 80,
            connectivity_timeout_secs: 5,
            expected_os_id: "ubuntu".to_string(),
            supported_versions: vec!["22.04".to_string(), "24.04".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingConfig {
    /// Durable, append-only log artifact
    pub file: PathBuf,
    pub level: String,
    pub format: LogFormat,
    /// Rotate the log file once it grows past this size
    #[validate(range(min = 1))]
    pub max_size_mb: u64,
    #[validate(range(min = 1, max = 50))]
    pub keep_archives: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("/var/log/vps-bootstrap.log"),
            level: "info".to_string(),
            format: LogFormat::Compact,
            max_size_mb: 10,
            keep_archives: 5,
        }
    }
}

/// Console log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AccountConfig {
    /// Administrative account created by the account stage
    pub admin_user: String,
    #[validate(range(min = 1))]
    pub ssh_port: u16,
    /// Authorized keys copied into the admin account
    pub authorized_keys_source: PathBuf,
    pub passwordless_sudo: bool,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            admin_user: "deploy".to_string(),
            ssh_port: DEFAULT_SSH_PORT,
            authorized_keys_source: PathBuf::from("/root/.ssh/authorized_keys"),
            passwordless_sudo: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SecurityConfig {
    #[validate(range(min = 1))]
    pub fail2ban_bantime_secs: u64,
    #[validate(range(min = 1))]
    pub fail2ban_findtime_secs: u64,
    #[validate(range(min = 1, max = 100))]
    pub fail2ban_maxretry: u32,
    /// Extra TCP ports opened in the firewall
    pub extra_ports: Vec<u16>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            fail2ban_bantime_secs: 3600,
            fail2ban_findtime_secs: 600,
            fail2ban_maxretry: 5,
            extra_ports: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Externally supplied service topology
    pub compose_file: PathBuf,
    /// Externally supplied environment for the stack
    pub env_file: PathBuf,
    /// Directory the stack is deployed from
    pub project_dir: PathBuf,
    pub enable_portainer: bool,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            compose_file: PathBuf::from("docker-compose.yml"),
            env_file: PathBuf::from(".env"),
            project_dir: PathBuf::from("/opt/n8n-stack"),
            enable_portainer: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RebootConfig {
    /// File whose presence means a reboot is pending
    pub marker_path: PathBuf,
    /// Reboot automatically instead of asking the operator to
    pub auto_reboot: bool,
}

impl Default for RebootConfig {
    fn default() -> Self {
        Self {
            marker_path: PathBuf::from("/var/run/reboot-required"),
            auto_reboot: false,
        }
    }
}

impl BootstrapConfig {
    /// Validate ranges and the cross-field rules serde cannot express
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        validate_username(&self.account.admin_user)?;

        if !matches!(self.logging.level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
            return Err(BootstrapError::config(format!(
                "Unknown log level: {}",
                self.logging.level
            )));
        }

        if let Some(stage) = &self.general.force_stage {
            if stage.trim().is_empty() {
                return Err(BootstrapError::config("force_stage must not be empty"));
            }
        }

        Ok(())
    }

    /// TCP ports the firewall must allow, given the SSH port in use
    pub fn firewall_ports(&self, ssh_port: u16) -> Vec<u16> {
        let mut ports = vec![ssh_port, 80, 443];
        if self.deploy.enable_portainer {
            ports.push(9443);
        }
        ports.extend(self.security.extra_ports.iter().copied());
        ports.sort_unstable();
        ports.dedup();
        ports
    }
}

/// Check that a name is usable as a Linux account name
pub fn validate_username(name: &str) -> Result<()> {
    let re = Regex::new(r"^[a-z_][a-z0-9_-]{0,31}$")
        .map_err(|e| BootstrapError::config(format!("Invalid regex pattern: {}", e)))?;

    if name == "root" {
        return Err(BootstrapError::validation("admin account must not be root"));
    }
    if !re.is_match(name) {
        return Err(BootstrapError::validation(format!(
            "Invalid account name '{}': use lowercase letters, digits, '-' or '_'",
            name
        )));
    }
    Ok(())
}
