// file: src/config/loader.rs
// version: 2.0.0
// guid: d4e5f6g7-h8i9-0123-4567-890123defghi

//! Configuration assembly: defaults, TOML file, environment, flags

use super::BootstrapConfig;
use crate::error::{BootstrapError, Result};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// System-wide configuration file consulted when `--config` is not given
pub const SYSTEM_CONFIG_PATH: &str = "/etc/vps-bootstrap/config.toml";

/// Prefix of environment variables that override configuration values
pub const ENV_PREFIX: &str = "VPS_BOOTSTRAP_";

/// Values supplied on the command line; `None` leaves the lower layers alone
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub state_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub dry_run: bool,
    pub interactive: bool,
    pub skip_os_check: bool,
    pub force_stage: Option<String>,
    pub admin_user: Option<String>,
    pub verbose: bool,
}

/// Configuration loader with environment variable substitution
pub struct ConfigLoader {
    env_vars: HashMap<String, String>,
}

impl ConfigLoader {
    /// Create a loader over the current process environment
    pub fn new() -> Self {
        Self {
            env_vars: std::env::vars().collect(),
        }
    }

    /// Create a loader over an explicit environment
    pub fn with_env(env_vars: HashMap<String, String>) -> Self {
        Self { env_vars }
    }

    /// Assemble the final configuration
    ///
    /// An explicit `path` must exist; the default locations are optional.
    pub fn load(&self, path: Option<&Path>, overrides: &ConfigOverrides) -> Result<BootstrapConfig> {
        let mut config = match path {
            Some(path) => self.load_file(path)?,
            None => match Self::default_config_path() {
                Some(found) => self.load_file(&found)?,
                None => BootstrapConfig::default(),
            },
        };

        self.apply_env_overrides(&mut config)?;
        Self::apply_overrides(&mut config, overrides);
        Self::expand_paths(&mut config)?;

        config.check()?;
        debug!("Final configuration: {:#?}", config);
        Ok(config)
    }

    /// First existing configuration file among the default locations
    fn default_config_path() -> Option<PathBuf> {
        let system = PathBuf::from(SYSTEM_CONFIG_PATH);
        if system.exists() {
            return Some(system);
        }

        dirs::config_dir()
            .map(|dir| dir.join("vps-bootstrap").join("config.toml"))
            .filter(|p| p.exists())
    }

    /// Load configuration from a TOML file
    pub fn load_file(&self, path: &Path) -> Result<BootstrapConfig> {
        let content = fs::read_to_string(path).map_err(|e| {
            BootstrapError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let expanded = self.expand_env_vars(&content)?;
        toml::from_str(&expanded).map_err(|e| {
            BootstrapError::config(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Expand `${VAR}` references in configuration content
    fn expand_env_vars(&self, content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| BootstrapError::config(format!("Invalid regex pattern: {}", e)))?;

        let mut result = content.to_string();
        let mut missing_vars = Vec::new();

        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let placeholder = &cap[0];

            if let Some(value) = self.env_vars.get(var_name) {
                result = result.replace(placeholder, value);
            } else {
                missing_vars.push(var_name.to_string());
            }
        }

        if !missing_vars.is_empty() {
            return Err(BootstrapError::config(format!(
                "Missing environment variables: {}",
                missing_vars.join(", ")
            )));
        }

        Ok(result)
    }

    fn env(&self, key: &str) -> Option<&str> {
        self.env_vars
            .get(&format!("{}{}", ENV_PREFIX, key))
            .map(String::as_str)
    }

    fn env_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.env(key) {
            None => Ok(None),
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Some(true)),
                "0" | "false" | "no" | "off" | "" => Ok(Some(false)),
                other => Err(BootstrapError::config(format!(
                    "{}{} must be a boolean, got '{}'",
                    ENV_PREFIX, key, other
                ))),
            },
        }
    }

    fn env_parse<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.env(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
                BootstrapError::config(format!(
                    "{}{} has an invalid value '{}'",
                    ENV_PREFIX, key, raw
                ))
            }),
        }
    }

    /// Apply `VPS_BOOTSTRAP_*` environment overrides
    fn apply_env_overrides(&self, config: &mut BootstrapConfig) -> Result<()> {
        if let Some(v) = self.env("STATE_FILE") {
            config.general.state_file = PathBuf::from(v);
        }
        if let Some(v) = self.env_bool("DRY_RUN")? {
            config.general.dry_run = v;
        }
        if let Some(v) = self.env_bool("SKIP_OS_CHECK")? {
            config.general.skip_os_check = v;
        }
        if let Some(v) = self.env("LOG_FILE") {
            config.logging.file = PathBuf::from(v);
        }
        if let Some(v) = self.env("LOG_LEVEL") {
            config.logging.level = v.to_string();
        }
        if let Some(v) = self.env("ADMIN_USER") {
            config.account.admin_user = v.to_string();
        }
        if let Some(v) = self.env_parse::<u16>("SSH_PORT")? {
            config.account.ssh_port = v;
        }
        if let Some(v) = self.env_parse::<u64>("MIN_DISK_MB")? {
            config.requirements.min_disk_mb = v;
        }
        if let Some(v) = self.env_parse::<u64>("MIN_MEMORY_MB")? {
            config.requirements.min_memory_mb = v;
        }
        if let Some(v) = self.env_parse::<usize>("MIN_CPU_CORES")? {
            config.requirements.min_cpu_cores = v;
        }
        if let Some(v) = self.env("COMPOSE_FILE") {
            config.deploy.compose_file = PathBuf::from(v);
        }
        if let Some(v) = self.env("ENV_FILE") {
            config.deploy.env_file = PathBuf::from(v);
        }
        if let Some(v) = self.env_bool("ENABLE_PORTAINER")? {
            config.deploy.enable_portainer = v;
        }
        if let Some(v) = self.env_bool("AUTO_REBOOT")? {
            config.reboot.auto_reboot = v;
        }
        Ok(())
    }

    /// Apply command line flags, the highest precedence layer
    fn apply_overrides(config: &mut BootstrapConfig, overrides: &ConfigOverrides) {
        if let Some(path) = &overrides.state_file {
            config.general.state_file = path.clone();
        }
        if let Some(path) = &overrides.log_file {
            config.logging.file = path.clone();
        }
        if let Some(user) = &overrides.admin_user {
            config.account.admin_user = user.clone();
        }
        if overrides.force_stage.is_some() {
            config.general.force_stage = overrides.force_stage.clone();
        }
        config.general.dry_run |= overrides.dry_run;
        config.general.interactive |= overrides.interactive;
        config.general.skip_os_check |= overrides.skip_os_check;
        if overrides.verbose {
            config.logging.level = "debug".to_string();
        }
    }

    /// Expand `~` and `$VAR` in path settings
    fn expand_paths(config: &mut BootstrapConfig) -> Result<()> {
        let paths = [
            &mut config.general.state_file,
            &mut config.logging.file,
            &mut config.account.authorized_keys_source,
            &mut config.deploy.compose_file,
            &mut config.deploy.env_file,
            &mut config.deploy.project_dir,
        ];

        for path in paths {
            let raw = path.to_string_lossy().to_string();
            let expanded = shellexpand::full(&raw).map_err(|e| {
                BootstrapError::config(format!("Failed to expand path {}: {}", raw, e))
            })?;
            *path = PathBuf::from(expanded.as_ref());
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
