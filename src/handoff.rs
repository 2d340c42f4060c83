// file: src/handoff.rs
// version: 1.0.0
// guid: 2e3f4a5b-6c7d-4e8f-9a0b-c1d2e3f4a5b6

//! Validation of the environment file handed to the service stack

use crate::error::{BootstrapError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Keys the deployed stack understands
pub const KNOWN_KEYS: &[&str] = &[
    "N8N_HOST",
    "N8N_PORT",
    "N8N_PROTOCOL",
    "N8N_BASIC_AUTH_ACTIVE",
    "N8N_BASIC_AUTH_USER",
    "N8N_BASIC_AUTH_PASSWORD",
    "POSTGRES_USER",
    "POSTGRES_PASSWORD",
    "POSTGRES_DB",
    "DB_POSTGRESDB_HOST",
    "DB_POSTGRESDB_PORT",
    "SSL_EMAIL",
    "GENERIC_TIMEZONE",
];

/// Keys the stack cannot start without
pub const REQUIRED_KEYS: &[&str] = &[
    "N8N_HOST",
    "N8N_PROTOCOL",
    "N8N_BASIC_AUTH_USER",
    "N8N_BASIC_AUTH_PASSWORD",
    "POSTGRES_USER",
    "POSTGRES_PASSWORD",
    "POSTGRES_DB",
    "SSL_EMAIL",
];

/// Parsed `KEY=value` environment file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackEnv {
    pub values: BTreeMap<String, String>,
}

impl StackEnv {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            BootstrapError::config(format!(
                "Cannot read stack environment file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    /// Parse dotenv-style content: comments, blank lines, optional
    /// `export ` prefix and matching surrounding quotes
    pub fn parse(content: &str) -> Result<Self> {
        let mut values = BTreeMap::new();

        for (number, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);

            let (key, value) = line.split_once('=').ok_or_else(|| {
                BootstrapError::validation(format!(
                    "line {} of the stack environment is not KEY=value",
                    number + 1
                ))
            })?;

            values.insert(key.trim().to_string(), unquote(value.trim()).to_string());
        }

        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Check required keys and value formats, collecting every problem
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        for key in REQUIRED_KEYS {
            if self.get(key).map(str::is_empty).unwrap_or(true) {
                problems.push(format!("{} is missing", key));
            }
        }

        for key in ["N8N_PORT", "DB_POSTGRESDB_PORT"] {
            if let Some(value) = self.get(key) {
                if value.parse::<u16>().map(|p| p == 0).unwrap_or(true) {
                    problems.push(format!("{} must be a port number, got '{}'", key, value));
                }
            }
        }

        if let Some(protocol) = self.get("N8N_PROTOCOL") {
            if !protocol.is_empty() && !matches!(protocol, "http" | "https") {
                problems.push(format!("N8N_PROTOCOL must be http or https, got '{}'", protocol));
            }
        }

        if let Some(active) = self.get("N8N_BASIC_AUTH_ACTIVE") {
            if !matches!(active, "true" | "false") {
                problems.push(format!("N8N_BASIC_AUTH_ACTIVE must be true or false, got '{}'", active));
            }
        }

        if let Some(email) = self.get("SSL_EMAIL") {
            if !email.is_empty() && !looks_like_email(email) {
                problems.push(format!("SSL_EMAIL is not an email address: '{}'", email));
            }
        }

        for key in self.values.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                warn!("Stack environment key {} is not used by the deployment", key);
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(BootstrapError::validation(format!(
                "stack environment is invalid: {}",
                problems.join("; ")
            )))
        }
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}
