// file: src/preconditions/mod.rs
// version: 1.0.0
// guid: e2a8c5f1-7b34-4d9e-8c61-0f5b3d7a9e24

//! Non-mutating host checks run before any provisioning action
//!
//! Every check returns a [`CheckResult`] with a human readable reason; the
//! checks are safe to repeat and never change the host.

pub mod probe;

pub use probe::{HostProbe, OsRelease, SystemProbe};

use crate::config::RequirementsConfig;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

/// Outcome of one precondition check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub reason: String,
}

impl CheckResult {
    fn pass(name: &str, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            reason: reason.into(),
        }
    }

    fn fail(name: &str, reason: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.passed { "PASS" } else { "FAIL" };
        write!(f, "[{}] {}: {}", mark, self.name, self.reason)
    }
}

/// Results of a full precondition pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreconditionReport {
    pub results: Vec<CheckResult>,
}

impl PreconditionReport {
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn failures(&self) -> Vec<&CheckResult> {
        self.results.iter().filter(|r| !r.passed).collect()
    }

    /// One line naming every failed check
    pub fn failure_summary(&self) -> String {
        self.failures()
            .iter()
            .map(|r| format!("{}: {}", r.name, r.reason))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Which optional checks apply to this run
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckOptions {
    pub skip_os_check: bool,
    pub require_root: bool,
}

/// Verifies host resources and identity against configured minimums
pub struct PreconditionChecker<'a> {
    requirements: &'a RequirementsConfig,
    probe: &'a dyn HostProbe,
}

impl<'a> PreconditionChecker<'a> {
    pub fn new(requirements: &'a RequirementsConfig, probe: &'a dyn HostProbe) -> Self {
        Self {
            requirements,
            probe,
        }
    }

    pub fn check_disk(&self) -> CheckResult {
        let name = "disk";
        let path = &self.requirements.disk_path;
        let min = self.requirements.min_disk_mb;

        match self.probe.available_disk_mb(path) {
            Ok(free) if free >= min => CheckResult::pass(
                name,
                format!("{} MB free on {} (minimum {} MB)", free, path.display(), min),
            ),
            Ok(free) => CheckResult::fail(
                name,
                format!(
                    "only {} MB free on {}, at least {} MB required",
                    free,
                    path.display(),
                    min
                ),
            ),
            Err(e) => CheckResult::fail(name, format!("unable to determine free space: {}", e)),
        }
    }

    pub fn check_memory(&self) -> CheckResult {
        let name = "memory";
        let min = self.requirements.min_memory_mb;

        match self.probe.total_memory_mb() {
            Ok(total) if total >= min => {
                CheckResult::pass(name, format!("{} MB total (minimum {} MB)", total, min))
            }
            Ok(total) => CheckResult::fail(
                name,
                format!("only {} MB of memory, at least {} MB required", total, min),
            ),
            Err(e) => CheckResult::fail(name, format!("unable to determine memory: {}", e)),
        }
    }

    pub fn check_cpu(&self) -> CheckResult {
        let name = "cpu";
        let min = self.requirements.min_cpu_cores;

        match self.probe.cpu_cores() {
            Ok(cores) if cores >= min => {
                CheckResult::pass(name, format!("{} cores (minimum {})", cores, min))
            }
            Ok(cores) => CheckResult::fail(
                name,
                format!("only {} CPU cores, at least {} required", cores, min),
            ),
            Err(e) => CheckResult::fail(name, format!("unable to count CPU cores: {}", e)),
        }
    }

    pub async fn check_network(&self) -> CheckResult {
        let name = "network";
        let host = &self.requirements.connectivity_host;
        let port = self.requirements.connectivity_port;
        let limit = Duration::from_secs(self.requirements.connectivity_timeout_secs);

        if self.probe.can_reach(host, port, limit).await {
            CheckResult::pass(name, format!("{}:{} reachable", host, port))
        } else {
            CheckResult::fail(
                name,
                format!("{}:{} unreachable within {:?}", host, port, limit),
            )
        }
    }

    pub fn check_platform(&self) -> CheckResult {
        let name = "platform";
        let expected = &self.requirements.expected_os_id;

        let release = match self.probe.os_release() {
            Ok(release) => release,
            Err(e) => return CheckResult::fail(name, format!("unable to identify platform: {}", e)),
        };

        if !release.id.eq_ignore_ascii_case(expected) {
            return CheckResult::fail(
                name,
                format!(
                    "expected {}, found '{}' (use --skip-os-check to override)",
                    expected, release.id
                ),
            );
        }

        let supported = &self.requirements.supported_versions;
        if !supported.is_empty() && !supported.contains(&release.version_id) {
            return CheckResult::fail(
                name,
                format!(
                    "{} {} is not one of the supported releases {} (use --skip-os-check to override)",
                    release.id,
                    release.version_id,
                    supported.join(", ")
                ),
            );
        }

        CheckResult::pass(name, format!("{} {}", release.id, release.version_id))
    }

    pub fn check_root(&self) -> CheckResult {
        if self.probe.is_root() {
            CheckResult::pass("privileges", "running as root")
        } else {
            CheckResult::fail("privileges", "must run as root (or use --dry-run)")
        }
    }

    /// Run every applicable check, logging each result
    pub async fn run_all(&self, options: CheckOptions) -> PreconditionReport {
        let mut results = Vec::new();

        if options.require_root {
            results.push(self.check_root());
        }
        if options.skip_os_check {
            warn!("Platform identity check skipped by operator override");
        } else {
            results.push(self.check_platform());
        }
        results.push(self.check_disk());
        results.push(self.check_memory());
        results.push(self.check_cpu());
        results.push(self.check_network().await);

        for result in &results {
            if result.passed {
                info!(check = %result.name, "Precondition passed: {}", result.reason);
            } else {
                warn!(check = %result.name, "Precondition failed: {}", result.reason);
            }
        }

        PreconditionReport { results }
    }
}
