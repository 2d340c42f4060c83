// file: src/preconditions/probe.rs
// version: 1.0.0
// guid: 4d9b2e6f-a1c3-4f87-b5e0-93c7d1a6f248

//! Host facts consulted by the precondition checks

use crate::error::{BootstrapError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::{Disks, System};
use tokio::time::timeout;
use tracing::debug;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Parsed `/etc/os-release`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub version_id: String,
    pub pretty_name: String,
}

impl OsRelease {
    pub fn parse(content: &str) -> Self {
        let fields: HashMap<&str, String> = content
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.trim(), v.trim().trim_matches('"').trim_matches('\'').to_string()))
            .collect();

        Self {
            id: fields.get("ID").cloned().unwrap_or_default(),
            version_id: fields.get("VERSION_ID").cloned().unwrap_or_default(),
            pretty_name: fields.get("PRETTY_NAME").cloned().unwrap_or_default(),
        }
    }
}

/// Source of host resource and identity facts
#[async_trait::async_trait]
pub trait HostProbe: Send + Sync {
    /// Free space in MB on the filesystem holding `path`
    fn available_disk_mb(&self, path: &Path) -> Result<u64>;

    fn total_memory_mb(&self) -> Result<u64>;

    fn cpu_cores(&self) -> Result<usize>;

    fn os_release(&self) -> Result<OsRelease>;

    fn is_root(&self) -> bool;

    async fn can_reach(&self, host: &str, port: u16, limit: Duration) -> bool;
}

/// Probe reading the live system
#[derive(Debug, Clone)]
pub struct SystemProbe {
    os_release_path: PathBuf,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self {
            os_release_path: PathBuf::from("/etc/os-release"),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl HostProbe for SystemProbe {
    fn available_disk_mb(&self, path: &Path) -> Result<u64> {
        let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let disks = Disks::new_with_refreshed_list();

        // the most specific mount point containing the path
        let disk = disks
            .list()
            .iter()
            .filter(|d| target.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .ok_or_else(|| {
                BootstrapError::system(format!("no mounted filesystem holds {}", target.display()))
            })?;

        debug!(
            "Disk for {} is mounted at {}",
            target.display(),
            disk.mount_point().display()
        );
        Ok(disk.available_space() / BYTES_PER_MB)
    }

    fn total_memory_mb(&self) -> Result<u64> {
        let mut sys = System::new();
        sys.refresh_memory();
        match sys.total_memory() {
            0 => Err(BootstrapError::system("unable to read total memory")),
            bytes => Ok(bytes / BYTES_PER_MB),
        }
    }

    fn cpu_cores(&self) -> Result<usize> {
        let mut sys = System::new();
        sys.refresh_cpu_all();
        match sys.cpus().len() {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .map_err(|e| BootstrapError::system(format!("unable to count CPUs: {}", e))),
            n => Ok(n),
        }
    }

    fn os_release(&self) -> Result<OsRelease> {
        let content = std::fs::read_to_string(&self.os_release_path).map_err(|e| {
            BootstrapError::system(format!(
                "Failed to read {}: {}",
                self.os_release_path.display(),
                e
            ))
        })?;
        Ok(OsRelease::parse(&content))
    }

    fn is_root(&self) -> bool {
        unsafe { libc::geteuid() == 0 }
    }

    async fn can_reach(&self, host: &str, port: u16, limit: Duration) -> bool {
        debug!("Testing connectivity to {}:{}", host, port);

        match timeout(limit, tokio::net::TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Failed to connect to {}:{}: {}", host, port, e);
                false
            }
            Err(_) => {
                debug!("Connection to {}:{} timed out after {:?}", host, port, limit);
                false
            }
        }
    }
}
