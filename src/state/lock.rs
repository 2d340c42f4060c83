// file: src/state/lock.rs
// version: 1.0.0
// guid: c7f2e9a1-6d3b-4a85-9e10-2b5d8f4c7a36

//! Exclusive lock guarding a run state file

use crate::error::{BootstrapError, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Advisory `flock` held for the whole run
///
/// The lock lives in a sibling `<state>.lock` file, so deleting the state
/// file to force a fresh run never races a running orchestrator. Dropping
/// the guard releases the lock; the kernel also releases it if the process
/// dies.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

/// Lock file path for a given state file
pub fn lock_path(state_file: &Path) -> PathBuf {
    let mut name = state_file.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

impl StateLock {
    /// Take the lock without waiting; fails if another run holds it
    pub fn acquire(state_file: &Path) -> Result<Self> {
        let path = lock_path(state_file);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                let holder = fs::read_to_string(&path).unwrap_or_default();
                return Err(BootstrapError::locked(format!(
                    "another vps-bootstrap run holds {} (pid {})",
                    path.display(),
                    holder.trim()
                )));
            }
            return Err(err.into());
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.sync_all()?;

        debug!("Acquired run lock {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let rc = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        if rc != 0 {
            warn!(
                "Failed to release run lock {}: {}",
                self.path.display(),
                std::io::Error::last_os_error()
            );
        }
    }
}
