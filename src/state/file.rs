// file: src/state/file.rs
// version: 1.1.0
// guid: 5c1d8e3b-2a7f-4e90-b6d4-81f3a0c27e95

//! Durable run state backed by a single file

use super::{RunStateSnapshot, SnapshotBackend};
use crate::error::{BootstrapError, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Run state kept in one human-readable file
///
/// Every save rewrites the file through a synced temporary file that is
/// renamed over the original, so a reboot at any point leaves either the
/// old or the new state, never a torn one.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> &Path {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }
}

impl SnapshotBackend for FileStateStore {
    fn load(&self) -> Result<RunStateSnapshot> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let content = String::from_utf8_lossy(&bytes);
                if let std::borrow::Cow::Owned(_) = content {
                    warn!(
                        "{} contains bytes that are not UTF-8; affected lines are ignored",
                        self.path.display()
                    );
                }
                Ok(RunStateSnapshot::parse(&content))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RunStateSnapshot::default()),
            Err(e) => Err(BootstrapError::state(format!(
                "Failed to read {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn save(&self, snapshot: &RunStateSnapshot) -> Result<()> {
        let dir = self.parent_dir();
        fs::create_dir_all(dir).map_err(|e| {
            BootstrapError::state(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        let write_err = |e: std::io::Error| {
            BootstrapError::state(format!("Failed to write {}: {}", self.path.display(), e))
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(snapshot.render().as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;

        // the rename itself is durable only once the directory is synced
        fs::File::open(dir)
            .and_then(|d| d.sync_all())
            .map_err(write_err)?;

        debug!("Run state written to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BootstrapError::state(format!(
                "Failed to remove {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
