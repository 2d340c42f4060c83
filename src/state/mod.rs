// file: src/state/mod.rs
// version: 1.0.0
// guid: 0b6e2d7a-91c4-4f3e-8d5a-6a7c1e9b2f30

//! Persistent run state
//!
//! Records which stages completed, named checkpoints inside stages and
//! run-scoped parameters. The on-disk form is line oriented and meant to be
//! read by humans:
//!
//! ```text
//! # vps-bootstrap run state; delete this file to force a fresh run
//! STAGE_1_COMPLETED
//! STAGE_1:updates_applied
//! ADMIN_USER=deploy
//! ```
//!
//! Callers only ever pass raw stage ids; the `_COMPLETED` suffix exists
//! solely in this module's serialization.

pub mod file;
pub mod lock;
pub mod memory;

pub use file::FileStateStore;
pub use lock::StateLock;
pub use memory::MemoryStateStore;

use crate::error::{BootstrapError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{error, warn};

const COMPLETED_SUFFIX: &str = "_COMPLETED";
const HEADER: &str = "# vps-bootstrap run state; delete this file to force a fresh run";

/// Durable record of run progress, injected into the stage runner
pub trait RunStateStore: Send + Sync {
    /// Whether the stage committed. Never fails: absent or unreadable state
    /// reads as not completed.
    fn is_completed(&self, stage_id: &str) -> bool;

    /// Record completion. Writing twice has the same effect as once.
    fn mark_completed(&self, stage_id: &str) -> Result<()>;

    /// Remove the completion marker and the stage's checkpoints. Parameters
    /// are left untouched.
    fn clear_completion(&self, stage_id: &str) -> Result<()>;

    /// Set a run parameter, last write wins
    fn set_parameter(&self, key: &str, value: &str) -> Result<()>;

    fn get_parameter(&self, key: &str) -> Option<String>;

    /// Record a named sub-step inside a stage
    fn mark_checkpoint(&self, stage_id: &str, name: &str) -> Result<()>;

    fn has_checkpoint(&self, stage_id: &str, name: &str) -> bool;

    /// Full copy of the current state
    fn snapshot(&self) -> Result<RunStateSnapshot>;

    /// Drop everything, as if the orchestrator never ran
    fn reset(&self) -> Result<()>;

    /// Where the state lives, for log messages
    fn location(&self) -> String;
}

/// Storage primitive behind every [`RunStateStore`]: load and replace the
/// whole snapshot. Each save must reach stable storage before returning.
pub trait SnapshotBackend: Send + Sync {
    fn load(&self) -> Result<RunStateSnapshot>;
    fn save(&self, snapshot: &RunStateSnapshot) -> Result<()>;
    fn clear(&self) -> Result<()>;
    fn describe(&self) -> String;
}

impl<B: SnapshotBackend> RunStateStore for B {
    fn is_completed(&self, stage_id: &str) -> bool {
        match self.load() {
            Ok(snapshot) => snapshot.completed.contains(stage_id),
            Err(e) => {
                error!("Failed to read run state at {}: {}", self.describe(), e);
                false
            }
        }
    }

    fn mark_completed(&self, stage_id: &str) -> Result<()> {
        validate_stage_id(stage_id)?;
        let mut snapshot = self.load()?;
        if snapshot.completed.insert(stage_id.to_string()) {
            self.save(&snapshot)?;
        }
        Ok(())
    }

    fn clear_completion(&self, stage_id: &str) -> Result<()> {
        let mut snapshot = self.load()?;
        let removed_marker = snapshot.completed.remove(stage_id);
        let removed_checkpoints = snapshot.checkpoints.remove(stage_id).is_some();
        if removed_marker || removed_checkpoints {
            self.save(&snapshot)?;
        }
        Ok(())
    }

    fn set_parameter(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        if value.contains('\n') || value.contains('\r') {
            return Err(BootstrapError::validation(format!(
                "Run parameter '{}' must be a single line",
                key
            )));
        }

        let mut snapshot = self.load()?;
        if snapshot.parameters.get(key).map(String::as_str) != Some(value) {
            snapshot.parameters.insert(key.to_string(), value.to_string());
            self.save(&snapshot)?;
        }
        Ok(())
    }

    fn get_parameter(&self, key: &str) -> Option<String> {
        match self.load() {
            Ok(snapshot) => snapshot.parameters.get(key).cloned(),
            Err(e) => {
                error!("Failed to read run state at {}: {}", self.describe(), e);
                None
            }
        }
    }

    fn mark_checkpoint(&self, stage_id: &str, name: &str) -> Result<()> {
        validate_stage_id(stage_id)?;
        validate_key(name)?;
        let mut snapshot = self.load()?;
        let inserted = snapshot
            .checkpoints
            .entry(stage_id.to_string())
            .or_default()
            .insert(name.to_string());
        if inserted {
            self.save(&snapshot)?;
        }
        Ok(())
    }

    fn has_checkpoint(&self, stage_id: &str, name: &str) -> bool {
        match self.load() {
            Ok(snapshot) => snapshot
                .checkpoints
                .get(stage_id)
                .map(|names| names.contains(name))
                .unwrap_or(false),
            Err(e) => {
                error!("Failed to read run state at {}: {}", self.describe(), e);
                false
            }
        }
    }

    fn snapshot(&self) -> Result<RunStateSnapshot> {
        self.load()
    }

    fn reset(&self) -> Result<()> {
        self.clear()
    }

    fn location(&self) -> String {
        self.describe()
    }
}

/// In-memory image of the run state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStateSnapshot {
    pub completed: BTreeSet<String>,
    pub checkpoints: BTreeMap<String, BTreeSet<String>>,
    pub parameters: BTreeMap<String, String>,
}

impl RunStateSnapshot {
    /// Parse the line-oriented state format. Duplicate lines are harmless;
    /// unrecognized lines are skipped with a warning.
    pub fn parse(content: &str) -> Self {
        let mut snapshot = Self::default();

        for (number, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                snapshot
                    .parameters
                    .insert(key.trim().to_string(), value.trim().to_string());
            } else if let Some((stage, name)) = line.split_once(':') {
                snapshot
                    .checkpoints
                    .entry(stage.to_string())
                    .or_default()
                    .insert(name.to_string());
            } else if let Some(stage) = line.strip_suffix(COMPLETED_SUFFIX) {
                if !stage.is_empty() {
                    snapshot.completed.insert(stage.to_string());
                }
            } else {
                warn!("Ignoring unrecognized run state line {}: {}", number + 1, line);
            }
        }

        snapshot
    }

    /// Serialize in a stable order: markers, checkpoints, parameters
    pub fn render(&self) -> String {
        let mut out = String::from(HEADER);
        out.push('\n');

        for stage in &self.completed {
            out.push_str(&format!("{}{}\n", stage, COMPLETED_SUFFIX));
        }
        for (stage, names) in &self.checkpoints {
            for name in names {
                out.push_str(&format!("{}:{}\n", stage, name));
            }
        }
        for (key, value) in &self.parameters {
            out.push_str(&format!("{}={}\n", key, value));
        }

        out
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.checkpoints.is_empty() && self.parameters.is_empty()
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

/// Stage ids become line prefixes in the state file
pub fn validate_stage_id(stage_id: &str) -> Result<()> {
    if !is_identifier(stage_id) || stage_id.ends_with(COMPLETED_SUFFIX) {
        return Err(BootstrapError::validation(format!(
            "Invalid stage id '{}'",
            stage_id
        )));
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<()> {
    if !is_identifier(key) {
        return Err(BootstrapError::validation(format!(
            "Invalid run state key '{}'",
            key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_line_kinds() {
        let content = "\
# comment
STAGE_1_COMPLETED
STAGE_2_COMPLETED
STAGE_2_COMPLETED
STAGE_1:updates_applied
ADMIN_USER=deploy
ADMIN_USER=ops

garbage line
";
        let snapshot = RunStateSnapshot::parse(content);

        assert_eq!(snapshot.completed.len(), 2);
        assert!(snapshot.completed.contains("STAGE_1"));
        assert!(snapshot.checkpoints["STAGE_1"].contains("updates_applied"));
        // last write wins on read as well
        assert_eq!(snapshot.parameters["ADMIN_USER"], "ops");
    }

    #[test]
    fn test_render_parse_is_stable() {
        let mut snapshot = RunStateSnapshot::default();
        snapshot.completed.insert("STAGE_2".to_string());
        snapshot.completed.insert("STAGE_1".to_string());
        snapshot
            .checkpoints
            .entry("STAGE_1".to_string())
            .or_default()
            .insert("updates_applied".to_string());
        snapshot
            .parameters
            .insert("SSH_PORT".to_string(), "2222".to_string());

        let rendered = snapshot.render();
        assert!(rendered.starts_with('#'));
        assert!(rendered.contains("STAGE_1_COMPLETED\nSTAGE_2_COMPLETED\n"));
        assert_eq!(RunStateSnapshot::parse(&rendered), snapshot);
    }

    #[test]
    fn test_memory_store_contract() {
        let store = MemoryStateStore::new();

        assert!(!store.is_completed("STAGE_1"));
        store.mark_completed("STAGE_1").unwrap();
        store.mark_completed("STAGE_1").unwrap();
        assert!(store.is_completed("STAGE_1"));
        assert_eq!(store.snapshot().unwrap().completed.len(), 1);

        store.set_parameter("ADMIN_USER", "deploy").unwrap();
        store.set_parameter("ADMIN_USER", "ops").unwrap();
        assert_eq!(store.get_parameter("ADMIN_USER").as_deref(), Some("ops"));
        assert_eq!(store.get_parameter("MISSING"), None);

        store.mark_checkpoint("STAGE_1", "updates_applied").unwrap();
        store.clear_completion("STAGE_1").unwrap();
        assert!(!store.is_completed("STAGE_1"));
        assert!(!store.has_checkpoint("STAGE_1", "updates_applied"));
        assert_eq!(store.get_parameter("ADMIN_USER").as_deref(), Some("ops"));
    }

    #[test]
    fn test_rejects_values_that_would_corrupt_the_file() {
        let store = MemoryStateStore::new();
        assert!(store.set_parameter("KEY", "two\nlines").is_err());
        assert!(store.set_parameter("BAD=KEY", "v").is_err());
        assert!(store.set_parameter("", "v").is_err());
        assert!(store.mark_completed("STAGE 1").is_err());
        assert!(store.mark_completed("STAGE_1_COMPLETED").is_err());
        assert!(store.mark_checkpoint("STAGE_1", "a:b").is_err());
    }
}
