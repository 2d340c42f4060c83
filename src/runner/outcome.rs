// file: src/runner/outcome.rs
// version: 1.1.0
// guid: 71c4e8b2-5f9a-4d36-a2e7-c8b05d3f1a69

//! Terminal outcomes of a run and their process exit codes

use crate::stage::{StageRecord, StageStatus};
use serde::Serialize;
use std::fmt;

/// Process exit codes
pub mod exit_codes {
    /// Every stage completed or was skipped
    pub const SUCCESS: i32 = 0;
    /// A stage body failed; its rollback ran
    pub const STAGE_FAILED: i32 = 1;
    /// Host requirements not met; nothing was changed
    pub const PRECONDITION_FAILED: i32 = 3;
    /// A stage's prerequisite is not completed in run state
    pub const DEPENDENCY_VIOLATION: i32 = 4;
    /// Unexpected condition: unwritable run state, lock held, bad config
    pub const FATAL: i32 = 70;
    /// Deliberate suspension; reboot the host and run again
    pub const AWAITING_REBOOT: i32 = 75;
    /// Interrupted by the operator
    pub const INTERRUPTED: i32 = 130;
}

/// Class of a run failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Precondition,
    DependencyViolation,
    StageBody,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Precondition => write!(f, "precondition failure"),
            FailureKind::DependencyViolation => write!(f, "dependency violation"),
            FailureKind::StageBody => write!(f, "stage failure"),
        }
    }
}

/// Why and where a run stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunFailure {
    pub stage_id: String,
    pub kind: FailureKind,
    pub message: String,
    /// Set when the compensating rollback itself failed
    pub rollback_error: Option<String>,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}: {}", self.kind, self.stage_id, self.message)?;
        if let Some(rollback) = &self.rollback_error {
            write!(f, " (rollback also failed: {})", rollback)?;
        }
        Ok(())
    }
}

/// Per-stage records for one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub stages: Vec<StageRecord>,
}

impl RunReport {
    pub fn push(&mut self, record: StageRecord) {
        self.stages.push(record);
    }

    /// Stage ids that ended in the given status, in run order
    pub fn with_status(&self, status: StageStatus) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.stage_id.as_str())
            .collect()
    }

    pub fn executed(&self) -> Vec<&str> {
        self.with_status(StageStatus::Completed)
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.with_status(StageStatus::Skipped)
    }
}

/// Terminal result of [`StageRunner::run`](super::StageRunner::run)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed {
        report: RunReport,
    },
    /// Controlled suspension; not a failure
    AwaitingReboot {
        stage_id: String,
        reason: String,
        report: RunReport,
    },
    Failed {
        failure: RunFailure,
        report: RunReport,
    },
    /// Operator stop between stages; `next_stage` has not started
    Interrupted {
        next_stage: String,
        report: RunReport,
    },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed { .. } => exit_codes::SUCCESS,
            RunOutcome::AwaitingReboot { .. } => exit_codes::AWAITING_REBOOT,
            RunOutcome::Interrupted { .. } => exit_codes::INTERRUPTED,
            RunOutcome::Failed { failure, .. } => match failure.kind {
                FailureKind::Precondition => exit_codes::PRECONDITION_FAILED,
                FailureKind::DependencyViolation => exit_codes::DEPENDENCY_VIOLATION,
                FailureKind::StageBody => exit_codes::STAGE_FAILED,
            },
        }
    }

    pub fn report(&self) -> &RunReport {
        match self {
            RunOutcome::Completed { report }
            | RunOutcome::AwaitingReboot { report, .. }
            | RunOutcome::Failed { report, .. }
            | RunOutcome::Interrupted { report, .. } => report,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }

    pub fn failure(&self) -> Option<&RunFailure> {
        match self {
            RunOutcome::Failed { failure, .. } => Some(failure),
            _ => None,
        }
    }
}
