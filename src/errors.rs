//! Typed error hierarchy for phaseflow.
//!
//! Four top-level enums cover the four subsystems:
//! - `ParseError`: no extraction strategy produced a phase
//! - `TrackerError`: phase state machine contract violations
//! - `SchedulerError`: execution mode failures (cycles, executor errors)
//! - `CheckpointError`: persistence failures, always absorbed by callers

use std::path::PathBuf;

use thiserror::Error;

use crate::tracker::PhaseStatus;

/// Errors from the plan parser.
#[derive(Debug, Error)]
pub enum ParseError {
    /// No strategy yielded at least one phase. The raw document is attached
    /// so it can be shown for manual correction.
    #[error("No plan found in document ({} bytes); planning must be redone", raw.len())]
    NoPlanFound { raw: String },
}

/// Errors from the phase tracker. These are contract violations: callers are
/// expected to check the matching guard predicate first.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Phases are already registered; use replace_phases to revise the plan")]
    AlreadyRegistered,

    #[error("No pending phase remains after the current one")]
    NoMorePhases,

    #[error("Phase {phase_index} has been retried {retry_count} times (limit {limit})")]
    RetryLimitExceeded {
        phase_index: u32,
        retry_count: u32,
        limit: u32,
    },

    #[error("Cannot {action} phase {phase_index} while it is {from}")]
    InvalidTransition {
        phase_index: u32,
        from: PhaseStatus,
        action: &'static str,
    },

    #[error("No phase state at position {position}")]
    UnknownPhase { position: usize },

    #[error("Duplicate phase index {phase_index} in plan")]
    DuplicatePhaseIndex { phase_index: u32 },

    #[error("A plan must contain at least one phase")]
    EmptyPlan,
}

/// Errors from the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Dependency cycle detected; stuck phases: {phases:?}")]
    DependencyCycle { phases: Vec<u32> },

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("Phase executor failed: {0}")]
    Executor(#[source] anyhow::Error),
}

/// Errors from the checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize checkpoint: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Checkpoint at {path} is unreadable: {reason}")]
    Unreadable { path: PathBuf, reason: String },
}
