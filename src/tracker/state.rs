//! Runtime state types owned by the tracker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::phase::{ChecklistItem, Phase, ProjectOverview};

/// Lifecycle of a single phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Skipped,
    Failed,
}

impl PhaseStatus {
    /// Completed, Skipped or Failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Failed)
    }

    /// Counts towards "all complete": Completed or Skipped.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in progress",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Mutable runtime wrapper around a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseState {
    pub phase: Phase,
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    /// Identifier the execution collaborator assigned to its task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_task_ref: Option<String>,
    /// Checkpoint revision current when the phase last started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_checkpoint_ref: Option<String>,
}

impl PhaseState {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            status: PhaseStatus::Pending,
            start_time: None,
            end_time: None,
            retry_count: 0,
            external_task_ref: None,
            start_checkpoint_ref: None,
        }
    }

    /// Wall-clock time between start and end, if both are stamped.
    pub fn elapsed(&self) -> Option<Duration> {
        let (start, end) = (self.start_time?, self.end_time?);
        (end - start).to_std().ok()
    }
}

/// Entry in the append-only result log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub subtask_results: Vec<ChecklistItem>,
    #[serde(with = "duration_serde")]
    pub execution_time: Duration,
    pub completed_at: DateTime<Utc>,
}

/// What the driving logic should offer next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionAction {
    /// Every phase is completed or skipped
    AllComplete,
    /// More pending phases follow the current one
    PartialComplete,
    /// The cursor is on the last phase and it is not finished yet
    NonPhase,
}

/// Notifications emitted on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackerEvent {
    PhaseStarted {
        position: usize,
        phase_index: u32,
        title: String,
    },
    PhaseCompleted {
        position: usize,
        phase_index: u32,
    },
    PhaseFailed {
        position: usize,
        phase_index: u32,
        reason: String,
    },
    PhaseRetried {
        position: usize,
        phase_index: u32,
        retry_count: u32,
    },
    PhaseSkipped {
        position: usize,
        phase_index: u32,
        forced: bool,
        reason: String,
    },
    PhaseCancelled {
        position: usize,
        phase_index: u32,
    },
    RunCompleted,
}

/// Counts per status, excluding the synthetic planning phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerSummary {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl TrackerSummary {
    pub fn all_complete(&self) -> bool {
        self.total > 0 && self.completed + self.skipped == self.total
    }

    pub fn completion_percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        ((self.completed + self.skipped) as f64 / self.total as f64) * 100.0
    }
}

/// Everything needed to rebuild a tracker after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub project_overview: ProjectOverview,
    #[serde(default)]
    pub execution_summary: String,
    pub phase_states: Vec<PhaseState>,
    pub current_index: usize,
    pub retry_limit: u32,
    #[serde(default)]
    pub registered: bool,
    #[serde(default)]
    pub results: Vec<PhaseResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_completed_at: Option<DateTime<Utc>>,
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classes() {
        assert!(!PhaseStatus::Pending.is_terminal());
        assert!(!PhaseStatus::InProgress.is_terminal());
        assert!(PhaseStatus::Failed.is_terminal());
        assert!(!PhaseStatus::Failed.is_done());
        assert!(PhaseStatus::Skipped.is_done());
        assert_eq!(PhaseStatus::InProgress.to_string(), "in progress");
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&PhaseStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
    }

    #[test]
    fn test_event_is_tagged() {
        let json = serde_json::to_value(TrackerEvent::PhaseCancelled {
            position: 2,
            phase_index: 2,
        })
        .unwrap();
        assert_eq!(json["event"], "phase_cancelled");
    }

    #[test]
    fn test_elapsed_and_result_duration_serde() {
        let mut state = PhaseState::new(Phase::new(1, "A"));
        assert!(state.elapsed().is_none());
        let start = Utc::now();
        state.start_time = Some(start);
        state.end_time = Some(start + chrono::Duration::milliseconds(1500));
        assert_eq!(state.elapsed(), Some(Duration::from_millis(1500)));

        let result = PhaseResult {
            phase_id: 1,
            summary: None,
            subtask_results: Vec::new(),
            execution_time: Duration::from_millis(1500),
            completed_at: start,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["execution_time"], 1500);
    }

    #[test]
    fn test_summary_completion() {
        let summary = TrackerSummary {
            total: 4,
            completed: 3,
            skipped: 1,
            ..Default::default()
        };
        assert!(summary.all_complete());
        assert_eq!(summary.completion_percentage(), 100.0);
        assert!(!TrackerSummary::default().all_complete());
    }
}
