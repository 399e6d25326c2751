//! Phase tracker: the single owner of runtime phase state.
//!
//! The tracker holds an ordered arena of [`PhaseState`]s, addressed by
//! position. Position 0 is always the synthetic planning phase; plan phases
//! follow in plan order. Every mutation goes through a method here, emits a
//! [`TrackerEvent`] and, when a [`CheckpointStore`] is attached, persists a
//! snapshot before returning.
//!
//! ```text
//! Pending -> InProgress -> Completed | Skipped | Failed
//!    ^           |                   |
//!    |-- cancel -+                   |
//!    +------------- retry -----------+
//! ```

mod state;

pub use state::{
    CompletionAction, PhaseResult, PhaseState, PhaseStatus, TrackerEvent, TrackerSnapshot,
    TrackerSummary,
};

use chrono::Utc;
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointFrequency, CheckpointStore};
use crate::errors::TrackerError;
use crate::phase::{Phase, Plan, ProjectOverview};

/// Retries allowed per phase unless configured otherwise.
pub const DEFAULT_RETRY_LIMIT: u32 = 2;

/// Position of the synthetic planning phase.
pub const PLANNING_POSITION: usize = 0;

#[derive(Debug)]
pub struct Tracker {
    phase_states: Vec<PhaseState>,
    current_index: usize,
    overview: ProjectOverview,
    execution_summary: String,
    results: Vec<PhaseResult>,
    retry_limit: u32,
    registered: bool,
    run_completed_at: Option<chrono::DateTime<Utc>>,
    checkpoint: Option<CheckpointStore>,
    frequency: CheckpointFrequency,
    last_checkpoint_ref: Option<String>,
    events: Option<mpsc::UnboundedSender<TrackerEvent>>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    /// A tracker holding only the planning phase, in progress.
    pub fn new() -> Self {
        let mut planning = PhaseState::new(Phase::planning());
        planning.status = PhaseStatus::InProgress;
        planning.start_time = Some(Utc::now());

        Self {
            phase_states: vec![planning],
            current_index: PLANNING_POSITION,
            overview: ProjectOverview::default(),
            execution_summary: String::new(),
            results: Vec::new(),
            retry_limit: DEFAULT_RETRY_LIMIT,
            registered: false,
            run_completed_at: None,
            checkpoint: None,
            frequency: CheckpointFrequency::default(),
            last_checkpoint_ref: None,
            events: None,
        }
    }

    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    /// Persist every mutation through `store`.
    pub fn with_checkpoint(mut self, store: CheckpointStore, frequency: CheckpointFrequency) -> Self {
        self.checkpoint = Some(store);
        self.frequency = frequency;
        self
    }

    /// Rebuild a tracker from a snapshot, validating its invariants.
    pub fn from_snapshot(snapshot: TrackerSnapshot) -> Result<Self, TrackerError> {
        if snapshot.phase_states.is_empty() {
            return Err(TrackerError::UnknownPhase {
                position: PLANNING_POSITION,
            });
        }
        if snapshot.current_index >= snapshot.phase_states.len() {
            return Err(TrackerError::UnknownPhase {
                position: snapshot.current_index,
            });
        }
        Ok(Self {
            phase_states: snapshot.phase_states,
            current_index: snapshot.current_index,
            overview: snapshot.project_overview,
            execution_summary: snapshot.execution_summary,
            results: snapshot.results,
            retry_limit: snapshot.retry_limit,
            registered: snapshot.registered,
            run_completed_at: snapshot.run_completed_at,
            ..Self::new()
        })
    }

    /// Restore from the store's live checkpoint, or start fresh when there is
    /// none or it is unusable. The store stays attached either way.
    pub fn restore_or_new(store: CheckpointStore, frequency: CheckpointFrequency) -> Self {
        let restored = store.load().and_then(|checkpoint| {
            let revision = checkpoint.revision.clone();
            match Self::from_snapshot(checkpoint.snapshot) {
                Ok(mut tracker) => {
                    tracker.last_checkpoint_ref = Some(revision);
                    Some(tracker)
                }
                Err(e) => {
                    warn!(error = %e, "Checkpoint failed validation; starting fresh");
                    None
                }
            }
        });
        match restored {
            Some(tracker) => {
                info!(
                    phases = tracker.phase_states.len() - 1,
                    current_index = tracker.current_index,
                    "Restored tracker from checkpoint"
                );
                tracker.with_checkpoint(store, frequency)
            }
            None => Self::new().with_checkpoint(store, frequency),
        }
    }

    /// Subscribe to transition events. Replaces any previous subscriber.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TrackerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    // -- registration -------------------------------------------------------

    /// Append one pending state per phase, in plan order.
    pub fn register_phases(&mut self, phases: Vec<Phase>) -> Result<(), TrackerError> {
        if self.registered {
            return Err(TrackerError::AlreadyRegistered);
        }
        if phases.is_empty() {
            return Err(TrackerError::EmptyPlan);
        }
        let mut seen = HashSet::new();
        for phase in &phases {
            if !seen.insert(phase.phase_index) {
                return Err(TrackerError::DuplicatePhaseIndex {
                    phase_index: phase.phase_index,
                });
            }
        }

        info!(count = phases.len(), "Registering phases");
        self.phase_states
            .extend(phases.into_iter().map(PhaseState::new));
        self.registered = true;
        self.run_completed_at = None;
        self.save();
        Ok(())
    }

    /// Register a parsed plan, carrying its overview and summary along.
    pub fn register_plan(&mut self, plan: Plan) -> Result<(), TrackerError> {
        if self.registered {
            return Err(TrackerError::AlreadyRegistered);
        }
        self.overview = plan.overview;
        self.execution_summary = plan.execution_summary;
        self.register_phases(plan.phases)
    }

    /// Discard every phase but the planning one and register `phases` anew.
    pub fn replace_phases(&mut self, phases: Vec<Phase>) -> Result<(), TrackerError> {
        if phases.is_empty() {
            return Err(TrackerError::EmptyPlan);
        }
        info!(
            discarded = self.phase_states.len() - 1,
            "Replacing registered phases"
        );
        self.phase_states.truncate(1);
        self.current_index = PLANNING_POSITION;
        self.registered = false;
        self.register_phases(phases)
    }

    /// Replace phases with a revised plan, including its overview and summary.
    pub fn replace_plan(&mut self, plan: Plan) -> Result<(), TrackerError> {
        self.overview = plan.overview;
        self.execution_summary = plan.execution_summary;
        self.replace_phases(plan.phases)
    }

    // -- current-phase operations -------------------------------------------

    /// True iff a pending phase exists after the cursor.
    pub fn has_next_phase(&self) -> bool {
        self.next_pending_position().is_some()
    }

    /// Position of the first pending phase after the cursor.
    pub fn next_pending_position(&self) -> Option<usize> {
        self.phase_states
            .iter()
            .enumerate()
            .skip(self.current_index + 1)
            .find(|(_, s)| s.status == PhaseStatus::Pending)
            .map(|(i, _)| i)
    }

    /// Move the cursor to the next pending phase and start it.
    pub fn advance(&mut self) -> Result<(), TrackerError> {
        let position = self
            .next_pending_position()
            .ok_or(TrackerError::NoMorePhases)?;
        self.current_index = position;
        self.start_at(position)?;
        self.save();
        Ok(())
    }

    /// Re-enter `InProgress` for a pending current phase (after a retry or a
    /// cancel).
    pub fn start_current_phase(&mut self) -> Result<(), TrackerError> {
        self.start_phase(self.current_index)
    }

    pub fn complete_current_phase(&mut self, summary: Option<String>) -> Result<(), TrackerError> {
        self.complete_phase(self.current_index, summary)
    }

    pub fn fail_current_phase(&mut self, reason: &str) -> Result<(), TrackerError> {
        self.fail_phase(self.current_index, reason)
    }

    pub fn can_retry_current_phase(&self) -> bool {
        self.can_retry_phase(self.current_index)
    }

    pub fn retry_current_phase(&mut self) -> Result<(), TrackerError> {
        self.retry_phase(self.current_index)
    }

    pub fn cancel_current_phase(&mut self) -> Result<(), TrackerError> {
        self.cancel_phase(self.current_index)
    }

    /// Skip the current phase after its retries are exhausted, then advance
    /// or finish the run.
    pub fn force_advance(&mut self) -> Result<(), TrackerError> {
        let position = self.current_index;
        self.force_skip_at(position)?;
        if let Some(next) = self.next_pending_position() {
            self.current_index = next;
            self.start_at(next)?;
        } else {
            self.settle_run();
        }
        self.save();
        Ok(())
    }

    /// Tri-state hint for whoever drives the run.
    pub fn completion_action(&self) -> CompletionAction {
        if self.is_all_complete() {
            CompletionAction::AllComplete
        } else if self.has_next_phase() {
            CompletionAction::PartialComplete
        } else {
            CompletionAction::NonPhase
        }
    }

    /// Every plan phase is completed or skipped.
    pub fn is_all_complete(&self) -> bool {
        self.phase_states.len() > 1 && self.plan_states().all(|s| s.status.is_done())
    }

    // -- per-position operations --------------------------------------------

    /// Start a pending phase at `position` without moving the cursor.
    pub fn start_phase(&mut self, position: usize) -> Result<(), TrackerError> {
        self.start_at(position)?;
        self.save();
        Ok(())
    }

    /// Mark an in-progress phase completed, checking off all of its items.
    pub fn complete_phase(
        &mut self,
        position: usize,
        summary: Option<String>,
    ) -> Result<(), TrackerError> {
        let now = Utc::now();
        let state = self.state_in(position, &[PhaseStatus::InProgress], "complete")?;
        state.phase.mark_all_completed();
        state.status = PhaseStatus::Completed;
        state.end_time = Some(now);

        let result = PhaseResult {
            phase_id: state.phase.phase_index,
            summary,
            subtask_results: state.phase.subtasks.clone(),
            execution_time: state.elapsed().unwrap_or_default(),
            completed_at: now,
        };
        let phase_index = state.phase.phase_index;
        info!(position, phase_index, "Phase completed");
        self.results.push(result);
        self.emit(TrackerEvent::PhaseCompleted {
            position,
            phase_index,
        });
        self.settle_run();
        self.save();
        Ok(())
    }

    pub fn fail_phase(&mut self, position: usize, reason: &str) -> Result<(), TrackerError> {
        let state = self.state_in(position, &[PhaseStatus::InProgress], "fail")?;
        state.status = PhaseStatus::Failed;
        state.end_time = Some(Utc::now());
        let phase_index = state.phase.phase_index;
        warn!(position, phase_index, reason, "Phase failed");
        self.emit(TrackerEvent::PhaseFailed {
            position,
            phase_index,
            reason: reason.to_string(),
        });
        self.save();
        Ok(())
    }

    pub fn can_retry_phase(&self, position: usize) -> bool {
        self.phase_states
            .get(position)
            .is_some_and(|s| s.retry_count < self.retry_limit)
    }

    /// Reset a phase to pending and count the retry.
    pub fn retry_phase(&mut self, position: usize) -> Result<(), TrackerError> {
        let limit = self.retry_limit;
        let state = self.state_mut(position)?;
        if state.retry_count >= limit {
            return Err(TrackerError::RetryLimitExceeded {
                phase_index: state.phase.phase_index,
                retry_count: state.retry_count,
                limit,
            });
        }
        state.status = PhaseStatus::Pending;
        state.start_time = None;
        state.end_time = None;
        state.start_checkpoint_ref = None;
        state.retry_count += 1;

        let (phase_index, retry_count) = (state.phase.phase_index, state.retry_count);
        info!(position, phase_index, retry_count, limit, "Phase reset for retry");
        self.run_completed_at = None;
        self.emit(TrackerEvent::PhaseRetried {
            position,
            phase_index,
            retry_count,
        });
        self.save();
        Ok(())
    }

    /// Skip a pending or in-progress phase by choice.
    pub fn skip_phase(&mut self, position: usize, reason: &str) -> Result<(), TrackerError> {
        self.skip_at(position, false, reason)?;
        self.settle_run();
        self.save();
        Ok(())
    }

    /// Skip a phase whose retries are exhausted. Always surfaced as a warning
    /// and a forced-skip event.
    pub fn force_skip_phase(&mut self, position: usize) -> Result<(), TrackerError> {
        self.force_skip_at(position)?;
        self.settle_run();
        self.save();
        Ok(())
    }

    /// Abandon an in-progress phase without counting a retry.
    pub fn cancel_phase(&mut self, position: usize) -> Result<(), TrackerError> {
        let state = self.state_in(position, &[PhaseStatus::InProgress], "cancel")?;
        state.status = PhaseStatus::Pending;
        state.start_time = None;
        state.start_checkpoint_ref = None;
        let phase_index = state.phase.phase_index;
        info!(position, phase_index, "Phase cancelled");
        self.emit(TrackerEvent::PhaseCancelled {
            position,
            phase_index,
        });
        self.save();
        Ok(())
    }

    /// Check off one subtask. Returns false when the phase has no subtask
    /// with that index.
    pub fn complete_subtask(
        &mut self,
        position: usize,
        subtask_index: usize,
    ) -> Result<bool, TrackerError> {
        let state = self.state_mut(position)?;
        let Some(item) = state
            .phase
            .subtasks
            .iter_mut()
            .find(|item| item.index == subtask_index)
        else {
            return Ok(false);
        };
        item.completed = true;
        debug!(position, subtask_index, "Subtask completed");
        if self.frequency == CheckpointFrequency::PerSubtask {
            self.save();
        }
        Ok(true)
    }

    /// Record the execution collaborator's identifier for a phase.
    pub fn attach_external_ref(
        &mut self,
        position: usize,
        task_ref: impl Into<String>,
    ) -> Result<(), TrackerError> {
        self.state_mut(position)?.external_task_ref = Some(task_ref.into());
        self.save();
        Ok(())
    }

    // -- queries ------------------------------------------------------------

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_phase(&self) -> &PhaseState {
        &self.phase_states[self.current_index]
    }

    pub fn phase_states(&self) -> &[PhaseState] {
        &self.phase_states
    }

    pub fn state(&self, position: usize) -> Option<&PhaseState> {
        self.phase_states.get(position)
    }

    /// Plan phase with the given stable index.
    pub fn phase_by_index(&self, phase_index: u32) -> Option<&PhaseState> {
        self.position_of(phase_index)
            .and_then(|p| self.phase_states.get(p))
    }

    /// Position of the plan phase with the given stable index.
    pub fn position_of(&self, phase_index: u32) -> Option<usize> {
        self.phase_states
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, s)| s.phase.phase_index == phase_index)
            .map(|(i, _)| i)
    }

    pub fn phase_by_task_ref(&self, task_ref: &str) -> Option<&PhaseState> {
        self.phase_states
            .iter()
            .find(|s| s.external_task_ref.as_deref() == Some(task_ref))
    }

    pub fn overview(&self) -> &ProjectOverview {
        &self.overview
    }

    pub fn execution_summary(&self) -> &str {
        &self.execution_summary
    }

    pub fn results(&self) -> &[PhaseResult] {
        &self.results
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn run_completed_at(&self) -> Option<chrono::DateTime<Utc>> {
        self.run_completed_at
    }

    pub fn last_checkpoint_ref(&self) -> Option<&str> {
        self.last_checkpoint_ref.as_deref()
    }

    pub fn summary(&self) -> TrackerSummary {
        let mut summary = TrackerSummary::default();
        for state in self.plan_states() {
            summary.total += 1;
            match state.status {
                PhaseStatus::Pending => summary.pending += 1,
                PhaseStatus::InProgress => summary.in_progress += 1,
                PhaseStatus::Completed => summary.completed += 1,
                PhaseStatus::Skipped => summary.skipped += 1,
                PhaseStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            project_overview: self.overview.clone(),
            execution_summary: self.execution_summary.clone(),
            phase_states: self.phase_states.clone(),
            current_index: self.current_index,
            retry_limit: self.retry_limit,
            registered: self.registered,
            results: self.results.clone(),
            run_completed_at: self.run_completed_at,
        }
    }

    // -- internals ----------------------------------------------------------

    fn plan_states(&self) -> impl Iterator<Item = &PhaseState> {
        self.phase_states.iter().skip(1)
    }

    fn state_mut(&mut self, position: usize) -> Result<&mut PhaseState, TrackerError> {
        self.phase_states
            .get_mut(position)
            .ok_or(TrackerError::UnknownPhase { position })
    }

    fn state_in(
        &mut self,
        position: usize,
        allowed: &[PhaseStatus],
        action: &'static str,
    ) -> Result<&mut PhaseState, TrackerError> {
        let state = self.state_mut(position)?;
        if !allowed.contains(&state.status) {
            return Err(TrackerError::InvalidTransition {
                phase_index: state.phase.phase_index,
                from: state.status,
                action,
            });
        }
        Ok(state)
    }

    fn start_at(&mut self, position: usize) -> Result<(), TrackerError> {
        let checkpoint_ref = self.last_checkpoint_ref.clone();
        let state = self.state_in(position, &[PhaseStatus::Pending], "start")?;
        state.status = PhaseStatus::InProgress;
        state.start_time = Some(Utc::now());
        state.end_time = None;
        state.start_checkpoint_ref = checkpoint_ref;

        let (phase_index, title) = (state.phase.phase_index, state.phase.title.clone());
        info!(position, phase_index, title = %title, "Phase started");
        self.emit(TrackerEvent::PhaseStarted {
            position,
            phase_index,
            title,
        });
        Ok(())
    }

    fn skip_at(&mut self, position: usize, forced: bool, reason: &str) -> Result<(), TrackerError> {
        let allowed: &[PhaseStatus] = if forced {
            &[
                PhaseStatus::Pending,
                PhaseStatus::InProgress,
                PhaseStatus::Failed,
            ]
        } else {
            &[PhaseStatus::Pending, PhaseStatus::InProgress]
        };
        let state = self.state_in(position, allowed, "skip")?;
        state.status = PhaseStatus::Skipped;
        state.end_time = Some(Utc::now());
        let phase_index = state.phase.phase_index;
        self.emit(TrackerEvent::PhaseSkipped {
            position,
            phase_index,
            forced,
            reason: reason.to_string(),
        });
        Ok(())
    }

    fn force_skip_at(&mut self, position: usize) -> Result<(), TrackerError> {
        let state = self.state_mut(position)?;
        let (phase_index, retry_count) = (state.phase.phase_index, state.retry_count);
        warn!(
            position,
            phase_index,
            retry_count,
            limit = self.retry_limit,
            "Retry limit reached; force-skipping phase"
        );
        let reason = format!("retry limit of {} exhausted", self.retry_limit);
        self.skip_at(position, true, &reason)
    }

    /// Stamp run completion the first time every plan phase is done.
    fn settle_run(&mut self) {
        if self.registered && self.run_completed_at.is_none() && self.is_all_complete() {
            self.run_completed_at = Some(Utc::now());
            info!(summary = ?self.summary(), "All phases complete");
            self.emit(TrackerEvent::RunCompleted);
        }
    }

    fn emit(&mut self, event: TrackerEvent) {
        if let Some(tx) = &self.events
            && tx.send(event).is_err()
        {
            debug!("Event subscriber dropped");
            self.events = None;
        }
    }

    /// Persist a snapshot. Failures are logged and absorbed.
    ///
    /// Runs synchronously inside the mutation so a transition is on disk
    /// before the caller releases the shared tracker lock.
    fn save(&mut self) {
        let Some(store) = &self.checkpoint else {
            return;
        };
        match store.save(&self.snapshot()) {
            Ok(revision) => self.last_checkpoint_ref = Some(revision),
            Err(e) => warn!(error = %e, "Checkpoint save failed; continuing in memory"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryStorage;
    use crate::phase::{ChecklistItem, checklist};
    use std::sync::Arc;

    fn three_phases() -> Vec<Phase> {
        vec![
            Phase::new(1, "Scaffold")
                .with_subtasks(checklist(&["init", "deps"]))
                .with_completion_criteria(checklist(&["builds"])),
            Phase::new(2, "Store"),
            Phase::new(3, "Release"),
        ]
    }

    fn registered() -> Tracker {
        let mut tracker = Tracker::new();
        tracker.register_phases(three_phases()).unwrap();
        tracker
    }

    #[test]
    fn test_new_tracker_has_planning_in_progress() {
        let tracker = Tracker::new();
        assert_eq!(tracker.phase_states().len(), 1);
        assert_eq!(tracker.current_index(), 0);
        assert_eq!(tracker.current_phase().status, PhaseStatus::InProgress);
        assert_eq!(tracker.current_phase().phase.title, "Planning");
    }

    #[test]
    fn test_register_twice_fails_until_replaced() {
        let mut tracker = registered();
        assert_eq!(
            tracker.register_phases(three_phases()),
            Err(TrackerError::AlreadyRegistered)
        );

        tracker.replace_phases(vec![Phase::new(7, "Only")]).unwrap();
        assert_eq!(tracker.phase_states().len(), 2);
        assert_eq!(tracker.current_index(), 0);
        assert_eq!(tracker.phase_states()[1].phase.phase_index, 7);
    }

    #[test]
    fn test_register_rejects_duplicate_indices() {
        let mut tracker = Tracker::new();
        let err = tracker
            .register_phases(vec![Phase::new(1, "A"), Phase::new(1, "B")])
            .unwrap_err();
        assert_eq!(err, TrackerError::DuplicatePhaseIndex { phase_index: 1 });
        assert!(!tracker.is_registered());
    }

    #[test]
    fn test_empty_plan_is_rejected() {
        let mut tracker = Tracker::new();
        assert_eq!(tracker.register_phases(Vec::new()), Err(TrackerError::EmptyPlan));
        assert!(!tracker.is_registered());

        let mut tracker = registered();
        assert_eq!(tracker.replace_phases(Vec::new()), Err(TrackerError::EmptyPlan));
        // The registered plan survives the rejected replacement
        assert!(tracker.is_registered());
        assert_eq!(tracker.phase_states().len(), 4);
    }

    #[test]
    fn test_complete_then_advance() {
        let mut tracker = registered();
        tracker.complete_current_phase(None).unwrap();
        assert!(tracker.has_next_phase());

        tracker.advance().unwrap();
        assert_eq!(tracker.current_index(), 1);
        assert_eq!(tracker.current_phase().status, PhaseStatus::InProgress);
        assert!(tracker.current_phase().start_time.is_some());
        assert_eq!(tracker.phase_states()[0].status, PhaseStatus::Completed);
    }

    #[test]
    fn test_retry_limit_then_force_advance() {
        let mut tracker = registered();
        tracker.complete_current_phase(None).unwrap();
        tracker.advance().unwrap();

        tracker.retry_current_phase().unwrap();
        tracker.retry_current_phase().unwrap();
        assert_eq!(tracker.current_phase().retry_count, 2);
        assert!(!tracker.can_retry_current_phase());
        assert_eq!(
            tracker.retry_current_phase(),
            Err(TrackerError::RetryLimitExceeded {
                phase_index: 1,
                retry_count: 2,
                limit: 2
            })
        );

        let mut events = tracker.subscribe();
        tracker.force_advance().unwrap();
        assert_eq!(tracker.phase_states()[1].status, PhaseStatus::Skipped);
        assert_eq!(tracker.current_index(), 2);
        assert_eq!(tracker.current_phase().status, PhaseStatus::InProgress);

        match events.try_recv().unwrap() {
            TrackerEvent::PhaseSkipped { forced, .. } => assert!(forced),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_complete_cascades_to_all_items() {
        let mut tracker = registered();
        tracker.complete_current_phase(None).unwrap();
        tracker.advance().unwrap();
        tracker
            .complete_current_phase(Some("scaffolded".into()))
            .unwrap();

        let phase = &tracker.current_phase().phase;
        assert!(phase.all_items_completed());
        assert!(phase.checklist_items().all(|i| i.completed));

        let result = tracker.results().last().unwrap();
        assert_eq!(result.phase_id, 1);
        assert_eq!(result.summary.as_deref(), Some("scaffolded"));
        assert_eq!(result.subtask_results.len(), 2);
    }

    #[test]
    fn test_retry_count_is_monotonic() {
        let mut tracker = registered();
        tracker.complete_current_phase(None).unwrap();
        tracker.advance().unwrap();

        let mut last = 0;
        for _ in 0..3 {
            let _ = tracker.retry_current_phase();
            let count = tracker.current_phase().retry_count;
            assert!(count >= last);
            assert_eq!(tracker.can_retry_current_phase(), count < DEFAULT_RETRY_LIMIT);
            last = count;
            // Cancelling never resets the counter
            if tracker.current_phase().status == PhaseStatus::Pending {
                tracker.start_current_phase().unwrap();
                tracker.cancel_current_phase().unwrap();
                assert_eq!(tracker.current_phase().retry_count, count);
            }
        }
        assert_eq!(last, DEFAULT_RETRY_LIMIT);
    }

    #[test]
    fn test_has_next_phase_false_exactly_when_all_done() {
        let mut tracker = registered();
        tracker.complete_current_phase(None).unwrap();
        while tracker.has_next_phase() {
            assert!(!tracker.is_all_complete());
            tracker.advance().unwrap();
            if tracker.current_phase().phase.phase_index == 2 {
                tracker
                    .skip_phase(tracker.current_index(), "not needed")
                    .unwrap();
            } else {
                tracker.complete_current_phase(None).unwrap();
            }
        }
        assert!(tracker.is_all_complete());
        assert_eq!(tracker.completion_action(), CompletionAction::AllComplete);
        assert!(tracker.run_completed_at().is_some());
    }

    #[test]
    fn test_completion_action_states() {
        let mut tracker = registered();
        tracker.complete_current_phase(None).unwrap();
        assert_eq!(tracker.completion_action(), CompletionAction::PartialComplete);

        tracker.advance().unwrap();
        tracker.complete_current_phase(None).unwrap();
        tracker.advance().unwrap();
        tracker.complete_current_phase(None).unwrap();
        tracker.advance().unwrap();
        // On the last phase, still in progress
        assert_eq!(tracker.completion_action(), CompletionAction::NonPhase);

        tracker.complete_current_phase(None).unwrap();
        assert_eq!(tracker.completion_action(), CompletionAction::AllComplete);
    }

    #[test]
    fn test_advance_without_pending_fails() {
        let mut tracker = Tracker::new();
        assert_eq!(tracker.advance(), Err(TrackerError::NoMorePhases));
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let mut tracker = registered();
        assert_eq!(
            tracker.complete_phase(2, None),
            Err(TrackerError::InvalidTransition {
                phase_index: 2,
                from: PhaseStatus::Pending,
                action: "complete"
            })
        );
        assert!(matches!(
            tracker.cancel_phase(3),
            Err(TrackerError::InvalidTransition { .. })
        ));
        assert_eq!(
            tracker.start_phase(9),
            Err(TrackerError::UnknownPhase { position: 9 })
        );
    }

    #[test]
    fn test_cancel_returns_to_pending_without_retry() {
        let mut tracker = registered();
        tracker.complete_current_phase(None).unwrap();
        tracker.advance().unwrap();
        tracker.cancel_current_phase().unwrap();

        let state = tracker.current_phase();
        assert_eq!(state.status, PhaseStatus::Pending);
        assert_eq!(state.retry_count, 0);
        assert!(state.start_time.is_none());

        tracker.start_current_phase().unwrap();
        assert_eq!(tracker.current_phase().status, PhaseStatus::InProgress);
    }

    #[test]
    fn test_fail_then_retry_from_terminal() {
        let mut tracker = registered();
        tracker.complete_current_phase(None).unwrap();
        tracker.advance().unwrap();
        tracker.fail_current_phase("tests red").unwrap();
        assert_eq!(tracker.current_phase().status, PhaseStatus::Failed);

        tracker.retry_current_phase().unwrap();
        let state = tracker.current_phase();
        assert_eq!(state.status, PhaseStatus::Pending);
        assert!(state.end_time.is_none());
        assert_eq!(state.retry_count, 1);
    }

    #[test]
    fn test_lookups() {
        let mut tracker = registered();
        tracker.attach_external_ref(2, "task-42").unwrap();

        assert_eq!(tracker.position_of(3), Some(3));
        assert_eq!(tracker.phase_by_index(2).unwrap().phase.title, "Store");
        assert_eq!(
            tracker.phase_by_task_ref("task-42").unwrap().phase.phase_index,
            2
        );
        assert!(tracker.phase_by_index(99).is_none());
        assert!(tracker.phase_by_task_ref("nope").is_none());
    }

    #[test]
    fn test_complete_subtask() {
        let mut tracker = registered();
        assert!(tracker.complete_subtask(1, 1).unwrap());
        assert!(!tracker.complete_subtask(1, 5).unwrap());

        let subtasks = &tracker.phase_states()[1].phase.subtasks;
        assert_eq!(
            subtasks[1],
            ChecklistItem::new(1, "deps").with_completed(true)
        );
        assert!(!subtasks[0].completed);
    }

    #[test]
    fn test_summary_counts() {
        let mut tracker = registered();
        tracker.complete_current_phase(None).unwrap();
        tracker.advance().unwrap();
        tracker.skip_phase(3, "later").unwrap();

        let summary = tracker.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.in_progress, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn test_every_mutation_is_checkpointed() {
        let storage = Arc::new(MemoryStorage::new());
        let store = CheckpointStore::new(storage, "/ckpt");
        let mut tracker = Tracker::new().with_checkpoint(store.clone(), CheckpointFrequency::PerPhase);

        tracker.register_phases(three_phases()).unwrap();
        let after_register = tracker.last_checkpoint_ref().unwrap().to_string();
        tracker.complete_current_phase(None).unwrap();
        tracker.advance().unwrap();

        let state = tracker.current_phase();
        assert!(state.start_checkpoint_ref.is_some());
        assert_ne!(state.start_checkpoint_ref.as_deref(), Some(after_register.as_str()));

        let loaded = store.load().unwrap();
        assert_eq!(loaded.revision, tracker.last_checkpoint_ref().unwrap());
        assert_eq!(loaded.snapshot.current_index, 1);
    }

    #[test]
    fn test_checkpoint_roundtrip_preserves_state() {
        let storage = Arc::new(MemoryStorage::new());
        let store = CheckpointStore::new(storage, "/ckpt");
        let mut tracker = Tracker::new().with_checkpoint(store.clone(), CheckpointFrequency::PerPhase);

        tracker.register_phases(three_phases()).unwrap();
        tracker.complete_current_phase(None).unwrap();
        tracker.advance().unwrap();
        tracker.retry_current_phase().unwrap();
        tracker.start_current_phase().unwrap();
        tracker.complete_current_phase(None).unwrap();
        tracker.advance().unwrap();
        tracker.fail_current_phase("boom").unwrap();

        let restored = Tracker::restore_or_new(store, CheckpointFrequency::PerPhase);
        assert_eq!(restored.current_index(), tracker.current_index());
        let pairs = |t: &Tracker| {
            t.phase_states()
                .iter()
                .map(|s| (s.status, s.retry_count))
                .collect::<Vec<_>>()
        };
        assert_eq!(pairs(&restored), pairs(&tracker));
        assert!(restored.is_registered());
        assert_eq!(restored.results().len(), tracker.results().len());
    }

    #[test]
    fn test_checkpoint_failure_is_absorbed() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_fail_writes(true);
        let store = CheckpointStore::new(storage, "/ckpt");
        let mut tracker = Tracker::new().with_checkpoint(store, CheckpointFrequency::PerPhase);

        tracker.register_phases(three_phases()).unwrap();
        tracker.complete_current_phase(None).unwrap();
        tracker.advance().unwrap();
        assert!(tracker.last_checkpoint_ref().is_none());
        assert_eq!(tracker.current_index(), 1);
    }

    #[test]
    fn test_per_subtask_frequency_saves_on_subtask() {
        let storage = Arc::new(MemoryStorage::new());
        let store = CheckpointStore::new(storage, "/ckpt");
        let mut tracker = Tracker::new().with_checkpoint(store.clone(), CheckpointFrequency::PerSubtask);
        tracker.register_phases(three_phases()).unwrap();
        let before = tracker.last_checkpoint_ref().unwrap().to_string();

        tracker.complete_subtask(1, 0).unwrap();
        assert_ne!(tracker.last_checkpoint_ref().unwrap(), before);
        assert!(store.load().unwrap().snapshot.phase_states[1].phase.subtasks[0].completed);
    }

    #[test]
    fn test_from_snapshot_rejects_bad_cursor() {
        let mut snapshot = registered().snapshot();
        snapshot.current_index = 10;
        assert_eq!(
            Tracker::from_snapshot(snapshot).unwrap_err(),
            TrackerError::UnknownPhase { position: 10 }
        );
    }

    #[test]
    fn test_register_plan_carries_overview() {
        let plan = Plan {
            overview: ProjectOverview {
                title: "Sessions".into(),
                ..Default::default()
            },
            execution_summary: "two steps".into(),
            phases: three_phases(),
        };

        let mut tracker = Tracker::new();
        tracker.register_plan(plan).unwrap();
        assert_eq!(tracker.overview().title, "Sessions");
        assert_eq!(tracker.execution_summary(), "two steps");
        assert_eq!(tracker.phase_states().len(), 4);
    }
}
