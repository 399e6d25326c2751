//! Drives registered phases to completion.
//!
//! The [`Scheduler`] owns no phase state. It reads and mutates the shared
//! [`Tracker`] in short critical sections that never await, and hands the
//! actual work to a [`PhaseExecutor`] outside the lock.
//!
//! | Mode          | Policy                                                   |
//! |---------------|----------------------------------------------------------|
//! | `Sequential`  | One phase at a time, in plan order                       |
//! | `Parallel`    | Up to `max_parallel` phases whose dependencies completed |
//! | `Conditional` | Plan order, skipping phases whose predicate is false     |
//!
//! A completed dependency is checkpointed inside the same critical section
//! as its transition, so dependents never start on state that exists only
//! in memory.

mod executor;
mod graph;

pub use executor::{
    ChannelExecutor, PhaseExecutor, PhaseMessage, PhaseOutcome, PhaseRequest, ProcessExecutor,
    outcome_from_output,
};
pub use graph::{DependencyGraph, NodeIndex, UnresolvedDependency};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::SchedulerError;
use crate::phase::{Phase, ProjectOverview};
use crate::tracker::{PLANNING_POSITION, PhaseStatus, Tracker};

/// Tracker shared between the scheduler and anyone observing the run.
pub type SharedTracker = Arc<Mutex<Tracker>>;

/// Default number of phases driven at once in parallel mode.
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// What conditional mode does with a phase that has no predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultAction {
    #[default]
    Execute,
    Skip,
}

/// Scheduling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel { max_parallel: usize },
    Conditional { default_action: DefaultAction },
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => f.write_str("sequential"),
            Self::Parallel { max_parallel } => write!(f, "parallel (max {})", max_parallel),
            Self::Conditional { default_action } => {
                write!(f, "conditional (default {:?})", default_action)
            }
        }
    }
}

/// Decides whether a phase runs in conditional mode.
pub trait PhasePredicate: Send + Sync {
    fn should_run(&self, phase: &Phase) -> bool;
}

impl<F> PhasePredicate for F
where
    F: Fn(&Phase) -> bool + Send + Sync,
{
    fn should_run(&self, phase: &Phase) -> bool {
        self(phase)
    }
}

/// What happened during one scheduler run. All lists hold phase indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleReport {
    /// Groups of phases driven together, in the order they ran
    pub batches: Vec<Vec<u32>>,
    pub completed: Vec<u32>,
    pub skipped: Vec<u32>,
    /// Skipped because their retries ran out
    pub forced_skips: Vec<u32>,
    /// Skipped because a dependency was skipped or failed
    pub blocked: Vec<u32>,
    /// Pending phases that could never become ready
    pub cycle: Vec<u32>,
}

impl ScheduleReport {
    pub fn is_success(&self) -> bool {
        self.cycle.is_empty() && self.forced_skips.is_empty() && self.blocked.is_empty()
    }

    /// Turn a reported cycle into an error.
    pub fn into_result(self) -> Result<Self, SchedulerError> {
        if self.cycle.is_empty() {
            Ok(self)
        } else {
            Err(SchedulerError::DependencyCycle { phases: self.cycle })
        }
    }
}

/// Result of one attempt, before it is applied to the tracker.
enum Attempt {
    Finished(PhaseOutcome),
    TimedOut(Duration),
    Broken(anyhow::Error),
}

pub struct Scheduler {
    executor: Arc<dyn PhaseExecutor>,
    mode: ExecutionMode,
    phase_timeout: Option<Duration>,
    predicates: HashMap<u32, Arc<dyn PhasePredicate>>,
}

impl Scheduler {
    pub fn new(executor: Arc<dyn PhaseExecutor>, mode: ExecutionMode) -> Self {
        Self {
            executor,
            mode,
            phase_timeout: None,
            predicates: HashMap::new(),
        }
    }

    /// Race every attempt against `timeout`.
    pub fn with_phase_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.phase_timeout = timeout;
        self
    }

    /// Register the predicate consulted for `phase_index` in conditional mode.
    pub fn with_predicate(mut self, phase_index: u32, predicate: impl PhasePredicate + 'static) -> Self {
        self.predicates.insert(phase_index, Arc::new(predicate));
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Drive every pending phase until none can make progress.
    ///
    /// A dependency cycle does not fail the run: it is reported in
    /// [`ScheduleReport::cycle`]. Only an unusable executor or a broken
    /// tracker contract returns an error.
    pub async fn run(&self, tracker: &SharedTracker) -> Result<ScheduleReport, SchedulerError> {
        let mut report = ScheduleReport::default();
        {
            let mut t = tracker.lock().await;
            if !t.is_registered() {
                warn!("No phases registered; nothing to schedule");
                return Ok(report);
            }
            self.recover(&mut t, &mut report)?;
        }

        info!(mode = %self.mode, "Scheduler started");
        match self.mode {
            ExecutionMode::Parallel { max_parallel } => {
                self.run_parallel(tracker, max_parallel.max(1), &mut report)
                    .await?
            }
            ExecutionMode::Sequential | ExecutionMode::Conditional { .. } => {
                self.run_in_order(tracker, &mut report).await?
            }
        }

        let t = tracker.lock().await;
        for state in t.phase_states().iter().skip(1) {
            match state.status {
                PhaseStatus::Completed => report.completed.push(state.phase.phase_index),
                PhaseStatus::Skipped => report.skipped.push(state.phase.phase_index),
                _ => {}
            }
        }
        info!(
            completed = report.completed.len(),
            skipped = report.skipped.len(),
            forced = report.forced_skips.len(),
            stuck = report.cycle.len(),
            "Scheduler finished"
        );
        Ok(report)
    }

    /// Settle state left behind by an earlier, interrupted run.
    fn recover(&self, t: &mut Tracker, report: &mut ScheduleReport) -> Result<(), SchedulerError> {
        let planning = t.phase_states()[PLANNING_POSITION].status;
        match planning {
            PhaseStatus::Pending => {
                t.start_phase(PLANNING_POSITION)?;
                t.complete_phase(PLANNING_POSITION, None)?;
            }
            PhaseStatus::InProgress => t.complete_phase(PLANNING_POSITION, None)?,
            _ => {}
        }

        for position in 1..t.phase_states().len() {
            let (status, phase_index) = {
                let state = &t.phase_states()[position];
                (state.status, state.phase.phase_index)
            };
            match status {
                PhaseStatus::InProgress => {
                    info!(position, phase_index, "Resuming phase abandoned by an earlier run");
                    t.cancel_phase(position)?;
                }
                PhaseStatus::Failed if t.can_retry_phase(position) => t.retry_phase(position)?,
                PhaseStatus::Failed => {
                    t.force_skip_phase(position)?;
                    report.forced_skips.push(phase_index);
                }
                _ => {}
            }
        }
        Ok(())
    }

    // -- sequential & conditional -------------------------------------------

    async fn run_in_order(
        &self,
        tracker: &SharedTracker,
        report: &mut ScheduleReport,
    ) -> Result<(), SchedulerError> {
        loop {
            let next = {
                let mut t = tracker.lock().await;
                self.next_in_order(&mut t)?
            };
            let Some((position, phase, overview)) = next else {
                return Ok(());
            };

            report.batches.push(vec![phase.phase_index]);
            let attempt = self.attempt(&phase, &overview).await;
            let mut t = tracker.lock().await;
            if let Some(err) = self.apply(&mut t, position, attempt, report)? {
                return Err(err);
            }
        }
    }

    /// Pick and start the next phase to drive, skipping phases whose
    /// condition fails along the way.
    fn next_in_order(
        &self,
        t: &mut Tracker,
    ) -> Result<Option<(usize, Phase, ProjectOverview)>, SchedulerError> {
        loop {
            // force_advance leaves the following phase already started
            let running = t
                .phase_states()
                .iter()
                .enumerate()
                .skip(1)
                .find(|(_, s)| s.status == PhaseStatus::InProgress)
                .map(|(i, _)| i);
            if let Some(position) = running {
                return Ok(Some(claim(t, position)));
            }

            let Some(position) = t
                .phase_states()
                .iter()
                .enumerate()
                .skip(1)
                .find(|(_, s)| s.status == PhaseStatus::Pending)
                .map(|(i, _)| i)
            else {
                return Ok(None);
            };

            let phase = &t.phase_states()[position].phase;
            if !self.should_run(phase) {
                info!(phase_index = phase.phase_index, "Condition not met; skipping phase");
                t.skip_phase(position, "condition not met")?;
                continue;
            }

            if t.next_pending_position() == Some(position) {
                t.advance()?;
            } else {
                // Earlier than the cursor, e.g. reset by a retry
                t.start_phase(position)?;
            }
            return Ok(Some(claim(t, position)));
        }
    }

    fn should_run(&self, phase: &Phase) -> bool {
        let ExecutionMode::Conditional { default_action } = self.mode else {
            return true;
        };
        match self.predicates.get(&phase.phase_index) {
            Some(predicate) => predicate.should_run(phase),
            None => default_action == DefaultAction::Execute,
        }
    }

    // -- parallel -------------------------------------------------------------

    async fn run_parallel(
        &self,
        tracker: &SharedTracker,
        max_parallel: usize,
        report: &mut ScheduleReport,
    ) -> Result<(), SchedulerError> {
        let graph = {
            let t = tracker.lock().await;
            let phases: Vec<Phase> = t
                .phase_states()
                .iter()
                .skip(1)
                .map(|s| s.phase.clone())
                .collect();
            DependencyGraph::from_phases(&phases)
        };
        match graph.waves() {
            Ok(waves) => debug!(?waves, "Dependency waves"),
            Err(e) => warn!(error = %e, "Plan has a dependency cycle; running what can run"),
        }

        // Results are applied as each phase finishes, and freed slots are
        // refilled straight away.
        let mut in_flight = FuturesUnordered::new();
        let mut broken = None;
        loop {
            if broken.is_none() {
                let (started, overview) = {
                    let mut t = tracker.lock().await;
                    self.block_unreachable(&mut t, &graph, report)?;

                    let free = max_parallel.saturating_sub(in_flight.len());
                    let ready: Vec<usize> = (0..graph.len())
                        .filter(|&node| {
                            status_of(&t, node) == Some(PhaseStatus::Pending)
                                && graph
                                    .dependencies(node)
                                    .iter()
                                    .all(|&dep| status_of(&t, dep) == Some(PhaseStatus::Completed))
                        })
                        .take(free)
                        .collect();

                    let mut started = Vec::with_capacity(ready.len());
                    for node in ready {
                        let position = node + 1;
                        t.start_phase(position)?;
                        started.push((position, t.phase_states()[position].phase.clone()));
                    }
                    (started, t.overview().clone())
                };

                if !started.is_empty() {
                    let indices: Vec<u32> = started.iter().map(|(_, p)| p.phase_index).collect();
                    debug!(batch = ?indices, running = in_flight.len(), "Starting phases");
                    report.batches.push(indices);
                    for (position, phase) in started {
                        let overview = overview.clone();
                        in_flight.push(async move {
                            let attempt = self.attempt(&phase, &overview).await;
                            (position, attempt)
                        });
                    }
                }
            }

            let Some((position, attempt)) = in_flight.next().await else {
                break;
            };
            let mut t = tracker.lock().await;
            if let Some(err) = self.apply(&mut t, position, attempt, report)? {
                broken.get_or_insert(err);
            }
        }

        if let Some(err) = broken {
            return Err(err);
        }

        let t = tracker.lock().await;
        report.cycle = (0..graph.len())
            .filter(|&node| status_of(&t, node) == Some(PhaseStatus::Pending))
            .filter_map(|node| graph.phase_index(node))
            .collect();
        if !report.cycle.is_empty() {
            warn!(phases = ?report.cycle, "Dependency cycle; phases can never start");
        }
        Ok(())
    }

    /// Skip pending phases that wait on a skipped or failed phase, repeating
    /// until nothing changes so the skip reaches transitive dependents.
    fn block_unreachable(
        &self,
        t: &mut Tracker,
        graph: &DependencyGraph,
        report: &mut ScheduleReport,
    ) -> Result<(), SchedulerError> {
        loop {
            let mut changed = false;
            for node in 0..graph.len() {
                if status_of(t, node) != Some(PhaseStatus::Pending) {
                    continue;
                }
                let dead = graph.dependencies(node).iter().find(|&&dep| {
                    matches!(
                        status_of(t, dep),
                        Some(PhaseStatus::Skipped | PhaseStatus::Failed)
                    )
                });
                if let Some(&dep) = dead {
                    let dep_index = graph.phase_index(dep).unwrap_or_default();
                    let reason = format!("dependency phase {} did not complete", dep_index);
                    t.skip_phase(node + 1, &reason)?;
                    if let Some(phase_index) = graph.phase_index(node) {
                        info!(phase_index, dependency = dep_index, "Phase blocked");
                        report.blocked.push(phase_index);
                    }
                    changed = true;
                }
            }
            if !changed {
                return Ok(());
            }
        }
    }

    // -- shared -----------------------------------------------------------------

    async fn attempt(&self, phase: &Phase, overview: &ProjectOverview) -> Attempt {
        let work = self.executor.execute(phase, overview);
        let result = match self.phase_timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(result) => result,
                Err(_) => {
                    self.executor.cancel(phase).await;
                    return Attempt::TimedOut(limit);
                }
            },
            None => work.await,
        };
        match result {
            Ok(outcome) => Attempt::Finished(outcome),
            Err(e) => Attempt::Broken(e),
        }
    }

    /// Apply one attempt to the tracker. Returns the executor error that
    /// should end the run, if any.
    fn apply(
        &self,
        t: &mut Tracker,
        position: usize,
        attempt: Attempt,
        report: &mut ScheduleReport,
    ) -> Result<Option<SchedulerError>, SchedulerError> {
        match attempt {
            Attempt::Finished(PhaseOutcome::Completed { summary }) => {
                t.complete_phase(position, summary)?;
            }
            Attempt::Finished(PhaseOutcome::Skip { reason }) => {
                t.skip_phase(position, &reason)?;
            }
            Attempt::Finished(PhaseOutcome::Retry { reason }) => {
                t.fail_phase(position, &reason)?;
                self.retry_or_give_up(t, position, report)?;
            }
            Attempt::TimedOut(limit) => {
                warn!(position, timeout_secs = limit.as_secs_f64(), "Phase timed out");
                t.cancel_phase(position)?;
                self.retry_or_give_up(t, position, report)?;
            }
            Attempt::Broken(e) => {
                t.cancel_phase(position)?;
                return Ok(Some(SchedulerError::Executor(e)));
            }
        }
        Ok(None)
    }

    fn retry_or_give_up(
        &self,
        t: &mut Tracker,
        position: usize,
        report: &mut ScheduleReport,
    ) -> Result<(), SchedulerError> {
        if t.can_retry_phase(position) {
            t.retry_phase(position)?;
            return Ok(());
        }
        if let Some(state) = t.state(position) {
            report.forced_skips.push(state.phase.phase_index);
        }
        if self.mode == ExecutionMode::Sequential && t.current_index() == position {
            t.force_advance()?;
        } else {
            t.force_skip_phase(position)?;
        }
        Ok(())
    }
}

/// Status of graph node `node` (tracker position `node + 1`).
fn status_of(t: &Tracker, node: NodeIndex) -> Option<PhaseStatus> {
    t.state(node + 1).map(|s| s.status)
}

fn claim(t: &Tracker, position: usize) -> (usize, Phase, ProjectOverview) {
    (
        position,
        t.phase_states()[position].phase.clone(),
        t.overview().clone(),
    )
}
