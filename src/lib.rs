//! Resumable phase orchestration.
//!
//! phaseflow turns a model-written plan document into typed [`phase::Phase`]s
//! ([`plan`]), tracks their lifecycle with crash-safe checkpoints
//! ([`tracker`], [`checkpoint`]) and drives them through an executor in
//! sequential, dependency-aware parallel or conditional order ([`scheduler`]).

pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod logging;
pub mod phase;
pub mod plan;
pub mod prompt;
pub mod scheduler;
pub mod tracker;

pub use errors::{CheckpointError, ParseError, SchedulerError, TrackerError};
pub use phase::{Phase, Plan, ProjectOverview};
pub use plan::{PlanParser, parse_plan};
pub use scheduler::{ExecutionMode, PhaseExecutor, PhaseOutcome, Scheduler, ScheduleReport};
pub use tracker::{PhaseStatus, Tracker};
