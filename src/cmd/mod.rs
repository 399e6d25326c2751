//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module   | Commands handled   |
//! |----------|--------------------|
//! | `parse`  | `Parse`, `Plan`    |
//! | `status` | `Status`, `Reset`  |
//! | `run`    | `Run`              |
//! | `config` | `Config`           |

pub mod config;
pub mod parse;
pub mod run;
pub mod status;

pub use config::cmd_config;
pub use parse::{cmd_parse, cmd_plan};
pub use run::cmd_run;
pub use status::{cmd_reset, cmd_status};

use phaseflow::Tracker;
use phaseflow::config::PhaseflowConfig;

/// Tracker for the project: restored from its checkpoint when checkpointing
/// is enabled, otherwise fresh and in-memory.
pub fn open_tracker(config: &PhaseflowConfig) -> Tracker {
    let tracker = match config.checkpoint_store() {
        Some(store) => Tracker::restore_or_new(store, config.checkpoint_frequency()),
        None => Tracker::new(),
    };
    tracker.with_retry_limit(config.retry_limit())
}
