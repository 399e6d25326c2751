//! Progress inspection and reset: `phaseflow status` and `phaseflow reset`.

use anyhow::{Context, Result};
use std::path::Path;

use phaseflow::PhaseStatus;
use phaseflow::config::PhaseflowConfig;

use super::open_tracker;

pub fn cmd_status(project_dir: &Path, json: bool) -> Result<()> {
    let config = PhaseflowConfig::new(project_dir.to_path_buf())?;
    let tracker = open_tracker(&config);

    if json {
        println!("{}", serde_json::to_string_pretty(&tracker.snapshot())?);
        return Ok(());
    }

    println!();
    println!("Phaseflow Status");
    println!("================");
    println!();

    if !tracker.is_registered() {
        println!("Plan: Not registered");
        println!();
        println!("Run 'phaseflow plan <doc>' to register a plan.");
        println!();
        return Ok(());
    }

    if !tracker.overview().title.is_empty() {
        println!("Plan: {}", tracker.overview().title);
    } else {
        println!("Plan: Registered");
    }
    if let Some(revision) = tracker.last_checkpoint_ref() {
        println!("Checkpoint: {}", revision);
    }
    println!();

    println!(
        "{:<7} {:<13} {:<8} {:<10} Title",
        "Phase", "Status", "Retries", "Elapsed"
    );
    println!(
        "{:<7} {:<13} {:<8} {:<10} -----",
        "-------", "-------------", "--------", "----------"
    );
    for state in &tracker.phase_states()[1..] {
        let status = format!("{:<13}", state.status.to_string());
        let status = match state.status {
            PhaseStatus::Completed => console::style(status).green(),
            PhaseStatus::InProgress => console::style(status).cyan(),
            PhaseStatus::Skipped => console::style(status).yellow(),
            PhaseStatus::Failed => console::style(status).red(),
            PhaseStatus::Pending => console::style(status).dim(),
        };
        let elapsed = state
            .elapsed()
            .map(|d| format!("{}s", d.as_secs()))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<7} {} {:<8} {:<10} {}",
            state.phase.phase_index, status, state.retry_count, elapsed, state.phase.title
        );
    }
    println!();

    let summary = tracker.summary();
    println!(
        "{} total: {} completed, {} skipped, {} failed, {} in progress, {} pending",
        summary.total,
        summary.completed,
        summary.skipped,
        summary.failed,
        summary.in_progress,
        summary.pending
    );
    if let Some(at) = tracker.run_completed_at() {
        println!("Run completed at {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!();
    Ok(())
}

pub fn cmd_reset(project_dir: &Path, force: bool) -> Result<()> {
    use dialoguer::Confirm;

    let config = PhaseflowConfig::new(project_dir.to_path_buf())?;

    if !force {
        let confirm = Confirm::new()
            .with_prompt("This will discard the registered plan and all progress. Are you sure?")
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    if let Some(store) = config.checkpoint_store()
        && !store.delete()?
    {
        println!("No checkpoint to delete");
    }

    let log_dir = config.log_dir();
    if log_dir.exists() {
        std::fs::remove_dir_all(&log_dir)
            .with_context(|| format!("Failed to remove log directory {}", log_dir.display()))?;
    }

    println!("Reset complete");
    Ok(())
}
