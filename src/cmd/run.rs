//! Phase execution: `phaseflow run`.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

use phaseflow::config::{PhaseflowConfig, SchedulerMode};
use phaseflow::scheduler::{ProcessExecutor, Scheduler, ScheduleReport};
use phaseflow::tracker::TrackerEvent;
use phaseflow::{PlanParser, Tracker};

use super::open_tracker;

pub async fn cmd_run(
    project_dir: &Path,
    mode: Option<SchedulerMode>,
    max_parallel: Option<usize>,
    executor_cmd: Option<String>,
    plan_doc: Option<&Path>,
) -> Result<()> {
    let config = PhaseflowConfig::new(project_dir.to_path_buf())?
        .with_run_overrides(mode, max_parallel, executor_cmd);
    for warning in config.validate() {
        println!("{} {}", console::style("Warning:").yellow().bold(), warning);
    }

    let mut tracker = open_tracker(&config);
    if !tracker.is_registered() {
        let Some(doc) = plan_doc else {
            anyhow::bail!("No plan registered. Run 'phaseflow plan <doc>' first, or pass --plan.");
        };
        register_from(&mut tracker, &config, doc)?;
    }

    let events = tracker.subscribe();
    let printer = tokio::spawn(print_events(events));

    let executor = ProcessExecutor::new(config.executor_cmd(), config.executor_args().to_vec())
        .with_working_dir(&config.project_dir)
        .with_log_dir(config.log_dir());
    let scheduler = Scheduler::new(Arc::new(executor), config.execution_mode())
        .with_phase_timeout(config.phase_timeout());

    println!();
    println!(
        "{} ({} mode, executor '{}')",
        console::style("Running phases").bold().cyan(),
        config.scheduler_mode(),
        config.executor_cmd()
    );
    println!();

    let shared = Arc::new(Mutex::new(tracker));
    let outcome = scheduler.run(&shared).await;
    let summary = shared.lock().await.summary();
    // Dropping the tracker closes the event channel so the printer drains and exits.
    drop(shared);
    printer.await.ok();

    let report = outcome.context("Scheduler run aborted")?;
    print_report(&report);
    println!(
        "{} completed, {} skipped, {} pending of {} phase(s)",
        summary.completed, summary.skipped, summary.pending, summary.total
    );
    println!();

    report.into_result()?;
    Ok(())
}

fn register_from(tracker: &mut Tracker, config: &PhaseflowConfig, doc: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(doc)
        .with_context(|| format!("Failed to read plan document {}", doc.display()))?;
    let plan = PlanParser::new()
        .with_reinforcement(config.reinforce_requirements())
        .parse(&raw)
        .with_context(|| format!("Failed to parse plan document {}", doc.display()))?;
    tracker.register_plan(plan)?;
    Ok(())
}

async fn print_events(mut events: mpsc::UnboundedReceiver<TrackerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TrackerEvent::PhaseStarted {
                phase_index, title, ..
            } if phase_index > 0 => {
                println!("  {} Phase {}: {}", console::style("▶").cyan(), phase_index, title);
            }
            TrackerEvent::PhaseCompleted { phase_index, .. } if phase_index > 0 => {
                println!(
                    "  {} Phase {} completed",
                    console::style("✓").green(),
                    phase_index
                );
            }
            TrackerEvent::PhaseFailed {
                phase_index,
                reason,
                ..
            } => {
                println!(
                    "  {} Phase {} failed: {}",
                    console::style("✗").red(),
                    phase_index,
                    reason
                );
            }
            TrackerEvent::PhaseRetried {
                phase_index,
                retry_count,
                ..
            } => {
                println!(
                    "  {} Phase {} retry {}",
                    console::style("↻").yellow(),
                    phase_index,
                    retry_count
                );
            }
            TrackerEvent::PhaseSkipped {
                phase_index,
                forced,
                reason,
                ..
            } => {
                let label = if forced { "skipped (forced)" } else { "skipped" };
                println!(
                    "  {} Phase {} {}: {}",
                    console::style("⏭").yellow(),
                    phase_index,
                    label,
                    reason
                );
            }
            TrackerEvent::PhaseCancelled { phase_index, .. } => {
                println!(
                    "  {} Phase {} cancelled",
                    console::style("■").dim(),
                    phase_index
                );
            }
            TrackerEvent::RunCompleted => {
                println!("  {}", console::style("All phases complete").green().bold());
            }
            _ => {}
        }
    }
}

fn print_report(report: &ScheduleReport) {
    println!();
    if report.is_success() {
        println!("{}", console::style("Run finished").green().bold());
    } else {
        println!("{}", console::style("Run finished with problems").yellow().bold());
    }
    if !report.forced_skips.is_empty() {
        println!("  Out of retries: {}", join(&report.forced_skips));
    }
    if !report.blocked.is_empty() {
        println!("  Blocked by a skipped dependency: {}", join(&report.blocked));
    }
    if !report.cycle.is_empty() {
        println!(
            "  {} {}",
            console::style("Dependency cycle:").red().bold(),
            join(&report.cycle)
        );
    }
}

fn join(indices: &[u32]) -> String {
    indices
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
