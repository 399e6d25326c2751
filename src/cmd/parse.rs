//! Plan parsing commands: `phaseflow parse` and `phaseflow plan`.

use anyhow::{Context, Result};
use std::path::Path;

use phaseflow::config::PhaseflowConfig;
use phaseflow::{Plan, PlanParser};

use super::open_tracker;

fn load_plan(config: &PhaseflowConfig, doc: &Path, reinforce: bool) -> Result<Plan> {
    let raw = std::fs::read_to_string(doc)
        .with_context(|| format!("Failed to read plan document {}", doc.display()))?;
    let plan = PlanParser::new()
        .with_reinforcement(reinforce && config.reinforce_requirements())
        .parse(&raw)
        .with_context(|| format!("Failed to parse plan document {}", doc.display()))?;
    Ok(plan)
}

pub fn cmd_parse(project_dir: &Path, doc: &Path, json: bool, no_reinforce: bool) -> Result<()> {
    let config = PhaseflowConfig::new(project_dir.to_path_buf())?;
    let plan = load_plan(&config, doc, !no_reinforce)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    print_plan(&plan);
    Ok(())
}

pub fn cmd_plan(project_dir: &Path, doc: &Path, replace: bool) -> Result<()> {
    let config = PhaseflowConfig::new(project_dir.to_path_buf())?;
    if config.checkpoint_store().is_none() {
        anyhow::bail!(
            "Checkpointing is disabled in {}; a registered plan would not outlive this command. Use 'phaseflow run --plan' instead.",
            config.config_file().display()
        );
    }

    let plan = load_plan(&config, doc, true)?;
    let count = plan.phases.len();
    let mut tracker = open_tracker(&config);

    if tracker.is_registered() {
        if !replace {
            anyhow::bail!(
                "A plan is already registered. Pass --replace to discard its progress, or 'phaseflow reset' first."
            );
        }
        tracker.replace_plan(plan)?;
    } else {
        tracker.register_plan(plan)?;
    }

    println!();
    println!(
        "{} {} phase(s) from {}",
        console::style("Registered").green().bold(),
        count,
        doc.display()
    );
    println!("Run 'phaseflow run' to execute them.");
    println!();
    Ok(())
}

fn print_plan(plan: &Plan) {
    println!();
    if !plan.overview.title.is_empty() {
        println!("{}", console::style(&plan.overview.title).bold().cyan());
    }
    if !plan.execution_summary.is_empty() {
        println!("{}", plan.execution_summary.trim());
    }
    println!();
    println!("{:<7} {:<7} {:<14} Title", "Phase", "Order", "Depends on");
    println!(
        "{:<7} {:<7} {:<14} -----",
        "-------", "-------", "--------------"
    );

    for phase in &plan.phases {
        let deps = if phase.dependencies.is_empty() {
            "-".to_string()
        } else {
            phase.dependencies.join(", ")
        };
        println!(
            "{:<7} {:<7} {:<14} {}",
            phase.phase_index, phase.execution_order, deps, phase.title
        );
        let requirements = phase.requirements.ids();
        if !requirements.is_empty() {
            println!(
                "        {}",
                console::style(format!("requirements: {}", requirements.join(", "))).dim()
            );
        }
    }
    println!();
    println!("{} phase(s)", plan.phases.len());
    println!();
}
