use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use phaseflow::config::SchedulerMode;

mod cmd;

#[derive(Parser)]
#[command(name = "phaseflow")]
#[command(version, about = "Parse model-written plans and drive their phases to completion")]
pub struct Cli {
    /// Log debug output (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project directory (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse a plan document and print its phases
    Parse {
        /// Path to the plan document
        doc: PathBuf,
        /// Print the parsed plan as JSON
        #[arg(long)]
        json: bool,
        /// Keep requirement ids terse instead of expanding them from the inventory
        #[arg(long)]
        no_reinforce: bool,
    },
    /// Parse a plan document and register its phases for execution
    Plan {
        /// Path to the plan document
        doc: PathBuf,
        /// Replace an already registered plan
        #[arg(long)]
        replace: bool,
    },
    /// Show the state of the registered phases
    Status {
        /// Print the tracker snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resume and drive the registered phases
    Run {
        /// Scheduling mode: sequential, parallel, conditional
        #[arg(long)]
        mode: Option<SchedulerMode>,
        /// Maximum phases driven at once in parallel mode
        #[arg(long)]
        max_parallel: Option<usize>,
        /// Command run for each phase with the prompt on stdin
        #[arg(long)]
        executor_cmd: Option<String>,
        /// Register this plan first if none is registered
        #[arg(long)]
        plan: Option<PathBuf>,
    },
    /// Delete the checkpoint and abandon the current task
    Reset {
        /// Do not ask for confirmation
        #[arg(long)]
        force: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default phaseflow.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    phaseflow::logging::init_tracing(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Parse {
            doc,
            json,
            no_reinforce,
        } => cmd::cmd_parse(&project_dir, doc, *json, *no_reinforce)?,
        Commands::Plan { doc, replace } => cmd::cmd_plan(&project_dir, doc, *replace)?,
        Commands::Status { json } => cmd::cmd_status(&project_dir, *json)?,
        Commands::Run {
            mode,
            max_parallel,
            executor_cmd,
            plan,
        } => {
            cmd::cmd_run(
                &project_dir,
                *mode,
                *max_parallel,
                executor_cmd.clone(),
                plan.as_deref(),
            )
            .await?
        }
        Commands::Reset { force } => cmd::cmd_reset(&project_dir, *force)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
