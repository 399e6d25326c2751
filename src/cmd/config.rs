//! Configuration view and validation commands: `phaseflow config`.

use anyhow::{Context, Result};

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use phaseflow::config::{PhaseflowConfig, PhaseflowToml};

    let config = PhaseflowConfig::new(project_dir.to_path_buf())?;
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Phaseflow Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No phaseflow.toml found at {}", config_path.display());
                println!("Using default configuration:");
            }
            println!();
            let rendered = toml::to_string_pretty(&config.toml)
                .context("Failed to render configuration")?;
            for line in rendered.lines() {
                println!("  {}", line);
            }
            println!();

            println!("Effective values (with env overrides):");
            println!("  executor_cmd = \"{}\"", config.executor_cmd());
            println!("  mode = \"{}\"", config.scheduler_mode());
            match config.checkpoint_store() {
                Some(store) => println!("  checkpoint = \"{}\"", store.path().display()),
                None => println!("  checkpoint = disabled"),
            }
            println!("  log_dir = \"{}\"", config.log_dir().display());
            println!();
            if !config_path.exists() {
                println!("Run 'phaseflow config init' to create a phaseflow.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No phaseflow.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("phaseflow.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&config.phaseflow_dir).with_context(|| {
                format!("Failed to create {}", config.phaseflow_dir.display())
            })?;
            PhaseflowToml::default().save(&config_path)?;

            println!("Created phaseflow.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [scheduler] mode, max_parallel, phase_timeout_secs");
            println!("  - [tracker] retry_limit");
            println!("  - [checkpoint] enabled, dir, frequency");
            println!("  - [executor] command, args");
            println!();
        }
    }

    Ok(())
}
