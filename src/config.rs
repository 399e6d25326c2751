//! Configuration for phaseflow, read from `.phaseflow/phaseflow.toml`.
//!
//! Every section and key is optional. Values are layered: the file first,
//! then environment variables, then CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [tracker]
//! retry_limit = 2
//!
//! [checkpoint]
//! enabled = true
//! dir = ".phaseflow/checkpoints"
//! frequency = "per_phase"        # or "per_subtask"
//!
//! [scheduler]
//! mode = "parallel"              # sequential | parallel | conditional
//! max_parallel = 4
//! default_action = "execute"     # or "skip"
//! phase_timeout_secs = 1800
//!
//! [parser]
//! reinforce_requirements = true
//!
//! [executor]
//! command = "claude"
//! args = ["--print"]
//! ```
//!
//! Environment overrides: `PHASEFLOW_EXECUTOR_CMD`, `PHASEFLOW_CHECKPOINT_DIR`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::checkpoint::{CheckpointFrequency, CheckpointStore};
use crate::scheduler::{DEFAULT_MAX_PARALLEL, DefaultAction, ExecutionMode};
use crate::tracker::DEFAULT_RETRY_LIMIT;

/// Directory holding phaseflow's files inside a project.
pub const PHASEFLOW_DIR: &str = ".phaseflow";

/// Name of the configuration file inside [`PHASEFLOW_DIR`].
pub const CONFIG_FILE: &str = "phaseflow.toml";

pub const ENV_EXECUTOR_CMD: &str = "PHASEFLOW_EXECUTOR_CMD";
pub const ENV_CHECKPOINT_DIR: &str = "PHASEFLOW_CHECKPOINT_DIR";

const DEFAULT_EXECUTOR_CMD: &str = "claude";

/// Scheduling mode as written in configuration and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerMode {
    #[default]
    Sequential,
    Parallel,
    Conditional,
}

impl std::fmt::Display for SchedulerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerMode::Sequential => write!(f, "sequential"),
            SchedulerMode::Parallel => write!(f, "parallel"),
            SchedulerMode::Conditional => write!(f, "conditional"),
        }
    }
}

impl std::str::FromStr for SchedulerMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(SchedulerMode::Sequential),
            "parallel" => Ok(SchedulerMode::Parallel),
            "conditional" => Ok(SchedulerMode::Conditional),
            _ => anyhow::bail!(
                "Invalid scheduler mode '{}'. Valid values: sequential, parallel, conditional",
                s
            ),
        }
    }
}

/// Tracker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerSection {
    /// Retries allowed per phase before it is force-skipped
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
}

fn default_retry_limit() -> u32 {
    DEFAULT_RETRY_LIMIT
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
        }
    }
}

/// Checkpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSection {
    #[serde(default = "default_checkpoint_enabled")]
    pub enabled: bool,
    /// Directory for checkpoint files, relative to the project directory
    #[serde(default = "default_checkpoint_dir")]
    pub dir: String,
    #[serde(default)]
    pub frequency: CheckpointFrequency,
}

fn default_checkpoint_enabled() -> bool {
    true
}

fn default_checkpoint_dir() -> String {
    format!("{}/checkpoints", PHASEFLOW_DIR)
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            enabled: default_checkpoint_enabled(),
            dir: default_checkpoint_dir(),
            frequency: CheckpointFrequency::default(),
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    #[serde(default)]
    pub mode: SchedulerMode,
    /// Phases driven at once in parallel mode
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// What conditional mode does with phases that have no predicate
    #[serde(default)]
    pub default_action: DefaultAction,
    /// Give up on a phase attempt after this many seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_timeout_secs: Option<u64>,
}

fn default_max_parallel() -> usize {
    DEFAULT_MAX_PARALLEL
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            mode: SchedulerMode::default(),
            max_parallel: default_max_parallel(),
            default_action: DefaultAction::default(),
            phase_timeout_secs: None,
        }
    }
}

/// Plan parser settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserSection {
    /// Expand terse requirement ids from the requirements inventory
    #[serde(default = "default_reinforce_requirements")]
    pub reinforce_requirements: bool,
}

fn default_reinforce_requirements() -> bool {
    true
}

impl Default for ParserSection {
    fn default() -> Self {
        Self {
            reinforce_requirements: default_reinforce_requirements(),
        }
    }
}

/// Process executor settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorSection {
    /// Command run once per phase attempt (default: "claude")
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Contents of `phaseflow.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseflowToml {
    #[serde(default)]
    pub tracker: TrackerSection,
    #[serde(default)]
    pub checkpoint: CheckpointSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub parser: ParserSection,
    #[serde(default)]
    pub executor: ExecutorSection,
}

impl PhaseflowToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse phaseflow.toml")
    }

    /// Load `phaseflow.toml` from `phaseflow_dir`, or defaults if it is absent.
    pub fn load_or_default(phaseflow_dir: &Path) -> Result<Self> {
        let config_path = phaseflow_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize phaseflow.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.tracker.retry_limit == 0 {
            warnings.push(
                "retry_limit = 0: a phase is force-skipped after its first failed attempt"
                    .to_string(),
            );
        }
        if self.scheduler.max_parallel == 0 {
            warnings.push("max_parallel = 0 is treated as 1".to_string());
        }
        if self.scheduler.phase_timeout_secs == Some(0) {
            warnings.push("phase_timeout_secs = 0 would time out every phase at once".to_string());
        }
        if self.checkpoint.enabled && self.checkpoint.dir.trim().is_empty() {
            warnings.push("checkpoint.dir is empty; the project directory is used".to_string());
        }
        if self.scheduler.mode != SchedulerMode::Parallel && self.scheduler.max_parallel != default_max_parallel() {
            warnings.push(format!(
                "max_parallel only applies in parallel mode (mode is {})",
                self.scheduler.mode
            ));
        }
        if matches!(&self.executor.command, Some(cmd) if cmd.trim().is_empty()) {
            warnings.push("executor.command is empty".to_string());
        }

        warnings
    }
}

/// Effective configuration: `phaseflow.toml`, then environment, then CLI.
#[derive(Debug, Clone)]
pub struct PhaseflowConfig {
    pub project_dir: PathBuf,
    pub phaseflow_dir: PathBuf,
    pub toml: PhaseflowToml,
    /// CLI override for the scheduler mode
    pub cli_mode: Option<SchedulerMode>,
    /// CLI override for max_parallel
    pub cli_max_parallel: Option<usize>,
    /// CLI override for the executor command
    pub cli_executor_cmd: Option<String>,
}

impl PhaseflowConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve project directory {}", project_dir.display()))?;
        let phaseflow_dir = project_dir.join(PHASEFLOW_DIR);
        let toml = PhaseflowToml::load_or_default(&phaseflow_dir)?;

        Ok(Self {
            project_dir,
            phaseflow_dir,
            toml,
            cli_mode: None,
            cli_max_parallel: None,
            cli_executor_cmd: None,
        })
    }

    /// Apply `run` flags on top of file and environment settings.
    pub fn with_run_overrides(
        mut self,
        mode: Option<SchedulerMode>,
        max_parallel: Option<usize>,
        executor_cmd: Option<String>,
    ) -> Self {
        self.cli_mode = mode;
        self.cli_max_parallel = max_parallel;
        self.cli_executor_cmd = executor_cmd;
        self
    }

    /// Executor command (CLI, then env, then file, then "claude").
    pub fn executor_cmd(&self) -> String {
        layered(
            self.cli_executor_cmd.clone(),
            env_var(ENV_EXECUTOR_CMD),
            self.toml.executor.command.clone(),
        )
        .unwrap_or_else(|| DEFAULT_EXECUTOR_CMD.to_string())
    }

    pub fn executor_args(&self) -> &[String] {
        &self.toml.executor.args
    }

    /// Checkpoint directory (env, then file), resolved against the project.
    pub fn checkpoint_dir(&self) -> PathBuf {
        let dir = layered(
            None,
            env_var(ENV_CHECKPOINT_DIR),
            Some(self.toml.checkpoint.dir.clone()),
        )
        .unwrap_or_default();
        self.project_dir.join(dir)
    }

    /// Checkpoint store, unless checkpointing is disabled.
    pub fn checkpoint_store(&self) -> Option<CheckpointStore> {
        self.toml
            .checkpoint
            .enabled
            .then(|| CheckpointStore::on_disk(self.checkpoint_dir()))
    }

    pub fn checkpoint_frequency(&self) -> CheckpointFrequency {
        self.toml.checkpoint.frequency
    }

    pub fn retry_limit(&self) -> u32 {
        self.toml.tracker.retry_limit
    }

    pub fn reinforce_requirements(&self) -> bool {
        self.toml.parser.reinforce_requirements
    }

    pub fn scheduler_mode(&self) -> SchedulerMode {
        self.cli_mode.unwrap_or(self.toml.scheduler.mode)
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        match self.scheduler_mode() {
            SchedulerMode::Sequential => ExecutionMode::Sequential,
            SchedulerMode::Parallel => ExecutionMode::Parallel {
                max_parallel: self
                    .cli_max_parallel
                    .unwrap_or(self.toml.scheduler.max_parallel)
                    .max(1),
            },
            SchedulerMode::Conditional => ExecutionMode::Conditional {
                default_action: self.toml.scheduler.default_action,
            },
        }
    }

    pub fn phase_timeout(&self) -> Option<Duration> {
        self.toml.scheduler.phase_timeout_secs.map(Duration::from_secs)
    }

    /// Where executor prompts and outputs are kept.
    pub fn log_dir(&self) -> PathBuf {
        self.phaseflow_dir.join("logs")
    }

    pub fn config_file(&self) -> PathBuf {
        self.phaseflow_dir.join(CONFIG_FILE)
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// First of CLI, environment and file that is set.
fn layered<T>(cli: Option<T>, env: Option<T>, file: Option<T>) -> Option<T> {
    cli.or(env).or(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_scheduler_mode_from_str() {
        assert_eq!(
            "Parallel".parse::<SchedulerMode>().unwrap(),
            SchedulerMode::Parallel
        );
        assert_eq!(
            "sequential".parse::<SchedulerMode>().unwrap(),
            SchedulerMode::Sequential
        );
        let err = "random".parse::<SchedulerMode>().unwrap_err();
        assert!(err.to_string().contains("Valid values"));
    }

    #[test]
    fn test_parse_empty_gives_defaults() {
        let toml = PhaseflowToml::parse("").unwrap();
        assert_eq!(toml.tracker.retry_limit, 2);
        assert!(toml.checkpoint.enabled);
        assert_eq!(toml.checkpoint.dir, ".phaseflow/checkpoints");
        assert_eq!(toml.checkpoint.frequency, CheckpointFrequency::PerPhase);
        assert_eq!(toml.scheduler.mode, SchedulerMode::Sequential);
        assert_eq!(toml.scheduler.max_parallel, 4);
        assert_eq!(toml.scheduler.default_action, DefaultAction::Execute);
        assert!(toml.scheduler.phase_timeout_secs.is_none());
        assert!(toml.parser.reinforce_requirements);
        assert!(toml.executor.command.is_none());
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_all_sections() {
        let content = r#"
[tracker]
retry_limit = 5

[checkpoint]
enabled = false
dir = "state"
frequency = "per_subtask"

[scheduler]
mode = "parallel"
max_parallel = 8
default_action = "skip"
phase_timeout_secs = 60

[parser]
reinforce_requirements = false

[executor]
command = "my-agent"
args = ["--print", "--quiet"]
"#;
        let toml = PhaseflowToml::parse(content).unwrap();
        assert_eq!(toml.tracker.retry_limit, 5);
        assert!(!toml.checkpoint.enabled);
        assert_eq!(toml.checkpoint.dir, "state");
        assert_eq!(toml.checkpoint.frequency, CheckpointFrequency::PerSubtask);
        assert_eq!(toml.scheduler.mode, SchedulerMode::Parallel);
        assert_eq!(toml.scheduler.max_parallel, 8);
        assert_eq!(toml.scheduler.default_action, DefaultAction::Skip);
        assert_eq!(toml.scheduler.phase_timeout_secs, Some(60));
        assert!(!toml.parser.reinforce_requirements);
        assert_eq!(toml.executor.command.as_deref(), Some("my-agent"));
        assert_eq!(toml.executor.args, vec!["--print", "--quiet"]);
    }

    #[test]
    fn test_parse_rejects_unknown_mode() {
        let result = PhaseflowToml::parse("[scheduler]\nmode = \"random\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_warnings() {
        let content = r#"
[tracker]
retry_limit = 0

[scheduler]
max_parallel = 0
phase_timeout_secs = 0
"#;
        let warnings = PhaseflowToml::parse(content).unwrap().validate();
        assert!(warnings.iter().any(|w| w.contains("retry_limit")));
        assert!(warnings.iter().any(|w| w.contains("max_parallel = 0")));
        assert!(warnings.iter().any(|w| w.contains("phase_timeout_secs")));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut toml = PhaseflowToml::default();
        toml.scheduler.mode = SchedulerMode::Conditional;
        toml.executor.command = Some("agent".into());
        toml.save(&path).unwrap();

        let loaded = PhaseflowToml::load(&path).unwrap();
        assert_eq!(loaded.scheduler.mode, SchedulerMode::Conditional);
        assert_eq!(loaded.executor.command.as_deref(), Some("agent"));
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let toml = PhaseflowToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.tracker.retry_limit, 2);
    }

    #[test]
    fn test_layering_order() {
        assert_eq!(layered(Some(1), Some(2), Some(3)), Some(1));
        assert_eq!(layered(None, Some(2), Some(3)), Some(2));
        assert_eq!(layered(None, None, Some(3)), Some(3));
        assert_eq!(layered::<u8>(None, None, None), None);
    }

    #[test]
    fn test_config_reads_project_file_and_cli_overrides() {
        let dir = tempdir().unwrap();
        let phaseflow_dir = dir.path().join(PHASEFLOW_DIR);
        std::fs::create_dir_all(&phaseflow_dir).unwrap();
        std::fs::write(
            phaseflow_dir.join(CONFIG_FILE),
            "[scheduler]\nmode = \"parallel\"\nmax_parallel = 3\n\n[tracker]\nretry_limit = 4\n",
        )
        .unwrap();

        let config = PhaseflowConfig::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(config.retry_limit(), 4);
        assert_eq!(
            config.execution_mode(),
            ExecutionMode::Parallel { max_parallel: 3 }
        );

        let config = config.with_run_overrides(Some(SchedulerMode::Parallel), Some(7), Some("cat".into()));
        assert_eq!(
            config.execution_mode(),
            ExecutionMode::Parallel { max_parallel: 7 }
        );
        assert_eq!(config.executor_cmd(), "cat");

        let config = config.with_run_overrides(Some(SchedulerMode::Sequential), None, None);
        assert_eq!(config.execution_mode(), ExecutionMode::Sequential);
    }

    #[test]
    fn test_checkpoint_store_follows_enabled_flag() {
        let dir = tempdir().unwrap();
        let mut config = PhaseflowConfig::new(dir.path().to_path_buf()).unwrap();
        assert!(config.checkpoint_store().is_some());

        config.toml.checkpoint.enabled = false;
        assert!(config.checkpoint_store().is_none());
    }
}
