//! Phase execution collaborators.
//!
//! The scheduler hands each started phase to a [`PhaseExecutor`] and turns the
//! returned [`PhaseOutcome`] into a tracker transition. An `Err` from
//! `execute` means the executor itself is unusable and aborts the run; a phase
//! that merely did not work out reports [`PhaseOutcome::Retry`].

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::phase::{Phase, ProjectOverview};
use crate::prompt::{MarkdownPromptBuilder, PromptBuilder};

static SUMMARY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<summary>(.*?)</summary>").unwrap());

static SKIP_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<skip>(.*?)</skip>").unwrap());

/// What became of one attempt at a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PhaseOutcome {
    Completed { summary: Option<String> },
    Retry { reason: String },
    Skip { reason: String },
}

#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    /// Carry out one attempt at `phase`.
    async fn execute(&self, phase: &Phase, overview: &ProjectOverview) -> Result<PhaseOutcome>;

    /// Abandon work on `phase` after the scheduler gave up waiting.
    async fn cancel(&self, _phase: &Phase) {}
}

// -- message passing --------------------------------------------------------

/// A request to work on one phase; answer through `reply`.
#[derive(Debug)]
pub struct PhaseRequest {
    pub phase: Phase,
    pub overview: ProjectOverview,
    pub reply: oneshot::Sender<PhaseOutcome>,
}

#[derive(Debug)]
pub enum PhaseMessage {
    Begin(PhaseRequest),
    Cancel { phase_index: u32 },
}

/// Executor that forwards phases to whoever holds the receiving end of a
/// channel and waits for their answer.
#[derive(Debug, Clone)]
pub struct ChannelExecutor {
    tx: mpsc::Sender<PhaseMessage>,
}

impl ChannelExecutor {
    pub fn new(tx: mpsc::Sender<PhaseMessage>) -> Self {
        Self { tx }
    }

    /// Executor plus the receiver the worker should consume.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<PhaseMessage>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl PhaseExecutor for ChannelExecutor {
    async fn execute(&self, phase: &Phase, overview: &ProjectOverview) -> Result<PhaseOutcome> {
        let (reply, answer) = oneshot::channel();
        let request = PhaseRequest {
            phase: phase.clone(),
            overview: overview.clone(),
            reply,
        };
        self.tx
            .send(PhaseMessage::Begin(request))
            .await
            .map_err(|_| anyhow!("phase worker channel is closed"))?;

        match answer.await {
            Ok(outcome) => Ok(outcome),
            Err(_) => Ok(PhaseOutcome::Retry {
                reason: "worker dropped the request without answering".to_string(),
            }),
        }
    }

    async fn cancel(&self, phase: &Phase) {
        let message = PhaseMessage::Cancel {
            phase_index: phase.phase_index,
        };
        if self.tx.send(message).await.is_err() {
            debug!(phase_index = phase.phase_index, "Cancel not delivered; worker gone");
        }
    }
}

// -- external process ---------------------------------------------------------

/// Executor that runs a command per phase with the prompt on stdin.
///
/// Exit status 0 completes the phase. The summary is taken from a
/// `<summary>` element in stdout, else from the last non-empty line. A
/// `<skip>` element anywhere in stdout skips the phase. Any other exit asks
/// for a retry. The child is killed if the attempt is dropped, which is how
/// a timed-out attempt is cancelled.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    command: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    prompt_builder: Arc<dyn PromptBuilder>,
}

impl ProcessExecutor {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            working_dir: None,
            log_dir: None,
            prompt_builder: Arc::new(MarkdownPromptBuilder),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Keep each phase's prompt and output under `dir`.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_prompt_builder(mut self, builder: Arc<dyn PromptBuilder>) -> Self {
        self.prompt_builder = builder;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    async fn write_log(&self, name: String, contents: &[u8]) {
        let Some(dir) = &self.log_dir else {
            return;
        };
        let path = dir.join(name);
        let written = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, contents).await
        };
        if let Err(e) = written.await {
            warn!(path = %path.display(), error = %e, "Failed to write phase log");
        }
    }
}

#[async_trait]
impl PhaseExecutor for ProcessExecutor {
    async fn execute(&self, phase: &Phase, overview: &ProjectOverview) -> Result<PhaseOutcome> {
        let prompt = self.prompt_builder.build(phase, overview);
        self.write_log(
            format!("phase-{}-prompt.md", phase.phase_index),
            prompt.as_bytes(),
        )
        .await;

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        debug!(command = %self.command, phase_index = phase.phase_index, "Spawning phase process");
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn `{}`", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A command that ignores its input may exit before reading it
            match stdin.write_all(prompt.as_bytes()).await {
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                other => other.context("Failed to write prompt to stdin")?,
            }
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("Failed to wait for `{}`", self.command))?;
        self.write_log(
            format!("phase-{}-output.log", phase.phase_index),
            &output.stdout,
        )
        .await;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let mut reason = format!("`{}` exited with {}", self.command, output.status);
            if let Some(line) = last_line(&stderr) {
                reason.push_str(": ");
                reason.push_str(line);
            }
            return Ok(PhaseOutcome::Retry { reason });
        }
        Ok(outcome_from_output(&stdout))
    }
}

/// Interpret the stdout of a successful run.
pub fn outcome_from_output(stdout: &str) -> PhaseOutcome {
    if let Some(cap) = SKIP_REGEX.captures(stdout) {
        let reason = cap[1].trim();
        return PhaseOutcome::Skip {
            reason: if reason.is_empty() {
                "executor asked to skip".to_string()
            } else {
                reason.to_string()
            },
        };
    }
    let summary = SUMMARY_REGEX
        .captures(stdout)
        .map(|cap| cap[1].trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| last_line(stdout).map(str::to_string));
    PhaseOutcome::Completed { summary }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).rev().find(|l| !l.is_empty())
}
