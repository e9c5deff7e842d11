//! External program actions.
//!
//! Programs run detached from the cycle. The runner decides synchronously
//! whether an invocation may run at all; the outcome of a run is recorded
//! later through the activity handle.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use super::template::{Template, TemplateError, PROGRAM_FIELDS};
use crate::activity::{ActivityEvent, ActivityHandle, ActivityOutcome};
use crate::metrics;
use crate::rules::{ActionKind, RuleId};
use crate::torrent_client::TorrentSnapshot;

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("unknown program {0:?}")]
    UnknownProgram(String),

    #[error("program path {0:?} is not on the allow-list")]
    NotAllowed(String),

    #[error("invalid argument template: {0}")]
    Template(#[from] TemplateError),

    #[error("failed to start program: {0}")]
    Spawn(String),

    #[error("program timed out after {0}s")]
    Timeout(u64),

    #[error("program exited with code {code:?}: {stderr}")]
    Exited { code: Option<i32>, stderr: String },
}

impl ProgramError {
    /// Refused before anything ran.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ProgramError::UnknownProgram(_) | ProgramError::NotAllowed(_)
        )
    }
}

/// A configured program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramDefinition {
    pub id: String,
    /// Absolute path of the executable.
    pub path: String,
    /// Argument templates, rendered per torrent.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Executable paths and directories programs may run from.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    entries: Vec<PathBuf>,
}

impl AllowList {
    /// Relative entries are ignored.
    pub fn new<I, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let entries = entries
            .into_iter()
            .map(Into::into)
            .filter(|p: &PathBuf| {
                if p.is_absolute() {
                    true
                } else {
                    warn!(entry = %p.display(), "Ignoring relative allow-list entry");
                    false
                }
            })
            .collect();
        Self { entries }
    }

    /// `path` equals an entry or lies under one.
    pub fn permits(&self, path: &Path) -> bool {
        if !path.is_absolute() || path.components().any(|c| c == Component::ParentDir) {
            return false;
        }
        self.entries
            .iter()
            .any(|entry| path == entry || path.starts_with(entry))
    }
}

/// One requested program run.
#[derive(Debug, Clone)]
pub struct ProgramContext {
    pub instance: String,
    pub rule_id: RuleId,
    pub program_id: String,
    pub torrent: TorrentSnapshot,
}

/// Starts external programs without waiting for them.
pub trait ProgramRunner: Send + Sync {
    /// Validate and start a run. An error means nothing was started.
    fn run(&self, context: ProgramContext) -> Result<(), ProgramError>;
}

/// [`ProgramRunner`] over `tokio::process`.
pub struct ProcessProgramRunner {
    programs: HashMap<String, ProgramDefinition>,
    allow_list: AllowList,
    timeout_secs: u64,
    activity: ActivityHandle,
}

impl ProcessProgramRunner {
    pub fn new(
        definitions: impl IntoIterator<Item = ProgramDefinition>,
        allow_list: AllowList,
        timeout_secs: u64,
        activity: ActivityHandle,
    ) -> Self {
        Self {
            programs: definitions
                .into_iter()
                .map(|d| (d.id.clone(), d))
                .collect(),
            allow_list,
            timeout_secs,
            activity,
        }
    }
}

impl ProgramRunner for ProcessProgramRunner {
    fn run(&self, context: ProgramContext) -> Result<(), ProgramError> {
        let definition = self
            .programs
            .get(&context.program_id)
            .ok_or_else(|| ProgramError::UnknownProgram(context.program_id.clone()))?;
        if !self.allow_list.permits(Path::new(&definition.path)) {
            return Err(ProgramError::NotAllowed(definition.path.clone()));
        }

        let mut args = Vec::with_capacity(definition.args.len());
        for arg in &definition.args {
            args.push(Template::parse(arg, PROGRAM_FIELDS)?.render(&context.torrent)?);
        }

        let path = definition.path.clone();
        let timeout_secs = self.timeout_secs;
        let activity = self.activity.clone();
        debug!(program = %context.program_id, hash = %context.torrent.hash, "Starting program");

        tokio::spawn(async move {
            let result = run_program(&path, &args, timeout_secs).await;
            let (outcome, detail) = match &result {
                Ok(()) => (ActivityOutcome::Success, context.program_id.clone()),
                Err(e) => {
                    warn!(program = %context.program_id, hash = %context.torrent.hash, error = %e, "Program failed");
                    (ActivityOutcome::Failed, format!("{}: {}", context.program_id, e))
                }
            };
            metrics::ACTIONS_TOTAL
                .with_label_values(&[ActionKind::ExternalProgram.as_str(), outcome.as_str()])
                .inc();
            activity
                .emit(
                    ActivityEvent::new(
                        context.instance,
                        Some(context.rule_id),
                        context.torrent.hash,
                        ActionKind::ExternalProgram,
                        outcome,
                    )
                    .with_detail(detail),
                )
                .await;
        });

        Ok(())
    }
}

const STDERR_TAIL_LINES: usize = 5;

/// Run to completion or until the timeout, whichever comes first.
pub async fn run_program(path: &str, args: &[String], timeout_secs: u64) -> Result<(), ProgramError> {
    let mut child = Command::new(path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ProgramError::Spawn(e.to_string()))?;

    let stderr = child.stderr.take();
    let result = timeout(Duration::from_secs(timeout_secs), async {
        let mut tail: Vec<String> = Vec::new();
        if let Some(stderr) = stderr {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tail.push(line);
                if tail.len() > STDERR_TAIL_LINES {
                    tail.remove(0);
                }
            }
        }
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, tail.join("\n")))
    })
    .await;

    match result {
        Ok(Ok((status, _))) if status.success() => Ok(()),
        Ok(Ok((status, stderr))) => Err(ProgramError::Exited {
            code: status.code(),
            stderr,
        }),
        Ok(Err(e)) => Err(ProgramError::Spawn(e.to_string())),
        Err(_) => {
            let _ = child.kill().await;
            Err(ProgramError::Timeout(timeout_secs))
        }
    }
}
