//! Child-process execution with an optional wall-clock bound.
//!
//! Shutdown/reboot commands, the external wake utility, ping and neighbor
//! table lookups all go through [`CommandRunner`], so tests can swap in a
//! scripted runner instead of spawning processes.

use futures::future::{BoxFuture, FutureExt};
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// What to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandLine {
    /// A single string: a shell script when `shell` is set, otherwise split
    /// into words.
    Line(String),
    /// Program followed by its arguments.
    Argv(Vec<String>),
}

/// Canonical execution request handed to a runner.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecRequest {
    pub command: CommandLine,
    pub shell: bool,
    pub timeout: Option<Duration>,
    pub description: String,
}

impl ExecRequest {
    pub fn argv<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        Self {
            description: args.join(" "),
            command: CommandLine::Argv(args),
            shell: false,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    /// `-1` when the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("command failed to start: {0}")]
    Start(#[from] io::Error),
}

pub trait CommandRunner: Send + Sync {
    fn run<'a>(&'a self, request: &'a ExecRequest) -> BoxFuture<'a, Result<CommandOutput, RunError>>;
}

/// Runs requests as real child processes on the tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    fn build(request: &ExecRequest) -> Result<Command, RunError> {
        let mut cmd = if request.shell {
            let script = match &request.command {
                CommandLine::Line(line) => line.clone(),
                CommandLine::Argv(args) => shell_words::join(args),
            };
            shell_command(&script)
        } else {
            let argv = match &request.command {
                CommandLine::Line(line) => shell_words::split(line)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?,
                CommandLine::Argv(args) => args.clone(),
            };
            let (program, args) = argv
                .split_first()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;
            let mut cmd = Command::new(program);
            cmd.args(args);
            cmd
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }

    async fn execute(request: &ExecRequest) -> Result<CommandOutput, RunError> {
        let mut cmd = Self::build(request)?;
        debug!(command = %request.description, shell = request.shell, timeout = ?request.timeout, "spawning");
        let pending = cmd.output();
        // dropping `pending` on timeout kills the child (kill_on_drop)
        let output = match request.timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| RunError::Timeout(limit))??,
            None => pending.await?,
        };
        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(windows)]
fn shell_command(script: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", script]);
    cmd
}

#[cfg(not(windows))]
fn shell_command(script: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    cmd
}

impl CommandRunner for SystemRunner {
    fn run<'a>(&'a self, request: &'a ExecRequest) -> BoxFuture<'a, Result<CommandOutput, RunError>> {
        Self::execute(request).boxed()
    }
}
