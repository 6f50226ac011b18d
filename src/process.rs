//! Spawning external commands and collecting their output.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::error::{SandboxError, SandboxResult};

/// Extra settings for [`Sandbox::exec`](crate::Sandbox::exec).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOptions {
    /// Sub-directory of the sandbox to run in (defaults to the sandbox root)
    pub relative_dir: Option<PathBuf>,
    /// Variables added to the child's environment
    pub envs: Vec<(String, String)>,
    /// Start the child with an empty environment before applying `envs`
    pub clear_env: bool,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(mut self, relative: impl Into<PathBuf>) -> Self {
        self.relative_dir = Some(relative.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn clear_env(mut self) -> Self {
        self.clear_env = true;
        self
    }
}

/// Everything a finished process wrote, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub executed_at: i64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stdout_text(&self) -> String {
        self.stdout.join("\n")
    }

    pub fn stderr_text(&self) -> String {
        self.stderr.join("\n")
    }
}

/// A command that started but did not exit cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessFailure {
    pub command: String,
    pub args: Vec<String>,
    pub options: ExecOptions,
    pub output: ProcessOutput,
}

impl fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.output.exit_code {
            Some(code) => write!(f, "Error exit code {} for: {}", code, self.command)?,
            None => write!(f, "Terminated by signal: {}", self.command)?,
        }
        if !self.args.is_empty() {
            write!(f, " {}", self.args.join(" "))?;
        }
        Ok(())
    }
}

/// Spawns `command` in the current working directory and waits for it.
pub(crate) async fn spawn_and_collect(
    command: &str,
    args: &[String],
    options: &ExecOptions,
) -> SandboxResult<ProcessOutput> {
    let mut cmd = Command::new(command);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if options.clear_env {
        cmd.env_clear();
    }
    cmd.envs(options.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
        command: command.to_string(),
        source,
    })?;
    debug!(command, pid = ?child.id(), "Spawned process");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (stdout, stderr, status) =
        tokio::try_join!(collect_lines(stdout), collect_lines(stderr), child.wait())?;

    let output = ProcessOutput {
        stdout,
        stderr,
        exit_code: status.code(),
        executed_at: chrono::Utc::now().timestamp(),
    };
    debug!(command, exit_code = ?output.exit_code, "Process exited");

    if output.success() {
        Ok(output)
    } else {
        Err(SandboxError::ProcessFailed(Box::new(ProcessFailure {
            command: command.to_string(),
            args: args.to_vec(),
            options: options.clone(),
            output,
        })))
    }
}

async fn collect_lines<R>(reader: Option<R>) -> io::Result<Vec<String>>
where
    R: AsyncRead + Unpin,
{
    let mut lines = Vec::new();
    let Some(reader) = reader else {
        return Ok(lines);
    };
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        lines.push(String::from_utf8_lossy(&buf).into_owned());
    }
    Ok(lines)
}
