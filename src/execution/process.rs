//! External process invocation

use crate::core::stage::CommandSpec;
use crate::error::StageError;
use crate::execution::cancel::CancelHandle;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Number of stderr lines kept in stage errors
pub const STDERR_TAIL_LINES: usize = 20;

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; -1 when the process was killed by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last `lines` lines of stderr
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// Runs a resolved command to completion
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `spec`, returning its output whatever the exit code.
    ///
    /// Fails only when the process cannot be started or `cancel` fires
    /// while it is running.
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancelHandle,
    ) -> Result<ProcessOutput, StageError>;
}

/// [`ProcessRunner`] backed by `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct SubprocessRunner;

impl SubprocessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for SubprocessRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancelHandle,
    ) -> Result<ProcessOutput, StageError> {
        debug!("Spawning `{}`", spec.display_line());

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| StageError::Spawn {
            program: spec.program.clone(),
            message: e.to_string(),
        })?;

        let stdout = tokio::spawn(collect_lines(
            child.stdout.take(),
            spec.program.clone(),
            "stdout",
        ));
        let stderr = tokio::spawn(collect_lines(
            child.stderr.take(),
            spec.program.clone(),
            "stderr",
        ));

        let status = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.cancelled() => None,
        };

        let Some(status) = status else {
            warn!("Cancelling `{}`", spec.program);
            if let Err(e) = child.kill().await {
                warn!("Failed to kill `{}`: {}", spec.program, e);
            }
            return Err(StageError::Cancelled);
        };

        let status = status.map_err(|e| StageError::Spawn {
            program: spec.program.clone(),
            message: format!("failed to wait for process: {}", e),
        })?;

        let output = ProcessOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: stdout.await.unwrap_or_default(),
            stderr: stderr.await.unwrap_or_default(),
        };

        debug!(
            "`{}` exited with {} ({} bytes stdout, {} bytes stderr)",
            spec.program,
            output.exit_code,
            output.stdout.len(),
            output.stderr.len()
        );

        Ok(output)
    }
}

/// Buffer a child pipe, logging each line as it arrives
async fn collect_lines<R>(reader: Option<R>, program: String, stream: &'static str) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return String::new();
    };

    let mut reader = BufReader::new(reader);
    let mut collected = String::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                debug!("[{} {}] {}", program, stream, text.trim_end());
                collected.push_str(&text);
            }
            Err(e) => {
                warn!("Error reading {} of `{}`: {}", stream, program, e);
                break;
            }
        }
    }
    collected
}
