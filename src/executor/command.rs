//! Command runner — spawns a task's argv and captures its result.
//!
//! The argv is passed to the OS as-is: no shell, no interpolation.
//! Output is captured in full and truncated per stream before it is logged.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::ExecutionError;
use crate::tasks::model::Task;

/// Maximum size kept per output stream (64KB).
const MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// Exit code reported for processes terminated by a signal.
const SIGNALED_EXIT_CODE: i32 = -1;

/// Captured result of one command run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

/// Runs task commands with an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    timeout: Option<Duration>,
}

impl CommandRunner {
    /// A runner without a deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill commands that run longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the `command` of a task and wait for it to exit.
    pub async fn run_task(&self, task: &Task) -> Result<CommandOutput, ExecutionError> {
        let argv = task.command().ok_or_else(|| {
            ExecutionError::InvalidCommand(format!(
                "task {} has no 'command' array of strings",
                task.id
            ))
        })?;
        self.run(&argv).await
    }

    /// Run an argv and wait for it to exit.
    pub async fn run(&self, argv: &[String]) -> Result<CommandOutput, ExecutionError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ExecutionError::InvalidCommand("command is empty".to_string()))?;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                program: program.clone(),
                source,
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_| ExecutionError::Timeout { timeout })??,
            None => child.wait_with_output().await?,
        };

        Ok(CommandOutput {
            stdout: truncate_output(&String::from_utf8_lossy(&output.stdout)),
            stderr: truncate_output(&String::from_utf8_lossy(&output.stderr)),
            code: output.status.code().unwrap_or(SIGNALED_EXIT_CODE),
        })
    }
}

/// Truncate output to fit within limits (UTF-8 safe).
fn truncate_output(s: &str) -> String {
    if s.len() <= MAX_OUTPUT_SIZE {
        s.to_string()
    } else {
        let half = MAX_OUTPUT_SIZE / 2;
        let head_end = floor_char_boundary(s, half);
        let tail_start = floor_char_boundary(s, s.len() - half);
        format!(
            "{}\n\n... [truncated {} bytes] ...\n\n{}",
            &s[..head_end],
            s.len() - MAX_OUTPUT_SIZE,
            &s[tail_start..]
        )
    }
}

/// Find the largest byte index <= `i` that is a valid char boundary.
fn floor_char_boundary(s: &str, i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    let mut pos = i;
    while pos > 0 && !s.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}
