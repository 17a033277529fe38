//! Command execution for health probes
//!
//! Handles:
//! - Spawning external check tools without a shell
//! - Timeout enforcement (the child is killed when the timeout fires)
//! - Capturing exit code, stdout and stderr

use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Command execution result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u128,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} timed out after {}s", timeout.as_secs())]
    Timeout { program: String, timeout: Duration },
}

/// Run `program` with `args`, waiting at most `timeout`
pub async fn run_command(program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput, ExecutionError> {
    let start_time = Instant::now();
    debug!(program, ?args, "Executing command");

    let child = AsyncCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| ExecutionError::Timeout {
            program: program.to_string(),
            timeout,
        })?
        .map_err(|source| ExecutionError::Spawn {
            program: program.to_string(),
            source,
        })?;

    Ok(CommandOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        execution_time_ms: start_time.elapsed().as_millis(),
    })
}
