use super::{ProbeError, StateProber};
use crate::execution::{run_command, CommandOutput};
use crate::models::Subject;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Checks pool health, snapshots and capacity with `sanoid --monitor-*`
#[derive(Debug, Clone)]
pub struct SanoidProber {
    timeout: Duration,
}

impl SanoidProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Human readable sanoid exit level
pub fn sanoid_level(exit: i32) -> &'static str {
    match exit {
        0 => "Ok",
        1 => "Warning",
        2 => "Critical",
        3 => "Error",
        _ => "UNKNOWN",
    }
}

/// Exit 0 is healthy, 1..=4 is a reported problem, anything else means
/// sanoid itself failed.
fn interpret(subject: Subject, output: &CommandOutput) -> Result<bool, ProbeError> {
    match output.exit_code {
        Some(0) => Ok(true),
        Some(code @ 1..=4) => {
            warn!(%subject, state = sanoid_level(code), "Pool problem reported");
            Ok(false)
        }
        _ => Err(ProbeError::unexpected_exit("sanoid", output)),
    }
}

#[async_trait]
impl StateProber for SanoidProber {
    async fn probe(&self, subject: Subject) -> Result<bool, ProbeError> {
        let monitor = subject.sanoid_monitor().ok_or(ProbeError::UnsupportedSubject {
            prober: "sanoid",
            subject,
        })?;
        let flag = format!("--monitor-{monitor}");
        let output = run_command("sanoid", &[flag.as_str()], self.timeout).await?;
        debug!(%subject, exit_code = ?output.exit_code, elapsed_ms = output.execution_time_ms as u64, "sanoid finished");
        interpret(subject, &output)
    }
}
