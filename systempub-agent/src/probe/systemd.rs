use super::{ProbeError, StateProber};
use crate::execution::{run_command, CommandOutput};
use crate::models::Subject;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Checks for failed systemd units
#[derive(Debug, Clone)]
pub struct SystemdProber {
    timeout: Duration,
}

impl SystemdProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Unit names from `systemctl list-units --plain --no-legend` output
pub fn parse_failed_units(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(|unit| unit.trim_start_matches('●').to_string())
        .filter(|unit| !unit.is_empty())
        .collect()
}

#[async_trait]
impl StateProber for SystemdProber {
    async fn probe(&self, subject: Subject) -> Result<bool, ProbeError> {
        if subject != Subject::FailedUnits {
            return Err(ProbeError::UnsupportedSubject {
                prober: "systemd",
                subject,
            });
        }
        let output = run_command(
            "systemctl",
            &["list-units", "--state=failed", "--plain", "--no-legend", "--no-pager"],
            self.timeout,
        )
        .await?;
        debug!(exit_code = ?output.exit_code, elapsed_ms = output.execution_time_ms as u64, "systemctl finished");
        interpret(&output)
    }
}

/// Healthy when the listing succeeded and named no unit
fn interpret(output: &CommandOutput) -> Result<bool, ProbeError> {
    if !output.success() {
        return Err(ProbeError::unexpected_exit("systemctl", output));
    }

    let failed = parse_failed_units(&output.stdout);
    for unit in &failed {
        warn!(failed_unit = %unit, "Failed systemd unit");
    }
    Ok(failed.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_failed_units() {
        assert!(parse_failed_units("").is_empty());
        assert!(parse_failed_units("\n  \n").is_empty());
    }

    #[test]
    fn test_failed_units_listed() {
        let out = "backup.service loaded failed failed Nightly backup\n\
                   smartd.service loaded failed failed Self Monitoring\n";
        assert_eq!(parse_failed_units(out), vec!["backup.service", "smartd.service"]);
    }

    #[test]
    fn test_listing_failure_carries_stderr() {
        let output = CommandOutput {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "System has not been booted with systemd as init system (PID 1).\n".to_string(),
            execution_time_ms: 4,
        };
        match interpret(&output) {
            Err(ProbeError::UnexpectedExit { program, code, stderr }) => {
                assert_eq!(program, "systemctl");
                assert_eq!(code, Some(1));
                assert!(stderr.starts_with("System has not been booted"));
                assert!(!stderr.ends_with('\n'));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_listing_with_units_is_problem() {
        let output = CommandOutput {
            exit_code: Some(0),
            stdout: "backup.service loaded failed failed Nightly backup\n".to_string(),
            stderr: String::new(),
            execution_time_ms: 4,
        };
        assert!(!interpret(&output).unwrap());
    }

    #[tokio::test]
    async fn test_pool_subject_rejected() {
        let prober = SystemdProber::new(Duration::from_secs(1));
        assert!(matches!(
            prober.probe(Subject::PoolHealth).await,
            Err(ProbeError::UnsupportedSubject { .. })
        ));
    }
}
