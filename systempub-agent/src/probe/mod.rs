//! State probers: the capability that turns a subject into "ok / problem"
//!
//! `Ok(true)` means the check ran and the subject is healthy, `Ok(false)`
//! means the check ran and reports a problem. An error means the check
//! itself could not be executed or interpreted.

mod sanoid;
mod systemd;

pub use sanoid::{sanoid_level, SanoidProber};
pub use systemd::{parse_failed_units, SystemdProber};

use crate::execution::{CommandOutput, ExecutionError};
use crate::models::Subject;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("{program} exited unexpectedly (code {code:?}): {stderr}")]
    UnexpectedExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("{prober} cannot probe subject {subject}")]
    UnsupportedSubject { prober: &'static str, subject: Subject },
}

/// Longest stderr excerpt carried in an error
const STDERR_EXCERPT: usize = 512;

impl ProbeError {
    pub fn unexpected_exit(program: &str, output: &CommandOutput) -> Self {
        let stderr = output.stderr.trim();
        let stderr = match stderr.char_indices().nth(STDERR_EXCERPT) {
            Some((cut, _)) => format!("{}...", &stderr[..cut]),
            None => stderr.to_string(),
        };
        ProbeError::UnexpectedExit {
            program: program.to_string(),
            code: output.exit_code,
            stderr,
        }
    }
}

#[async_trait]
pub trait StateProber: Send + Sync {
    async fn probe(&self, subject: Subject) -> Result<bool, ProbeError>;
}

#[async_trait]
impl<P: StateProber + ?Sized> StateProber for std::sync::Arc<P> {
    async fn probe(&self, subject: Subject) -> Result<bool, ProbeError> {
        (**self).probe(subject).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> CommandOutput {
        CommandOutput {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: stderr.to_string(),
            execution_time_ms: 3,
        }
    }

    #[test]
    fn test_unexpected_exit_keeps_stderr() {
        let err = ProbeError::unexpected_exit("systemctl", &failed("Failed to connect to bus: No such file\n"));
        assert_eq!(
            err.to_string(),
            "systemctl exited unexpectedly (code Some(1)): Failed to connect to bus: No such file"
        );
    }

    #[test]
    fn test_long_stderr_is_truncated() {
        let err = ProbeError::unexpected_exit("sanoid", &failed(&"x".repeat(2000)));
        match err {
            ProbeError::UnexpectedExit { stderr, .. } => {
                assert_eq!(stderr.len(), STDERR_EXCERPT + 3);
                assert!(stderr.ends_with("..."));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
