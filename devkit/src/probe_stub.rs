/*!
Scripted probers standing in for sanoid and systemctl
*/

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use systempub_agent::models::Subject;
use systempub_agent::probe::{ProbeError, StateProber};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Problem,
    Error,
}

/// Prober answering from per-subject scripts. When a script runs out the
/// last outcome repeats; unscripted subjects are healthy. An optional delay
/// stands in for a slow check tool.
#[derive(Debug, Default)]
pub struct ScriptedProber {
    scripts: Mutex<HashMap<Subject, VecDeque<Outcome>>>,
    last: Mutex<HashMap<Subject, Outcome>>,
    calls: Mutex<Vec<Subject>>,
    delay: Duration,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, subject: Subject, outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(subject)
            .or_default()
            .extend(outcomes);
        self
    }

    /// Take `delay` to answer every probe
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push(&self, subject: Subject, outcome: Outcome) {
        self.scripts
            .lock()
            .unwrap()
            .entry(subject)
            .or_default()
            .push_back(outcome);
    }

    /// Every subject probed so far, in call order
    pub fn calls(&self) -> Vec<Subject> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, subject: Subject) -> usize {
        self.calls.lock().unwrap().iter().filter(|s| **s == subject).count()
    }

    fn next_outcome(&self, subject: Subject) -> Outcome {
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&subject)
            .and_then(|script| script.pop_front());
        let mut last = self.last.lock().unwrap();
        match scripted {
            Some(outcome) => {
                last.insert(subject, outcome);
                outcome
            }
            None => last.get(&subject).copied().unwrap_or(Outcome::Ok),
        }
    }
}

#[async_trait]
impl StateProber for ScriptedProber {
    async fn probe(&self, subject: Subject) -> Result<bool, ProbeError> {
        self.calls.lock().unwrap().push(subject);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.next_outcome(subject) {
            Outcome::Ok => Ok(true),
            Outcome::Problem => Ok(false),
            Outcome::Error => Err(ProbeError::UnexpectedExit {
                program: "scripted".to_string(),
                code: Some(255),
                stderr: "scripted failure".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_repeat_last() {
        let prober = ScriptedProber::new().with_script(Subject::FailedUnits, [Outcome::Problem, Outcome::Ok]);

        assert!(!prober.probe(Subject::FailedUnits).await.unwrap());
        assert!(prober.probe(Subject::FailedUnits).await.unwrap());
        assert!(prober.probe(Subject::FailedUnits).await.unwrap());
        assert_eq!(prober.call_count(Subject::FailedUnits), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_answer() {
        let prober = ScriptedProber::new().with_delay(Duration::from_secs(30));
        let start = tokio::time::Instant::now();
        assert!(prober.probe(Subject::PoolHealth).await.unwrap());
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_unscripted_subject_is_healthy() {
        let prober = ScriptedProber::new().with_script(Subject::PoolHealth, [Outcome::Error]);
        assert!(prober.probe(Subject::PoolHealth).await.is_err());
        assert!(prober.probe(Subject::PoolCapacity).await.unwrap());
        assert_eq!(prober.calls(), vec![Subject::PoolHealth, Subject::PoolCapacity]);
    }
}
