//! Health producers
//!
//! A producer owns a group of subjects and the prober that checks them.
//! It wakes up for three reasons only:
//!
//! ```text
//! connectivity `true`  → discovery records, then one probe-and-publish cycle
//! timer tick           → one probe-and-publish cycle
//! cancellation         → exit
//! ```
//!
//! Everything runs on the producer's own task, so cycles for the same
//! subject never overlap and the health map needs no lock.

use crate::models::Subject;
use crate::mqtt::Outbox;
use crate::probe::StateProber;
use crate::registry::SensorRegistry;
use crate::scheduler::{ticker, HealthMode, Schedule};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument, Span};

enum Wake {
    Discover,
    ConnectionLost,
    Tick,
}

pub struct Producer<P> {
    subjects: Vec<Subject>,
    sensors: SensorRegistry,
    prober: P,
    outbox: Outbox,
    schedule: Schedule,
    health: HashMap<Subject, bool>,
    span: Span,
}

impl<P: StateProber> Producer<P> {
    pub fn new(subjects: Vec<Subject>, sensors: SensorRegistry, prober: P, outbox: Outbox, schedule: Schedule) -> Self {
        Self {
            subjects,
            sensors,
            prober,
            outbox,
            schedule,
            health: HashMap::new(),
            span: Span::none(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Active timer period
    pub fn period(&self) -> Duration {
        self.schedule.period()
    }

    /// Hysteresis mode, `None` for fixed schedules
    pub fn mode(&self) -> Option<HealthMode> {
        self.schedule.mode()
    }

    /// Last successfully probed state of `subject`
    pub fn health(&self, subject: Subject) -> Option<bool> {
        self.health.get(&subject).copied()
    }

    /// Publish every discovery record, then the current state.
    /// Returns the new timer period if the cycle changed it.
    pub async fn on_discovery(&mut self) -> Option<Duration> {
        let interval = self.schedule.nominal_interval();
        for subject in &self.subjects {
            match self.sensors.discovery_message(*subject, interval) {
                Ok(message) => {
                    self.outbox.enqueue(message).await;
                }
                Err(e) => error!(%subject, error = %e, "Failed to serialize discovery record"),
            }
        }
        debug!("Discovery");
        self.cycle().await
    }

    pub async fn on_timer_tick(&mut self) -> Option<Duration> {
        self.cycle().await
    }

    /// Probe one subject and enqueue its state. A failed probe is logged and
    /// nothing is published for the subject this cycle.
    pub async fn probe_and_publish(&mut self, subject: Subject) -> Option<bool> {
        match self.prober.probe(subject).await {
            Ok(ok) => {
                self.health.insert(subject, ok);
                self.outbox.enqueue(self.sensors.state_message(subject, ok)).await;
                Some(ok)
            }
            Err(e) => {
                error!(%subject, error = %e, "Probe failed, skipping subject");
                None
            }
        }
    }

    async fn cycle(&mut self) -> Option<Duration> {
        let mut observed: Option<bool> = None;
        for subject in self.subjects.clone() {
            if let Some(ok) = self.probe_and_publish(subject).await {
                observed = Some(observed.unwrap_or(true) && ok);
            }
        }
        debug!("Updated sensors");

        let ok = observed?;
        let period = self.schedule.observe(ok)?;
        if ok {
            info!(period_secs = period.as_secs(), "Transitioned to healthy state");
        } else {
            info!(period_secs = period.as_secs(), "Transitioned to unhealthy state");
        }
        Some(period)
    }

    /// Serve discovery requests and timer ticks until `cancel` fires
    pub async fn run(mut self, mut connectivity: watch::Receiver<bool>, cancel: CancellationToken) {
        let span = self.span.clone();
        async move {
            info!(
                subjects = self.subjects.len(),
                period_secs = self.period().as_secs(),
                "Producer started"
            );
            let mut timer = ticker(self.period());

            loop {
                let wake = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    Ok(()) = connectivity.changed() => {
                        if *connectivity.borrow_and_update() { Wake::Discover } else { Wake::ConnectionLost }
                    }
                    _ = timer.tick() => Wake::Tick,
                };

                let swap = match wake {
                    Wake::Discover => cancel.run_until_cancelled(self.on_discovery()).await,
                    Wake::Tick => cancel.run_until_cancelled(self.on_timer_tick()).await,
                    Wake::ConnectionLost => {
                        debug!("Connection lost, waiting for reconnect");
                        continue;
                    }
                };

                match swap {
                    None => break,
                    Some(Some(period)) => timer = ticker(period),
                    Some(None) => {}
                }
            }
            info!("Producer stopped");
        }
        .instrument(span)
        .await
    }
}
