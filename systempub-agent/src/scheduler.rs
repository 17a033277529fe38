//! Polling cadence selection
//!
//! A producer either polls at a fixed period or adapts its period to the
//! last observed health: fast while unhealthy, slow once healthy again.

use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthMode {
    Healthy,
    Unhealthy,
}

/// Two-state hysteresis scheduler.
///
/// Starts `Unhealthy` so that a freshly started agent polls at the fast
/// period until the first successful probe proves the subject healthy.
#[derive(Debug, Clone)]
pub struct HysteresisScheduler {
    mode: HealthMode,
    fast: Duration,
    slow: Duration,
}

impl HysteresisScheduler {
    pub fn new(fast: Duration, slow: Duration) -> Self {
        Self {
            mode: HealthMode::Unhealthy,
            fast,
            slow,
        }
    }

    pub fn mode(&self) -> HealthMode {
        self.mode
    }

    pub fn period(&self) -> Duration {
        match self.mode {
            HealthMode::Healthy => self.slow,
            HealthMode::Unhealthy => self.fast,
        }
    }

    /// Feed one probe result. Returns the new period when the mode flips,
    /// `None` when the result matches the current mode.
    pub fn observe(&mut self, ok: bool) -> Option<Duration> {
        let observed = if ok { HealthMode::Healthy } else { HealthMode::Unhealthy };
        if observed == self.mode {
            return None;
        }
        self.mode = observed;
        Some(self.period())
    }
}

#[derive(Debug, Clone)]
pub enum Schedule {
    Fixed(Duration),
    Adaptive(HysteresisScheduler),
}

impl Schedule {
    pub fn adaptive(fast: Duration, slow: Duration) -> Self {
        Schedule::Adaptive(HysteresisScheduler::new(fast, slow))
    }

    /// Currently active timer period
    pub fn period(&self) -> Duration {
        match self {
            Schedule::Fixed(period) => *period,
            Schedule::Adaptive(scheduler) => scheduler.period(),
        }
    }

    /// Interval the sensor is nominally polled at; discovery expiry is
    /// derived from it so a slow healthy cadence never lets a sensor expire.
    pub fn nominal_interval(&self) -> Duration {
        match self {
            Schedule::Fixed(period) => *period,
            Schedule::Adaptive(scheduler) => scheduler.slow.max(scheduler.fast),
        }
    }

    pub fn mode(&self) -> Option<HealthMode> {
        match self {
            Schedule::Fixed(_) => None,
            Schedule::Adaptive(scheduler) => Some(scheduler.mode()),
        }
    }

    /// Fixed schedules never change period
    pub fn observe(&mut self, ok: bool) -> Option<Duration> {
        match self {
            Schedule::Fixed(_) => None,
            Schedule::Adaptive(scheduler) => scheduler.observe(ok),
        }
    }
}

/// Ticker whose first tick fires one full period from now
pub fn ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
