use std::time::Duration;

use crate::config;

/// Restart backoff for one Supervisor.
///
/// Each crash waits `current` before the next spawn, then `current` grows by
/// `multiplier` up to `max`. A sustained Running period resets it.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Delay after the first crash
    initial: Duration,

    /// Steady-state retry cadence for a source that never comes up
    max: Duration,

    multiplier: f64,

    /// Delay handed out by the next `next_delay`
    current: Duration,

    /// Consecutive crashes since the last reset
    attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max: max.max(initial),
            multiplier: multiplier.max(1.0),
            current: initial,
            attempts: 0,
        }
    }

    pub fn from_config(cfg: &config::Supervisor) -> Self {
        Self::new(
            cfg.backoff_initial.duration(),
            cfg.backoff_max.duration(),
            cfg.backoff_multiplier,
        )
    }

    /// Delay to wait before the next restart. Never decreases until `reset`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.attempts += 1;
        self.current =
            Duration::from_secs_f64(self.current.as_secs_f64() * self.multiplier).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
