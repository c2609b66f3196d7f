use std::time::Duration;

use tokio::time::{Instant, sleep_until};

use crate::{
    config::CircuitBreakerSettings,
    internal_events::{CircuitBreakerClosed, CircuitBreakerOpened},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Closed { failures: u32 },
    Open { until: Instant },
    /// One attempt is let through to probe the destination.
    HalfOpen,
}

/// Stops hammering a destination that keeps failing.
///
/// Opens after `failure_threshold` consecutive failures, waits `cooldown`, then lets a single
/// attempt through. Success closes it again; failure reopens it for another cooldown.
#[derive(Debug)]
pub struct CircuitBreaker {
    output: String,
    threshold: u32,
    cooldown: Duration,
    state: State,
}

impl CircuitBreaker {
    pub fn new(output: &str, settings: CircuitBreakerSettings) -> Self {
        Self {
            output: output.to_owned(),
            threshold: settings.failure_threshold.max(1),
            cooldown: settings.cooldown,
            state: State::Closed { failures: 0 },
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open { .. })
    }

    /// Waits until an attempt is allowed.
    pub async fn ready(&mut self) {
        if let State::Open { until } = self.state {
            sleep_until(until).await;
            debug!(message = "Circuit breaker half-open; probing destination.", output = %self.output);
            self.state = State::HalfOpen;
        }
    }

    pub fn record_success(&mut self) {
        if self.state == State::HalfOpen {
            emit!(CircuitBreakerClosed {
                output: &self.output
            });
        }
        self.state = State::Closed { failures: 0 };
    }

    /// Counts a failed attempt. Returns `true` when the breaker opened because of it.
    pub fn record_failure(&mut self) -> bool {
        let failures = match self.state {
            State::Closed { failures } => failures + 1,
            State::HalfOpen => self.threshold,
            State::Open { .. } => return false,
        };
        if failures < self.threshold {
            self.state = State::Closed { failures };
            return false;
        }

        emit!(CircuitBreakerOpened {
            output: &self.output,
            failures,
            cooldown: self.cooldown,
        });
        self.state = State::Open {
            until: Instant::now() + self.cooldown,
        };
        true
    }
}
