//! Threshold rate limiting over fixed one second windows.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use super::FunctionTransform;
use crate::{
    config::LimitSpec,
    event::{EventStatus, Finalizable, LogRecord},
    internal_events::ThrottleEventDiscarded,
};

const WINDOW: Duration = Duration::from_secs(1);
/// Idle keys are forgotten once this many are tracked.
const PRUNE_AFTER_KEYS: usize = 4096;

#[derive(Clone, Copy, Debug)]
struct Window {
    started: Instant,
    count: u64,
}

/// Admits at most `threshold` records per key and window.
#[derive(Debug)]
pub struct Throttle {
    component: String,
    threshold: u64,
    windows: HashMap<String, Window>,
}

impl Throttle {
    pub fn new(component: impl Into<String>, limit: LimitSpec) -> Self {
        Self {
            component: component.into(),
            threshold: limit.max_records_per_second,
            windows: HashMap::new(),
        }
    }

    pub fn check(&mut self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    /// Counts one record for `key` and tells whether it is within the limit.
    pub fn check_at(&mut self, key: &str, now: Instant) -> bool {
        if self.windows.len() >= PRUNE_AFTER_KEYS && !self.windows.contains_key(key) {
            self.windows
                .retain(|_, window| now.duration_since(window.started) < WINDOW);
        }

        let window = self
            .windows
            .entry(key.to_string())
            .or_insert(Window {
                started: now,
                count: 0,
            });
        if now.duration_since(window.started) >= WINDOW {
            *window = Window {
                started: now,
                count: 0,
            };
        }

        if window.count < self.threshold {
            window.count += 1;
            true
        } else {
            emit!(ThrottleEventDiscarded {
                component: &self.component,
                key,
            });
            false
        }
    }
}

/// Throttles every record under one key, used for output rate limits.
impl FunctionTransform for Throttle {
    fn transform(&mut self, output: &mut Vec<LogRecord>, mut record: LogRecord) {
        if self.check("") {
            output.push(record);
        } else {
            record.finalize(EventStatus::Dropped);
        }
    }
}
