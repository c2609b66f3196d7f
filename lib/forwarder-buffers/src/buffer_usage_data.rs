use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::time::interval;
use tracing::{Instrument, Span};

use crate::internal_events::{
    BufferCreated, BufferEventsDropped, BufferEventsReceived, BufferEventsSent, emit,
};

/// Snapshot of category metrics.
struct CategorySnapshot {
    event_count: u64,
    event_byte_size: u64,
}

impl CategorySnapshot {
    fn has_updates(&self) -> bool {
        self.event_count > 0 || self.event_byte_size > 0
    }
}

/// Per-category metrics: events written into the buffer, read out of it, or dropped by it.
#[derive(Debug, Default)]
struct CategoryMetrics {
    event_count: AtomicU64,
    event_byte_size: AtomicU64,
}

impl CategoryMetrics {
    fn increment(&self, event_count: u64, event_byte_size: u64) {
        self.event_count.fetch_add(event_count, Ordering::Relaxed);
        self.event_byte_size
            .fetch_add(event_byte_size, Ordering::Relaxed);
    }

    fn get(&self) -> CategorySnapshot {
        CategorySnapshot {
            event_count: self.event_count.load(Ordering::Acquire),
            event_byte_size: self.event_byte_size.load(Ordering::Acquire),
        }
    }
}

/// Handle to the usage metrics of one buffer.
#[derive(Clone, Debug)]
pub struct BufferUsageHandle {
    state: Arc<BufferUsageData>,
}

impl BufferUsageHandle {
    /// Creates a handle that is not attached to any reporter.
    pub fn noop() -> Self {
        Self {
            state: Arc::new(BufferUsageData::default()),
        }
    }

    pub fn snapshot(&self) -> BufferUsageSnapshot {
        self.state.snapshot()
    }

    pub fn set_buffer_limit(&self, max_events: usize) {
        self.state.max_events.store(max_events as u64, Ordering::Release);
    }

    pub fn increment_received_event_count_and_byte_size(&self, count: u64, byte_size: u64) {
        self.state.received.increment(count, byte_size);
    }

    pub fn increment_sent_event_count_and_byte_size(&self, count: u64, byte_size: u64) {
        self.state.sent.increment(count, byte_size);
    }

    pub fn increment_dropped_event_count_and_byte_size(&self, count: u64, byte_size: u64) {
        self.state.dropped.increment(count, byte_size);
    }
}

#[derive(Debug, Default)]
struct BufferUsageData {
    received: CategoryMetrics,
    sent: CategoryMetrics,
    dropped: CategoryMetrics,
    max_events: AtomicU64,
}

impl BufferUsageData {
    fn snapshot(&self) -> BufferUsageSnapshot {
        let received = self.received.get();
        let sent = self.sent.get();
        let dropped = self.dropped.get();

        BufferUsageSnapshot {
            received_event_count: received.event_count,
            received_byte_size: received.event_byte_size,
            sent_event_count: sent.event_count,
            sent_byte_size: sent.event_byte_size,
            dropped_event_count: dropped.event_count,
            dropped_event_byte_size: dropped.event_byte_size,
            max_size_events: self.max_events.load(Ordering::Acquire),
        }
    }
}

/// Snapshot of buffer usage metrics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferUsageSnapshot {
    pub received_event_count: u64,
    pub received_byte_size: u64,
    pub sent_event_count: u64,
    pub sent_byte_size: u64,
    pub dropped_event_count: u64,
    pub dropped_event_byte_size: u64,
    pub max_size_events: u64,
}

impl BufferUsageSnapshot {
    /// Events currently held, derived from the running totals.
    pub const fn in_flight(&self) -> (u64, u64) {
        (
            self.received_event_count
                .saturating_sub(self.sent_event_count + self.dropped_event_count),
            self.received_byte_size
                .saturating_sub(self.sent_byte_size + self.dropped_event_byte_size),
        )
    }
}

/// Periodic reporter for a single buffer's usage.
///
/// Counters are reported as deltas every two seconds so the metrics backend sees monotonic totals
/// without each producer touching the metrics registry on the hot path.
pub struct BufferUsage {
    span: Span,
    handle: BufferUsageHandle,
}

impl BufferUsage {
    pub fn from_span(span: Span) -> Self {
        Self {
            span,
            handle: BufferUsageHandle::noop(),
        }
    }

    pub fn handle(&self) -> BufferUsageHandle {
        self.handle.clone()
    }

    /// Spawns the reporter. The returned task ends when it is aborted by the owning output.
    pub fn install(self, buffer_id: &str) -> tokio::task::JoinHandle<()> {
        let buffer_id = buffer_id.to_string();
        let handle = self.handle;

        let task = async move {
            let mut interval = interval(Duration::from_secs(2));
            let mut last = BufferUsageSnapshot::default();
            loop {
                interval.tick().await;
                let current = handle.snapshot();
                let (total_count, total_byte_size) = current.in_flight();

                emit(BufferCreated {
                    buffer_id: &buffer_id,
                    max_size_events: usize::try_from(current.max_size_events)
                        .unwrap_or(usize::MAX),
                });

                let received = CategorySnapshot {
                    event_count: current.received_event_count - last.received_event_count,
                    event_byte_size: current.received_byte_size - last.received_byte_size,
                };
                if received.has_updates() {
                    emit(BufferEventsReceived {
                        buffer_id: &buffer_id,
                        count: received.event_count,
                        byte_size: received.event_byte_size,
                        total_count,
                        total_byte_size,
                    });
                }

                let sent = CategorySnapshot {
                    event_count: current.sent_event_count - last.sent_event_count,
                    event_byte_size: current.sent_byte_size - last.sent_byte_size,
                };
                if sent.has_updates() {
                    emit(BufferEventsSent {
                        buffer_id: &buffer_id,
                        count: sent.event_count,
                        byte_size: sent.event_byte_size,
                        total_count,
                        total_byte_size,
                    });
                }

                let dropped = CategorySnapshot {
                    event_count: current.dropped_event_count - last.dropped_event_count,
                    event_byte_size: current.dropped_event_byte_size - last.dropped_event_byte_size,
                };
                if dropped.has_updates() {
                    emit(BufferEventsDropped {
                        buffer_id: &buffer_id,
                        count: dropped.event_count,
                        byte_size: dropped.event_byte_size,
                        reason: "buffer_full",
                    });
                }

                last = current;
            }
        };

        tokio::spawn(task.instrument(self.span.or_current()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_accounts_for_sent_and_dropped() {
        let handle = BufferUsageHandle::noop();
        handle.increment_received_event_count_and_byte_size(10, 100);
        handle.increment_sent_event_count_and_byte_size(4, 40);
        handle.increment_dropped_event_count_and_byte_size(1, 10);

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.in_flight(), (5, 50));
        assert_eq!(snapshot.dropped_event_count, 1);
    }
}
