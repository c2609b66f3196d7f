//! Per-output delivery.
//!
//! One [`OutputWorker`] runs for every output of a generation. It takes batches from the output's
//! buffer, hands them to the sink and decides what happens to every record: delivered and rejected
//! records are finalized so the source checkpoints can advance, transient failures are retried
//! with exponential backoff behind a circuit breaker, and an authentication failure disables the
//! output until the next reload.

mod circuit_breaker;
mod retry;

use std::{collections::HashMap, sync::Arc, time::Duration};

use forwarder_buffers::LimitedReceiver;
use tokio_util::sync::CancellationToken;

pub use self::{circuit_breaker::CircuitBreaker, retry::ExponentialBackoff};
use crate::{
    config::{DeliveryMode, OutputSpec},
    event::{EventStatus, Finalizable, LogRecord},
    internal_events::{
        DeliveryModeDropped, EventsSent, HealthcheckFailed, HealthcheckPassed,
        OutputDisabledDiscarded, OutputWatermark, SinkAuthError, SinkRejected, SinkTransportError,
    },
    sinks::{Ack, HEALTHCHECK_TIMEOUT, Sink, SinkError},
    status::{Condition, StatusReporter},
};

/// Upper bound on records per request, whatever their size.
pub const MAX_BATCH_EVENTS: usize = 5_000;

/// Highest source offset this output finished with, per source.
#[derive(Debug, Default)]
struct Watermarks {
    offsets: HashMap<Arc<str>, u64>,
    changed: Vec<Arc<str>>,
}

impl Watermarks {
    fn advance(&mut self, record: &LogRecord) {
        let advanced = match self.offsets.get_mut(&record.source_id) {
            Some(offset) if *offset >= record.offset => false,
            Some(offset) => {
                *offset = record.offset;
                true
            }
            None => {
                self.offsets
                    .insert(Arc::clone(&record.source_id), record.offset);
                true
            }
        };
        if advanced && !self.changed.contains(&record.source_id) {
            self.changed.push(Arc::clone(&record.source_id));
        }
    }

    fn publish(&mut self, output: &str) {
        for source_id in self.changed.drain(..) {
            if let Some(&offset) = self.offsets.get(&source_id) {
                emit!(OutputWatermark {
                    output,
                    source_id: &source_id,
                    offset,
                });
            }
        }
    }

    #[cfg(test)]
    fn get(&self, source_id: &str) -> Option<u64> {
        self.offsets.get(source_id).copied()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Delivered,
    Rejected,
    Retry,
}

/// Runs the sink healthcheck, logs the result and records it as the output's condition.
///
/// A failing healthcheck never stops the output; delivery keeps retrying on its own.
pub async fn healthcheck(output: &str, sink: &dyn Sink, status: &StatusReporter) -> bool {
    let error = match tokio::time::timeout(HEALTHCHECK_TIMEOUT, sink.healthcheck()).await {
        Ok(Ok(())) => {
            emit!(HealthcheckPassed { output });
            return true;
        }
        Ok(Err(error)) => error.to_string(),
        Err(_elapsed) => format!("no answer within {}s", HEALTHCHECK_TIMEOUT.as_secs()),
    };
    emit!(HealthcheckFailed {
        output,
        error: &error,
    });
    status.set_output(output, Condition::degraded("HealthcheckFailed", error));
    false
}

pub struct OutputWorker {
    output: String,
    sink: Arc<dyn Sink>,
    mode: DeliveryMode,
    batch_bytes: usize,
    backoff: ExponentialBackoff,
    breaker: CircuitBreaker,
    watermarks: Watermarks,
    status: Arc<StatusReporter>,
    disabled: bool,
}

impl OutputWorker {
    pub fn new(output: &OutputSpec, sink: Arc<dyn Sink>, status: Arc<StatusReporter>) -> Self {
        let tuning = &output.tuning;
        let batch_bytes = sink.max_batch_bytes().map_or(tuning.max_write_bytes(), |limit| {
            limit.min(tuning.max_write_bytes())
        });
        Self {
            output: output.name.clone(),
            sink,
            mode: tuning.delivery_mode,
            batch_bytes: batch_bytes.max(1),
            backoff: ExponentialBackoff::new(
                tuning.min_retry_duration,
                tuning.max_retry_duration,
            ),
            breaker: CircuitBreaker::new(&output.name, tuning.circuit_breaker),
            watermarks: Watermarks::default(),
            status,
            disabled: false,
        }
    }

    /// Delivers until every sender of `buffer` is gone and the buffer is empty.
    ///
    /// Cancelling `abort` gives up on whatever is still buffered or in flight. Those records are
    /// never finalized, which keeps their sources' checkpoints behind them.
    pub async fn run(mut self, mut buffer: LimitedReceiver<LogRecord>, abort: CancellationToken) {
        let mut carry = None;
        loop {
            let first = match carry.take() {
                Some(record) => record,
                None => tokio::select! {
                    biased;
                    _ = abort.cancelled() => break,
                    next = buffer.next() => match next {
                        Some(record) => record,
                        None => break,
                    },
                },
            };
            let (batch, next) = self.fill_batch(first, &mut buffer);
            carry = next;

            if self.disabled {
                emit!(OutputDisabledDiscarded {
                    output: &self.output,
                    count: batch.len(),
                });
                continue;
            }

            let in_flight = batch.len();
            tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    self.abandon(in_flight + usize::from(carry.is_some()) + buffer.len());
                    break;
                }
                () = self.deliver(batch) => {}
            }
        }
        debug!(message = "Output worker finished.", output = %self.output);
    }

    /// Takes records while they fit in one request. Returns the batch and the first record that
    /// did not fit.
    fn fill_batch(
        &self,
        first: LogRecord,
        buffer: &mut LimitedReceiver<LogRecord>,
    ) -> (Vec<LogRecord>, Option<LogRecord>) {
        let mut bytes = first.size_of();
        let mut batch = vec![first];
        while batch.len() < MAX_BATCH_EVENTS && bytes < self.batch_bytes {
            let Some(record) = buffer.try_next() else {
                break;
            };
            let size = record.size_of();
            if bytes + size > self.batch_bytes {
                return (batch, Some(record));
            }
            bytes += size;
            batch.push(record);
        }
        (batch, None)
    }

    async fn deliver(&mut self, mut batch: Vec<LogRecord>) {
        self.backoff.reset();
        loop {
            self.breaker.ready().await;
            match self.sink.send(&batch).await {
                Ok(ack) => {
                    self.breaker.record_success();
                    let complete = ack.is_complete();
                    batch = self.complete(batch, ack);
                    if complete || batch.is_empty() {
                        self.status.set_output(&self.output, Condition::ready());
                        return;
                    }
                    let retry_in = self.backoff.next().unwrap_or_default();
                    emit!(SinkTransportError {
                        output: &self.output,
                        error: "destination asked to retry part of the batch",
                        retry_in,
                    });
                    tokio::time::sleep(retry_in).await;
                }
                Err(SinkError::Transport { message }) => {
                    let retry_in = self.backoff.next().unwrap_or_default();
                    emit!(SinkTransportError {
                        output: &self.output,
                        error: &message,
                        retry_in,
                    });
                    self.status
                        .set_output(&self.output, Condition::degraded("TransportError", message));
                    if !self.breaker.record_failure() {
                        tokio::time::sleep(retry_in).await;
                    }
                }
                Err(SinkError::Rejected { reason }) => {
                    self.breaker.record_success();
                    emit!(SinkRejected {
                        output: &self.output,
                        count: batch.len(),
                        reason: &reason,
                    });
                    for mut record in batch {
                        self.watermarks.advance(&record);
                        record.finalize(EventStatus::Rejected);
                    }
                    self.watermarks.publish(&self.output);
                    return;
                }
                Err(SinkError::Auth { message }) => {
                    emit!(SinkAuthError {
                        output: &self.output,
                        error: &message,
                    });
                    self.status.set_output(
                        &self.output,
                        Condition::invalid("AuthenticationFailed", message),
                    );
                    self.disabled = true;
                    // Unfinalized records hold their checkpoints, so they are read again.
                    drop(batch);
                    return;
                }
            }
        }
    }

    /// Finalizes the records the destination answered for and returns those to send again.
    fn complete(&mut self, batch: Vec<LogRecord>, ack: Ack) -> Vec<LogRecord> {
        let mut outcomes = vec![Outcome::Delivered; batch.len()];
        for &index in &ack.rejected {
            if let Some(outcome) = outcomes.get_mut(index) {
                *outcome = Outcome::Rejected;
            }
        }
        for &index in &ack.retry {
            if let Some(outcome) = outcomes.get_mut(index) {
                *outcome = Outcome::Retry;
            }
        }

        let mut retry = Vec::new();
        let (mut sent, mut sent_bytes, mut rejected) = (0, 0, 0);
        for (mut record, outcome) in batch.into_iter().zip(outcomes) {
            match outcome {
                Outcome::Delivered => {
                    sent += 1;
                    sent_bytes += record.message.len();
                    self.watermarks.advance(&record);
                    record.finalize(EventStatus::Delivered);
                }
                Outcome::Rejected => {
                    rejected += 1;
                    self.watermarks.advance(&record);
                    record.finalize(EventStatus::Rejected);
                }
                Outcome::Retry => retry.push(record),
            }
        }

        if sent > 0 {
            emit!(EventsSent {
                output: &self.output,
                count: sent,
                byte_size: sent_bytes,
            });
        }
        if rejected > 0 {
            emit!(SinkRejected {
                output: &self.output,
                count: rejected,
                reason: ack.reason.as_deref().unwrap_or("rejected by destination"),
            });
        }
        self.watermarks.publish(&self.output);
        retry
    }

    fn abandon(&self, count: usize) {
        match self.mode {
            DeliveryMode::AtMostOnce => emit!(DeliveryModeDropped {
                output: &self.output,
                count,
            }),
            DeliveryMode::AtLeastOnce => debug!(
                message = "Abandoning undelivered records; they are read again after restart.",
                output = %self.output,
                count,
            ),
        }
    }
}
