use metrics::{counter, gauge};

/// Events emitted by buffers. They are self-contained so the buffer crate has no dependency on the
/// forwarder's own event machinery.
pub trait InternalEvent: Sized {
    fn emit(self);
}

pub fn emit(event: impl InternalEvent) {
    event.emit();
}

#[allow(clippy::cast_precision_loss)]
fn emit_buffer_gauge(buffer_id: &str, events: u64, bytes: u64) {
    gauge!("buffer_events", "buffer_id" => buffer_id.to_string()).set(events as f64);
    gauge!("buffer_byte_size", "buffer_id" => buffer_id.to_string()).set(bytes as f64);
}

pub struct BufferCreated<'a> {
    pub buffer_id: &'a str,
    pub max_size_events: usize,
}

impl InternalEvent for BufferCreated<'_> {
    #[allow(clippy::cast_precision_loss)]
    fn emit(self) {
        gauge!("buffer_max_event_size", "buffer_id" => self.buffer_id.to_string())
            .set(self.max_size_events as f64);
    }
}

pub struct BufferEventsReceived<'a> {
    pub buffer_id: &'a str,
    pub count: u64,
    pub byte_size: u64,
    pub total_count: u64,
    pub total_byte_size: u64,
}

impl InternalEvent for BufferEventsReceived<'_> {
    fn emit(self) {
        counter!("buffer_received_events_total", "buffer_id" => self.buffer_id.to_string())
            .increment(self.count);
        counter!("buffer_received_bytes_total", "buffer_id" => self.buffer_id.to_string())
            .increment(self.byte_size);
        emit_buffer_gauge(self.buffer_id, self.total_count, self.total_byte_size);
    }
}

pub struct BufferEventsSent<'a> {
    pub buffer_id: &'a str,
    pub count: u64,
    pub byte_size: u64,
    pub total_count: u64,
    pub total_byte_size: u64,
}

impl InternalEvent for BufferEventsSent<'_> {
    fn emit(self) {
        counter!("buffer_sent_events_total", "buffer_id" => self.buffer_id.to_string())
            .increment(self.count);
        counter!("buffer_sent_bytes_total", "buffer_id" => self.buffer_id.to_string())
            .increment(self.byte_size);
        emit_buffer_gauge(self.buffer_id, self.total_count, self.total_byte_size);
    }
}

pub struct BufferEventsDropped<'a> {
    pub buffer_id: &'a str,
    pub count: u64,
    pub byte_size: u64,
    pub reason: &'static str,
}

impl InternalEvent for BufferEventsDropped<'_> {
    fn emit(self) {
        warn!(
            message = "Events dropped by full buffer.",
            buffer_id = %self.buffer_id,
            count = %self.count,
            reason = %self.reason,
            internal_log_rate_secs = 10,
        );
        counter!(
            "buffer_discarded_events_total",
            "buffer_id" => self.buffer_id.to_string(),
            "reason" => self.reason
        )
        .increment(self.count);
    }
}
