use std::time::Duration;

use metrics::counter;

use super::InternalEvent;

#[derive(Debug)]
pub struct EventsSent<'a> {
    pub output: &'a str,
    pub count: usize,
    pub byte_size: usize,
}

impl InternalEvent for EventsSent<'_> {
    fn emit_logs(&self) {
        trace!(
            message = "Events sent.",
            output = %self.output,
            count = %self.count,
            byte_size = %self.byte_size,
        );
    }

    fn emit_metrics(&self) {
        counter!("component_sent_events_total", "output" => self.output.to_string())
            .increment(self.count as u64);
        counter!(
            "component_sent_event_bytes_total",
            "output" => self.output.to_string(),
        )
        .increment(self.byte_size as u64);
    }
}

/// The destination could not be reached or answered with a retriable failure.
#[derive(Debug)]
pub struct SinkTransportError<'a> {
    pub output: &'a str,
    pub error: &'a str,
    pub retry_in: Duration,
}

impl InternalEvent for SinkTransportError<'_> {
    fn emit_logs(&self) {
        warn!(
            message = "Delivery failed; retrying.",
            output = %self.output,
            error = %self.error,
            retry_in_ms = u64::try_from(self.retry_in.as_millis()).unwrap_or(u64::MAX),
            error_type = "request_failed",
            stage = "sending",
            internal_log_rate_secs = 10,
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "component_errors_total",
            "error_type" => "request_failed",
            "stage" => "sending",
            "output" => self.output.to_string(),
        )
        .increment(1);
    }
}

/// The destination permanently refused records; they are dropped.
#[derive(Debug)]
pub struct SinkRejected<'a> {
    pub output: &'a str,
    pub count: usize,
    pub reason: &'a str,
}

impl InternalEvent for SinkRejected<'_> {
    fn emit_logs(&self) {
        error!(
            message = "Records rejected by destination; dropping.",
            output = %self.output,
            count = self.count,
            reason = %self.reason,
            error_type = "rejected",
            stage = "sending",
            internal_log_rate_secs = 10,
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "component_errors_total",
            "error_type" => "rejected",
            "stage" => "sending",
            "output" => self.output.to_string(),
        )
        .increment(1);
        counter!(
            "component_discarded_events_total",
            "reason" => "rejected",
            "output" => self.output.to_string(),
        )
        .increment(self.count as u64);
    }
}

/// The destination refused our credentials. The output stays disabled until a reload.
#[derive(Debug)]
pub struct SinkAuthError<'a> {
    pub output: &'a str,
    pub error: &'a str,
}

impl InternalEvent for SinkAuthError<'_> {
    fn emit_logs(&self) {
        error!(
            message = "Authentication failed; output disabled until the configuration changes.",
            output = %self.output,
            error = %self.error,
            error_type = "auth_failed",
            stage = "sending",
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "component_errors_total",
            "error_type" => "auth_failed",
            "stage" => "sending",
            "output" => self.output.to_string(),
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct HealthcheckPassed<'a> {
    pub output: &'a str,
}

impl InternalEvent for HealthcheckPassed<'_> {
    fn emit_logs(&self) {
        info!(message = "Healthcheck passed.", output = %self.output);
    }
}

#[derive(Debug)]
pub struct HealthcheckFailed<'a> {
    pub output: &'a str,
    pub error: &'a str,
}

impl InternalEvent for HealthcheckFailed<'_> {
    fn emit_logs(&self) {
        error!(
            message = "Healthcheck failed.",
            output = %self.output,
            error = %self.error,
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "healthcheck_errors_total",
            "output" => self.output.to_string(),
        )
        .increment(1);
    }
}
