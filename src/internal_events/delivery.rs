use std::time::Duration;

use metrics::{counter, gauge};

use super::InternalEvent;

#[derive(Debug)]
pub struct CircuitBreakerOpened<'a> {
    pub output: &'a str,
    pub failures: u32,
    pub cooldown: Duration,
}

impl InternalEvent for CircuitBreakerOpened<'_> {
    fn emit_logs(&self) {
        warn!(
            message = "Circuit breaker opened; pausing delivery.",
            output = %self.output,
            consecutive_failures = self.failures,
            cooldown_secs = self.cooldown.as_secs(),
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "circuit_breaker_opened_total",
            "output" => self.output.to_string(),
        )
        .increment(1);
        gauge!("circuit_breaker_open", "output" => self.output.to_string()).set(1.0);
    }
}

#[derive(Debug)]
pub struct CircuitBreakerClosed<'a> {
    pub output: &'a str,
}

impl InternalEvent for CircuitBreakerClosed<'_> {
    fn emit_logs(&self) {
        info!(message = "Circuit breaker closed; delivery resumed.", output = %self.output);
    }

    fn emit_metrics(&self) {
        gauge!("circuit_breaker_open", "output" => self.output.to_string()).set(0.0);
    }
}

/// Highest source offset an output has finished with.
#[derive(Debug)]
pub struct OutputWatermark<'a> {
    pub output: &'a str,
    pub source_id: &'a str,
    pub offset: u64,
}

impl InternalEvent for OutputWatermark<'_> {
    #[allow(clippy::cast_precision_loss)]
    fn emit_metrics(&self) {
        gauge!(
            "output_source_watermark",
            "output" => self.output.to_string(),
            "source_id" => self.source_id.to_string(),
        )
        .set(self.offset as f64);
    }
}

#[derive(Debug)]
pub struct DeliveryModeDropped<'a> {
    pub output: &'a str,
    pub count: usize,
}

impl InternalEvent for DeliveryModeDropped<'_> {
    fn emit_logs(&self) {
        warn!(
            message = "Undelivered records discarded at shutdown.",
            output = %self.output,
            count = self.count,
            internal_log_rate_secs = 10,
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "component_discarded_events_total",
            "reason" => "shutdown",
            "output" => self.output.to_string(),
        )
        .increment(self.count as u64);
    }
}

/// Records reaching an output that was disabled by an authentication failure.
#[derive(Debug)]
pub struct OutputDisabledDiscarded<'a> {
    pub output: &'a str,
    pub count: usize,
}

impl InternalEvent for OutputDisabledDiscarded<'_> {
    fn emit_logs(&self) {
        warn!(
            message = "Output is disabled until the configuration is reloaded; records will be read again after restart.",
            output = %self.output,
            count = self.count,
            internal_log_rate_secs = 30,
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "component_discarded_events_total",
            "reason" => "output_disabled",
            "output" => self.output.to_string(),
        )
        .increment(self.count as u64);
    }
}
