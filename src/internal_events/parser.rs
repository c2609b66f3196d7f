use metrics::counter;

use super::InternalEvent;

/// A line did not have the shape its source promises and was dropped or passed through raw.
#[derive(Debug)]
pub struct ParseError<'a> {
    pub source_id: &'a str,
    pub error: &'a str,
    pub dropped: bool,
}

impl InternalEvent for ParseError<'_> {
    fn emit_logs(&self) {
        warn!(
            message = "Failed to parse line.",
            source_id = %self.source_id,
            error = %self.error,
            dropped = self.dropped,
            error_type = "parser_failed",
            stage = "processing",
            internal_log_rate_secs = 30,
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "component_errors_total",
            "error_type" => "parser_failed",
            "stage" => "processing",
        )
        .increment(1);
        if self.dropped {
            counter!(
                "component_discarded_events_total",
                "reason" => "parse_error",
            )
            .increment(1);
        }
    }
}

/// Structured parsing was requested but the body was not a JSON object.
#[derive(Debug)]
pub struct StructuredParseFailed<'a> {
    pub source_id: &'a str,
}

impl InternalEvent for StructuredParseFailed<'_> {
    fn emit_logs(&self) {
        debug!(
            message = "Message is not a JSON object; keeping it unparsed.",
            source_id = %self.source_id,
            internal_log_rate_secs = 30,
        );
    }

    fn emit_metrics(&self) {
        counter!("structured_parse_failures_total").increment(1);
    }
}

#[derive(Debug)]
pub struct OversizedLineDiscarded<'a> {
    pub source_id: &'a str,
    pub max_bytes: usize,
}

impl InternalEvent for OversizedLineDiscarded<'_> {
    fn emit_logs(&self) {
        warn!(
            message = "Merged message exceeds the line limit; discarding.",
            source_id = %self.source_id,
            max_bytes = self.max_bytes,
            internal_log_rate_secs = 30,
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "component_discarded_events_total",
            "reason" => "oversized",
        )
        .increment(1);
    }
}
