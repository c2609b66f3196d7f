use metrics::counter;

use super::InternalEvent;

/// A record matched no input of any pipeline.
#[derive(Debug)]
pub struct RouteUnmatched<'a> {
    pub source_id: &'a str,
}

impl InternalEvent for RouteUnmatched<'_> {
    fn emit_logs(&self) {
        trace!(message = "Record matched no pipeline.", source_id = %self.source_id);
    }

    fn emit_metrics(&self) {
        counter!(
            "component_discarded_events_total",
            "reason" => "unmatched",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct FilterDropped<'a> {
    pub pipeline: &'a str,
    pub filter: &'a str,
}

impl InternalEvent for FilterDropped<'_> {
    fn emit_logs(&self) {
        trace!(
            message = "Record dropped by filter.",
            pipeline = %self.pipeline,
            filter = %self.filter,
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "component_discarded_events_total",
            "reason" => "filtered",
            "pipeline" => self.pipeline.to_string(),
            "filter" => self.filter.to_string(),
        )
        .increment(1);
    }
}

/// A rate limit discarded a record.
#[derive(Debug)]
pub struct ThrottleEventDiscarded<'a> {
    pub component: &'a str,
    pub key: &'a str,
}

impl InternalEvent for ThrottleEventDiscarded<'_> {
    fn emit_logs(&self) {
        debug!(
            message = "Rate limit exceeded.",
            component = %self.component,
            key = %self.key,
            internal_log_rate_secs = 10,
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "component_discarded_events_total",
            "reason" => "rate_limited",
            "component" => self.component.to_string(),
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct OutputBufferClosed<'a> {
    pub output: &'a str,
}

impl InternalEvent for OutputBufferClosed<'_> {
    fn emit_logs(&self) {
        warn!(
            message = "Output buffer is closed; record dropped.",
            output = %self.output,
            internal_log_rate_secs = 10,
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "component_discarded_events_total",
            "reason" => "output_closed",
            "output" => self.output.to_string(),
        )
        .increment(1);
    }
}
