use metrics::counter;

use super::InternalEvent;
use crate::templating::TemplateRenderingError;

#[derive(Debug)]
pub struct TemplateRenderingFailed<'a> {
    pub output: &'a str,
    pub field: &'a str,
    pub error: &'a TemplateRenderingError,
    pub fallback: Option<&'a str>,
}

impl InternalEvent for TemplateRenderingFailed<'_> {
    fn emit_logs(&self) {
        match self.fallback {
            Some(fallback) => debug!(
                message = "Failed to render template; using fallback.",
                output = %self.output,
                field = %self.field,
                error = %self.error,
                fallback,
                internal_log_rate_secs = 30,
            ),
            None => warn!(
                message = "Failed to render template; dropping event.",
                output = %self.output,
                field = %self.field,
                error = %self.error,
                internal_log_rate_secs = 30,
            ),
        }
    }

    fn emit_metrics(&self) {
        counter!(
            "template_rendering_errors_total",
            "output" => self.output.to_string(),
        )
        .increment(1);
        if self.fallback.is_none() {
            counter!(
                "component_discarded_events_total",
                "reason" => "template_error",
                "output" => self.output.to_string(),
            )
            .increment(1);
        }
    }
}
