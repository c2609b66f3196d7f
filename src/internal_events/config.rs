use metrics::counter;

use super::InternalEvent;

/// The configuration could not be loaded or failed validation.
#[derive(Debug)]
pub struct ConfigInvalid<'a> {
    pub errors: &'a [String],
}

impl InternalEvent for ConfigInvalid<'_> {
    fn emit_logs(&self) {
        for error in self.errors {
            error!(
                message = "Configuration error.",
                %error,
                error_type = "config_invalid",
                stage = "processing",
            );
        }
    }

    fn emit_metrics(&self) {
        counter!(
            "component_errors_total",
            "error_type" => "config_invalid",
            "stage" => "processing",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct ConfigWatchError<'a> {
    pub error: &'a notify::Error,
}

impl InternalEvent for ConfigWatchError<'_> {
    fn emit_logs(&self) {
        error!(
            message = "Configuration watcher failed.",
            error = %self.error,
            internal_log_rate_secs = 30,
        );
    }
}

#[derive(Debug)]
pub struct StatusWriteError<'a> {
    pub error: &'a std::io::Error,
}

impl InternalEvent for StatusWriteError<'_> {
    fn emit_logs(&self) {
        warn!(
            message = "Unable to write status file.",
            error = %self.error,
            internal_log_rate_secs = 60,
        );
    }
}
