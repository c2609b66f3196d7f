use std::path::Path;

use metrics::counter;

use super::InternalEvent;

#[derive(Debug)]
pub struct ForwarderStarted;

impl InternalEvent for ForwarderStarted {
    fn emit_logs(&self) {
        info!(
            target: "log_forwarder",
            message = "Log forwarder has started.",
            version = crate::get_version(),
            arch = std::env::consts::ARCH,
        );
    }

    fn emit_metrics(&self) {
        counter!("started_total").increment(1);
    }
}

#[derive(Debug)]
pub struct ForwarderReloaded<'a> {
    pub config_path: &'a Path,
    pub generation: u64,
}

impl InternalEvent for ForwarderReloaded<'_> {
    fn emit_logs(&self) {
        info!(
            target: "log_forwarder",
            message = "Log forwarder has reloaded.",
            path = ?self.config_path,
            generation = self.generation,
        );
    }

    fn emit_metrics(&self) {
        counter!("reloaded_total").increment(1);
    }
}

#[derive(Debug)]
pub struct ForwarderStopped;

impl InternalEvent for ForwarderStopped {
    fn emit_logs(&self) {
        info!(target: "log_forwarder", message = "Log forwarder has stopped.");
    }

    fn emit_metrics(&self) {
        counter!("stopped_total").increment(1);
    }
}

#[derive(Debug)]
pub struct ForwarderQuit;

impl InternalEvent for ForwarderQuit {
    fn emit_logs(&self) {
        info!(target: "log_forwarder", message = "Log forwarder has quit.");
    }

    fn emit_metrics(&self) {
        counter!("quit_total").increment(1);
    }
}

#[derive(Debug)]
pub struct ForwarderReloadFailed<'a> {
    pub error: &'a str,
}

impl InternalEvent for ForwarderReloadFailed<'_> {
    fn emit_logs(&self) {
        error!(
            target: "log_forwarder",
            message = "Reload was not successful; keeping the previous configuration.",
            error = %self.error,
        );
    }

    fn emit_metrics(&self) {
        counter!("reload_errors_total").increment(1);
    }
}
