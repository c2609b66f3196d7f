use metrics::counter;

use super::InternalEvent;

#[derive(Debug)]
pub struct JournaldStarted<'a> {
    pub cursor: Option<&'a str>,
}

impl InternalEvent for JournaldStarted<'_> {
    fn emit_logs(&self) {
        info!(
            message = "Starting journalctl.",
            resume_cursor = self.cursor.unwrap_or("<none>"),
        );
    }
}

#[derive(Debug)]
pub struct JournaldExited<'a> {
    pub status: &'a str,
}

impl InternalEvent for JournaldExited<'_> {
    fn emit_logs(&self) {
        warn!(
            message = "Journalctl exited; restarting.",
            status = %self.status,
            internal_log_rate_secs = 30,
        );
    }

    fn emit_metrics(&self) {
        counter!("journald_restarts_total").increment(1);
    }
}
