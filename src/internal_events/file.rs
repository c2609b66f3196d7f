use std::{io, path::Path, time::Duration};

use file_source::{FileSourceInternalEvents, GapReason};
use metrics::{counter, gauge};

use super::InternalEvent;

#[derive(Debug)]
pub struct FileOpen {
    pub count: usize,
}

impl InternalEvent for FileOpen {
    #[allow(clippy::cast_precision_loss)]
    fn emit_metrics(&self) {
        gauge!("open_files").set(self.count as f64);
    }
}

#[derive(Debug)]
pub struct FileAdded<'a> {
    pub file: &'a Path,
}

impl InternalEvent for FileAdded<'_> {
    fn emit_logs(&self) {
        info!(message = "Found new file to watch.", file = %self.file.display());
    }

    fn emit_metrics(&self) {
        counter!("files_added_total").increment(1);
    }
}

#[derive(Debug)]
pub struct FileResumed<'a> {
    pub file: &'a Path,
    pub file_position: u64,
}

impl InternalEvent for FileResumed<'_> {
    fn emit_logs(&self) {
        info!(
            message = "Resuming to watch file.",
            file = %self.file.display(),
            file_position = %self.file_position
        );
    }

    fn emit_metrics(&self) {
        counter!("files_resumed_total").increment(1);
    }
}

#[derive(Debug)]
pub struct FileUnwatched<'a> {
    pub file: &'a Path,
}

impl InternalEvent for FileUnwatched<'_> {
    fn emit_logs(&self) {
        info!(message = "Stopped watching file.", file = %self.file.display());
    }

    fn emit_metrics(&self) {
        counter!("files_unwatched_total").increment(1);
    }
}

/// A watched file could not be read. The watcher retries after `retry_in`.
#[derive(Debug)]
pub struct SourceUnavailable<'a> {
    pub source: &'a str,
    pub error: &'a dyn std::error::Error,
    pub retry_in: Duration,
}

impl InternalEvent for SourceUnavailable<'_> {
    fn emit_logs(&self) {
        error!(
            message = "Source unavailable.",
            source = %self.source,
            error = %self.error,
            retry_in_ms = u64::try_from(self.retry_in.as_millis()).unwrap_or(u64::MAX),
            error_type = "source_unavailable",
            stage = "receiving",
            internal_log_rate_secs = 10,
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "component_errors_total",
            "error_type" => "source_unavailable",
            "stage" => "receiving",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct FileGap<'a> {
    pub file: &'a Path,
    pub reason: GapReason,
}

impl InternalEvent for FileGap<'_> {
    fn emit_logs(&self) {
        info!(
            message = "File restarted from the beginning.",
            file = %self.file.display(),
            reason = %self.reason,
        );
    }

    fn emit_metrics(&self) {
        counter!("file_gaps_total", "reason" => self.reason.to_string()).increment(1);
    }
}

#[derive(Debug)]
pub struct FileCheckpointed {
    pub count: usize,
    pub duration: Duration,
}

impl InternalEvent for FileCheckpointed {
    fn emit_logs(&self) {
        debug!(
            message = "Files checkpointed.",
            count = %self.count,
            duration_ms = u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX),
        );
    }

    fn emit_metrics(&self) {
        counter!("checkpoints_total").increment(self.count as u64);
    }
}

#[derive(Debug)]
pub struct FileCheckpointWriteError<'a> {
    pub error: &'a io::Error,
}

impl InternalEvent for FileCheckpointWriteError<'_> {
    fn emit_logs(&self) {
        error!(
            message = "Failed writing checkpoints.",
            error_type = "write_error",
            error = %self.error,
            stage = "receiving",
            internal_log_rate_secs = 10,
        );
    }

    fn emit_metrics(&self) {
        counter!("checkpoint_write_errors_total").increment(1);
        counter!(
            "component_errors_total",
            "error_type" => "write_error",
            "stage" => "receiving",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct EventsReceived<'a> {
    pub source_type: &'a str,
    pub count: usize,
    pub byte_size: usize,
}

impl InternalEvent for EventsReceived<'_> {
    fn emit_logs(&self) {
        trace!(
            message = "Events received.",
            source_type = %self.source_type,
            count = %self.count,
            byte_size = %self.byte_size,
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "component_received_events_total",
            "source_type" => self.source_type.to_string(),
        )
        .increment(self.count as u64);
        counter!(
            "component_received_event_bytes_total",
            "source_type" => self.source_type.to_string(),
        )
        .increment(self.byte_size as u64);
    }
}

#[derive(Clone)]
pub struct FileSourceInternalEventsEmitter;

impl FileSourceInternalEvents for FileSourceInternalEventsEmitter {
    fn emit_file_added(&self, file: &Path) {
        emit!(FileAdded { file });
    }

    fn emit_file_resumed(&self, file: &Path, file_position: u64) {
        emit!(FileResumed {
            file,
            file_position
        });
    }

    fn emit_file_watch_error(&self, file: &Path, error: &io::Error, retry_in: Duration) {
        let source = file.to_string_lossy();
        emit!(SourceUnavailable {
            source: &source,
            error,
            retry_in,
        });
    }

    fn emit_file_unwatched(&self, file: &Path) {
        emit!(FileUnwatched { file });
    }

    fn emit_file_gap(&self, file: &Path, reason: GapReason) {
        emit!(FileGap { file, reason });
    }

    fn emit_files_open(&self, count: usize) {
        emit!(FileOpen { count });
    }

    fn emit_file_checkpointed(&self, count: usize, duration: Duration) {
        emit!(FileCheckpointed { count, duration });
    }

    fn emit_file_checkpoint_write_error(&self, error: &io::Error) {
        emit!(FileCheckpointWriteError { error });
    }
}
