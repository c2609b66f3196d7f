//! Node logs read from the systemd journal through `journalctl`.
//!
//! `journalctl --follow --output=json` is kept running and restarted with `--after-cursor` when it
//! exits. The cursor of the last acknowledged entry is checkpointed like a file position.

use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use futures::{StreamExt, stream::BoxStream};
use serde_json::{Map, Value};
use snafu::{ResultExt, Snafu};
use tokio::{process::Command, time::interval};
use tokio_util::codec::{FramedRead, LinesCodec};

use super::{SourceContext, send};
use crate::{
    config::JournalSettings,
    event::{AckPosition, LogRecord, LogSource, LogType, SourceProgress},
    internal_events::{
        EventsReceived, FileCheckpointWriteError, JournaldExited, JournaldStarted, ParseError,
    },
};

pub const SOURCE_TYPE: &str = "journald";
/// Checkpoint key of the journal.
const SOURCE_ID: &str = "journald";

const BACKOFF_DURATION: Duration = Duration::from_secs(1);
const MAX_ENTRY_BYTES: usize = 1024 * 1024;

const CURSOR: &str = "__CURSOR";
const MESSAGE: &str = "MESSAGE";
const PRIORITY: &str = "PRIORITY";
const SOURCE_TIMESTAMP: &str = "_SOURCE_REALTIME_TIMESTAMP";
const RECEIVED_TIMESTAMP: &str = "__REALTIME_TIMESTAMP";

#[derive(Debug, Snafu)]
pub enum JournaldError {
    #[snafu(display("Could not spawn {}: {source}", command.display()))]
    JournalctlSpawn {
        command: PathBuf,
        source: io::Error,
    },
    #[snafu(display("journalctl has no stdout"))]
    MissingStdout,
}

type JournalStream = BoxStream<'static, io::Result<Bytes>>;

/// Stops a running `journalctl`.
type StopJournalctlFn = Box<dyn FnOnce() + Send>;

/// Starts `journalctl` after the given cursor.
///
/// The source is generic over this so tests can replay a recorded journal.
type StartJournalctlFn =
    Box<dyn Fn(Option<&str>) -> Result<(JournalStream, StopJournalctlFn), JournaldError> + Send + Sync>;

pub struct Journald {
    start: StartJournalctlFn,
    cx: SourceContext,
}

impl Journald {
    pub fn new(settings: &JournalSettings, cx: SourceContext) -> Self {
        let command = settings.command.clone();
        let extra_args = settings.extra_args.clone();
        Self {
            start: Box::new(move |cursor: Option<&str>| {
                start_journalctl(&command, &extra_args, cursor)
            }),
            cx,
        }
    }

    pub async fn run(self) {
        let checkpoints = self.cx.checkpointer.view();
        let progress = SourceProgress::new(Arc::from(SOURCE_ID), Arc::clone(&checkpoints));
        let mut cursor = checkpoints.get(SOURCE_ID).and_then(|checkpoint| checkpoint.cursor);
        let mut sequence = 0;

        loop {
            emit!(JournaldStarted {
                cursor: cursor.as_deref(),
            });
            match (self.start)(cursor.as_deref()) {
                Ok((stream, stop)) => {
                    let restart = self
                        .run_stream(stream, &progress, &mut cursor, &mut sequence)
                        .await;
                    stop();
                    if !restart {
                        break;
                    }
                }
                Err(error) => {
                    error!(message = "Error starting journalctl process.", %error);
                }
            }

            // journalctl is never supposed to exit, so anything reaching here is retried.
            tokio::select! {
                _ = tokio::time::sleep(BACKOFF_DURATION) => {}
                _ = self.cx.shutdown.cancelled() => break,
            }
        }

        self.write_checkpoints().await;
    }

    /// Processes `journalctl` output until it ends. Returns `true` if it should be restarted.
    async fn run_stream(
        &self,
        mut stream: JournalStream,
        progress: &Arc<SourceProgress>,
        cursor: &mut Option<String>,
        sequence: &mut u64,
    ) -> bool {
        let mut checkpoint_tick = interval(self.cx.checkpoint_interval);
        loop {
            let line = tokio::select! {
                _ = self.cx.shutdown.cancelled() => return false,
                _ = checkpoint_tick.tick() => {
                    self.write_checkpoints().await;
                    continue;
                }
                line = stream.next() => line,
            };
            let bytes = match line {
                Some(Ok(bytes)) => bytes,
                Some(Err(error)) => {
                    emit!(JournaldExited {
                        status: &error.to_string(),
                    });
                    return true;
                }
                None => {
                    emit!(JournaldExited {
                        status: "output ended",
                    });
                    return true;
                }
            };

            emit!(EventsReceived {
                source_type: SOURCE_TYPE,
                count: 1,
                byte_size: bytes.len(),
            });
            let mut entry = match decode_entry(&bytes) {
                Ok(entry) => entry,
                Err(error) => {
                    emit!(ParseError {
                        source_id: SOURCE_ID,
                        error: &error.to_string(),
                        dropped: true,
                    });
                    continue;
                }
            };
            let Some(Value::String(entry_cursor)) = entry.remove(CURSOR) else {
                emit!(ParseError {
                    source_id: SOURCE_ID,
                    error: "journal entry has no cursor",
                    dropped: true,
                });
                continue;
            };
            *cursor = Some(entry_cursor.clone());

            let finalizers = progress.finalizer(AckPosition::Journal {
                cursor: entry_cursor,
            });
            let mut record = create_record(entry, progress.source_id()).with_finalizers(finalizers);
            record.offset = *sequence;
            *sequence += 1;

            if !send(&self.cx.out, record).await {
                return false;
            }
        }
    }

    async fn write_checkpoints(&self) {
        if let Err(error) = self.cx.checkpointer.write_checkpoints().await {
            emit!(FileCheckpointWriteError { error: &error });
        }
    }
}

fn start_journalctl(
    command_path: &Path,
    extra_args: &[String],
    cursor: Option<&str>,
) -> Result<(JournalStream, StopJournalctlFn), JournaldError> {
    let mut command = Command::new(command_path);
    command.stdout(Stdio::piped()).kill_on_drop(true);
    command.args(extra_args);
    command.arg("--follow");
    command.arg("--all");
    command.arg("--show-cursor");
    command.arg("--output=json");
    match cursor {
        Some(cursor) => {
            command.arg(format!("--after-cursor={cursor}"));
        }
        None => {
            // journalctl --follow only outputs a few lines without a starting point
            command.arg("--since=2000-01-01");
        }
    }

    let mut child = command.spawn().context(JournalctlSpawnSnafu {
        command: command_path,
    })?;
    let stdout = child.stdout.take().ok_or(JournaldError::MissingStdout)?;
    let stream = FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_ENTRY_BYTES))
        .map(|line| line.map(Bytes::from).map_err(io::Error::other))
        .boxed();

    let stop = Box::new(move || {
        let _ = child.start_kill();
    });
    Ok((stream, stop))
}

/// Parses one JSON entry. journalctl outputs values that are not valid UTF-8 as arrays of bytes.
fn decode_entry(line: &[u8]) -> Result<Map<String, Value>, serde_json::Error> {
    let mut entry: Map<String, Value> = serde_json::from_slice(line)?;
    for value in entry.values_mut() {
        if let Value::Array(array) = value {
            *value = decode_array(array);
        }
    }
    Ok(entry)
}

fn decode_array(array: &[Value]) -> Value {
    // Every item a byte means one binary value; anything else is a multi-valued field.
    let bytes = array
        .iter()
        .map(|item| item.as_u64().and_then(|num| u8::try_from(num).ok()))
        .collect::<Option<Vec<u8>>>();
    match bytes {
        Some(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        None => Value::Array(array.to_vec()),
    }
}

fn priority_level(priority: &str) -> &'static str {
    match priority {
        "0" => "emerg",
        "1" => "alert",
        "2" => "crit",
        "3" => "err",
        "4" => "warning",
        "5" => "notice",
        "6" => "info",
        "7" => "debug",
        _ => "unknown",
    }
}

fn entry_timestamp(entry: &Map<String, Value>) -> Option<DateTime<Utc>> {
    let micros = entry
        .get(SOURCE_TIMESTAMP)
        .or_else(|| entry.get(RECEIVED_TIMESTAMP))?
        .as_str()?
        .parse::<i64>()
        .ok()?;
    Utc.timestamp_micros(micros).single()
}

/// Builds a node record. Trusted fields (leading `_`) go under `systemd.t`, user fields under
/// `systemd.u`, with their prefix removed. Address fields (leading `__`) are dropped.
fn create_record(mut entry: Map<String, Value>, source_id: &Arc<str>) -> LogRecord {
    let message = match entry.remove(MESSAGE) {
        Some(Value::String(message)) => message,
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let timestamp = entry_timestamp(&entry);
    let level = entry
        .get(PRIORITY)
        .and_then(Value::as_str)
        .map(priority_level);

    let mut trusted = Map::new();
    let mut user = Map::new();
    for (key, value) in entry {
        if key.starts_with("__") {
            continue;
        }
        match key.strip_prefix('_') {
            Some(name) => trusted.insert(name.to_string(), value),
            None => user.insert(key, value),
        };
    }

    let mut record = LogRecord::new(
        message,
        LogType::Infrastructure,
        LogSource::Node,
        Arc::clone(source_id),
    );
    if let Some(timestamp) = timestamp {
        record.timestamp = timestamp;
    }
    record.level = level.map(String::from);
    let mut systemd = Map::new();
    systemd.insert("t".into(), Value::Object(trusted));
    systemd.insert("u".into(), Value::Object(user));
    record.extra.insert("systemd".into(), Value::Object(systemd));
    record
}
