use std::{
    collections::HashSet,
    io,
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use tokio::{sync::mpsc, task::JoinSet, time::interval};
use tokio_util::sync::CancellationToken;

use crate::{
    FilePosition, FileSourceInternalEvents, ReadFrom,
    checkpointer::{Checkpointer, CheckpointsView},
    file_watcher::{FileWatcher, GapReason, WatcherRead},
    fingerprinter::FileFingerprint,
    paths_provider::PathsProvider,
};

/// Lines read back to back before a watcher yields to its peers.
const MAX_LINES_PER_TURN: usize = 1024;

/// A line along with everything needed to checkpoint past it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub text: Bytes,
    pub source_id: Arc<str>,
    pub fingerprint: FileFingerprint,
    pub offset: FilePosition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    Line(Line),
    /// The file restarted from the beginning; earlier positions no longer apply.
    Gap {
        source_id: Arc<str>,
        reason: GapReason,
    },
    /// The file went away for good. No more events follow for this source.
    Closed { source_id: Arc<str> },
}

#[derive(Clone, Debug)]
pub struct FileServerConfig {
    /// How often the paths provider is polled for new files.
    pub glob_interval: Duration,
    /// Sleep between reads when a file has no new data.
    pub poll_interval: Duration,
    /// Ceiling for the exponential backoff on I/O errors.
    pub max_backoff: Duration,
    /// How long a path may stay missing before its stream ends.
    pub missing_timeout: Duration,
    pub checkpoint_interval: Duration,
    pub max_line_bytes: usize,
    pub read_from: ReadFrom,
}

impl Default for FileServerConfig {
    fn default() -> Self {
        Self {
            glob_interval: Duration::from_secs(1),
            poll_interval: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
            missing_timeout: Duration::from_secs(60),
            checkpoint_interval: Duration::from_secs(1),
            max_line_bytes: 256 * 1024,
            read_from: ReadFrom::Beginning,
        }
    }
}

/// Schedules one watcher task per discovered file and persists checkpoints.
///
/// Files do not need to exist at startup; new paths are picked up on the next glob tick. Each
/// watcher sends into the shared channel, so a full channel stalls the files that feed it and
/// nothing else.
pub struct FileServer<PP, E> {
    pub paths_provider: PP,
    pub config: FileServerConfig,
    pub checkpointer: Arc<Checkpointer>,
    pub emitter: E,
}

impl<PP, E> FileServer<PP, E>
where
    PP: PathsProvider,
    E: FileSourceInternalEvents,
{
    /// Runs until `shutdown` fires, then stops every watcher and writes a final checkpoint.
    pub async fn run(self, out: mpsc::Sender<ReadEvent>, shutdown: CancellationToken) {
        let view = self.checkpointer.view();
        let watchers_shutdown = shutdown.child_token();
        let mut active: HashSet<PathBuf> = HashSet::new();
        let mut watchers: JoinSet<PathBuf> = JoinSet::new();

        let mut glob_tick = interval(self.config.glob_interval);
        let mut checkpoint_tick = interval(self.config.checkpoint_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = glob_tick.tick() => {
                    for path in self.paths_provider.paths() {
                        if active.insert(path.clone()) {
                            watchers.spawn(watch_file(
                                path,
                                Arc::clone(&view),
                                self.config.clone(),
                                self.emitter.clone(),
                                out.clone(),
                                watchers_shutdown.clone(),
                            ));
                        }
                    }
                    self.emitter.emit_files_open(active.len());
                }
                Some(finished) = watchers.join_next() => {
                    if let Ok(path) = finished {
                        active.remove(&path);
                        self.emitter.emit_file_unwatched(&path);
                    }
                }
                _ = checkpoint_tick.tick() => self.write_checkpoints().await,
            }
        }

        watchers_shutdown.cancel();
        while watchers.join_next().await.is_some() {}
        self.write_checkpoints().await;
    }

    async fn write_checkpoints(&self) {
        let start = Instant::now();
        match self.checkpointer.write_checkpoints().await {
            Ok(count) => self.emitter.emit_file_checkpointed(count, start.elapsed()),
            Err(error) => self.emitter.emit_file_checkpoint_write_error(&error),
        }
    }
}

async fn watch_file<E: FileSourceInternalEvents>(
    path: PathBuf,
    checkpoints: Arc<CheckpointsView>,
    config: FileServerConfig,
    emitter: E,
    out: mpsc::Sender<ReadEvent>,
    shutdown: CancellationToken,
) -> PathBuf {
    let source_id: Arc<str> = Arc::from(path.to_string_lossy().as_ref());
    let checkpoint = checkpoints
        .get(&source_id)
        .and_then(|checkpoint| checkpoint.fingerprint.map(|fp| (fp, checkpoint.position)));

    let mut watcher = match FileWatcher::new(
        path.clone(),
        checkpoint,
        config.read_from,
        config.max_line_bytes,
    ) {
        Ok(watcher) => watcher,
        Err(error) => {
            emitter.emit_file_watch_error(&path, &error, Duration::ZERO);
            return path;
        }
    };

    match checkpoint {
        Some((fingerprint, _)) if watcher.fingerprint() == Some(fingerprint) => {
            emitter.emit_file_resumed(&path, watcher.position());
        }
        _ => emitter.emit_file_added(&path),
    }

    let mut backoff = config.poll_interval;
    let mut missing_since: Option<Instant> = None;
    let mut lines_this_turn = 0;

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let event = match watcher.read_line() {
            Ok(WatcherRead::Line(line)) => {
                backoff = config.poll_interval;
                missing_since = None;
                let Some(fingerprint) = watcher.fingerprint() else {
                    continue;
                };
                ReadEvent::Line(Line {
                    text: line.text,
                    source_id: Arc::clone(&source_id),
                    fingerprint,
                    offset: line.end_offset,
                })
            }
            Ok(WatcherRead::Gap(reason)) => {
                missing_since = None;
                emitter.emit_file_gap(&path, reason);
                ReadEvent::Gap {
                    source_id: Arc::clone(&source_id),
                    reason,
                }
            }
            Ok(WatcherRead::Idle) => {
                lines_this_turn = 0;
                if watcher.is_missing() && gone_for_good(&mut missing_since, &config) {
                    let _ = out.send(ReadEvent::Closed { source_id }).await;
                    break;
                }
                if !sleep_or_shutdown(config.poll_interval, &shutdown).await {
                    break;
                }
                continue;
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                if gone_for_good(&mut missing_since, &config) {
                    let _ = out.send(ReadEvent::Closed { source_id }).await;
                    break;
                }
                if !sleep_or_shutdown(config.poll_interval, &shutdown).await {
                    break;
                }
                continue;
            }
            Err(error) => {
                emitter.emit_file_watch_error(&path, &error, backoff);
                if !sleep_or_shutdown(backoff, &shutdown).await {
                    break;
                }
                backoff = (backoff * 2).min(config.max_backoff);
                continue;
            }
        };

        tokio::select! {
            sent = out.send(event) => if sent.is_err() { break },
            _ = shutdown.cancelled() => break,
        }

        lines_this_turn += 1;
        if lines_this_turn >= MAX_LINES_PER_TURN {
            lines_this_turn = 0;
            tokio::task::yield_now().await;
        }
    }

    path
}

fn gone_for_good(missing_since: &mut Option<Instant>, config: &FileServerConfig) -> bool {
    missing_since.get_or_insert_with(Instant::now).elapsed() >= config.missing_timeout
}

/// Returns `false` if shutdown was requested while sleeping.
async fn sleep_or_shutdown(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.cancelled() => false,
    }
}
