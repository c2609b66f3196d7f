//! Tailing of node-local log files.
//!
//! A [`FileServer`] discovers files through a [`paths_provider::PathsProvider`], runs one
//! [`FileWatcher`] task per file and fans the lines into a single channel. Read positions only
//! become durable when the consumer reports them to the [`checkpointer::CheckpointsView`].

#![deny(clippy::all)]

#[macro_use]
extern crate tracing;

pub mod buffer;
pub mod checkpointer;
mod file_server;
pub mod file_watcher;
pub mod fingerprinter;
pub mod paths_provider;

use std::{io, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

pub use self::{
    checkpointer::{CHECKPOINT_FILE_NAME, Checkpoint, Checkpointer, CheckpointsView},
    file_server::{FileServer, FileServerConfig, Line, ReadEvent},
    file_watcher::{FileWatcher, GapReason, RawLine, WatcherRead},
    fingerprinter::FileFingerprint,
};

pub type FilePosition = u64;

/// Where to start reading a file that has no checkpoint.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadFrom {
    #[default]
    Beginning,
    End,
}

/// Hooks for the embedding application to turn file source occurrences into its own events.
pub trait FileSourceInternalEvents: Send + Sync + Clone + 'static {
    fn emit_file_added(&self, path: &Path);

    fn emit_file_resumed(&self, path: &Path, file_position: u64);

    fn emit_file_watch_error(&self, path: &Path, error: &io::Error, retry_in: Duration);

    fn emit_file_unwatched(&self, path: &Path);

    fn emit_file_gap(&self, path: &Path, reason: GapReason);

    fn emit_files_open(&self, count: usize);

    fn emit_file_checkpointed(&self, count: usize, duration: Duration);

    fn emit_file_checkpoint_write_error(&self, error: &io::Error);
}
