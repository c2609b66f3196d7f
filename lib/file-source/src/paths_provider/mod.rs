//! Abstractions to allow configuring ways to provide the paths list for the
//! file source to watch and read.

use std::path::PathBuf;

pub mod glob;

/// Represents the ability to enumerate the files to watch, with exclusions already applied.
///
/// Implementations are polled repeatedly, so newly created files show up on a later call.
pub trait PathsProvider: Send + Sync {
    fn paths(&self) -> Vec<PathBuf>;
}
