use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::internal_events::ConfigWatchError;

/// Changes arriving within this window collapse into one reload.
pub const DEBOUNCE: Duration = Duration::from_secs(1);

/// Keeps the filesystem watch alive; dropping it stops reload notifications.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

/// Watches the directory holding `path` and sends `()` on `reload_tx` after it changes.
///
/// The directory is watched rather than the file because mounted config maps are updated by
/// swapping a `..data` symlink, which never touches the file itself.
pub fn spawn(
    path: &Path,
    reload_tx: mpsc::UnboundedSender<()>,
) -> Result<ConfigWatcher, notify::Error> {
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let file_name = path.file_name().map(|name| name.to_os_string());

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<()>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                if is_relevant(&event, file_name.as_deref()) {
                    _ = event_tx.send(());
                }
            }
            Err(error) => emit!(ConfigWatchError { error: &error }),
        }
    })?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    info!(message = "Watching configuration for changes.", path = ?path, dir = ?dir);

    tokio::spawn(async move {
        while event_rx.recv().await.is_some() {
            // Editors and config map updates produce bursts of events.
            loop {
                match tokio::time::timeout(DEBOUNCE, event_rx.recv()).await {
                    Ok(Some(())) => continue,
                    Ok(None) => return,
                    Err(_elapsed) => break,
                }
            }
            debug!(message = "Configuration changed.");
            if reload_tx.send(()).is_err() {
                return;
            }
        }
    });

    Ok(ConfigWatcher { _watcher: watcher })
}

fn is_relevant(event: &notify::Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    if matches!(event.kind, EventKind::Access(_) | EventKind::Other) {
        return false;
    }
    event.paths.iter().any(|changed: &PathBuf| {
        let name = changed.file_name();
        name == file_name || name.is_some_and(|name| name == "..data")
    })
}
