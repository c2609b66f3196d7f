use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::Mutex};

use crate::{FilePosition, fingerprinter::FileFingerprint};

const TMP_FILE_NAME: &str = "checkpoints.new.json";
pub const CHECKPOINT_FILE_NAME: &str = "checkpoints.json";

/// On-disk format. Incompatible changes get a new variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "version", rename_all = "snake_case")]
enum State {
    #[serde(rename = "1")]
    V1 {
        checkpoints: BTreeMap<String, Checkpoint>,
    },
}

/// Durable resume point of one source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    /// Identity of the file the position refers to. Absent for journals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<FileFingerprint>,
    pub position: FilePosition,
    /// Opaque journal cursor, resumed with `--after-cursor`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub modified: DateTime<Utc>,
}

/// Thread-safe in-memory view of the checkpoints, shared between the acknowledgement path that
/// advances them and the writer that persists them.
#[derive(Debug, Default)]
pub struct CheckpointsView {
    checkpoints: DashMap<String, Checkpoint>,
}

impl CheckpointsView {
    /// Records the position of a file source.
    ///
    /// Callers report positions in read order, so the latest report always wins. That includes a
    /// lower offset after the file was truncated or replaced.
    pub fn update(&self, source_id: &str, fingerprint: FileFingerprint, position: FilePosition) {
        self.checkpoints.insert(
            source_id.to_string(),
            Checkpoint {
                fingerprint: Some(fingerprint),
                position,
                cursor: None,
                modified: Utc::now(),
            },
        );
    }

    /// Records the journal cursor of the last acknowledged entry.
    pub fn update_cursor(&self, source_id: &str, cursor: String) {
        self.checkpoints.insert(
            source_id.to_string(),
            Checkpoint {
                fingerprint: None,
                position: 0,
                cursor: Some(cursor),
                modified: Utc::now(),
            },
        );
    }

    pub fn get(&self, source_id: &str) -> Option<Checkpoint> {
        self.checkpoints.get(source_id).map(|r| r.value().clone())
    }

    pub fn remove(&self, source_id: &str) {
        self.checkpoints.remove(source_id);
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    fn set_state(&self, state: State) {
        match state {
            State::V1 { checkpoints } => {
                for (source_id, checkpoint) in checkpoints {
                    self.checkpoints.insert(source_id, checkpoint);
                }
            }
        }
    }

    fn get_state(&self) -> State {
        State::V1 {
            checkpoints: self
                .checkpoints
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }
}

/// Persists a [`CheckpointsView`] under the data directory.
pub struct Checkpointer {
    tmp_file_path: PathBuf,
    stable_file_path: PathBuf,
    checkpoints: Arc<CheckpointsView>,
    last: Mutex<Option<State>>,
}

impl Checkpointer {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            tmp_file_path: data_dir.join(TMP_FILE_NAME),
            stable_file_path: data_dir.join(CHECKPOINT_FILE_NAME),
            checkpoints: Arc::new(CheckpointsView::default()),
            last: Mutex::new(None),
        }
    }

    pub fn view(&self) -> Arc<CheckpointsView> {
        Arc::clone(&self.checkpoints)
    }

    /// Writes the current state if it changed since the last write.
    ///
    /// The new state is fully flushed to a temporary file and then renamed over the stable file,
    /// so a crash at any point leaves one complete file to recover from.
    pub async fn write_checkpoints(&self) -> io::Result<usize> {
        let current = self.checkpoints.get_state();

        let mut last = self.last.lock().await;
        if last.as_ref() != Some(&current) {
            let tmp_file_path = self.tmp_file_path.clone();
            let payload = serde_json::to_vec(&current)?;
            tokio::task::spawn_blocking(move || -> io::Result<()> {
                use std::io::Write;

                let mut file = std::fs::File::create(tmp_file_path)?;
                file.write_all(&payload)?;
                file.sync_all()
            })
            .await
            .map_err(io::Error::other)??;

            fs::rename(&self.tmp_file_path, &self.stable_file_path).await?;
            *last = Some(current);
        }

        Ok(self.checkpoints.len())
    }

    /// Loads persisted checkpoints, preferring a temporary file left by an interrupted write.
    pub async fn read_checkpoints(&self) {
        match read_state(&self.tmp_file_path).await {
            Ok(state) => {
                warn!(message = "Recovered checkpoint data from interrupted process.");
                self.checkpoints.set_state(state);
                if let Err(error) = fs::rename(&self.tmp_file_path, &self.stable_file_path).await {
                    warn!(message = "Error persisting recovered checkpoint file.", %error);
                }
                return;
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => {
                error!(message = "Unable to recover checkpoint data from interrupted process.", %error);
            }
        }

        match read_state(&self.stable_file_path).await {
            Ok(state) => {
                info!(message = "Loaded checkpoint data.");
                self.checkpoints.set_state(state);
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!(message = "Unable to load checkpoint data.", %error),
        }
    }
}

async fn read_state(path: &Path) -> io::Result<State> {
    let bytes = fs::read(path).await?;
    serde_json::from_slice(&bytes).map_err(io::Error::from)
}
