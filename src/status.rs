//! Machine readable health of the forwarder, kept in `status.json` under the data directory.
//!
//! The file carries the configuration conditions of the last load attempt and one condition per
//! output of the active generation. It is rewritten whenever a condition changes.

use std::{
    collections::BTreeMap,
    fs, io,
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::internal_events::StatusWriteError;

pub const STATUS_FILE_NAME: &str = "status.json";

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum ConditionType {
    /// Delivering normally.
    Ready,
    /// Running, but the destination is failing and records are being retried.
    Degraded,
    /// Not usable until the configuration changes.
    Invalid,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionType,
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(kind: ConditionType, reason: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.to_owned(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn ready() -> Self {
        Self::new(ConditionType::Ready, "Delivering", "")
    }

    pub fn degraded(reason: &str, message: impl Into<String>) -> Self {
        Self::new(ConditionType::Degraded, reason, message)
    }

    pub fn invalid(reason: &str, message: impl Into<String>) -> Self {
        Self::new(ConditionType::Invalid, reason, message)
    }

    fn same_state(&self, other: &Self) -> bool {
        self.kind == other.kind && self.reason == other.reason
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusDocument {
    /// Generation of the configuration currently running.
    pub generation: u64,
    /// Condition of the last configuration load.
    pub config: Option<Condition>,
    /// Every error of a rejected configuration.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_errors: Vec<String>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Condition>,
}

/// Owns `status.json`. Shared by the topology and every delivery worker.
#[derive(Debug)]
pub struct StatusReporter {
    path: Option<PathBuf>,
    document: Mutex<StatusDocument>,
}

impl StatusReporter {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: Some(data_dir.join(STATUS_FILE_NAME)),
            document: Mutex::default(),
        }
    }

    /// A reporter that only keeps the document in memory.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            document: Mutex::default(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> StatusDocument {
        self.lock().clone()
    }

    /// A configuration was accepted and `outputs` are about to start.
    ///
    /// Outputs that are not part of the new generation are forgotten.
    pub fn generation_started<'a>(
        &self,
        generation: u64,
        outputs: impl IntoIterator<Item = &'a str>,
    ) {
        let mut document = self.lock();
        document.generation = generation;
        document.config = Some(Condition::new(ConditionType::Ready, "ConfigAccepted", ""));
        document.config_errors.clear();

        let mut previous = std::mem::take(&mut document.outputs);
        for name in outputs {
            let condition = previous
                .remove(name)
                .filter(|condition| condition.kind == ConditionType::Ready)
                .unwrap_or_else(|| Condition::new(ConditionType::Ready, "Starting", ""));
            document.outputs.insert(name.to_owned(), condition);
        }
        self.persist(&document);
    }

    /// A configuration was rejected. The running generation, if any, keeps its output conditions.
    pub fn config_rejected(&self, errors: &[String]) {
        let mut document = self.lock();
        document.config = Some(Condition::invalid(
            "ConfigInvalid",
            format!("{} error(s) in configuration", errors.len()),
        ));
        document.config_errors = errors.to_vec();
        self.persist(&document);
    }

    /// Sets the condition of `output`. Rewrites the file only when the state actually changes.
    pub fn set_output(&self, output: &str, condition: Condition) {
        let mut document = self.lock();
        if document
            .outputs
            .get(output)
            .is_some_and(|current| current.same_state(&condition))
        {
            return;
        }
        document.outputs.insert(output.to_owned(), condition);
        self.persist(&document);
    }

    pub fn output(&self, output: &str) -> Option<Condition> {
        self.lock().outputs.get(output).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, StatusDocument> {
        self.document.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, document: &StatusDocument) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(error) = write_atomic(path, document) {
            emit!(StatusWriteError { error: &error });
        }
    }
}

/// Writes to a sibling temporary file and renames it over `path`, so readers never see a torn
/// document.
fn write_atomic(path: &Path, document: &StatusDocument) -> io::Result<()> {
    let payload = serde_json::to_vec_pretty(document)?;
    let tmp_path = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(&payload)?;
    file.sync_all()?;
    fs::rename(&tmp_path, path)
}

/// Reads a status file written by [`StatusReporter`].
pub fn read(path: &Path) -> io::Result<StatusDocument> {
    let content = fs::read(path)?;
    serde_json::from_slice(&content).map_err(io::Error::other)
}
