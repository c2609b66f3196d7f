use std::{fs, io, os::unix::fs::MetadataExt, path::Path};

use serde::{Deserialize, Serialize};

/// Identity of a file independent of its path.
///
/// Container runtimes rotate by renaming, so the device/inode pair is what tells a rotated file apart
/// from the freshly created one that now lives at the same path.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FileFingerprint {
    DevInode(u64, u64),
}

impl FileFingerprint {
    pub fn from_metadata(metadata: &fs::Metadata) -> Self {
        Self::DevInode(metadata.dev(), metadata.ino())
    }

    pub fn of_path(path: &Path) -> io::Result<Self> {
        fs::metadata(path).map(|metadata| Self::from_metadata(&metadata))
    }
}
