use std::{
    fmt, fs,
    io::{self, BufReader, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use bytes::{Bytes, BytesMut};

use crate::{
    FilePosition, ReadFrom,
    buffer::{ReadOutcome, read_until_with_max_size},
    fingerprinter::FileFingerprint,
};

/// Why a watcher restarted from the beginning of a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GapReason {
    /// The file shrank below the current read position.
    Truncated,
    /// A different file now lives at the watched path.
    Rotated,
}

impl fmt::Display for GapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Truncated => "truncated",
            Self::Rotated => "rotated",
        })
    }
}

/// One complete line read from a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub text: Bytes,
    /// Position just past this line's delimiter; checkpointing it resumes at the next line.
    pub end_offset: FilePosition,
}

/// Result of a single poll of a [`FileWatcher`].
#[derive(Debug, PartialEq, Eq)]
pub enum WatcherRead {
    Line(RawLine),
    Gap(GapReason),
    /// Nothing new; try again later.
    Idle,
}

/// A polling state machine reading newline delimited data from one path.
///
/// The watcher follows the path, not the file: when the path is rotated it finishes the open
/// handle first, then reopens the path from offset zero.
pub struct FileWatcher {
    pub path: PathBuf,
    reader: Option<BufReader<fs::File>>,
    fingerprint: Option<FileFingerprint>,
    position: FilePosition,
    max_line_bytes: usize,
    buf: BytesMut,
}

impl FileWatcher {
    /// Opens `path`, resuming at `checkpoint` when it belongs to the same file.
    ///
    /// A checkpoint whose fingerprint no longer matches the file means the file was replaced while
    /// nothing was watching it, so reading starts over at the beginning.
    pub fn new(
        path: PathBuf,
        checkpoint: Option<(FileFingerprint, FilePosition)>,
        read_from: ReadFrom,
        max_line_bytes: usize,
    ) -> io::Result<Self> {
        let file = fs::File::open(&path)?;
        let metadata = file.metadata()?;
        let fingerprint = FileFingerprint::from_metadata(&metadata);

        let position = match checkpoint {
            Some((checkpointed, position)) if checkpointed == fingerprint => {
                position.min(metadata.len())
            }
            Some(_) => 0,
            None => match read_from {
                ReadFrom::Beginning => 0,
                ReadFrom::End => metadata.len(),
            },
        };

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(position))?;

        Ok(Self {
            path,
            reader: Some(reader),
            fingerprint: Some(fingerprint),
            position,
            max_line_bytes,
            buf: BytesMut::new(),
        })
    }

    pub const fn position(&self) -> FilePosition {
        self.position
    }

    pub const fn fingerprint(&self) -> Option<FileFingerprint> {
        self.fingerprint
    }

    /// True once the watched path has disappeared and the previous handle is exhausted.
    pub fn is_missing(&self) -> bool {
        self.reader.is_none()
    }

    /// Reads the next complete line, or reports a discontinuity.
    ///
    /// # Errors
    ///
    /// I/O errors are returned as is; `NotFound` means the path is gone and nothing is open.
    pub fn read_line(&mut self) -> io::Result<WatcherRead> {
        let Some(reader) = self.reader.as_mut() else {
            return self.reopen();
        };

        let current_size = reader.get_ref().metadata()?.len();
        if current_size < self.position {
            reader.seek(SeekFrom::Start(0))?;
            self.position = 0;
            self.buf.clear();
            return Ok(WatcherRead::Gap(GapReason::Truncated));
        }

        match read_until_with_max_size(
            reader,
            &mut self.position,
            b"\n",
            &mut self.buf,
            self.max_line_bytes,
        )? {
            ReadOutcome::Line(_) => Ok(WatcherRead::Line(RawLine {
                text: self.buf.split().freeze(),
                end_offset: self.position,
            })),
            ReadOutcome::Partial => match FileFingerprint::of_path(&self.path) {
                Ok(current) if Some(current) == self.fingerprint => Ok(WatcherRead::Idle),
                Ok(_) => self.reopen(),
                Err(error) if error.kind() == io::ErrorKind::NotFound => {
                    // Drained the old handle; wait for the path to come back.
                    self.reader = None;
                    Ok(WatcherRead::Idle)
                }
                Err(error) => Err(error),
            },
        }
    }

    fn reopen(&mut self) -> io::Result<WatcherRead> {
        let file = fs::File::open(&self.path)?;
        let fingerprint = FileFingerprint::from_metadata(&file.metadata()?);
        let had_file = self.fingerprint.is_some();

        self.reader = Some(BufReader::new(file));
        self.position = 0;
        // A dangling partial line belonged to the previous file.
        self.buf.clear();

        let rotated = had_file && self.fingerprint != Some(fingerprint);
        self.fingerprint = Some(fingerprint);
        if rotated {
            Ok(WatcherRead::Gap(GapReason::Rotated))
        } else {
            Ok(WatcherRead::Idle)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, io::Write};

    use super::*;

    fn append(path: &Path, data: &[u8]) {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(data).unwrap();
    }

    fn line(watcher: &mut FileWatcher) -> String {
        match watcher.read_line().unwrap() {
            WatcherRead::Line(line) => String::from_utf8(line.text.to_vec()).unwrap(),
            other => panic!("expected a line, got {other:?}"),
        }
    }

    #[test]
    fn reads_appended_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.log");
        append(&path, b"first\n");

        let mut watcher = FileWatcher::new(path.clone(), None, ReadFrom::Beginning, 1024).unwrap();
        assert_eq!(line(&mut watcher), "first");
        assert_eq!(watcher.read_line().unwrap(), WatcherRead::Idle);

        append(&path, b"second\n");
        assert_eq!(line(&mut watcher), "second");
        assert_eq!(watcher.position(), 13);
    }

    #[test]
    fn resumes_from_matching_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.log");
        append(&path, b"first\nsecond\n");
        let fingerprint = FileFingerprint::of_path(&path).unwrap();

        let mut watcher =
            FileWatcher::new(path.clone(), Some((fingerprint, 6)), ReadFrom::Beginning, 1024)
                .unwrap();
        assert_eq!(line(&mut watcher), "second");
    }

    #[test]
    fn stale_checkpoint_starts_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.log");
        append(&path, b"first\nsecond\n");

        let stale = FileFingerprint::DevInode(0, 0);
        let mut watcher =
            FileWatcher::new(path.clone(), Some((stale, 6)), ReadFrom::End, 1024).unwrap();
        assert_eq!(line(&mut watcher), "first");
    }

    #[test]
    fn truncation_emits_gap_and_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.log");
        append(&path, b"first line\n");

        let mut watcher = FileWatcher::new(path.clone(), None, ReadFrom::Beginning, 1024).unwrap();
        assert_eq!(line(&mut watcher), "first line");

        fs::write(&path, b"new\n").unwrap();
        assert_eq!(
            watcher.read_line().unwrap(),
            WatcherRead::Gap(GapReason::Truncated)
        );
        assert_eq!(line(&mut watcher), "new");
    }

    #[test]
    fn rotation_drains_old_file_then_emits_gap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.log");
        append(&path, b"before\n");

        let mut watcher = FileWatcher::new(path.clone(), None, ReadFrom::Beginning, 1024).unwrap();

        // Written to the old file after it was renamed away.
        let rotated = dir.path().join("0.log.1");
        fs::rename(&path, &rotated).unwrap();
        append(&rotated, b"late\n");
        append(&path, b"after\n");

        assert_eq!(line(&mut watcher), "before");
        assert_eq!(line(&mut watcher), "late");
        assert_eq!(
            watcher.read_line().unwrap(),
            WatcherRead::Gap(GapReason::Rotated)
        );
        assert_eq!(line(&mut watcher), "after");
    }

    #[test]
    fn removed_file_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.log");
        append(&path, b"only\n");

        let mut watcher = FileWatcher::new(path.clone(), None, ReadFrom::Beginning, 1024).unwrap();
        assert_eq!(line(&mut watcher), "only");
        fs::remove_file(&path).unwrap();

        assert_eq!(watcher.read_line().unwrap(), WatcherRead::Idle);
        assert!(watcher.is_missing());
        let error = watcher.read_line().unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::NotFound);
    }
}
