//! Write-ahead log for the graph store.
//!
//! Every committed transaction is appended as one entry before it is applied
//! in memory. On open, the log is replayed on top of the latest snapshot.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: framed WalEntry]
//! [ENTRY 2: framed WalEntry]
//! ...
//! ```
//!
//! A frame cut short at the end of the file is a torn write from a crash: the
//! log is truncated back to the last complete entry. A checksum failure is
//! corruption and stops the open.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::element::GraphOp;

use super::codec::{self, FileKind};

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The logged change.
    pub kind: WalEntryKind,
}

/// The type of WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalEntryKind {
    /// One committed transaction, applied all-or-nothing on replay.
    Commit { ops: Vec<GraphOp> },

    /// Checkpoint marker (state up to this sequence is in the snapshot).
    Checkpoint { up_to_sequence: u64 },
}

struct WalWriter {
    file: BufWriter<File>,
    sequence: u64,
    /// Set when a failed append could not be rolled back.
    broken: bool,
}

/// Write-ahead log. Thread-safe via an internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    sync_on_write: bool,
}

fn poisoned() -> IoError {
    IoError::new(ErrorKind::Other, "poisoned lock: wal.writer")
}

impl WriteAheadLog {
    /// Open or create a WAL file and return the entries it holds.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<(Self, Vec<WalEntry>)> {
        let existing_len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

        let entries = if existing_len >= codec::HEADER_LEN {
            Self::recover(path)?
        } else {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file, FileKind::Wal)?;
            if sync_on_write {
                file.sync_all()?;
            }
            Vec::new()
        };

        let sequence = entries.last().map_or(0, |e| e.sequence);
        let file = OpenOptions::new().append(true).open(path)?;

        Ok((
            Self {
                path: path.to_path_buf(),
                writer: Mutex::new(WalWriter {
                    file: BufWriter::new(file),
                    sequence,
                    broken: false,
                }),
                sync_on_write,
            },
            entries,
        ))
    }

    /// Reads every complete entry and cuts off a torn tail.
    fn recover(path: &Path) -> IoResult<Vec<WalEntry>> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader, FileKind::Wal)?;

        let mut entries = Vec::new();
        let mut valid_end = codec::HEADER_LEN;
        while valid_end < file_size {
            match codec::decode::<WalEntry>(&mut reader) {
                Ok((entry, consumed)) => {
                    valid_end += consumed;
                    entries.push(entry);
                }
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    tracing::warn!(
                        path = %path.display(),
                        valid_bytes = valid_end,
                        file_bytes = file_size,
                        "torn write at end of WAL, truncating"
                    );
                    drop(reader);
                    let file = OpenOptions::new().write(true).open(path)?;
                    file.set_len(valid_end)?;
                    file.sync_all()?;
                    break;
                }
                Err(e) => {
                    return Err(IoError::new(
                        ErrorKind::InvalidData,
                        format!(
                            "corrupted WAL entry after sequence {}: {e}",
                            entries.last().map_or(0, |x: &WalEntry| x.sequence)
                        ),
                    ));
                }
            }
        }

        Ok(entries)
    }

    /// Append an entry to the WAL.
    ///
    /// Returns the sequence number assigned to this entry.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut writer = self.writer.lock().map_err(|_| poisoned())?;
        if writer.broken {
            return Err(IoError::new(
                ErrorKind::Other,
                "WAL holds a partial entry from an earlier failed append",
            ));
        }

        let candidate = writer.sequence + 1;
        let entry = WalEntry {
            sequence: candidate,
            timestamp: Utc::now(),
            kind,
        };

        let encoded = codec::encode(&entry)?;

        // The buffer is empty between appends, so this is the end of the
        // last complete entry.
        let start = writer.file.get_ref().metadata()?.len();
        if let Err(e) = self.write_frame(&mut writer, &encoded) {
            if let Err(rollback) = self.rollback(&mut writer, start) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %rollback,
                    "cannot remove partial WAL entry, refusing further appends"
                );
                writer.broken = true;
            }
            return Err(e);
        }

        writer.sequence = candidate;

        Ok(candidate)
    }

    fn write_frame(&self, writer: &mut WalWriter, encoded: &[u8]) -> IoResult<()> {
        writer.file.write_all(encoded)?;
        writer.file.flush()?;
        if self.sync_on_write {
            writer.file.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Cuts the file back to `len` and discards anything still buffered.
    fn rollback(&self, writer: &mut WalWriter, len: u64) -> IoResult<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        file.set_len(len)?;
        file.sync_all()?;
        let failed = std::mem::replace(&mut writer.file, BufWriter::new(file));
        // into_parts skips the flush a plain drop would attempt.
        let _ = failed.into_parts();
        tracing::warn!(path = %self.path.display(), len, "rolled back partial WAL entry");
        Ok(())
    }

    /// Get the current sequence number.
    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(self.writer.lock().map_err(|_| poisoned())?.sequence)
    }

    /// Get the WAL file size in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Flush buffered bytes and fsync.
    pub fn sync(&self) -> IoResult<()> {
        let mut writer = self.writer.lock().map_err(|_| poisoned())?;
        writer.file.flush()?;
        writer.file.get_ref().sync_all()
    }

    /// Empty the WAL after a checkpoint.
    ///
    /// Only call this after the snapshot covering every entry is durable.
    pub fn truncate(&self) -> IoResult<()> {
        let mut writer = self.writer.lock().map_err(|_| poisoned())?;
        writer.file.flush()?;

        {
            let mut file = OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(&self.path)?;
            codec::write_header(&mut file, FileKind::Wal)?;
            file.sync_all()?;
        }

        let file = OpenOptions::new().append(true).open(&self.path)?;
        writer.file = BufWriter::new(file);
        writer.sequence = 0;
        writer.broken = false;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::graph::element::Node;
    use tempfile::tempdir;

    fn put(id: &str) -> WalEntryKind {
        WalEntryKind::Commit {
            ops: vec![GraphOp::PutNode {
                node: Arc::new(Node::new(id, "Concept")),
            }],
        }
    }

    #[test]
    fn test_wal_append_and_reopen() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("test.wal");

        {
            let (wal, entries) = WriteAheadLog::open(&wal_path, false).unwrap();
            assert!(entries.is_empty());
            wal.append(put("a")).unwrap();
            wal.append(put("b")).unwrap();
            assert_eq!(wal.current_sequence().unwrap(), 2);
        }

        let (wal, entries) = WriteAheadLog::open(&wal_path, false).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence, 1);
        assert!(matches!(entries[0].kind, WalEntryKind::Commit { .. }));
        assert_eq!(wal.current_sequence().unwrap(), 2);
    }

    #[test]
    fn test_torn_tail_is_truncated_and_appends_continue() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("torn.wal");

        {
            let (wal, _) = WriteAheadLog::open(&wal_path, true).unwrap();
            wal.append(put("a")).unwrap();
            wal.append(put("b")).unwrap();
        }

        let size = std::fs::metadata(&wal_path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&wal_path).unwrap();
        file.set_len(size - 4).unwrap();
        drop(file);

        {
            let (wal, entries) = WriteAheadLog::open(&wal_path, true).unwrap();
            assert_eq!(entries.len(), 1);
            wal.append(put("c")).unwrap();
        }

        let (_, entries) = WriteAheadLog::open(&wal_path, true).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].sequence, 2);
    }

    #[test]
    fn test_rollback_removes_partial_entry() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("partial.wal");

        {
            let (wal, _) = WriteAheadLog::open(&wal_path, true).unwrap();
            wal.append(put("a")).unwrap();

            // Half a frame reaches the disk before the write fails.
            let mut writer = wal.writer.lock().unwrap();
            let start = writer.file.get_ref().metadata().unwrap().len();
            let frame = codec::encode(&"interrupted").unwrap();
            writer.file.write_all(&frame[..frame.len() / 2]).unwrap();
            writer.file.flush().unwrap();
            wal.rollback(&mut writer, start).unwrap();
            assert_eq!(writer.file.get_ref().metadata().unwrap().len(), start);
            drop(writer);

            wal.append(put("b")).unwrap();
        }

        let (_, entries) = WriteAheadLog::open(&wal_path, true).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].sequence, 2);
    }

    #[test]
    fn test_broken_log_refuses_appends() {
        let dir = tempdir().unwrap();
        let (wal, _) = WriteAheadLog::open(&dir.path().join("broken.wal"), false).unwrap();
        wal.writer.lock().unwrap().broken = true;

        let err = wal.append(put("a")).unwrap_err();
        assert!(err.to_string().contains("partial entry"));

        wal.truncate().unwrap();
        assert_eq!(wal.append(put("a")).unwrap(), 1);
    }

    #[test]
    fn test_truncate_resets_log() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("trunc.wal");

        let (wal, _) = WriteAheadLog::open(&wal_path, false).unwrap();
        wal.append(put("a")).unwrap();
        wal.truncate().unwrap();
        assert_eq!(wal.current_sequence().unwrap(), 0);
        assert_eq!(wal.size_bytes().unwrap(), codec::HEADER_LEN);

        wal.append(put("b")).unwrap();
        drop(wal);

        let (_, entries) = WriteAheadLog::open(&wal_path, false).unwrap();
        assert_eq!(entries.len(), 1);
    }
}
