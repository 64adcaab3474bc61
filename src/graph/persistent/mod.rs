//! Durable backing for the graph store.
//!
//! # Architecture
//! - **WAL**: every commit is appended and fsynced before it is applied
//! - **Snapshot**: checkpointed full graph, replaced by compaction
//! - **Lock**: exclusive advisory lock on the directory
//! - **Auth**: optional blake3 digest of the credentials the graph was
//!   created with
//!
//! # Recovery
//! On open the snapshot is loaded and the WAL is replayed on top of it. Every
//! logged operation assigns state, so replaying entries already covered by
//! the snapshot is harmless.

pub mod codec;
pub mod file_lock;
pub mod snapshot;
pub mod wal;

use std::fs;
use std::io::{ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};

use chrono::Utc;

use self::file_lock::DirectoryLock;
use self::snapshot::{SnapshotHeader, SnapshotWriter};
use self::wal::{WalEntryKind, WriteAheadLog};
use super::element::{Edge, GraphOp, Node};
use super::GraphError;

/// Name of the WAL file inside a graph directory.
pub const WAL_FILE: &str = "graph.wal";

/// Name of the credential digest file inside a graph directory.
pub const AUTH_FILE: &str = "graph.auth";

/// Everything read back from disk on open, ready to be applied in order.
#[derive(Debug, Default)]
pub struct Recovered {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub ops: Vec<GraphOp>,
}

/// Open WAL, lock and snapshot generation for one graph directory.
pub struct Durability {
    dir: PathBuf,
    wal: WriteAheadLog,
    generation: u64,
    max_wal_size: u64,
    _lock: DirectoryLock,
}

impl Durability {
    /// Opens `dir`, creating it if needed, and recovers its contents.
    ///
    /// # Errors
    /// - `GraphError::Locked` if another holder owns the directory
    /// - `GraphError::AuthFailed` if the credentials don't match
    /// - `GraphError::Corrupted` if the WAL or snapshot fails its checksum
    pub fn open(
        dir: &Path,
        credentials: Option<(&str, &str)>,
        sync_on_write: bool,
        max_wal_size: u64,
    ) -> Result<(Self, Recovered), GraphError> {
        fs::create_dir_all(dir)?;

        let lock = DirectoryLock::acquire(dir).map_err(|e| {
            if e.kind() == ErrorKind::WouldBlock {
                GraphError::Locked(e.to_string())
            } else {
                GraphError::Io(e)
            }
        })?;

        check_credentials(dir, credentials)?;

        let snapshot = snapshot::load(dir).map_err(corruption)?;
        let (wal, entries) = WriteAheadLog::open(&dir.join(WAL_FILE), sync_on_write)
            .map_err(corruption)?;

        let mut recovered = Recovered::default();
        let mut generation = 0;
        if let Some(data) = snapshot {
            generation = data.header.generation;
            recovered.nodes = data.nodes;
            recovered.edges = data.edges;
        }
        let replayed = entries.len();
        for entry in entries {
            if let WalEntryKind::Commit { ops } = entry.kind {
                recovered.ops.extend(ops);
            }
        }

        tracing::info!(
            dir = %dir.display(),
            generation,
            snapshot_nodes = recovered.nodes.len(),
            snapshot_edges = recovered.edges.len(),
            wal_entries = replayed,
            "graph directory opened"
        );

        Ok((
            Self {
                dir: dir.to_path_buf(),
                wal,
                generation,
                max_wal_size,
                _lock: lock,
            },
            recovered,
        ))
    }

    /// Appends one committed transaction to the WAL.
    pub fn log(&self, ops: &[GraphOp]) -> IoResult<u64> {
        self.wal.append(WalEntryKind::Commit { ops: ops.to_vec() })
    }

    /// Returns true once the WAL has outgrown its configured limit.
    pub fn should_compact(&self) -> bool {
        self.wal
            .size_bytes()
            .map_or(false, |size| size > self.max_wal_size)
    }

    /// Writes a fresh snapshot of the given state and empties the WAL.
    pub fn compact<'a>(
        &mut self,
        nodes: impl ExactSizeIterator<Item = &'a Node>,
        edges: impl ExactSizeIterator<Item = &'a Edge>,
    ) -> IoResult<()> {
        let sequence = self.wal.current_sequence()?;
        let header = SnapshotHeader {
            generation: self.generation + 1,
            node_count: nodes.len() as u64,
            edge_count: edges.len() as u64,
            created_at: Utc::now(),
        };

        let mut writer = SnapshotWriter::new(&self.dir, &header)?;
        for node in nodes {
            writer.write_node(node)?;
        }
        for edge in edges {
            writer.write_edge(edge)?;
        }
        writer.finalize()?;

        self.wal.truncate()?;
        self.generation = header.generation;

        tracing::info!(
            dir = %self.dir.display(),
            generation = self.generation,
            nodes = header.node_count,
            edges = header.edge_count,
            up_to_sequence = sequence,
            "graph compacted"
        );
        Ok(())
    }

    /// Forces buffered WAL bytes to disk.
    pub fn sync(&self) -> IoResult<()> {
        self.wal.sync()
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn corruption(e: std::io::Error) -> GraphError {
    if e.kind() == ErrorKind::InvalidData {
        GraphError::Corrupted(e.to_string())
    } else {
        GraphError::Io(e)
    }
}

fn credential_digest(user: &str, password: &str) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(user.as_bytes());
    hasher.update(&[0]);
    hasher.update(password.as_bytes());
    hasher.finalize()
}

/// A directory created with credentials only opens with the same ones. The
/// first open with credentials records them.
fn check_credentials(dir: &Path, credentials: Option<(&str, &str)>) -> Result<(), GraphError> {
    let path = dir.join(AUTH_FILE);
    let stored = match fs::read_to_string(&path) {
        Ok(contents) => Some(
            blake3::Hash::from_hex(contents.trim())
                .map_err(|e| GraphError::Corrupted(format!("{AUTH_FILE}: {e}")))?,
        ),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(GraphError::Io(e)),
    };

    match (stored, credentials) {
        (Some(expected), Some((user, password))) => {
            // blake3::Hash compares in constant time
            if credential_digest(user, password) == expected {
                Ok(())
            } else {
                Err(GraphError::AuthFailed)
            }
        }
        (Some(_), None) => Err(GraphError::AuthFailed),
        (None, Some((user, password))) => {
            fs::write(&path, credential_digest(user, password).to_hex().as_str())?;
            Ok(())
        }
        (None, None) => Ok(()),
    }
}
