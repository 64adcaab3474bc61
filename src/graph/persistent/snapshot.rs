//! Checkpointed graph state.
//!
//! A snapshot holds every node and edge as of one WAL sequence. It is
//! immutable once written; compaction replaces it wholesale.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [framed SnapshotHeader]
//! [framed Node] x node_count
//! [framed Edge] x edge_count
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph::element::{Edge, Node};

use super::codec::{self, FileKind};

/// Name of the snapshot file inside a graph directory.
pub const SNAPSHOT_FILE: &str = "graph.snapshot";

const TEMP_MARKER: &str = "snapshot.tmp";

/// Snapshot file header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Generation counter, bumped by every compaction.
    pub generation: u64,
    pub node_count: u64,
    pub edge_count: u64,
    pub created_at: DateTime<Utc>,
}

/// Contents of a snapshot file.
#[derive(Debug)]
pub struct SnapshotData {
    pub header: SnapshotHeader,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// Reads the snapshot in `dir`, if there is one.
///
/// Stale temp files from an interrupted compaction are removed.
pub fn load(dir: &Path) -> IoResult<Option<SnapshotData>> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let stale = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains(TEMP_MARKER));
        if stale {
            tracing::debug!(path = %path.display(), "removing stale snapshot temp file");
            let _ = fs::remove_file(&path);
        }
    }

    let path = dir.join(SNAPSHOT_FILE);
    if !path.exists() {
        return Ok(None);
    }

    let file = File::open(&path)?;
    let mut reader = BufReader::new(file);
    codec::read_header(&mut reader, FileKind::Snapshot)?;
    let (header, _): (SnapshotHeader, u64) = codec::decode(&mut reader)?;

    let mut nodes = Vec::with_capacity(usize::try_from(header.node_count).unwrap_or(0));
    for _ in 0..header.node_count {
        let (node, _) = codec::decode(&mut reader).map_err(truncated)?;
        nodes.push(node);
    }

    let mut edges = Vec::with_capacity(usize::try_from(header.edge_count).unwrap_or(0));
    for _ in 0..header.edge_count {
        let (edge, _) = codec::decode(&mut reader).map_err(truncated)?;
        edges.push(edge);
    }

    Ok(Some(SnapshotData {
        header,
        nodes,
        edges,
    }))
}

// A snapshot is renamed into place only when complete, so a short read is
// corruption, never a torn write.
fn truncated(e: IoError) -> IoError {
    if e.kind() == ErrorKind::UnexpectedEof {
        IoError::new(ErrorKind::InvalidData, "snapshot is truncated")
    } else {
        e
    }
}

/// Builder for snapshot files.
///
/// Uses write-to-temp-then-rename for crash safety.
pub struct SnapshotWriter {
    temp_path: Option<PathBuf>,
    final_path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl SnapshotWriter {
    /// Starts a snapshot for `dir`.
    pub fn new(dir: &Path, header: &SnapshotHeader) -> IoResult<Self> {
        let final_path = dir.join(SNAPSHOT_FILE);
        let temp_path = dir.join(format!("graph.{TEMP_MARKER}.{}", Uuid::new_v4()));

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        let mut writer = BufWriter::new(file);
        codec::write_header(&mut writer, FileKind::Snapshot)?;
        writer.write_all(&codec::encode(header)?)?;

        Ok(Self {
            temp_path: Some(temp_path),
            final_path,
            writer: Some(writer),
        })
    }

    fn writer(&mut self) -> IoResult<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| IoError::new(ErrorKind::Other, "writer already consumed"))
    }

    pub fn write_node(&mut self, node: &Node) -> IoResult<()> {
        let bytes = codec::encode(node)?;
        self.writer()?.write_all(&bytes)
    }

    pub fn write_edge(&mut self, edge: &Edge) -> IoResult<()> {
        let bytes = codec::encode(edge)?;
        self.writer()?.write_all(&bytes)
    }

    /// Flush, fsync and rename into place.
    ///
    /// This is the commit point: after it returns the snapshot is durable.
    pub fn finalize(mut self) -> IoResult<()> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| IoError::new(ErrorKind::Other, "writer already consumed"))?;
        let temp_path = self
            .temp_path
            .take()
            .ok_or_else(|| IoError::new(ErrorKind::Other, "temp_path already consumed"))?;

        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        fs::rename(&temp_path, &self.final_path)?;
        Ok(())
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        // Best-effort cleanup if not finalized
        self.writer.take();
        if let Some(ref temp_path) = self.temp_path {
            let _ = fs::remove_file(temp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use tempfile::tempdir;

    fn header(nodes: u64, edges: u64) -> SnapshotHeader {
        SnapshotHeader {
            generation: 1,
            node_count: nodes,
            edge_count: edges,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_write_and_load() {
        let dir = tempdir().unwrap();

        let mut a = Node::new("a", "Paper");
        a.properties.insert("title".into(), Value::from("X"));
        let b = Node::new("b", "Concept");
        let edge = Edge::new("r1", "DESCRIBES", "a", "b");

        let mut writer = SnapshotWriter::new(dir.path(), &header(2, 1)).unwrap();
        writer.write_node(&a).unwrap();
        writer.write_node(&b).unwrap();
        writer.write_edge(&edge).unwrap();
        writer.finalize().unwrap();

        let data = load(dir.path()).unwrap().unwrap();
        assert_eq!(data.nodes, vec![a, b]);
        assert_eq!(data.edges, vec![edge]);
        assert_eq!(data.header.generation, 1);
    }

    #[test]
    fn test_abandoned_writer_leaves_nothing() {
        let dir = tempdir().unwrap();
        {
            let mut writer = SnapshotWriter::new(dir.path(), &header(1, 0)).unwrap();
            writer.write_node(&Node::new("a", "Paper")).unwrap();
        }
        assert!(load(dir.path()).unwrap().is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_truncated_snapshot_is_invalid_data() {
        let dir = tempdir().unwrap();
        let writer = SnapshotWriter::new(dir.path(), &header(3, 0)).unwrap();
        writer.finalize().unwrap();

        let err = load(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
