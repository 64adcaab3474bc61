//! Embedded property-graph store.
//!
//! Nodes carry one label and a flat property map; edges are directed and
//! labeled. Ids are unique per element kind. Labels and configured string
//! properties are indexed. Writes go through [`GraphDatabase::transact`],
//! which commits all staged changes or none.
//!
//! A graph lives either in memory or in a directory, where it is made
//! durable by a write-ahead log and a periodically compacted snapshot.

mod database;
mod element;
pub mod persistent;

pub use database::{GraphDatabase, GraphLocation, GraphOptions, GraphState, GraphTxn};
pub use element::{Edge, GraphOp, Node};

use thiserror::Error;

use crate::error::{ElementKind, ValidationError, WorldModelError};

/// Errors raised by the graph store.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph database is closed")]
    Closed,

    #[error("node '{id}' already exists")]
    DuplicateNode { id: String },

    #[error("edge '{id}' already exists")]
    DuplicateEdge { id: String },

    #[error("edge '{edge}' references unknown node '{node}'")]
    MissingEndpoint { edge: String, node: String },

    /// Another holder owns the graph directory.
    #[error("{0}")]
    Locked(String),

    #[error("authentication failed: credentials do not match this graph")]
    AuthFailed,

    /// A WAL entry, snapshot or auth file failed validation.
    #[error("graph data corrupted: {0}")]
    Corrupted(String),

    #[error("poisoned lock: {0}")]
    Poisoned(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<GraphError> for WorldModelError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Closed => Self::Closed,
            GraphError::DuplicateNode { id } => ValidationError::DuplicateId {
                kind: ElementKind::Entity,
                id,
            }
            .into(),
            GraphError::DuplicateEdge { id } => ValidationError::DuplicateId {
                kind: ElementKind::Relationship,
                id,
            }
            .into(),
            GraphError::MissingEndpoint { node, .. } => Self::missing_entity(node),
            GraphError::Locked(message) => Self::Connection { message },
            err @ GraphError::AuthFailed => Self::Connection {
                message: err.to_string(),
            },
            other => Self::storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let err: WorldModelError = GraphError::Closed.into();
        assert!(err.is_closed());

        let err: WorldModelError = GraphError::MissingEndpoint {
            edge: "r1".into(),
            node: "ghost".into(),
        }
        .into();
        assert!(err.is_reference());

        let err: WorldModelError = GraphError::DuplicateEdge { id: "r1".into() }.into();
        assert!(err.is_validation());

        let err: WorldModelError = GraphError::AuthFailed.into();
        assert!(matches!(err, WorldModelError::Connection { .. }));

        let err: WorldModelError = GraphError::Corrupted("bad crc".into()).into();
        assert!(matches!(err, WorldModelError::Storage { .. }));
    }
}
