//! Nodes, edges and the operations that change them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::value::{Properties, Value};

/// A labeled node with flat properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub properties: Properties,
}

impl Node {
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            properties: Properties::new(),
        }
    }

    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// A directed, labeled edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub label: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub properties: Properties,
}

impl Edge {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            source: source.into(),
            target: target.into(),
            properties: Properties::new(),
        }
    }

    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// A single state change, as committed and as written to the log.
///
/// Every operation assigns state (upsert or wipe), so replaying a prefix of
/// the log twice lands on the same graph as replaying it once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GraphOp {
    PutNode { node: Arc<Node> },
    PutEdge { edge: Arc<Edge> },
    Clear,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_serialization_is_tagged() {
        let op = GraphOp::PutNode {
            node: Arc::new(Node::new("n1", "Paper")),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "put_node");
        assert_eq!(json["node"]["label"], "Paper");

        let clear = serde_json::to_string(&GraphOp::Clear).unwrap();
        let back: GraphOp = serde_json::from_str(&clear).unwrap();
        assert_eq!(back, GraphOp::Clear);
    }
}
