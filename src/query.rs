//! Entity queries and graph statistics.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::error::WorldModelResult;
use crate::graph::Node;
use crate::storage::mapping;
use crate::value::{Properties, Value};

/// Conjunctive entity filter. An empty filter matches every entity.
///
/// # Examples
///
/// ```
/// use worldmodel::EntityFilter;
///
/// let filter = EntityFilter::new()
///     .entity_type("Paper")
///     .project("superconductors")
///     .min_confidence(0.5)
///     .limit(10);
/// assert_eq!(filter.limit, Some(10));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityFilter {
    pub entity_type: Option<String>,
    pub project: Option<String>,
    pub created_by: Option<String>,
    /// Inclusive lower bound.
    pub min_confidence: Option<f64>,
    pub verified: Option<bool>,
    /// Every listed property must be present with an equal value.
    pub properties: Properties,
    pub limit: Option<usize>,
}

impl EntityFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    #[must_use]
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    #[must_use]
    pub fn created_by(mut self, producer: impl Into<String>) -> Self {
        self.created_by = Some(producer.into());
        self
    }

    #[must_use]
    pub fn min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = Some(min);
        self
    }

    #[must_use]
    pub fn verified(mut self, verified: bool) -> Self {
        self.verified = Some(verified);
        self
    }

    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Result of [`query`](crate::WorldModelStorage::query).
///
/// Holds an immutable snapshot of the matching nodes taken under the read
/// lock; later writes do not change it. Entities are decoded lazily, and the
/// cursor can be iterated any number of times in the same order.
#[derive(Debug, Clone, Default)]
pub struct EntityCursor {
    nodes: Arc<[Arc<Node>]>,
}

impl EntityCursor {
    pub(crate) fn new(nodes: Vec<Arc<Node>>) -> Self {
        Self {
            nodes: nodes.into(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates the matched entities from the start.
    pub fn iter(&self) -> impl Iterator<Item = WorldModelResult<Entity>> + '_ {
        self.nodes.iter().map(|node| mapping::node_to_entity(node))
    }

    /// Decodes every entity, failing on the first undecodable node.
    ///
    /// # Errors
    /// `WorldModelError::Storage` if a stored node is malformed.
    pub fn collect_entities(&self) -> WorldModelResult<Vec<Entity>> {
        self.iter().collect()
    }
}

impl IntoIterator for EntityCursor {
    type Item = WorldModelResult<Entity>;
    type IntoIter = CursorIntoIter;

    fn into_iter(self) -> Self::IntoIter {
        CursorIntoIter {
            nodes: self.nodes,
            position: 0,
        }
    }
}

/// Owning iterator over an [`EntityCursor`].
#[derive(Debug)]
pub struct CursorIntoIter {
    nodes: Arc<[Arc<Node>]>,
    position: usize,
}

impl Iterator for CursorIntoIter {
    type Item = WorldModelResult<Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.nodes.get(self.position)?;
        self.position += 1;
        Some(mapping::node_to_entity(node))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.nodes.len() - self.position;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for CursorIntoIter {}

/// Counts over the whole graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub entity_count: usize,
    pub relationship_count: usize,
    pub entities_by_type: BTreeMap<String, usize>,
    pub relationships_by_type: BTreeMap<String, usize>,
    /// Entities without a project are not counted here.
    pub entities_by_project: BTreeMap<String, usize>,
}

impl GraphStatistics {
    /// Returns true if the graph holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entity_count == 0 && self.relationship_count == 0
    }
}
