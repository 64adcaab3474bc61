//! Conversion between the data model and graph elements.
//!
//! An entity becomes a node labeled by its type; a relationship becomes an
//! edge labeled by its type. User properties are flattened onto the element
//! next to the system keys below, which validation keeps users from
//! shadowing.

use chrono::{DateTime, Utc};

use crate::annotation::Annotation;
use crate::confidence::Confidence;
use crate::entity::{Entity, EntityId};
use crate::error::{WorldModelError, WorldModelResult};
use crate::graph::{Edge, Node};
use crate::query::EntityFilter;
use crate::relationship::{Relationship, RelationshipId};
use crate::value::{Properties, Value};

pub(crate) const CONFIDENCE: &str = "confidence";
pub(crate) const PROJECT: &str = "project";
pub(crate) const CREATED_AT: &str = "created_at";
pub(crate) const UPDATED_AT: &str = "updated_at";
pub(crate) const CREATED_BY: &str = "created_by";
pub(crate) const VERIFIED: &str = "verified";
pub(crate) const ANNOTATIONS: &str = "annotations";

fn annotations_value(annotations: &[Annotation]) -> WorldModelResult<Value> {
    serde_json::to_value(annotations)
        .map(Value::Structured)
        .map_err(|e| WorldModelError::storage(format!("failed to encode annotations: {e}")))
}

pub(crate) fn entity_to_node(entity: &Entity) -> WorldModelResult<Node> {
    let mut properties = entity.properties.clone();
    properties.insert(CONFIDENCE.into(), Value::Float(entity.confidence.value()));
    if let Some(project) = &entity.project {
        properties.insert(PROJECT.into(), Value::String(project.clone()));
    }
    properties.insert(CREATED_AT.into(), Value::Timestamp(entity.created_at));
    properties.insert(UPDATED_AT.into(), Value::Timestamp(entity.updated_at));
    properties.insert(CREATED_BY.into(), Value::String(entity.created_by.clone()));
    properties.insert(VERIFIED.into(), Value::Bool(entity.verified));
    if !entity.annotations.is_empty() {
        properties.insert(ANNOTATIONS.into(), annotations_value(&entity.annotations)?);
    }

    Ok(Node {
        id: entity.id.to_string(),
        label: entity.entity_type.clone(),
        properties,
    })
}

pub(crate) fn relationship_to_edge(relationship: &Relationship) -> WorldModelResult<Edge> {
    let mut properties = relationship.properties.clone();
    properties.insert(
        CONFIDENCE.into(),
        Value::Float(relationship.confidence.value()),
    );
    properties.insert(CREATED_AT.into(), Value::Timestamp(relationship.created_at));
    properties.insert(
        CREATED_BY.into(),
        Value::String(relationship.created_by.clone()),
    );
    if !relationship.annotations.is_empty() {
        properties.insert(
            ANNOTATIONS.into(),
            annotations_value(&relationship.annotations)?,
        );
    }

    Ok(Edge {
        id: relationship.id.to_string(),
        label: relationship.relationship_type.clone(),
        source: relationship.source_id.to_string(),
        target: relationship.target_id.to_string(),
        properties,
    })
}

/// Splits system keys out of a flattened property map.
struct SystemFields<'a> {
    element: &'a str,
    properties: Properties,
}

impl<'a> SystemFields<'a> {
    fn new(element: &'a str, properties: &Properties) -> Self {
        Self {
            element,
            properties: properties.clone(),
        }
    }

    fn malformed(&self, key: &str, expected: &str) -> WorldModelError {
        WorldModelError::storage(format!(
            "stored element '{}' has no {expected} '{key}'",
            self.element
        ))
    }

    fn timestamp(&mut self, key: &str) -> WorldModelResult<DateTime<Utc>> {
        match self.properties.remove(key) {
            Some(Value::Timestamp(ts)) => Ok(ts),
            _ => Err(self.malformed(key, "timestamp")),
        }
    }

    fn string(&mut self, key: &str) -> WorldModelResult<String> {
        match self.properties.remove(key) {
            Some(Value::String(s)) => Ok(s),
            _ => Err(self.malformed(key, "string")),
        }
    }

    fn optional_string(&mut self, key: &str) -> WorldModelResult<Option<String>> {
        match self.properties.remove(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(self.malformed(key, "string")),
        }
    }

    fn confidence(&mut self) -> WorldModelResult<Confidence> {
        match self.properties.remove(CONFIDENCE) {
            Some(Value::Float(c)) => Confidence::new(c).map_err(WorldModelError::from),
            _ => Err(self.malformed(CONFIDENCE, "float")),
        }
    }

    fn flag(&mut self, key: &str) -> WorldModelResult<bool> {
        match self.properties.remove(key) {
            None => Ok(false),
            Some(Value::Bool(b)) => Ok(b),
            Some(_) => Err(self.malformed(key, "bool")),
        }
    }

    fn annotations(&mut self) -> WorldModelResult<Vec<Annotation>> {
        match self.properties.remove(ANNOTATIONS) {
            None => Ok(Vec::new()),
            Some(Value::Structured(json)) => serde_json::from_value(json).map_err(|e| {
                WorldModelError::storage(format!(
                    "stored element '{}' has unreadable annotations: {e}",
                    self.element
                ))
            }),
            Some(_) => Err(self.malformed(ANNOTATIONS, "annotation list")),
        }
    }
}

pub(crate) fn node_to_entity(node: &Node) -> WorldModelResult<Entity> {
    let mut fields = SystemFields::new(&node.id, &node.properties);
    let confidence = fields.confidence()?;
    let project = fields.optional_string(PROJECT)?;
    let created_at = fields.timestamp(CREATED_AT)?;
    let updated_at = fields.timestamp(UPDATED_AT)?;
    let created_by = fields.string(CREATED_BY)?;
    let verified = fields.flag(VERIFIED)?;
    let annotations = fields.annotations()?;

    Ok(Entity {
        id: EntityId::from(node.id.as_str()),
        entity_type: node.label.clone(),
        properties: fields.properties,
        confidence,
        project,
        created_at,
        updated_at,
        created_by,
        verified,
        annotations,
    })
}

pub(crate) fn edge_to_relationship(edge: &Edge) -> WorldModelResult<Relationship> {
    let mut fields = SystemFields::new(&edge.id, &edge.properties);
    let confidence = fields.confidence()?;
    let created_at = fields.timestamp(CREATED_AT)?;
    let created_by = fields.string(CREATED_BY)?;
    let annotations = fields.annotations()?;

    Ok(Relationship {
        id: RelationshipId::from(edge.id.as_str()),
        source_id: EntityId::from(edge.source.as_str()),
        target_id: EntityId::from(edge.target.as_str()),
        relationship_type: edge.label.clone(),
        properties: fields.properties,
        confidence,
        created_at,
        created_by,
        annotations,
    })
}

/// Number of annotations stored on an element without decoding them.
pub(crate) fn annotation_count(properties: &Properties) -> usize {
    match properties.get(ANNOTATIONS) {
        Some(Value::Structured(serde_json::Value::Array(items))) => items.len(),
        _ => 0,
    }
}

/// Evaluates a filter directly against a stored node.
pub(crate) fn node_matches(filter: &EntityFilter, node: &Node) -> bool {
    if filter
        .entity_type
        .as_ref()
        .is_some_and(|t| *t != node.label)
    {
        return false;
    }
    let string_eq = |key: &str, expected: &Option<String>| match expected {
        None => true,
        Some(expected) => {
            matches!(node.properties.get(key), Some(Value::String(s)) if s == expected)
        }
    };
    if !string_eq(PROJECT, &filter.project) || !string_eq(CREATED_BY, &filter.created_by) {
        return false;
    }
    if let Some(min) = filter.min_confidence {
        match node.properties.get(CONFIDENCE) {
            Some(Value::Float(c)) if *c >= min => {}
            _ => return false,
        }
    }
    if let Some(verified) = filter.verified {
        let stored = matches!(node.properties.get(VERIFIED), Some(Value::Bool(true)));
        if stored != verified {
            return false;
        }
    }
    filter
        .properties
        .iter()
        .all(|(key, value)| node.properties.get(key) == Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::NewEntity;
    use crate::relationship::NewRelationship;

    fn entity() -> Entity {
        let mut entity = NewEntity::new("Paper")
            .property("title", "X")
            .property("year", 2023)
            .confidence(0.8)
            .project("sc")
            .created_by("agent")
            .into_entity(EntityId::from("e1"), Utc::now())
            .unwrap();
        entity
            .annotations
            .push(Annotation::new("e1", "curator", "looks right"));
        entity
    }

    #[test]
    fn test_entity_node_roundtrip() {
        let entity = entity();
        let node = entity_to_node(&entity).unwrap();
        assert_eq!(node.label, "Paper");
        assert_eq!(node.property("title"), Some(&Value::from("X")));
        assert_eq!(node.property(PROJECT), Some(&Value::from("sc")));
        assert_eq!(annotation_count(&node.properties), 1);

        let back = node_to_entity(&node).unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn test_relationship_edge_roundtrip() {
        let rel = NewRelationship::new("e1", "e2", "DESCRIBES")
            .property("section", "intro")
            .confidence(0.4)
            .into_relationship(RelationshipId::from("r1"), Utc::now())
            .unwrap();
        let edge = relationship_to_edge(&rel).unwrap();
        assert_eq!(edge.source, "e1");
        assert_eq!(edge.target, "e2");
        assert_eq!(edge_to_relationship(&edge).unwrap(), rel);
    }

    #[test]
    fn test_malformed_node_is_storage_error() {
        let node = Node::new("e1", "Paper");
        let err = node_to_entity(&node).unwrap_err();
        assert!(matches!(err, WorldModelError::Storage { .. }));
    }

    #[test]
    fn test_filter_matching() {
        let node = entity_to_node(&entity()).unwrap();

        assert!(node_matches(&EntityFilter::new(), &node));
        assert!(node_matches(
            &EntityFilter::new()
                .entity_type("Paper")
                .project("sc")
                .created_by("agent")
                .min_confidence(0.8)
                .verified(false)
                .property("year", 2023),
            &node
        ));
        assert!(!node_matches(&EntityFilter::new().entity_type("Concept"), &node));
        assert!(!node_matches(&EntityFilter::new().min_confidence(0.9), &node));
        assert!(!node_matches(&EntityFilter::new().verified(true), &node));
        assert!(!node_matches(&EntityFilter::new().property("year", 2024), &node));
        assert!(!node_matches(&EntityFilter::new().project("other"), &node));
    }
}
