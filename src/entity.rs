//! Entities: typed, provenance-stamped nodes of knowledge.
//!
//! An entity is anything a producer wants to remember across runs: a paper,
//! a concept, a hypothesis. Producers hand the store a [`NewEntity`] draft;
//! the store assigns the id and timestamps and returns the stored [`Entity`]
//! on read.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::annotation::Annotation;
use crate::confidence::Confidence;
use crate::error::{ElementKind, ValidationError};
use crate::validation;
use crate::value::{Properties, Value};

/// Producer recorded when a draft does not name one.
pub const UNKNOWN_PRODUCER: &str = "unknown";

/// Opaque entity identifier, unique within a storage instance.
///
/// Generated ids are random UUIDs. Callers may also supply their own ids
/// (for example a DOI-derived key); those are validated on write.
///
/// # Examples
///
/// ```
/// use worldmodel::EntityId;
///
/// let id = EntityId::generate();
/// assert_ne!(id, EntityId::generate());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates a new random entity ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parses and validates a caller-supplied id.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidId` if the id is malformed.
    pub fn parse(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = Self(id.into());
        id.validate()?;
        Ok(id)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        validation::validate_id(ElementKind::Entity, &self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A stored entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,

    /// Free-form type label, e.g. `Paper` or `Concept`.
    #[serde(rename = "type")]
    pub entity_type: String,

    #[serde(default)]
    pub properties: Properties,

    pub confidence: Confidence,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,

    #[serde(default)]
    pub verified: bool,

    /// Append-only history, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

impl Entity {
    /// Returns a property by key.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Checks every field of a complete record, including provenance.
    ///
    /// Used for records that did not come through [`NewEntity`], such as
    /// entities read from an export file.
    ///
    /// # Errors
    ///
    /// Returns the first `ValidationError` found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.id.validate()?;
        validation::validate_label("type", &self.entity_type)?;
        validation::validate_properties(&self.properties)?;
        self.confidence.validate()?;
        if let Some(project) = &self.project {
            validation::validate_name("project", project)?;
        }
        validation::validate_name("created_by", &self.created_by)?;
        if self.updated_at < self.created_at {
            return Err(ValidationError::InvalidTimestamps {
                id: self.id.to_string(),
            });
        }
        for annotation in &self.annotations {
            annotation.validate()?;
            if annotation.target_ref != self.id.as_str() {
                return Err(ValidationError::MisplacedAnnotation {
                    annotation: annotation.id.to_string(),
                    target: annotation.target_ref.clone(),
                    owner: self.id.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Draft of an entity to be added.
///
/// # Examples
///
/// ```
/// use worldmodel::NewEntity;
///
/// let draft = NewEntity::new("Paper")
///     .property("title", "X")
///     .confidence(0.9)
///     .project("superconductors")
///     .created_by("literature-agent");
/// assert!(draft.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    /// Explicit id. When `None` the store generates one.
    pub id: Option<EntityId>,
    pub entity_type: String,
    pub properties: Properties,
    pub confidence: f64,
    pub project: Option<String>,
    pub created_by: String,
    pub verified: bool,
}

impl NewEntity {
    /// Creates a draft with full confidence and an unknown producer.
    #[must_use]
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            id: None,
            entity_type: entity_type.into(),
            properties: Properties::new(),
            confidence: 1.0,
            project: None,
            created_by: UNKNOWN_PRODUCER.to_string(),
            verified: false,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties.extend(properties);
        self
    }

    #[must_use]
    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    #[must_use]
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    #[must_use]
    pub fn created_by(mut self, producer: impl Into<String>) -> Self {
        self.created_by = producer.into();
        self
    }

    #[must_use]
    pub fn verified(mut self, verified: bool) -> Self {
        self.verified = verified;
        self
    }

    /// Checks the draft.
    ///
    /// # Errors
    ///
    /// Returns the first `ValidationError` found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(id) = &self.id {
            id.validate()?;
        }
        validation::validate_label("type", &self.entity_type)?;
        validation::validate_properties(&self.properties)?;
        Confidence::new(self.confidence)?;
        if let Some(project) = &self.project {
            validation::validate_name("project", project)?;
        }
        validation::validate_name("created_by", &self.created_by)?;
        Ok(())
    }

    /// Stamps the draft into a stored entity.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` if the draft is invalid.
    pub(crate) fn into_entity(
        self,
        id: EntityId,
        now: DateTime<Utc>,
    ) -> Result<Entity, ValidationError> {
        Ok(Entity {
            id,
            entity_type: self.entity_type,
            properties: self.properties,
            confidence: Confidence::new(self.confidence)?,
            project: self.project,
            created_at: now,
            updated_at: now,
            created_by: self.created_by,
            verified: self.verified,
            annotations: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_defaults() {
        let draft = NewEntity::new("Concept");
        assert_eq!(draft.confidence, 1.0);
        assert_eq!(draft.created_by, UNKNOWN_PRODUCER);
        assert!(!draft.verified);
        assert!(draft.id.is_none());
    }

    #[test]
    fn test_draft_rejects_bad_confidence() {
        let draft = NewEntity::new("Concept").confidence(1.2);
        assert!(matches!(
            draft.validate(),
            Err(ValidationError::ConfidenceOutOfRange { .. })
        ));
    }

    #[test]
    fn test_draft_rejects_malformed_type_and_id() {
        assert!(NewEntity::new("not a label").validate().is_err());
        assert!(NewEntity::new("Paper").with_id("bad id").validate().is_err());
    }

    #[test]
    fn test_into_entity_stamps_provenance() {
        let now = Utc::now();
        let entity = NewEntity::new("Paper")
            .property("title", "X")
            .created_by("agent-1")
            .into_entity(EntityId::from("p1"), now)
            .unwrap();

        assert_eq!(entity.created_at, now);
        assert_eq!(entity.updated_at, now);
        assert_eq!(entity.created_by, "agent-1");
        assert_eq!(entity.property("title"), Some(&Value::from("X")));
        assert!(entity.validate().is_ok());
    }

    #[test]
    fn test_serialized_type_field() {
        let entity = NewEntity::new("Paper")
            .into_entity(EntityId::from("p1"), Utc::now())
            .unwrap();
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["type"], "Paper");
        assert!(json.get("annotations").is_none());
    }

    #[test]
    fn test_misplaced_annotation_rejected() {
        let mut entity = NewEntity::new("Paper")
            .into_entity(EntityId::from("p1"), Utc::now())
            .unwrap();
        entity
            .annotations
            .push(Annotation::new("p2", "curator", "wrong owner"));
        assert!(matches!(
            entity.validate(),
            Err(ValidationError::MisplacedAnnotation { .. })
        ));
    }
}
