//! Relationships: typed, directed, provenance-stamped edges between entities.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::annotation::Annotation;
use crate::confidence::Confidence;
use crate::entity::{EntityId, UNKNOWN_PRODUCER};
use crate::error::{ElementKind, ValidationError};
use crate::validation;
use crate::value::{Properties, Value};

/// Opaque relationship identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationshipId(String);

impl RelationshipId {
    /// Creates a new random relationship ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        validation::validate_id(ElementKind::Relationship, &self.0)
    }
}

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RelationshipId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RelationshipId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for RelationshipId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Which edges of an entity to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// A stored relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub source_id: EntityId,
    pub target_id: EntityId,

    /// Edge label, e.g. `CITES` or `SUPPORTS`.
    #[serde(rename = "type")]
    pub relationship_type: String,

    #[serde(default)]
    pub properties: Properties,

    pub confidence: Confidence,
    pub created_at: DateTime<Utc>,
    pub created_by: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

impl Relationship {
    /// Checks every field of a complete record.
    ///
    /// Endpoint existence is not checked here; that needs the store.
    ///
    /// # Errors
    ///
    /// Returns the first `ValidationError` found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.id.validate()?;
        self.source_id.validate()?;
        self.target_id.validate()?;
        validation::validate_label("relationship type", &self.relationship_type)?;
        validation::validate_properties(&self.properties)?;
        self.confidence.validate()?;
        validation::validate_name("created_by", &self.created_by)?;
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

/// Draft of a relationship to be added.
///
/// # Examples
///
/// ```
/// use worldmodel::{EntityId, NewRelationship};
///
/// let draft = NewRelationship::new(EntityId::from("e1"), EntityId::from("e2"), "DESCRIBES")
///     .confidence(0.8)
///     .created_by("reader-agent");
/// assert!(draft.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NewRelationship {
    pub id: Option<RelationshipId>,
    pub source_id: EntityId,
    pub target_id: EntityId,
    pub relationship_type: String,
    pub properties: Properties,
    pub confidence: f64,
    pub created_by: String,
}

impl NewRelationship {
    #[must_use]
    pub fn new(
        source_id: impl Into<EntityId>,
        target_id: impl Into<EntityId>,
        relationship_type: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            source_id: source_id.into(),
            target_id: target_id.into(),
            relationship_type: relationship_type.into(),
            properties: Properties::new(),
            confidence: 1.0,
            created_by: UNKNOWN_PRODUCER.to_string(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<RelationshipId>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    #[must_use]
    pub fn created_by(mut self, producer: impl Into<String>) -> Self {
        self.created_by = producer.into();
        self
    }

    /// Checks the draft's own fields.
    ///
    /// # Errors
    ///
    /// Returns the first `ValidationError` found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(id) = &self.id {
            id.validate()?;
        }
        self.source_id.validate()?;
        self.target_id.validate()?;
        validation::validate_label("relationship type", &self.relationship_type)?;
        validation::validate_properties(&self.properties)?;
        Confidence::new(self.confidence)?;
        validation::validate_name("created_by", &self.created_by)?;
        Ok(())
    }

    pub(crate) fn into_relationship(
        self,
        id: RelationshipId,
        now: DateTime<Utc>,
    ) -> Result<Relationship, ValidationError> {
        Ok(Relationship {
            id,
            source_id: self.source_id,
            target_id: self.target_id,
            relationship_type: self.relationship_type,
            properties: self.properties,
            confidence: Confidence::new(self.confidence)?,
            created_at: now,
            created_by: self.created_by,
            annotations: Vec::new(),
        })
    }
}
