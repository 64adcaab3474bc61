//! Append-only annotations.
//!
//! Annotations are how the world model records history: curation notes,
//! verification, and the prior state of an overwritten entity all become
//! annotations instead of destructive edits.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ElementKind, ValidationError};
use crate::validation;

/// Unique annotation identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationId(Uuid);

impl AnnotationId {
    /// Creates a new random annotation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AnnotationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A note attached to an entity or relationship. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,

    /// Id of the annotated entity or relationship.
    pub target_ref: String,

    pub author: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Annotation {
    /// Creates an annotation stamped with the current time.
    #[must_use]
    pub fn new(
        target_ref: impl Into<String>,
        author: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: AnnotationId::new(),
            target_ref: target_ref.into(),
            author: author.into(),
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    /// Checks the annotation's fields.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for an empty author or text or a malformed
    /// target reference.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate_id(ElementKind::Element, &self.target_ref)?;
        validation::validate_name("author", &self.author)?;
        validation::validate_text("text", &self.text)?;
        Ok(())
    }
}

/// Appends `annotation` unless one with the same id is already present.
/// Returns true if it was appended.
pub(crate) fn append_unique(annotations: &mut Vec<Annotation>, annotation: Annotation) -> bool {
    if annotations.iter().any(|a| a.id == annotation.id) {
        return false;
    }
    annotations.push(annotation);
    true
}
