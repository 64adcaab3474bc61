//! Error types for the world model.
//!
//! All errors are strongly typed using thiserror. Callers (usually a CLI or an
//! agent runtime) match on [`WorldModelError`] to tell fatal aborts apart from
//! rejected input. Mirror failures are not errors at all: they travel as
//! [`crate::storage::ConsistencyWarning`] inside a successful result.

use std::fmt;

use thiserror::Error;

use crate::storage::StorageMode;

/// Kind of graph element an id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// An entity (graph node).
    Entity,
    /// A relationship (graph edge).
    Relationship,
    /// An annotation target, which may be either of the above.
    Element,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity => write!(f, "entity"),
            Self::Relationship => write!(f, "relationship"),
            Self::Element => write!(f, "element"),
        }
    }
}

/// Validation errors for malformed entities, relationships and annotations.
///
/// A validation failure never changes stored state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Confidence value {value} is out of range [0.0, 1.0]")]
    ConfidenceOutOfRange {
        value: f64,
    },

    #[error("Invalid {kind} id '{id}'")]
    InvalidId {
        kind: ElementKind,
        id: String,
    },

    #[error("Invalid {field} '{value}': expected a label matching [A-Za-z][A-Za-z0-9_]*")]
    InvalidLabel {
        field: &'static str,
        value: String,
    },

    #[error("Property key '{key}' is reserved for system fields")]
    ReservedPropertyKey {
        key: String,
    },

    #[error("Property key '{key}' is invalid")]
    InvalidPropertyKey {
        key: String,
    },

    #[error("Property '{key}' holds a non-finite number")]
    NonFiniteNumber {
        key: String,
    },

    #[error("Field '{field}' cannot be empty")]
    EmptyField {
        field: &'static str,
    },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: &'static str,
        max_length: usize,
    },

    #[error("{kind} id '{id}' already exists")]
    DuplicateId {
        kind: ElementKind,
        id: String,
    },

    #[error("Record '{id}' was updated before it was created")]
    InvalidTimestamps {
        id: String,
    },

    #[error("Annotation '{annotation}' targets '{target}' but is attached to '{owner}'")]
    MisplacedAnnotation {
        annotation: String,
        target: String,
        owner: String,
    },
}

/// Top-level error type for world model operations.
#[derive(Debug, Error)]
pub enum WorldModelError {
    /// The backend could not be reached or opened at startup.
    #[error("Connection error: {message}")]
    Connection {
        message: String,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A referenced entity or relationship does not exist.
    #[error("Reference error: unknown {kind} '{id}'")]
    Reference {
        kind: ElementKind,
        id: String,
    },

    /// The import document was written by an incompatible schema version.
    #[error("Import schema error: document has schema version {found}, supported version is {supported}")]
    ImportSchema {
        found: u32,
        supported: u32,
    },

    /// The storage configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        message: String,
    },

    /// The storage instance was closed.
    #[error("Storage instance is closed")]
    Closed,

    #[error("Storage instance is running in {live} mode, requested {requested}")]
    ModeMismatch {
        live: StorageMode,
        requested: StorageMode,
    },

    #[error("Storage mode '{mode}' is not supported")]
    UnsupportedMode {
        mode: StorageMode,
    },

    /// The export document is malformed.
    #[error("Document error: {message}")]
    Document {
        message: String,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorldModelError {
    /// Creates a storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a document error.
    #[must_use]
    pub fn document(message: impl Into<String>) -> Self {
        Self::Document {
            message: message.into(),
        }
    }

    /// Creates a reference error for a missing entity.
    #[must_use]
    pub fn missing_entity(id: impl Into<String>) -> Self {
        Self::Reference {
            kind: ElementKind::Entity,
            id: id.into(),
        }
    }

    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    #[must_use]
    pub const fn is_reference(&self) -> bool {
        matches!(self, Self::Reference { .. })
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns true if the caller should abort rather than fix its input.
    ///
    /// Validation and reference errors reject a single request and leave the
    /// store usable. Everything else means the instance or the document
    /// cannot be used as-is.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Validation(_) | Self::Reference { .. })
    }
}

/// Result type alias for world model operations.
pub type WorldModelResult<T> = Result<T, WorldModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_confidence() {
        let err = ValidationError::ConfidenceOutOfRange { value: 1.5 };
        let msg = format!("{err}");
        assert!(msg.contains("1.5"));
        assert!(msg.contains("out of range"));
    }

    #[test]
    fn test_reference_error_display() {
        let err = WorldModelError::missing_entity("missing");
        let msg = format!("{err}");
        assert!(msg.contains("unknown entity"));
        assert!(msg.contains("missing"));
        assert!(err.is_reference());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_import_schema_error_is_fatal() {
        let err = WorldModelError::ImportSchema {
            found: 7,
            supported: 1,
        };
        assert!(err.is_fatal());
        let msg = format!("{err}");
        assert!(msg.contains("schema version 7"));
    }

    #[test]
    fn test_from_validation() {
        let err: WorldModelError = ValidationError::EmptyField { field: "created_by" }.into();
        assert!(err.is_validation());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_closed_and_mode_mismatch() {
        assert!(WorldModelError::Closed.is_closed());
        let err = WorldModelError::ModeMismatch {
            live: StorageMode::Simple,
            requested: StorageMode::Polyglot,
        };
        let msg = format!("{err}");
        assert!(msg.contains("simple"));
        assert!(msg.contains("polyglot"));
    }
}
