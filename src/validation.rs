//! Field validation shared by drafts and imported records.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{ElementKind, ValidationError};
use crate::value::Properties;

/// Keys used for system fields once an element is flattened onto a graph
/// node or edge. User properties may not shadow them.
pub const RESERVED_KEYS: &[&str] = &[
    "id",
    "type",
    "confidence",
    "project",
    "created_at",
    "updated_at",
    "created_by",
    "verified",
    "annotations",
    "source_id",
    "target_id",
];

const MAX_ID_LENGTH: usize = 128;
const MAX_LABEL_LENGTH: usize = 64;
const MAX_KEY_LENGTH: usize = 128;
const MAX_NAME_LENGTH: usize = 256;

static PATTERNS: OnceLock<Patterns> = OnceLock::new();

struct Patterns {
    id: Regex,
    label: Regex,
}

fn patterns() -> &'static Patterns {
    PATTERNS.get_or_init(|| Patterns {
        id: Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:\-]*$").expect("id regex must compile"),
        label: Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("label regex must compile"),
    })
}

pub fn validate_id(kind: ElementKind, id: &str) -> Result<(), ValidationError> {
    if id.len() > MAX_ID_LENGTH || !patterns().id.is_match(id) {
        return Err(ValidationError::InvalidId {
            kind,
            id: id.to_string(),
        });
    }
    Ok(())
}

pub fn validate_label(field: &'static str, label: &str) -> Result<(), ValidationError> {
    if label.len() > MAX_LABEL_LENGTH || !patterns().label.is_match(label) {
        return Err(ValidationError::InvalidLabel {
            field,
            value: label.to_string(),
        });
    }
    Ok(())
}

pub fn validate_properties(properties: &Properties) -> Result<(), ValidationError> {
    for (key, value) in properties {
        if key.trim().is_empty() || key.len() > MAX_KEY_LENGTH {
            return Err(ValidationError::InvalidPropertyKey { key: key.clone() });
        }
        if RESERVED_KEYS.contains(&key.as_str()) {
            return Err(ValidationError::ReservedPropertyKey { key: key.clone() });
        }
        if !value.is_finite() {
            return Err(ValidationError::NonFiniteNumber { key: key.clone() });
        }
    }
    Ok(())
}

/// Validates a producer, author or namespace name.
pub fn validate_name(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField { field });
    }
    if value.len() > MAX_NAME_LENGTH {
        return Err(ValidationError::FieldTooLong {
            field,
            max_length: MAX_NAME_LENGTH,
        });
    }
    Ok(())
}

pub fn validate_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField { field });
    }
    Ok(())
}
