//! Confidence scores attached to entities and relationships.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A confidence score in `[0.0, 1.0]`.
///
/// Serialized as a bare number. Deserialization does not validate; records
/// read from an export file are checked with [`Confidence::validate`] before
/// they reach the store.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Confidence(f64);

impl Confidence {
    /// Full confidence, the default for new records.
    pub const CERTAIN: Self = Self(1.0);

    /// Creates a validated confidence score.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ConfidenceOutOfRange` if the value is not in
    /// `[0.0, 1.0]` (NaN included).
    pub fn new(value: f64) -> Result<Self, ValidationError> {
        let confidence = Self(value);
        confidence.validate()?;
        Ok(confidence)
    }

    /// Checks the range invariant.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ConfidenceOutOfRange` when out of range.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if (0.0..=1.0).contains(&self.0) {
            Ok(())
        } else {
            Err(ValidationError::ConfidenceOutOfRange { value: self.0 })
        }
    }

    #[must_use]
    pub const fn value(&self) -> f64 {
        self.0
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self::CERTAIN
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

impl From<Confidence> for f64 {
    fn from(c: Confidence) -> Self {
        c.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_are_inclusive() {
        assert!(Confidence::new(0.0).is_ok());
        assert!(Confidence::new(1.0).is_ok());
        assert_eq!(Confidence::new(0.25).unwrap().value(), 0.25);
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(matches!(
            Confidence::new(1.01),
            Err(ValidationError::ConfidenceOutOfRange { .. })
        ));
        assert!(Confidence::new(-0.1).is_err());
        assert!(Confidence::new(f64::NAN).is_err());
    }

    #[test]
    fn test_serializes_as_number() {
        let json = serde_json::to_string(&Confidence::new(0.5).unwrap()).unwrap();
        assert_eq!(json, "0.5");

        // Deserialization is lenient; validation happens on import.
        let raw: Confidence = serde_json::from_str("3.0").unwrap();
        assert!(raw.validate().is_err());
    }
}
