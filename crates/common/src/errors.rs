//! Error types shared across certkeeper crates
//!
//! Component-specific errors live next to their components. This module
//! holds the pieces every layer needs to agree on: the structured
//! validation error list returned to callers, and the coarse error class
//! used to decide how a failure is reported.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// The coarse class of a failure, used for reporting and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input shape, length, format or duplicate; no side effect happened
    Validation,
    /// The caller lacks a capability bit
    Authorization,
    /// Name or domain already in use
    Conflict,
    /// Referenced record does not exist
    NotFound,
    /// Certificate issuance failed upstream (DNS provider or authority)
    Issuance,
    /// Store unavailable; the caller may retry
    Storage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Authorization => write!(f, "authorization"),
            Self::Conflict => write!(f, "conflict"),
            Self::NotFound => write!(f, "not_found"),
            Self::Issuance => write!(f, "issuance"),
            Self::Storage => write!(f, "storage"),
        }
    }
}

// ============================================================================
// Validation errors
// ============================================================================

/// What was wrong with a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldErrorKind {
    InvalidField,
    TooFewDomains,
    TooManyDomains,
    InvalidDomain,
    InvalidProfile,
}

/// A single (field, message) pair reported to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub kind: FieldErrorKind,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, kind: FieldErrorKind, message: impl Into<String>) -> Self {
        Self {
            field,
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_field(field: &'static str, message: impl Into<String>) -> Self {
        Self::new(field, FieldErrorKind::InvalidField, message)
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every problem found in one request.
///
/// Validation never short-circuits, so this holds all field errors at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Error)]
#[serde(transparent)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: FieldError) {
        self.errors.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.errors.iter()
    }

    /// Whether any error of the given kind was recorded
    pub fn contains(&self, kind: FieldErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }

    /// `Ok(value)` when nothing was recorded, otherwise `Err(self)`
    pub fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request validation failed")?;
        for (i, error) in self.errors.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}", sep, error)?;
        }
        Ok(())
    }
}

impl From<FieldError> for ValidationErrors {
    fn from(error: FieldError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl IntoIterator for ValidationErrors {
    type Item = FieldError;
    type IntoIter = std::vec::IntoIter<FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_collect_and_display() {
        let mut errors = ValidationErrors::new();
        assert!(errors.clone().into_result(()).is_ok());

        errors.push(FieldError::invalid_field("name", "Invalid name provided"));
        errors.push(FieldError::new(
            "domains",
            FieldErrorKind::TooManyDomains,
            "Too many domains provided",
        ));

        assert_eq!(errors.len(), 2);
        assert!(errors.contains(FieldErrorKind::TooManyDomains));
        assert!(!errors.contains(FieldErrorKind::InvalidDomain));

        let rendered = errors.to_string();
        assert!(rendered.contains("name: Invalid name provided"));
        assert!(rendered.contains("domains: Too many domains provided"));
    }

    #[test]
    fn test_validation_errors_serialize_as_list() {
        let errors = ValidationErrors::from(FieldError::new(
            "dns-profile",
            FieldErrorKind::InvalidProfile,
            "Invalid DNS Profile provided",
        ));
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json[0]["field"], "dns-profile");
        assert_eq!(json[0]["kind"], "invalid_profile");
    }
}
