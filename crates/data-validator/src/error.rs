//! Validation Error Types

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A single rule violation on one field
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Missing or blank value
    #[error("{field} is required")]
    Required { field: &'static str },

    /// Text longer than allowed
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },

    /// Value out of allowed range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Invalid data format
    #[error("{field}: {reason}")]
    InvalidFormat { field: &'static str, reason: String },

    /// End of a period before its start
    #[error("{field} must not be before {start_field}")]
    InvalidPeriod {
        field: &'static str,
        start_field: &'static str,
    },
}

impl ValidationError {
    /// Name of the offending field
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::Required { field }
            | ValidationError::TooLong { field, .. }
            | ValidationError::OutOfRange { field, .. }
            | ValidationError::InvalidFormat { field, .. }
            | ValidationError::InvalidPeriod { field, .. } => *field,
        }
    }
}

/// Wire form of a field error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<&ValidationError> for FieldError {
    fn from(error: &ValidationError) -> Self {
        FieldError::new(error.field(), error.to_string())
    }
}

/// Every violation found in one payload
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn field_errors(&self) -> Vec<FieldError> {
        self.0.iter().map(FieldError::from).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

impl From<ValidationError> for ValidationErrors {
    fn from(error: ValidationError) -> Self {
        ValidationErrors(vec![error])
    }
}
