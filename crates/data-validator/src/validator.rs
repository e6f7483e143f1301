//! Field Validator

use crate::error::{ValidationError, ValidationErrors};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Accepted budget years
    pub year_range: (i32, i32),
    /// Accepted amounts
    pub amount_range: (f64, f64),
    /// Maximum length of names, labels and codes
    pub max_name_len: usize,
    /// Maximum length of comment bodies
    pub max_comment_len: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            year_range: (2000, 2100),
            amount_range: (0.0, 1e12),
            max_name_len: 200,
            max_comment_len: 5000,
        }
    }
}

/// Collects the outcome of several field checks
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Violations found so far
    pub errors: Vec<ValidationError>,
    /// Number of checks run
    pub fields_checked: usize,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one check
    pub fn check(&mut self, outcome: Result<(), ValidationError>) -> &mut Self {
        self.fields_checked += 1;
        if let Err(error) = outcome {
            self.errors.push(error);
        }
        self
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(self.errors))
        }
    }
}

/// A payload that can check itself against a [`Validator`]
pub trait Validate {
    fn validate(&self, validator: &Validator) -> Result<(), ValidationErrors>;
}

/// Field validator for request payloads
#[derive(Debug, Clone)]
pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    /// Create a new validator with given config
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Validate a single value against a range
    pub fn validate_range(
        &self,
        field: &'static str,
        value: f64,
        range: (f64, f64),
    ) -> Result<(), ValidationError> {
        if !value.is_finite() || value < range.0 || value > range.1 {
            Err(ValidationError::OutOfRange {
                field,
                value,
                min: range.0,
                max: range.1,
            })
        } else {
            Ok(())
        }
    }

    /// Non-blank text no longer than `max` characters
    pub fn validate_text(&self, field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            Err(ValidationError::Required { field })
        } else if value.chars().count() > max {
            Err(ValidationError::TooLong { field, max })
        } else {
            Ok(())
        }
    }

    /// Names, labels, suppliers, invoice numbers
    pub fn validate_name(&self, field: &'static str, value: &str) -> Result<(), ValidationError> {
        self.validate_text(field, value, self.config.max_name_len)
    }

    pub fn validate_comment(&self, field: &'static str, value: &str) -> Result<(), ValidationError> {
        self.validate_text(field, value, self.config.max_comment_len)
    }

    pub fn validate_amount(&self, field: &'static str, amount: f64) -> Result<(), ValidationError> {
        self.validate_range(field, amount, self.config.amount_range)
    }

    pub fn validate_year(&self, field: &'static str, year: i32) -> Result<(), ValidationError> {
        let (min, max) = self.config.year_range;
        self.validate_range(field, f64::from(year), (f64::from(min), f64::from(max)))
    }

    /// Minimal shape check: one `@`, a local part, a dotted domain
    pub fn validate_email(&self, field: &'static str, email: &str) -> Result<(), ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidFormat {
            field,
            reason: reason.to_string(),
        };

        if email.trim().is_empty() {
            return Err(ValidationError::Required { field });
        }
        if email.chars().any(char::is_whitespace) {
            return Err(invalid("must not contain whitespace"));
        }

        let mut parts = email.split('@');
        let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
            (Some(local), Some(domain), None) => (local, domain),
            _ => return Err(invalid("must contain exactly one '@'")),
        };

        if local.is_empty() {
            return Err(invalid("missing local part"));
        }
        if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
            return Err(invalid("invalid domain"));
        }
        Ok(())
    }

    /// `end` must not fall before `start`
    pub fn validate_period(
        &self,
        start_field: &'static str,
        start: NaiveDate,
        end_field: &'static str,
        end: NaiveDate,
    ) -> Result<(), ValidationError> {
        if end < start {
            Err(ValidationError::InvalidPeriod {
                field: end_field,
                start_field,
            })
        } else {
            Ok(())
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}
