//! Input Normalization

use serde::{Deserialize, Serialize};

/// Normalization method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalizationMethod {
    /// Trim and collapse inner whitespace
    Name,
    /// Trim only; line breaks and inner spacing are kept
    Text,
    /// Trim and lower-case
    Email,
    /// Trim, upper-case, inner whitespace replaced by '-'
    Code,
    /// No normalization
    None,
}

/// A payload that cleans up its own fields before validation
pub trait Normalize {
    fn normalize(self) -> Self;
}

/// Applies a [`NormalizationMethod`] to user input before validation
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    method: NormalizationMethod,
}

impl Normalizer {
    pub fn new(method: NormalizationMethod) -> Self {
        Self { method }
    }

    pub fn normalize(&self, value: &str) -> String {
        match self.method {
            NormalizationMethod::Name => collapse_whitespace(value, " "),
            NormalizationMethod::Text => value.trim().to_string(),
            NormalizationMethod::Email => value.trim().to_lowercase(),
            NormalizationMethod::Code => collapse_whitespace(value, "-").to_uppercase(),
            NormalizationMethod::None => value.to_string(),
        }
    }

    /// Normalize an optional value; blank input becomes `None`
    pub fn normalize_optional(&self, value: Option<&str>) -> Option<String> {
        value
            .map(|v| self.normalize(v))
            .filter(|v| !v.trim().is_empty())
    }
}

/// Shorthand for [`NormalizationMethod::Name`]
pub fn name(value: &str) -> String {
    Normalizer::new(NormalizationMethod::Name).normalize(value)
}

/// Shorthand for [`NormalizationMethod::Text`]
pub fn text(value: &str) -> String {
    Normalizer::new(NormalizationMethod::Text).normalize(value)
}

/// Shorthand for [`NormalizationMethod::Email`]
pub fn email(value: &str) -> String {
    Normalizer::new(NormalizationMethod::Email).normalize(value)
}

/// Shorthand for [`NormalizationMethod::Code`]
pub fn code(value: &str) -> String {
    Normalizer::new(NormalizationMethod::Code).normalize(value)
}

fn collapse_whitespace(value: &str, separator: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(separator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name() {
        assert_eq!(name("  Direction   des  Finances "), "Direction des Finances");
    }

    #[test]
    fn test_email() {
        assert_eq!(email(" Jane.Doe@Mairie.FR "), "jane.doe@mairie.fr");
    }

    #[test]
    fn test_code() {
        assert_eq!(code(" dsi  infra "), "DSI-INFRA");
    }

    #[test]
    fn test_text_keeps_line_breaks() {
        assert_eq!(text("\n  Renouvellement\n\nvoir  annexe  "), "Renouvellement\n\nvoir  annexe");
    }

    #[test]
    fn test_optional_blank_is_none() {
        let normalizer = Normalizer::new(NormalizationMethod::Name);
        assert_eq!(normalizer.normalize_optional(Some("   ")), None);
        assert_eq!(normalizer.normalize_optional(None), None);
        assert_eq!(
            normalizer.normalize_optional(Some(" note ")),
            Some("note".to_string())
        );
    }
}
