//! Payload Validation and Normalization
//!
//! Normalizes user input (names, emails, codes) and checks request payloads
//! field by field, collecting every violation rather than stopping at the
//! first one.

mod error;
pub mod normalizer;
mod validator;

pub use error::{FieldError, ValidationError, ValidationErrors};
pub use normalizer::{Normalize, NormalizationMethod, Normalizer};
pub use validator::{Validate, ValidationConfig, ValidationResult, Validator};
