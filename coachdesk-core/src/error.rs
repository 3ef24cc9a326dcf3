//! Error types for CoachDesk operations

use crate::EntityType;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine-readable reason a single field failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum FieldErrorCode {
    Required,
    TooShort,
    TooLong,
    OutOfRange,
    InvalidFormat,
    InvalidOption,
}

/// A validation failure addressed to one input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct FieldError {
    pub field: String,
    pub code: FieldErrorCode,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, code: FieldErrorCode, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for FieldError {}

/// Non-empty collection of field errors produced by one validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: FieldError) {
        self.0.push(error);
    }

    /// Record the error of a field check, if any.
    pub fn check(&mut self, result: Result<(), FieldError>) {
        if let Err(error) = result {
            self.0.push(error);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    /// First error recorded for the given field.
    pub fn for_field(&self, field: &str) -> Option<&FieldError> {
        self.0.iter().find(|e| e.field == field)
    }

    pub fn into_vec(self) -> Vec<FieldError> {
        self.0
    }

    /// Convert into a result: `Ok` when nothing was recorded.
    pub fn into_result(self) -> DeskResult<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(DeskError::ValidationFailed(self))
        }
    }
}

impl From<FieldError> for ValidationErrors {
    fn from(error: FieldError) -> Self {
        Self(vec![error])
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        f.write_str(&parts.join("; "))
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

/// Master error type for all CoachDesk operations.
///
/// Every failure path of a remote accessor is mapped onto one of these
/// variants; stores record them in state instead of propagating panics.
/// The type is `Clone` because a single-flight fetch hands the same result
/// to every waiter.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeskError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: EntityType, id: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(ValidationErrors),

    #[error("Permission denied: cannot {action} {entity_type}")]
    PermissionDenied {
        entity_type: EntityType,
        action: String,
    },

    #[error("Backend error: {message}")]
    Backend { message: String },

    #[error("A mutation is already in flight for {entity_type} {id}")]
    MutationInFlight { entity_type: EntityType, id: String },

    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown error: {message}")]
    Unknown { message: String },
}

impl DeskError {
    pub fn not_found(entity_type: EntityType, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity_type,
            id: id.to_string(),
        }
    }

    pub fn permission_denied(entity_type: EntityType, action: impl Into<String>) -> Self {
        Self::PermissionDenied {
            entity_type,
            action: action.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Field-addressable errors, empty unless this is a validation failure.
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::ValidationFailed(errors) => &errors.0,
            _ => &[],
        }
    }
}

impl From<FieldError> for DeskError {
    fn from(error: FieldError) -> Self {
        Self::ValidationFailed(ValidationErrors::from(error))
    }
}

impl From<ValidationErrors> for DeskError {
    fn from(errors: ValidationErrors) -> Self {
        Self::ValidationFailed(errors)
    }
}

/// Result type alias for CoachDesk operations.
pub type DeskResult<T> = Result<T, DeskError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = DeskError::not_found(EntityType::Address, "addr-1");
        let msg = format!("{}", err);
        assert!(msg.contains("ADDRESS"));
        assert!(msg.contains("addr-1"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_permission_denied_display() {
        let err = DeskError::permission_denied(EntityType::CoachingCenter, "update");
        let msg = format!("{}", err);
        assert!(msg.contains("Permission denied"));
        assert!(msg.contains("update"));
        assert!(msg.contains("COACHING_CENTER"));
    }

    #[test]
    fn test_validation_errors_collect_and_address_fields() {
        let mut errors = ValidationErrors::new();
        errors.check(Ok(()));
        errors.check(Err(FieldError::new(
            "pin_code",
            FieldErrorCode::InvalidFormat,
            "must be 6 digits",
        )));
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors.for_field("pin_code").map(|e| e.code),
            Some(FieldErrorCode::InvalidFormat)
        );

        let err = errors.into_result().unwrap_err();
        assert_eq!(err.field_errors().len(), 1);
        assert!(format!("{}", err).contains("pin_code"));
    }

    #[test]
    fn test_empty_validation_errors_is_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "default_per_page".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("default_per_page"));
        assert!(msg.contains("must be positive"));

        let desk: DeskError = err.into();
        assert!(matches!(desk, DeskError::Config(_)));
    }

    #[test]
    fn test_field_errors_empty_for_other_variants() {
        assert!(DeskError::NotAuthenticated.field_errors().is_empty());
    }
}
