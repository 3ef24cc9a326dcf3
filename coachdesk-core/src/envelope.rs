//! Uniform result envelope handed to the presentation layer.

use crate::error::{DeskError, DeskResult, FieldError};
use serde::{Deserialize, Serialize};

/// `{ success, data, error, errors }` as consumed by views and forms.
///
/// `errors` carries field-addressable validation failures so a form can mark
/// individual inputs; `error` is the human-readable summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

impl<T> Outcome<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            errors: Vec::new(),
        }
    }

    pub fn failed(error: &DeskError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            errors: error.field_errors().to_vec(),
        }
    }
}

impl<T> From<DeskResult<T>> for Outcome<T> {
    fn from(result: DeskResult<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(error) => Self::failed(&error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FieldErrorCode, ValidationErrors};

    #[test]
    fn test_success_envelope_json() {
        let outcome = Outcome::ok(42u32);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json, serde_json::json!({ "success": true, "data": 42 }));
    }

    #[test]
    fn test_validation_failure_carries_field_errors() {
        let mut errors = ValidationErrors::new();
        errors.push(FieldError::new(
            "pin_code",
            FieldErrorCode::InvalidFormat,
            "must be a valid 6-digit PIN code",
        ));
        let result: DeskResult<u32> = Err(errors.into());
        let outcome = Outcome::from(result);
        assert!(!outcome.success);
        assert!(outcome.data.is_none());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].field, "pin_code");
        assert!(outcome.error.unwrap().contains("pin_code"));
    }

    #[test]
    fn test_plain_failure_has_no_field_errors() {
        let outcome: Outcome<()> = Outcome::from(Err(DeskError::NotAuthenticated));
        assert_eq!(outcome.error.as_deref(), Some("Not authenticated"));
        assert!(outcome.errors.is_empty());
    }
}
