//! Field Validation
//!
//! Format checks applied to create/update payloads before any backend call
//! is issued. Every check returns a field-addressable [`FieldError`] so a
//! form can highlight the offending input.

use crate::error::{DeskResult, FieldError, FieldErrorCode};
use once_cell::sync::Lazy;
use regex::Regex;

static PIN_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[1-9][0-9]{5}$").expect("static PIN code regex"));

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9]{10,15}$").expect("static phone regex"));

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("static email regex")
});

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://[A-Za-z0-9.-]+(:[0-9]{1,5})?(/[^\s]*)?$").expect("static url regex")
});

/// Payloads that can be checked before they are sent to the backend.
pub trait Validate {
    /// Validate every field, collecting all failures.
    ///
    /// # Errors
    /// Returns `DeskError::ValidationFailed` listing each offending field.
    fn validate(&self) -> DeskResult<()>;
}

/// Trait for checking if an update payload has any fields set.
pub trait HasUpdates {
    /// Check if any update fields are set.
    fn has_any_updates(&self) -> bool;

    /// Validate that at least one update field is set.
    fn validate_has_updates(&self) -> Result<(), FieldError> {
        if !self.has_any_updates() {
            return Err(FieldError::new(
                "patch",
                FieldErrorCode::Required,
                "At least one field must be provided for update",
            ));
        }
        Ok(())
    }
}

/// Trait for validating numeric ranges.
pub trait ValidateRange {
    /// Validate that the value is within an inclusive range.
    fn validate_range(&self, field_name: &str, min: Self, max: Self) -> Result<(), FieldError>
    where
        Self: Sized;
}

macro_rules! impl_validate_range {
    ($($t:ty),*) => {
        $(
            impl ValidateRange for $t {
                fn validate_range(&self, field_name: &str, min: Self, max: Self) -> Result<(), FieldError> {
                    if *self < min || *self > max {
                        return Err(FieldError::new(
                            field_name,
                            FieldErrorCode::OutOfRange,
                            format!("must be between {} and {}", min, max),
                        ));
                    }
                    Ok(())
                }
            }
        )*
    };
}

impl_validate_range!(i32, i64, u32, u64, usize);

impl ValidateRange for f64 {
    fn validate_range(&self, field_name: &str, min: Self, max: Self) -> Result<(), FieldError> {
        if !self.is_finite() {
            return Err(FieldError::new(
                field_name,
                FieldErrorCode::InvalidFormat,
                "must be a finite number",
            ));
        }
        if *self < min || *self > max {
            return Err(FieldError::new(
                field_name,
                FieldErrorCode::OutOfRange,
                format!("must be between {} and {}", min, max),
            ));
        }
        Ok(())
    }
}

/// Reject empty or whitespace-only values.
pub fn required(field: &str, value: &str) -> Result<(), FieldError> {
    if value.trim().is_empty() {
        return Err(FieldError::new(
            field,
            FieldErrorCode::Required,
            "is required",
        ));
    }
    Ok(())
}

/// Check the character length of a value (trimmed) against inclusive bounds.
pub fn length(field: &str, value: &str, min: usize, max: usize) -> Result<(), FieldError> {
    let len = value.trim().chars().count();
    if len < min {
        return Err(FieldError::new(
            field,
            FieldErrorCode::TooShort,
            format!("must be at least {} characters", min),
        ));
    }
    if len > max {
        return Err(FieldError::new(
            field,
            FieldErrorCode::TooLong,
            format!("must be at most {} characters", max),
        ));
    }
    Ok(())
}

/// Six-digit Indian postal code, first digit non-zero.
pub fn pin_code(field: &str, value: &str) -> Result<(), FieldError> {
    matches_pattern(field, value, &PIN_CODE_RE, "must be a valid 6-digit PIN code")
}

/// 10 to 15 digits with an optional leading `+`.
pub fn phone(field: &str, value: &str) -> Result<(), FieldError> {
    matches_pattern(field, value, &PHONE_RE, "must be a valid phone number")
}

pub fn email(field: &str, value: &str) -> Result<(), FieldError> {
    length(field, value, 3, 254)?;
    matches_pattern(field, value, &EMAIL_RE, "must be a valid email address")
}

/// Absolute http(s) URL.
pub fn url(field: &str, value: &str) -> Result<(), FieldError> {
    length(field, value, 8, 2048)?;
    matches_pattern(field, value, &URL_RE, "must be a valid http(s) URL")
}

pub fn latitude(field: &str, value: f64) -> Result<(), FieldError> {
    value.validate_range(field, -90.0, 90.0)
}

pub fn longitude(field: &str, value: f64) -> Result<(), FieldError> {
    value.validate_range(field, -180.0, 180.0)
}

/// Apply a check only when the optional value is present.
pub fn optional<T: ?Sized>(
    value: Option<&T>,
    check: impl FnOnce(&T) -> Result<(), FieldError>,
) -> Result<(), FieldError> {
    match value {
        Some(v) => check(v),
        None => Ok(()),
    }
}

fn matches_pattern(
    field: &str,
    value: &str,
    pattern: &Regex,
    message: &str,
) -> Result<(), FieldError> {
    if !pattern.is_match(value.trim()) {
        return Err(FieldError::new(field, FieldErrorCode::InvalidFormat, message));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required() {
        assert!(required("name", "Apex").is_ok());
        let err = required("name", "   ").unwrap_err();
        assert_eq!(err.code, FieldErrorCode::Required);
        assert_eq!(err.field, "name");
    }

    #[test]
    fn test_length_bounds() {
        assert!(length("name", "ab", 2, 5).is_ok());
        assert_eq!(
            length("name", "a", 2, 5).unwrap_err().code,
            FieldErrorCode::TooShort
        );
        assert_eq!(
            length("name", "abcdef", 2, 5).unwrap_err().code,
            FieldErrorCode::TooLong
        );
    }

    #[test]
    fn test_length_counts_chars_not_bytes() {
        assert!(length("label", "घर", 1, 2).is_ok());
    }

    #[test]
    fn test_pin_code() {
        assert!(pin_code("pin_code", "110001").is_ok());
        assert!(pin_code("pin_code", "011001").is_err());
        assert!(pin_code("pin_code", "11001").is_err());
        assert!(pin_code("pin_code", "11000a").is_err());
    }

    #[test]
    fn test_phone() {
        assert!(phone("contact_phone", "9876543210").is_ok());
        assert!(phone("contact_phone", "+919876543210").is_ok());
        assert!(phone("contact_phone", "98765").is_err());
        assert!(phone("contact_phone", "98765-43210").is_err());
    }

    #[test]
    fn test_email() {
        assert!(email("contact_email", "info@apex.in").is_ok());
        assert!(email("contact_email", "info@apex").is_err());
        assert!(email("contact_email", "not an email").is_err());
    }

    #[test]
    fn test_url() {
        assert!(url("website_url", "https://apex.in/about").is_ok());
        assert!(url("website_url", "http://localhost:8080").is_ok());
        assert!(url("website_url", "ftp://apex.in").is_err());
        assert!(url("website_url", "apex.in").is_err());
    }

    #[test]
    fn test_coordinates() {
        assert!(latitude("latitude", 28.61).is_ok());
        assert_eq!(
            latitude("latitude", 91.0).unwrap_err().code,
            FieldErrorCode::OutOfRange
        );
        assert!(longitude("longitude", -181.0).is_err());
    }

    #[test]
    fn test_coordinates_reject_non_finite() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(
                latitude("latitude", value).unwrap_err().code,
                FieldErrorCode::InvalidFormat
            );
            assert_eq!(
                longitude("longitude", value).unwrap_err().code,
                FieldErrorCode::InvalidFormat
            );
        }
    }

    #[test]
    fn test_validate_range_integers() {
        assert!(2001i32.validate_range("established_year", 1800, 2100).is_ok());
        assert!(1700i32.validate_range("established_year", 1800, 2100).is_err());
    }

    #[test]
    fn test_optional_skips_missing() {
        assert!(optional::<str>(None, |v| email("contact_email", v)).is_ok());
        assert!(optional(Some("bad"), |v: &str| email("contact_email", v)).is_err());
    }

    struct Patch {
        name: Option<String>,
    }

    impl HasUpdates for Patch {
        fn has_any_updates(&self) -> bool {
            self.name.is_some()
        }
    }

    #[test]
    fn test_has_updates() {
        assert!(Patch { name: Some("x".into()) }.validate_has_updates().is_ok());
        assert!(Patch { name: None }.validate_has_updates().is_err());
    }
}
