//! Validation rules used by job submission.
//!
//! - Required field validation
//! - Numeric range constraints
//! - Format validation (email, UUID)
//! - Allowed-value sets

use crate::validation::error::{FieldError, ValidationErrorKind};
use regex::Regex;
use std::sync::LazyLock;

// ═══════════════════════════════════════════════════════════════════════════════
// Pre-compiled Regex Patterns
// ═══════════════════════════════════════════════════════════════════════════════

/// Email validation regex (RFC 5322 simplified).
static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    ).expect("Invalid email regex")
});

static UUID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$"
    ).expect("Invalid UUID regex")
});

// ═══════════════════════════════════════════════════════════════════════════════
// Validation Rule Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// A validation rule that can be applied to a value.
pub trait ValidationRule<T> {
    /// Validate the value and return any error.
    fn validate(&self, value: &T) -> Option<FieldError>;

    fn description(&self) -> String;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Required
// ═══════════════════════════════════════════════════════════════════════════════

/// Rule that validates a field is present and non-empty.
#[derive(Debug, Clone, Default)]
pub struct Required;

impl ValidationRule<String> for Required {
    fn validate(&self, value: &String) -> Option<FieldError> {
        if value.trim().is_empty() {
            Some(FieldError::new(ValidationErrorKind::Required))
        } else {
            None
        }
    }

    fn description(&self) -> String {
        "required".to_string()
    }
}

impl ValidationRule<Option<String>> for Required {
    fn validate(&self, value: &Option<String>) -> Option<FieldError> {
        match value {
            Some(s) => <Required as ValidationRule<String>>::validate(self, s),
            None => Some(FieldError::new(ValidationErrorKind::Required)),
        }
    }

    fn description(&self) -> String {
        "required".to_string()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Range
// ═══════════════════════════════════════════════════════════════════════════════

/// Rule that validates a numeric value is within an inclusive range.
#[derive(Debug, Clone)]
pub struct Range<T> {
    pub min: T,
    pub max: T,
}

impl<T> Range<T> {
    pub fn new(min: T, max: T) -> Self {
        Self { min, max }
    }
}

macro_rules! impl_range_rule {
    ($($t:ty),+) => {
        $(
            impl ValidationRule<$t> for Range<$t> {
                fn validate(&self, value: &$t) -> Option<FieldError> {
                    if *value < self.min || *value > self.max {
                        Some(FieldError::new(ValidationErrorKind::Range {
                            min: self.min.to_string(),
                            max: self.max.to_string(),
                            actual: value.to_string(),
                        }))
                    } else {
                        None
                    }
                }

                fn description(&self) -> String {
                    format!("value between {} and {}", self.min, self.max)
                }
            }

            impl ValidationRule<Option<$t>> for Range<$t> {
                fn validate(&self, value: &Option<$t>) -> Option<FieldError> {
                    match value {
                        Some(v) => <Range<$t> as ValidationRule<$t>>::validate(self, v),
                        None => None,
                    }
                }

                fn description(&self) -> String {
                    format!("value between {} and {}", self.min, self.max)
                }
            }
        )+
    };
}

impl_range_rule!(i64, u32, u64);

// ═══════════════════════════════════════════════════════════════════════════════
// Format Validation Rules
// ═══════════════════════════════════════════════════════════════════════════════

/// Rule that validates email format.
#[derive(Debug, Clone, Default)]
pub struct Email;

impl ValidationRule<String> for Email {
    fn validate(&self, value: &String) -> Option<FieldError> {
        if EMAIL_REGEX.is_match(value) {
            None
        } else {
            Some(FieldError::new(ValidationErrorKind::InvalidEmail))
        }
    }

    fn description(&self) -> String {
        "valid email format".to_string()
    }
}

impl ValidationRule<Option<String>> for Email {
    fn validate(&self, value: &Option<String>) -> Option<FieldError> {
        match value {
            Some(s) => <Email as ValidationRule<String>>::validate(self, s),
            None => None,
        }
    }

    fn description(&self) -> String {
        "valid email format".to_string()
    }
}

/// Rule that validates UUID format.
#[derive(Debug, Clone, Default)]
pub struct Uuid;

impl ValidationRule<String> for Uuid {
    fn validate(&self, value: &String) -> Option<FieldError> {
        if UUID_REGEX.is_match(value) {
            None
        } else {
            Some(FieldError::new(ValidationErrorKind::InvalidUuid))
        }
    }

    fn description(&self) -> String {
        "valid UUID format".to_string()
    }
}

impl ValidationRule<Option<String>> for Uuid {
    fn validate(&self, value: &Option<String>) -> Option<FieldError> {
        match value {
            Some(s) => <Uuid as ValidationRule<String>>::validate(self, s),
            None => None,
        }
    }

    fn description(&self) -> String {
        "valid UUID format".to_string()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Allowed Set
// ═══════════════════════════════════════════════════════════════════════════════

/// Rule that validates a value is in a predefined set.
#[derive(Debug, Clone)]
pub struct OneOf<T> {
    allowed: Vec<T>,
}

impl<T> OneOf<T> {
    pub fn new(allowed: Vec<T>) -> Self {
        Self { allowed }
    }
}

impl<T: PartialEq + ToString> ValidationRule<T> for OneOf<T> {
    fn validate(&self, value: &T) -> Option<FieldError> {
        if self.allowed.contains(value) {
            None
        } else {
            Some(FieldError::new(ValidationErrorKind::NotInSet {
                allowed: self.allowed.iter().map(|v| v.to_string()).collect(),
            }))
        }
    }

    fn description(&self) -> String {
        format!(
            "one of: {:?}",
            self.allowed.iter().map(|v| v.to_string()).collect::<Vec<_>>()
        )
    }
}

impl<T: PartialEq + ToString> ValidationRule<Option<T>> for OneOf<T> {
    fn validate(&self, value: &Option<T>) -> Option<FieldError> {
        match value {
            Some(v) => <OneOf<T> as ValidationRule<T>>::validate(self, v),
            None => None,
        }
    }

    fn description(&self) -> String {
        <OneOf<T> as ValidationRule<T>>::description(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required() {
        assert!(Required.validate(&"x".to_string()).is_none());
        assert!(Required.validate(&"  ".to_string()).is_some());
        assert!(Required.validate(&None::<String>).is_some());
    }

    #[test]
    fn test_range_bounds_are_inclusive() {
        let rule = Range::new(1u32, 10);
        assert!(rule.validate(&1u32).is_none());
        assert!(rule.validate(&10u32).is_none());
        assert!(rule.validate(&0u32).is_some());
        assert!(rule.validate(&11u32).is_some());
        assert!(rule.validate(&None::<u32>).is_none());
    }

    #[test]
    fn test_email() {
        assert!(Email.validate(&"billing@example.com".to_string()).is_none());
        assert!(Email.validate(&"not-an-email".to_string()).is_some());
        assert!(Email.validate(&"".to_string()).is_some());
    }

    #[test]
    fn test_uuid() {
        let id = uuid::Uuid::new_v4().to_string();
        assert!(Uuid.validate(&id).is_none());
        assert!(Uuid.validate(&"doc-42".to_string()).is_some());
    }

    #[test]
    fn test_one_of() {
        let rule = OneOf::new(vec!["invoice", "quote", "report"]);
        assert!(rule.validate(&"quote").is_none());
        let err = rule.validate(&"receipt").unwrap();
        assert!(err.message.contains("invoice, quote, report"));
    }
}
