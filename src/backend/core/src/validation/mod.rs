//! Request validation.
//!
//! Field-level error collection plus a small set of reusable rules. Submission
//! payloads are checked here before anything is admitted to a queue, so a
//! rejected request never produces a job record.
//!
//! # Example
//!
//! ```rust,ignore
//! use jobforge_core::validation::{Range, ValidationErrors};
//!
//! let mut errors = ValidationErrors::new();
//! errors.check("options.priority", &Range::new(1u32, 10), &Some(11u32));
//! assert!(errors.has_errors("options.priority"));
//! ```

pub mod error;
pub mod rules;

pub use error::{FieldError, ValidationErrorKind, ValidationErrors, ValidationResult};
pub use rules::{Email, OneOf, Range, Required, Uuid, ValidationRule};

use crate::error::{ErrorDetails, JobforgeError};

impl From<ValidationErrors> for JobforgeError {
    fn from(errors: ValidationErrors) -> Self {
        let message = match errors.first_error() {
            Some((field, error)) if errors.error_count() == 1 => {
                format!("{}: {}", field, error.message)
            }
            _ => format!("{} fields failed validation", errors.field_count()),
        };
        JobforgeError::validation(message)
            .with_details(ErrorDetails::new().with_fields(errors.to_message_map()))
    }
}
