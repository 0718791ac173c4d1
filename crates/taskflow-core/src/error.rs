//! # Error Types
//!
//! Domain errors for taskflow-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  CoreError                                                              │
//! │  ├── InvalidChange { index, source: ValidationError }                   │
//! │  ├── BatchTooLarge { max, actual }                                      │
//! │  ├── InvalidRanking                                                     │
//! │  └── Validation(ValidationError)                                        │
//! │                                                                         │
//! │  ValidationError (one field, one rule)                                  │
//! │  ├── Required / TooLong / MustBePositive                                │
//! │  ├── InvalidFormat                                                      │
//! │  └── NotAllowed                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything here is raised before a transaction is opened, so none of it
//! is retryable: the client has to fix the request.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Errors raised while turning a client request into domain values.
#[derive(Debug, Error)]
pub enum CoreError {
    /// One change in a sync batch failed validation.
    ///
    /// The whole batch is rejected; `index` is the zero-based position of
    /// the offending change so the client can locate it in its queue.
    #[error("change #{index} is invalid: {source}")]
    InvalidChange {
        index: usize,
        #[source]
        source: ValidationError,
    },

    /// The batch holds more operations than the server accepts at once.
    #[error("batch has {actual} changes, at most {max} are accepted")]
    BatchTooLarge { max: usize, actual: usize },

    /// A status ranking does not list every status exactly once.
    #[error("status ranking must list every status exactly once: {0}")]
    InvalidRanking(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value must not be negative.
    #[error("{field} must not be negative")]
    Negative { field: String },

    /// Invalid format (e.g. unparseable timestamp).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in the allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

impl ValidationError {
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }

    pub fn not_allowed(field: impl Into<String>, allowed: &[&str]) -> Self {
        ValidationError::NotAllowed {
            field: field.into(),
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
