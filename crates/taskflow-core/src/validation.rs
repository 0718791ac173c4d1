//! # Validation Module
//!
//! Field validators applied once, at ingress, before a sync batch or a
//! batch delete reaches storage.
//!
//! ## Usage
//! ```rust
//! use taskflow_core::validation::{validate_local_id, validate_title};
//!
//! assert!(validate_local_id("a").is_ok());
//! assert!(validate_title("   ").is_err());
//! ```

use crate::error::ValidationError;
use crate::{MAX_DESCRIPTION_LEN, MAX_LOCAL_ID_LEN, MAX_TITLE_LEN};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a client-assigned local identifier.
///
/// ## Rules
/// - Must not be empty or whitespace
/// - At most [`MAX_LOCAL_ID_LEN`] characters
/// - No control characters
///
/// Local ids are opaque to the server, so they are not trimmed: the value
/// is echoed back exactly as the client sent it.
pub fn validate_local_id(local_id: &str) -> ValidationResult<()> {
    if local_id.trim().is_empty() {
        return Err(ValidationError::required("local_id"));
    }

    if local_id.chars().count() > MAX_LOCAL_ID_LEN {
        return Err(ValidationError::TooLong {
            field: "local_id".to_string(),
            max: MAX_LOCAL_ID_LEN,
        });
    }

    if local_id.chars().any(char::is_control) {
        return Err(ValidationError::InvalidFormat {
            field: "local_id".to_string(),
            reason: "must not contain control characters".to_string(),
        });
    }

    Ok(())
}

/// Validates a task title and returns it trimmed.
///
/// ## Example
/// ```rust
/// use taskflow_core::validation::validate_title;
///
/// assert_eq!(validate_title("  Buy milk ").unwrap(), "Buy milk");
/// assert!(validate_title("").is_err());
/// ```
pub fn validate_title(title: &str) -> ValidationResult<String> {
    let title = title.trim();

    if title.is_empty() {
        return Err(ValidationError::required("title"));
    }

    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ValidationError::TooLong {
            field: "title".to_string(),
            max: MAX_TITLE_LEN,
        });
    }

    Ok(title.to_string())
}

/// Validates a description. Empty is allowed.
pub fn validate_description(description: &str) -> ValidationResult<String> {
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ValidationError::TooLong {
            field: "description".to_string(),
            max: MAX_DESCRIPTION_LEN,
        });
    }

    Ok(description.to_string())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Client versions start at 0 (never synced) and only grow.
pub fn validate_client_version(version: i64) -> ValidationResult<i64> {
    if version < 0 {
        return Err(ValidationError::Negative {
            field: "client_version".to_string(),
        });
    }
    Ok(version)
}

/// Server ids are positive row ids.
pub fn validate_server_id(id: i64) -> ValidationResult<i64> {
    if id <= 0 {
        return Err(ValidationError::InvalidFormat {
            field: "server_id".to_string(),
            reason: "must be a positive integer".to_string(),
        });
    }
    Ok(id)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_local_id() {
        assert!(validate_local_id("a").is_ok());
        assert!(validate_local_id("tmp-123e4567").is_ok());
        assert!(validate_local_id("").is_err());
        assert!(validate_local_id("   ").is_err());
        assert!(validate_local_id(&"x".repeat(MAX_LOCAL_ID_LEN + 1)).is_err());
        assert!(validate_local_id("a\nb").is_err());
    }

    #[test]
    fn test_validate_title() {
        assert_eq!(validate_title("Buy milk").unwrap(), "Buy milk");
        assert!(matches!(
            validate_title(""),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_title(&"t".repeat(MAX_TITLE_LEN + 1)),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn test_validate_description_allows_empty() {
        assert_eq!(validate_description("").unwrap(), "");
        assert!(validate_description(&"d".repeat(MAX_DESCRIPTION_LEN + 1)).is_err());
    }

    #[test]
    fn test_validate_versions_and_ids() {
        assert_eq!(validate_client_version(0).unwrap(), 0);
        assert!(validate_client_version(-1).is_err());
        assert!(validate_server_id(1).is_ok());
        assert!(validate_server_id(0).is_err());
    }
}
