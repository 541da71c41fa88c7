//! Error types for idlink.
//!
//! All errors in idlink are strongly typed using thiserror.
//! This enables pattern matching on specific error conditions
//! and provides clear error messages.

use thiserror::Error;

use crate::contact::ContactId;
use crate::storage::StorageError;

/// Validation errors that occur before any store access.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Either email or phoneNumber must be provided")]
    MissingContactFact,

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },

    #[error("Invalid engine configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Execution errors that occur while resolving against a store.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Record store unavailable: {source}")]
    StoreUnavailable {
        #[from]
        source: StorageError,
    },

    #[error("Resolution did not converge after {passes} passes")]
    PassLimitExceeded {
        passes: usize,
    },

    #[error("Demotion of contact {contact_id} under primary {primary_id} failed: {reason}")]
    DemotionFailed {
        contact_id: ContactId,
        primary_id: ContactId,
        reason: String,
    },

    #[error("Inconsistent contact graph: {reason}")]
    InconsistentGraph {
        reason: String,
    },
}

/// Top-level error type for idlink.
///
/// The three families map onto how a caller should react: reject the
/// request (`InvalidInput`), report a server error because the store is
/// unreachable (`StoreUnavailable`), or report a server error because the
/// stored graph could not be brought into shape during this call
/// (`InconsistentState`).
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
}

impl From<StorageError> for IdentityError {
    fn from(err: StorageError) -> Self {
        Self::Execution(ExecutionError::StoreUnavailable { source: err })
    }
}

impl IdentityError {
    /// Creates an inconsistent-graph error.
    #[must_use]
    pub fn inconsistent(reason: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::InconsistentGraph {
            reason: reason.into(),
        })
    }

    /// Returns true if the request was rejected before touching the store.
    #[must_use]
    pub const fn is_invalid_input(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if a store call failed.
    #[must_use]
    pub const fn is_store_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Execution(ExecutionError::StoreUnavailable { .. })
        )
    }

    /// Returns true if the contact graph could not be made consistent in this call.
    #[must_use]
    pub const fn is_inconsistent_state(&self) -> bool {
        matches!(
            self,
            Self::Execution(
                ExecutionError::PassLimitExceeded { .. }
                    | ExecutionError::DemotionFailed { .. }
                    | ExecutionError::InconsistentGraph { .. }
            )
        )
    }

    /// Returns true if a later, independent call may succeed.
    ///
    /// The engine itself never retries; this is advice for the caller.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false, // Same input, same rejection
            Self::Execution(e) => matches!(
                e,
                ExecutionError::StoreUnavailable { .. } | ExecutionError::DemotionFailed { .. }
            ),
        }
    }
}

/// Result type alias for idlink operations.
pub type IdentityResult<T> = Result<T, IdentityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_missing_fact() {
        let err = ValidationError::MissingContactFact;
        let msg = format!("{err}");
        assert!(msg.contains("email or phoneNumber"));
    }

    #[test]
    fn test_execution_error_pass_limit() {
        let err = ExecutionError::PassLimitExceeded { passes: 5 };
        let msg = format!("{err}");
        assert!(msg.contains("5 passes"));
    }

    #[test]
    fn test_execution_error_demotion() {
        let err = ExecutionError::DemotionFailed {
            contact_id: ContactId::new(7),
            primary_id: ContactId::new(2),
            reason: "timeout".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("contact 7"));
        assert!(msg.contains("primary 2"));
        assert!(msg.contains("timeout"));
    }

    #[test]
    fn test_identity_error_from_storage() {
        let err: IdentityError = StorageError::ConnectionError("refused".to_string()).into();
        assert!(err.is_store_unavailable());
        assert!(!err.is_inconsistent_state());
        assert!(err.is_retryable());
        assert!(format!("{err}").contains("refused"));
    }

    #[test]
    fn test_identity_error_from_validation() {
        let err: IdentityError = ValidationError::MissingContactFact.into();
        assert!(err.is_invalid_input());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_identity_error_inconsistent() {
        let err: IdentityError = ExecutionError::PassLimitExceeded { passes: 5 }.into();
        assert!(err.is_inconsistent_state());
        assert!(!err.is_retryable());

        let err = IdentityError::inconsistent("component has no primary");
        assert!(err.is_inconsistent_state());
    }
}
