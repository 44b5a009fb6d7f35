//! Service error handling
//!
//! [`AuthError`] is what every [`crate::U2fBackend`] operation returns. It
//! wraps the protocol taxonomy from `u2f-core` and adds the failures that
//! only exist at the service level (storage, roles, request validation).
//!
//! Callers must show clients [`AuthError::client_message`], never the
//! `Display` text: the latter names the exact check that failed.

use thiserror::Error;
use u2f_core::ProtocolError;

use crate::fields::FieldError;
use crate::storage::StorageError;

/// Message shown to clients for every rejected protocol attempt.
pub const AUTHENTICATION_FAILED: &str = "authentication failed";

#[derive(Debug, Error)]
pub enum AuthError {
    /// Protocol or cryptographic verification failure
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Storage collaborator failed (transient)
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),

    /// Device role is empty or does not exist
    #[error("Role not found: {0:?}")]
    RoleNotFound(String),

    /// Caller supplied invalid input
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Renewal refused because the role's policies differ from the token's
    #[error("Policies have changed, not renewing")]
    PoliciesChanged,

    /// Unexpected server-side failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Get the error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Protocol(e) => e.code(),
            Self::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            Self::RoleNotFound(_) => "ROLE_NOT_FOUND",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::PoliciesChanged => "POLICIES_CHANGED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get the error category for logging
    pub fn error_category(&self) -> &'static str {
        match self {
            Self::Protocol(e) if e.is_internal() => "internal",
            Self::Protocol(_) | Self::RoleNotFound(_) => "auth_error",
            Self::StorageUnavailable(_) => "service_unavailable",
            Self::InvalidRequest(_) => "bad_request",
            Self::PoliciesChanged => "renewal_denied",
            Self::Internal(_) => "internal",
        }
    }

    /// Get sanitized error message for client response
    pub fn client_message(&self) -> String {
        match self {
            Self::Protocol(e) if e.is_internal() => "Internal error".to_string(),
            Self::Protocol(_) | Self::RoleNotFound(_) => AUTHENTICATION_FAILED.to_string(),
            Self::StorageUnavailable(_) => "Service temporarily unavailable".to_string(),
            Self::Internal(_) => "Internal error".to_string(),
            // Caller-facing messages carry no verification detail
            Self::InvalidRequest(_) | Self::PoliciesChanged => self.to_string(),
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }

    /// Log this failure at a severity matching its category, always
    /// including internal details.
    pub fn log(&self, operation: &str, device: &str) {
        let category = self.error_category();
        let code = self.error_code();
        let internal_message = self.to_string();

        match self {
            Self::InvalidRequest(_) | Self::PoliciesChanged => {
                tracing::info!(
                    operation,
                    device,
                    category,
                    code,
                    error = %internal_message,
                    "Request rejected"
                );
            }
            Self::Protocol(e) if !e.is_internal() => {
                tracing::warn!(
                    operation,
                    device,
                    category,
                    code,
                    error = %internal_message,
                    "Authentication attempt rejected"
                );
            }
            Self::RoleNotFound(_) => {
                tracing::warn!(
                    operation,
                    device,
                    category,
                    code,
                    error = %internal_message,
                    "No grant for device"
                );
            }
            Self::StorageUnavailable(_) => {
                tracing::error!(
                    operation,
                    device,
                    category,
                    code,
                    error = %internal_message,
                    "Storage failure"
                );
            }
            Self::Protocol(_) | Self::Internal(_) => {
                tracing::error!(
                    operation,
                    device,
                    category,
                    code,
                    error = %internal_message,
                    "Server error"
                );
            }
        }
    }
}

impl From<FieldError> for AuthError {
    fn from(err: FieldError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_errors_are_sanitized() {
        let errors = [
            ProtocolError::ReplayDetected {
                stored: 5,
                presented: 5,
            },
            ProtocolError::SignatureVerificationFailed,
            ProtocolError::ChallengeMismatch("untrusted origin".to_string()),
            ProtocolError::NotRegistered,
        ];
        for error in errors {
            let err = AuthError::from(error);
            assert_eq!(err.client_message(), AUTHENTICATION_FAILED);
            assert_eq!(err.error_category(), "auth_error");
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn test_error_codes() {
        let replay = AuthError::from(ProtocolError::ReplayDetected {
            stored: 1,
            presented: 1,
        });
        assert_eq!(replay.error_code(), "REPLAY_DETECTED");
        assert_eq!(
            AuthError::RoleNotFound("ops".to_string()).error_code(),
            "ROLE_NOT_FOUND"
        );
        assert_eq!(AuthError::PoliciesChanged.error_code(), "POLICIES_CHANGED");
    }

    #[test]
    fn test_role_not_found_looks_like_any_failure() {
        let err = AuthError::RoleNotFound(String::new());
        assert_eq!(err.client_message(), AUTHENTICATION_FAILED);
    }

    #[test]
    fn test_storage_errors_are_transient() {
        let err = AuthError::from(StorageError::Unavailable("connection refused".to_string()));
        assert!(err.is_transient());
        assert_eq!(err.error_category(), "service_unavailable");
        assert!(!err.client_message().contains("connection refused"));
    }

    #[test]
    fn test_internal_protocol_errors() {
        let err = AuthError::from(ProtocolError::EntropyUnavailable("rng".to_string()));
        assert_eq!(err.error_category(), "internal");
        assert_eq!(err.client_message(), "Internal error");
    }

    #[test]
    fn test_invalid_request_keeps_message() {
        let err = AuthError::invalid_request("missing device name");
        assert_eq!(err.client_message(), "Invalid request: missing device name");
    }
}
