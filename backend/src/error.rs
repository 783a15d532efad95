//! Error types for the onboarding workflow.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::address::AddressError;
use crate::auth::{IdentityAdminError, OidcError};
use crate::mail::MailError;
use crate::membership::MembershipError;

/// Outcome of a rejected workflow step.
///
/// Client faults leave state untouched and carry a user-facing message.
/// Upstream and consistency faults are logged and reported generically; the
/// remedy is always to reload and try again.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{service} request failed: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },

    #[error("Inconsistent upstream data: {0}")]
    Inconsistent(String),
}

impl WorkflowError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn upstream(service: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Upstream {
            service,
            message: err.to_string(),
        }
    }

    /// Whether the caller caused this error.
    pub fn is_client_fault(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::BadRequest(_))
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Upstream { .. } | Self::Inconsistent(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::BadRequest(_) => "bad_request",
            Self::Upstream { .. } => "upstream_failure",
            Self::Inconsistent(_) => "inconsistent_data",
        }
    }
}

impl IntoResponse for WorkflowError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Unauthorized(message) | Self::BadRequest(message) => message.clone(),
            Self::Upstream { service, .. } => {
                tracing::error!(service = %service, error = %self, "Upstream failure");
                "Something went wrong. Please reload and try again.".to_string()
            }
            Self::Inconsistent(_) => {
                tracing::error!(error = %self, "Inconsistent upstream data");
                "Something went wrong. Please reload and try again.".to_string()
            }
        };

        let body = Json(json!({
            "error": {
                "type": self.error_type(),
                "message": message
            }
        }));

        (self.status(), body).into_response()
    }
}

impl From<MembershipError> for WorkflowError {
    fn from(err: MembershipError) -> Self {
        Self::upstream("membership directory", err)
    }
}

impl From<AddressError> for WorkflowError {
    fn from(err: AddressError) -> Self {
        Self::upstream("address resolution", err)
    }
}

impl From<MailError> for WorkflowError {
    fn from(err: MailError) -> Self {
        Self::upstream("mail transport", err)
    }
}

impl From<IdentityAdminError> for WorkflowError {
    fn from(err: IdentityAdminError) -> Self {
        Self::upstream("identity admin", err)
    }
}

impl From<OidcError> for WorkflowError {
    fn from(err: OidcError) -> Self {
        match err {
            OidcError::InvalidToken(_) | OidcError::KeyNotFound(_) | OidcError::NonceMismatch => {
                Self::Unauthorized(err.to_string())
            }
            _ => Self::upstream("identity provider", err),
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_faults() {
        assert!(WorkflowError::unauthorized("Not logged in").is_client_fault());
        assert!(WorkflowError::bad_request("nope").is_client_fault());
        assert!(!WorkflowError::upstream("mail transport", "boom").is_client_fault());
        assert!(!WorkflowError::Inconsistent("two managers".to_string()).is_client_fault());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            WorkflowError::unauthorized("x").into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            WorkflowError::bad_request("x").into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            WorkflowError::upstream("membership directory", "503")
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            WorkflowError::Inconsistent("x".to_string())
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_upstream_display() {
        let err = WorkflowError::upstream("mail transport", "422 Unprocessable");
        assert_eq!(err.to_string(), "mail transport request failed: 422 Unprocessable");
    }

    #[test]
    fn test_token_errors_are_client_faults() {
        let err: WorkflowError = OidcError::NonceMismatch.into();
        assert!(err.is_client_fault());
        let err: WorkflowError = OidcError::TokenExchange("500".to_string()).into();
        assert!(!err.is_client_fault());
    }
}
