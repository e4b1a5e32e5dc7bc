//! Unified error handling for the API.
//!
//! Every handler returns `Result<_, AppError>`. Responses are JSON
//! `{ "message": ..., "error": ... }`; the raw `error` string is only
//! included when detail exposure is enabled (anything but production).

use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use flexhub_core::{CodeError, CommissionError, TransitionError};

use crate::db::RepositoryError;
use crate::services::email::EmailError;
use crate::services::storage::StorageError;
use crate::services::stripe::StripeError;

static EXPOSE_DETAILS: AtomicBool = AtomicBool::new(false);

/// Enable or disable raw error strings in responses.
pub fn expose_error_details(enabled: bool) {
    EXPOSE_DETAILS.store(enabled, Ordering::Relaxed);
}

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Commission rules refused the request.
    #[error("{0}")]
    Commission(#[from] CommissionError),

    /// Ambassador code invalid or unusable.
    #[error("{0}")]
    Code(#[from] CodeError),

    /// Application workflow refused the transition.
    #[error("{0}")]
    Transition(#[from] TransitionError),

    /// Stripe API call failed.
    #[error("Stripe error: {0}")]
    Stripe(#[from] StripeError),

    /// Outbound email failed.
    #[error("Email error: {0}")]
    Email(#[from] EmailError),

    /// File storage failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing or invalid credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Request conflicts with existing state (e.g., duplicate application).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Database(RepositoryError::NotFound) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Database(RepositoryError::Conflict(_))
            | Self::Conflict(_)
            | Self::Transition(_)
            | Self::Commission(CommissionError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Commission(_) | Self::Code(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Stripe(_) | Self::Email(_) | Self::Storage(_) => StatusCode::BAD_GATEWAY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }

    /// Message safe to show to any client.
    fn public_message(&self) -> String {
        match self {
            Self::Database(RepositoryError::NotFound) => "Not found".to_string(),
            Self::Database(RepositoryError::Conflict(msg)) => msg.clone(),
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::Stripe(_) => "Payment provider error".to_string(),
            Self::Email(_) => "Email delivery failed".to_string(),
            Self::Storage(_) => "File storage error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Log server errors with Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let body = ErrorBody {
            message: self.public_message(),
            error: EXPOSE_DETAILS
                .load(Ordering::Relaxed)
                .then(|| self.to_string()),
        };

        (status, Json(body)).into_response()
    }
}

/// Set the Sentry user context from the acting staff member.
pub fn set_sentry_actor(email: &str) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            email: Some(email.to_string()),
            ..Default::default()
        }));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("application 12".to_string());
        assert_eq!(err.to_string(), "Not found: application 12");

        let err = AppError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");
    }

    #[test]
    fn test_app_error_status_codes() {
        fn get_status(err: AppError) -> StatusCode {
            err.into_response().status()
        }

        assert_eq!(
            get_status(AppError::NotFound("test".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(AppError::Unauthorized("test".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(AppError::Conflict("test".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(AppError::BadRequest("test".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(AppError::Database(RepositoryError::NotFound)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(AppError::Commission(CommissionError::InvalidAmount)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(AppError::Transition(TransitionError::MissingSignedDocument)),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_internal_details_hidden_from_message() {
        let err = AppError::Internal("connection refused on 10.0.0.3".to_string());
        assert_eq!(err.public_message(), "Internal server error");
    }
}
