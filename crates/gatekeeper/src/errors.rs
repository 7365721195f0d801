//! Gatekeeper error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl.
//! Messages returned to clients are terse and never carry upstream bodies or
//! internal identifiers. The underlying reason is logged server-side.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Rejection produced by the request pipeline or the session routes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("Too many requests")]
    TooManyRequests,

    #[error("Access from this region is not permitted")]
    RegionBlocked,

    #[error("Authentication required")]
    AuthRequired,

    #[error("Invalid authentication scheme")]
    InvalidScheme,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    ExpiredToken,

    #[error("Malformed email")]
    MalformedEmail,

    #[error("User not authorized")]
    NotAuthorized,

    #[error("Second factor required")]
    SecondFactorRequired,

    #[error("Anti-forgery check failed")]
    AntiForgeryRejected,

    #[error("Session invalid")]
    SessionInvalid,

    #[error("Key service unavailable: {0}")]
    KeyServiceUnavailable(String),

    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("Service misconfigured: {0}")]
    ServiceMisconfigured(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl GateError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            GateError::TooManyRequests => 429,
            GateError::RegionBlocked
            | GateError::AuthRequired
            | GateError::NotAuthorized
            | GateError::SecondFactorRequired
            | GateError::AntiForgeryRejected => 403,
            GateError::InvalidScheme
            | GateError::InvalidToken
            | GateError::ExpiredToken
            | GateError::SessionInvalid => 401,
            GateError::MalformedEmail => 400,
            GateError::KeyServiceUnavailable(_)
            | GateError::ServiceMisconfigured(_)
            | GateError::Internal(_) => 500,
            GateError::DirectoryUnavailable(_) | GateError::ServiceUnavailable(_) => 503,
        }
    }

    /// Stable, bounded label for metrics and the response body.
    pub fn code(&self) -> &'static str {
        match self {
            GateError::TooManyRequests => "TOO_MANY_REQUESTS",
            GateError::RegionBlocked => "REGION_BLOCKED",
            GateError::AuthRequired => "AUTH_REQUIRED",
            GateError::InvalidScheme => "INVALID_SCHEME",
            GateError::InvalidToken => "INVALID_TOKEN",
            GateError::ExpiredToken => "EXPIRED_TOKEN",
            GateError::MalformedEmail => "MALFORMED_EMAIL",
            GateError::NotAuthorized => "NOT_AUTHORIZED",
            GateError::SecondFactorRequired => "SECOND_FACTOR_REQUIRED",
            GateError::AntiForgeryRejected => "ANTI_FORGERY_REJECTED",
            GateError::SessionInvalid => "SESSION_INVALID",
            GateError::KeyServiceUnavailable(_) => "KEY_SERVICE_UNAVAILABLE",
            GateError::DirectoryUnavailable(_) => "DIRECTORY_UNAVAILABLE",
            GateError::ServiceMisconfigured(_) => "SERVICE_MISCONFIGURED",
            GateError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            GateError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Client-facing message. 5xx variants log their reason and return a
    /// generic string instead.
    fn client_message(&self) -> String {
        match self {
            GateError::TooManyRequests => "Too many requests. Please try again later.".to_string(),
            GateError::RegionBlocked => "Access from your region is not permitted".to_string(),
            GateError::AuthRequired => "Authentication required".to_string(),
            GateError::InvalidScheme => "Invalid authentication scheme".to_string(),
            GateError::InvalidToken => "The access token is invalid".to_string(),
            GateError::ExpiredToken => "The access token has expired".to_string(),
            GateError::MalformedEmail => "Invalid email format".to_string(),
            GateError::NotAuthorized => "User not authorized".to_string(),
            GateError::SecondFactorRequired => "Two-factor authentication required".to_string(),
            GateError::AntiForgeryRejected => "Anti-forgery token missing or invalid".to_string(),
            GateError::SessionInvalid => "Session is invalid or expired".to_string(),
            GateError::KeyServiceUnavailable(reason) => {
                tracing::error!(target: "gatekeeper.errors", reason = %reason, "Signing keys unavailable");
                "Authentication system unavailable".to_string()
            }
            GateError::DirectoryUnavailable(reason) => {
                tracing::warn!(target: "gatekeeper.errors", reason = %reason, "Directory unavailable");
                "Service temporarily unavailable".to_string()
            }
            GateError::ServiceMisconfigured(reason) => {
                tracing::error!(target: "gatekeeper.errors", reason = %reason, "Service misconfigured");
                "An internal error occurred".to_string()
            }
            GateError::ServiceUnavailable(reason) => {
                tracing::warn!(target: "gatekeeper.errors", reason = %reason, "Service unavailable");
                "Service temporarily unavailable".to_string()
            }
            GateError::Internal(reason) => {
                tracing::error!(target: "gatekeeper.errors", reason = %reason, "Internal error");
                "An internal error occurred".to_string()
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message: self.client_message(),
            },
        };

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) =
                "Bearer realm=\"gatekeeper\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, header_value);
            }
        }

        response
    }
}
