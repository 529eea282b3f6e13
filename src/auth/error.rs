use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

/// Request-time authorization failures.
///
/// The `Display` text may carry internal detail and is meant for logs only.
/// Responses use a fixed message per variant.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No credential on a path that requires one
    #[error("Authentication credentials required")]
    MissingCredentials,

    /// Bad signature, wrong algorithm or malformed claims
    #[error("Invalid authentication token")]
    InvalidToken,

    /// Token signature is valid but `exp` has passed
    #[error("Authentication token has expired")]
    ExpiredToken,

    /// Authenticated identity is not allowed on this path
    #[error("Access forbidden")]
    Forbidden,

    /// Callback request without `code` or `state`, or with an IdP error
    #[error("Invalid OAuth2 callback")]
    InvalidCallback,

    /// Callback `state` does not resolve to a protected path
    #[error("Unknown OAuth2 state")]
    UnknownState,

    /// The IdP rejected or failed the code / JWT exchange
    #[error("Token exchange failed: {0}")]
    Exchange(String),

    /// Internal error during authorization
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Whether the session cookie should be removed after this failure.
    ///
    /// Policy denials keep the cookie: the user is authenticated, just not
    /// for this resource.
    pub fn clears_session(&self) -> bool {
        matches!(self, AuthError::InvalidToken | AuthError::ExpiredToken)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingCredentials
            | AuthError::InvalidToken
            | AuthError::ExpiredToken
            | AuthError::InvalidCallback
            | AuthError::Exchange(_) => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::UnknownState | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (error_type, code, message) = match &self {
            AuthError::MissingCredentials => (
                "authentication_error",
                "missing_credentials",
                "Authentication credentials required",
            ),
            AuthError::InvalidToken => (
                "authentication_error",
                "invalid_token",
                "Invalid authentication token",
            ),
            AuthError::ExpiredToken => (
                "authentication_error",
                "expired_token",
                "Authentication token has expired",
            ),
            AuthError::Forbidden => (
                "permission_error",
                "forbidden",
                "You are not allowed to access this resource",
            ),
            AuthError::InvalidCallback => (
                "authentication_error",
                "invalid_callback",
                "Invalid login callback",
            ),
            AuthError::UnknownState => (
                "server_error",
                "unknown_state",
                "Login callback does not match a protected path",
            ),
            AuthError::Exchange(detail) => {
                tracing::error!(error = %detail, "Token exchange with the identity provider failed");
                ("authentication_error", "exchange_failed", "Login failed")
            }
            AuthError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal authorization error");
                ("server_error", "internal_error", "Internal server error")
            }
        };

        let body = ErrorResponse::new(error_type, code, message);
        (self.status(), Json(body)).into_response()
    }
}

/// JSON error body: `{"error": {"type": "...", "code": "...", "message": "..."}}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub error_type: String,
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(
        error_type: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorInfo {
                error_type: error_type.into(),
                code: code.into(),
                message: message.into(),
            },
        }
    }
}
