//! Authentication error types.

use thiserror::Error;

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Non-200 response from the identity provider's token endpoint
    #[error("Token request failed: {status} - {body}")]
    TokenExchange { status: u16, body: String },

    /// Refresh token revoked or expired; a full re-authentication is required
    #[error("Token refresh failed - reauthentication required")]
    AuthenticationExpired,

    /// No stored code verifier for the given flow id
    #[error("Code verifier not found for flow {0}")]
    FlowNotFound(String),

    /// Authorization code input reduced to nothing after sanitization
    #[error("Authorization code is empty after parsing")]
    EmptyCode,

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Vendor API error
    #[error("API error: {0}")]
    Api(String),

    /// Expected field absent from a provider response
    #[error("Missing field in response: {0}")]
    MissingField(&'static str),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
