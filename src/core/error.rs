//! # Error Handling Module
//!
//! This module defines the gateway-wide error taxonomy using the `thiserror` crate,
//! along with the mapping from each error category to the HTTP status code and
//! structured `{"detail": ...}` body returned to clients.
//!
//! Every pipeline stage converts its failures into a [`GatewayError`] at its own
//! boundary; the dispatcher turns the error into exactly one terminal response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::convert::Infallible;
use thiserror::Error;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Gateway error taxonomy
///
/// Each variant represents a distinct failure category with its own HTTP
/// mapping. Authentication failures are deliberately split three ways:
/// a malformed credential, an invalid credential, and an unreachable identity
/// provider all surface as 401, but the provider case is logged separately
/// because it indicates infrastructure trouble rather than a bad token.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// The Authorization header is missing or not of the form `Bearer <token>`
    #[error("Not authenticated: {reason}")]
    AuthMalformed { reason: String },

    /// The bearer token failed signature, audience, or expiry validation
    #[error("Invalid authentication token: {reason}")]
    AuthInvalid { reason: String },

    /// The identity provider could not be reached to verify the token
    #[error("Identity provider unavailable: {reason}")]
    AuthProviderUnavailable { reason: String },

    /// The authenticated identity lacks the roles required for the route
    #[error("Insufficient permissions")]
    Forbidden { required_roles: Vec<String> },

    /// The client exhausted its request budget for the current window
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimitExceeded { limit: u32, retry_after_secs: u64 },

    /// The backend could not be reached (connection refused, timeout, DNS)
    #[error("{service} service unavailable: {reason}")]
    BackendUnavailable { service: String, reason: String },

    /// The backend answered 404 for the requested resource
    #[error("{detail}")]
    BackendNotFound { detail: String },

    /// The backend rejected the request as malformed (400)
    #[error("{detail}")]
    BackendBadRequest { detail: String },

    /// The backend rejected the gateway's forwarded credentials (401/403)
    #[error("Unauthorized access to {service} service")]
    UpstreamUnauthorized { service: String, status: u16 },

    /// Any other non-2xx backend response, surfaced as a bad gateway
    #[error("{service} service error: {detail}")]
    UpstreamError { service: String, detail: String },

    /// A 2xx backend response whose body could not be decoded
    #[error("Invalid response from {service} service: {reason}")]
    DecodeError { service: String, reason: String },

    /// Configuration-related errors (invalid config, missing values, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Unexpected internal faults; details are logged, not returned
    #[error("Internal server error")]
    Internal { message: String },
}

impl GatewayError {
    /// Create a malformed-credential error
    pub fn auth_malformed<S: Into<String>>(reason: S) -> Self {
        Self::AuthMalformed {
            reason: reason.into(),
        }
    }

    /// Create an invalid-token error
    pub fn auth_invalid<S: Into<String>>(reason: S) -> Self {
        Self::AuthInvalid {
            reason: reason.into(),
        }
    }

    /// Create a provider-unavailable error
    pub fn provider_unavailable<S: Into<String>>(reason: S) -> Self {
        Self::AuthProviderUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a backend-unavailable error for the named service
    pub fn backend_unavailable<S: Into<String>>(service: S, reason: S) -> Self {
        Self::BackendUnavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    ///
    /// The message is logged with full detail but never returned to the caller.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the HTTP status code this error maps to at the boundary
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthMalformed { .. } => StatusCode::UNAUTHORIZED,
            Self::AuthInvalid { .. } => StatusCode::UNAUTHORIZED,
            Self::AuthProviderUnavailable { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::BackendNotFound { .. } => StatusCode::NOT_FOUND,
            Self::BackendBadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::UpstreamUnauthorized { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::UNAUTHORIZED)
            }
            Self::UpstreamError { .. } => StatusCode::BAD_GATEWAY,
            Self::DecodeError { .. } => StatusCode::BAD_GATEWAY,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a stable string identifier for this error category
    ///
    /// Used as a metrics label and in structured logs.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::AuthMalformed { .. } => "auth_malformed",
            Self::AuthInvalid { .. } => "auth_invalid",
            Self::AuthProviderUnavailable { .. } => "auth_provider_unavailable",
            Self::Forbidden { .. } => "forbidden",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::BackendNotFound { .. } => "backend_not_found",
            Self::BackendBadRequest { .. } => "backend_bad_request",
            Self::UpstreamUnauthorized { .. } => "upstream_unauthorized",
            Self::UpstreamError { .. } => "upstream_error",
            Self::DecodeError { .. } => "decode_error",
            Self::Configuration { .. } => "configuration_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Check if a backend call failing with this error may be retried
    ///
    /// Only transport-level failures are transient; credential and client
    /// errors are permanent for the lifetime of the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }

    /// Whether this is one of the 401 authentication failures that must carry
    /// a `WWW-Authenticate: Bearer` challenge header
    pub fn is_auth_challenge(&self) -> bool {
        matches!(
            self,
            Self::AuthMalformed { .. }
                | Self::AuthInvalid { .. }
                | Self::AuthProviderUnavailable { .. }
        )
    }

    /// The `detail` string exposed to clients
    ///
    /// Internal faults return a generic message; everything else uses the
    /// Display form.
    pub fn detail(&self) -> String {
        match self {
            Self::Internal { .. } | Self::Configuration { .. } => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<Infallible> for GatewayError {
    fn from(infallible: Infallible) -> Self {
        match infallible {}
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal {
            message: format!("JSON error: {err}"),
        }
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Configuration {
            message: format!("YAML error: {err}"),
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal {
            message: format!("I/O error: {err}"),
        }
    }
}

/// Convert errors into HTTP responses with the `{"detail": "..."}` body shape
/// the backends and clients already speak.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({ "detail": self.detail() });

        let mut response = (status, Json(body)).into_response();
        if self.is_auth_challenge() {
            response
                .headers_mut()
                .insert("www-authenticate", "Bearer".parse().expect("static header"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            GatewayError::auth_malformed("missing header").status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::Forbidden {
                required_roles: vec!["admin".to_string()]
            }
            .status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            GatewayError::RateLimitExceeded {
                limit: 100,
                retry_after_secs: 60
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::backend_unavailable("product", "connection refused").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::UpstreamError {
                service: "product".to_string(),
                detail: "boom".to_string()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_upstream_unauthorized_preserves_status() {
        let err = GatewayError::UpstreamUnauthorized {
            service: "product".to_string(),
            status: 403,
        };
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(GatewayError::backend_unavailable("product", "timed out").is_retryable());
        assert!(!GatewayError::auth_invalid("expired").is_retryable());
        assert!(!GatewayError::BackendNotFound {
            detail: "missing".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_internal_detail_is_generic() {
        let err = GatewayError::internal("connection pool exhausted: secret-host:5432");
        assert_eq!(err.detail(), "Internal server error");
        assert_eq!(err.error_type(), "internal_error");
    }

    #[test]
    fn test_auth_challenge_classification() {
        assert!(GatewayError::auth_malformed("no header").is_auth_challenge());
        assert!(GatewayError::provider_unavailable("conn refused").is_auth_challenge());
        assert!(!GatewayError::Forbidden {
            required_roles: vec![]
        }
        .is_auth_challenge());
    }

    #[test]
    fn test_backend_unavailable_detail_shape() {
        let err = GatewayError::backend_unavailable("product", "operation timed out");
        assert_eq!(
            err.detail(),
            "product service unavailable: operation timed out"
        );
    }
}
