//! # Core Types Module
//!
//! Foundational data structures shared across the gateway: the unified
//! request/response representation the pipeline operates on, the per-request
//! mutable context, and the authenticated identity extracted from verified
//! tokens.

use axum::http::{HeaderMap, Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::core::error::GatewayError;

/// Represents an inbound request before pipeline processing
///
/// This is the unified request type every pipeline stage and route handler
/// works with, decoupled from the server framework so stages can be tested
/// without a running listener.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    /// HTTP method (GET, POST, etc.)
    pub method: Method,

    /// Request URI including path and query parameters
    pub uri: Uri,

    /// Request headers
    pub headers: HeaderMap,

    /// Request body as bytes
    /// Arc avoids copying large payloads when cloning the request
    pub body: Arc<Vec<u8>>,

    /// Client's remote address
    pub remote_addr: SocketAddr,

    /// Timestamp when the request was received
    pub received_at: Instant,
}

impl IncomingRequest {
    /// Create a new incoming request
    pub fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Vec<u8>,
        remote_addr: SocketAddr,
    ) -> Self {
        Self {
            method,
            uri,
            headers,
            body: Arc::new(body),
            remote_addr,
            received_at: Instant::now(),
        }
    }

    /// Get the request path without query parameters
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Get query parameters as a string
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Get a header value by name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Extract the bearer token from the Authorization header
    ///
    /// Returns an error distinguishing a missing header from a header that is
    /// present but not of the `Bearer <token>` form.
    pub fn bearer_token(&self) -> Result<&str, GatewayError> {
        let header = self
            .header("authorization")
            .ok_or_else(|| GatewayError::auth_malformed("missing Authorization header"))?;

        header
            .strip_prefix("Bearer ")
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                GatewayError::auth_malformed("Authorization header is not a bearer token")
            })
    }

    /// Resolve the client IP: first entry of `X-Forwarded-For` when present,
    /// otherwise the peer address.
    pub fn client_ip(&self) -> String {
        self.header("x-forwarded-for")
            .and_then(|value| value.split(',').next())
            .map(|ip| ip.trim().to_string())
            .unwrap_or_else(|| self.remote_addr.ip().to_string())
    }

    /// Parse the request body as JSON
    pub fn json_body(&self) -> Result<serde_json::Value, GatewayError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| GatewayError::BackendBadRequest {
                detail: format!("Invalid JSON body: {e}"),
            })
    }
}

/// Response produced by the pipeline for a single request
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    /// HTTP status code
    pub status: StatusCode,

    /// Response headers
    pub headers: HeaderMap,

    /// Response body
    pub body: Arc<Vec<u8>>,
}

impl GatewayResponse {
    /// Create a new response
    pub fn new(status: StatusCode, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body: Arc::new(body),
        }
    }

    /// Create a JSON response
    pub fn json<T: Serialize>(status: StatusCode, data: &T) -> Result<Self, serde_json::Error> {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().expect("static"));
        let body = serde_json::to_vec(data)?;
        Ok(Self::new(status, headers, body))
    }

    /// Build the structured error response for a pipeline failure
    ///
    /// Produces the `{"detail": "..."}` body, and the `WWW-Authenticate: Bearer`
    /// challenge on authentication failures.
    pub fn from_error(error: &GatewayError) -> Self {
        let body = serde_json::json!({ "detail": error.detail() });
        let mut response = Self::json(error.status_code(), &body).unwrap_or_else(|_| {
            Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                HeaderMap::new(),
                b"Internal server error".to_vec(),
            )
        });
        if error.is_auth_challenge() {
            response
                .headers
                .insert("www-authenticate", "Bearer".parse().expect("static"));
        }
        response
    }
}

impl axum::response::IntoResponse for GatewayResponse {
    fn into_response(self) -> axum::response::Response {
        let body = self.body.as_ref().clone();
        let mut response = axum::response::Response::new(axum::body::Body::from(body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Keycloak-style realm role container
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealmAccess {
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Audience claim: the provider emits either a single string or a list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

/// Typed claim set extracted from a verified token
///
/// Explicit optional fields rather than an open-ended map; claims the gateway
/// does not use are dropped at decode time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
    #[serde(default)]
    pub iat: Option<u64>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<Audience>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub realm_access: Option<RealmAccess>,
    /// Space-separated scope string, per the OAuth2 convention
    #[serde(default)]
    pub scope: Option<String>,
}

/// Result of successful token verification
///
/// Immutable once constructed; lives only for the request's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Subject identifier from the token
    pub subject: String,

    /// Realm roles for authorization decisions
    pub roles: Vec<String>,

    /// OAuth2 scopes granted to the token
    pub scopes: Vec<String>,

    /// The full typed claim set the identity was built from
    pub claims: Claims,
}

impl Identity {
    /// Build an identity from a verified claim set
    pub fn from_claims(claims: Claims) -> Self {
        let roles = claims
            .realm_access
            .as_ref()
            .map(|access| access.roles.clone())
            .unwrap_or_default();
        let scopes = claims
            .scope
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Self {
            subject: claims.sub.clone(),
            roles,
            scopes,
            claims,
        }
    }

    /// Check if the identity holds a specific role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Check if the identity holds at least one of the given roles
    pub fn has_any_role(&self, roles: &[String]) -> bool {
        roles.iter().any(|role| self.has_role(role))
    }

    /// Check if the identity holds a specific scope
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Client classification used to select the rate-limit budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientClass {
    Admin,
    Service,
    Authenticated,
    Anonymous,
}

impl ClientClass {
    /// Derive the class from an identity, if any
    pub fn from_identity(identity: Option<&Identity>) -> Self {
        match identity {
            Some(identity) if identity.has_role("admin") => Self::Admin,
            Some(identity) if identity.has_role("service") => Self::Service,
            Some(_) => Self::Authenticated,
            None => Self::Anonymous,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Service => "service",
            Self::Authenticated => "authenticated",
            Self::Anonymous => "anonymous",
        }
    }
}

impl fmt::Display for ClientClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request mutable context that flows through the pipeline
///
/// Created at pipeline entry and owned exclusively by the in-flight request's
/// handling path; stages mutate it in order and it is dropped when the
/// response is sent.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique request identifier, taken from `X-Request-ID` or generated
    pub request_id: String,

    /// Request start time for latency measurement
    pub start_time: Instant,

    /// Resolved client IP
    pub client_ip: String,

    /// Raw bearer token, set by the auth stage before verification
    pub bearer_token: Option<String>,

    /// Authenticated identity, set after successful verification
    pub identity: Option<Arc<Identity>>,

    /// Headers accumulated by stages (rate-limit metadata and the like);
    /// attached to the terminal response even when a stage short-circuits
    pub response_headers: HeaderMap,
}

impl RequestContext {
    /// Create a context for an inbound request, reusing the caller-supplied
    /// request ID when present.
    pub fn new(request: &IncomingRequest) -> Self {
        let request_id = request
            .header("x-request-id")
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            request_id,
            start_time: Instant::now(),
            client_ip: request.client_ip(),
            bearer_token: None,
            identity: None,
            response_headers: HeaderMap::new(),
        }
    }

    /// Get elapsed time since the request entered the pipeline
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Record the authenticated identity
    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(Arc::new(identity));
    }

    /// Client class for rate limiting, derived from the current identity
    pub fn client_class(&self) -> ClientClass {
        ClientClass::from_identity(self.identity.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with_headers(headers: HeaderMap) -> IncomingRequest {
        IncomingRequest::new(
            Method::GET,
            "/api/products".parse().unwrap(),
            headers,
            Vec::new(),
            "10.0.0.7:55123".parse().unwrap(),
        )
    }

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer abc.def.ghi".parse().unwrap());
        let request = request_with_headers(headers);
        assert_eq!(request.bearer_token().unwrap(), "abc.def.ghi");
    }

    #[test]
    fn test_bearer_token_missing_header() {
        let request = request_with_headers(HeaderMap::new());
        let err = request.bearer_token().unwrap_err();
        assert_eq!(err.error_type(), "auth_malformed");
    }

    #[test]
    fn test_bearer_token_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Basic dXNlcjpwYXNz".parse().unwrap());
        let request = request_with_headers(headers);
        assert_eq!(
            request.bearer_token().unwrap_err().error_type(),
            "auth_malformed"
        );
    }

    #[test]
    fn test_client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        let request = request_with_headers(headers);
        assert_eq!(request.client_ip(), "203.0.113.9");
    }

    #[test]
    fn test_client_ip_falls_back_to_peer() {
        let request = request_with_headers(HeaderMap::new());
        assert_eq!(request.client_ip(), "10.0.0.7");
    }

    #[test]
    fn test_request_context_reuses_request_id() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "req-123".parse().unwrap());
        let request = request_with_headers(headers);
        let ctx = RequestContext::new(&request);
        assert_eq!(ctx.request_id, "req-123");
    }

    #[test]
    fn test_request_context_generates_request_id() {
        let request = request_with_headers(HeaderMap::new());
        let ctx = RequestContext::new(&request);
        assert!(!ctx.request_id.is_empty());
        assert!(Uuid::parse_str(&ctx.request_id).is_ok());
    }

    #[test]
    fn test_identity_from_claims() {
        let claims = Claims {
            sub: "alice".to_string(),
            exp: 4102444800,
            iat: None,
            iss: None,
            aud: None,
            preferred_username: Some("alice".to_string()),
            realm_access: Some(RealmAccess {
                roles: vec!["admin".to_string(), "customer".to_string()],
            }),
            scope: Some("openid profile".to_string()),
        };

        let identity = Identity::from_claims(claims);
        assert_eq!(identity.subject, "alice");
        assert!(identity.has_role("admin"));
        assert!(!identity.has_role("service"));
        assert!(identity.has_scope("profile"));
        assert!(identity.has_any_role(&["admin".to_string(), "store_manager".to_string()]));
    }

    #[test]
    fn test_client_class_derivation() {
        assert_eq!(ClientClass::from_identity(None), ClientClass::Anonymous);

        let base = Claims {
            sub: "svc".to_string(),
            exp: 4102444800,
            iat: None,
            iss: None,
            aud: None,
            preferred_username: None,
            realm_access: Some(RealmAccess {
                roles: vec!["service".to_string()],
            }),
            scope: None,
        };
        let identity = Identity::from_claims(base);
        assert_eq!(
            ClientClass::from_identity(Some(&identity)),
            ClientClass::Service
        );
    }

    #[test]
    fn test_audience_accepts_string_or_list() {
        let one: Claims =
            serde_json::from_value(serde_json::json!({"sub": "a", "exp": 1, "aud": "gateway"}))
                .unwrap();
        assert!(matches!(one.aud, Some(Audience::One(_))));

        let many: Claims = serde_json::from_value(
            serde_json::json!({"sub": "a", "exp": 1, "aud": ["gateway", "account"]}),
        )
        .unwrap();
        assert!(matches!(many.aud, Some(Audience::Many(_))));
    }
}
