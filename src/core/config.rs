//! # Configuration Module
//!
//! Gateway configuration: YAML file parsing with serde, `GATEWAY_*`
//! environment variable overrides, and startup validation with collected
//! error messages. Configuration is read-only after initialization and
//! injected into components at construction; nothing re-reads it per request.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::core::error::{GatewayError, GatewayResult};

/// Main gateway configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Server configuration (bind address, port, API prefix)
    pub server: ServerConfig,

    /// Shared counter store used by the rate limiter
    pub redis: RedisConfig,

    /// Rate limiting windows and per-class budgets
    pub rate_limit: RateLimitConfig,

    /// Identity provider and route authorization policy
    pub auth: AuthConfig,

    /// Upstream service configurations, keyed by service name
    pub backends: HashMap<String, BackendConfig>,

    /// Degraded-service policies for proxied routes
    pub degraded: DegradedModeConfig,

    /// CORS settings
    pub cors: CorsConfig,

    /// Logging and metrics settings
    pub observability: ObservabilityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let mut backends = HashMap::new();
        backends.insert("product".to_string(), BackendConfig::default());

        Self {
            server: ServerConfig::default(),
            redis: RedisConfig::default(),
            rate_limit: RateLimitConfig::default(),
            auth: AuthConfig::default(),
            backends,
            degraded: DegradedModeConfig::default(),
            cors: CorsConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the listener to
    pub bind_address: String,

    /// HTTP port
    pub port: u16,

    /// Prefix under which proxied routes are mounted
    pub api_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
            api_prefix: "/api".to_string(),
        }
    }
}

/// Shared counter store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection URL for the shared store
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://redis:6379/0".to_string(),
        }
    }
}

/// Per-class limit multipliers applied to the base request budget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassMultipliers {
    pub admin: f64,
    pub service: f64,
    pub authenticated: f64,
    pub anonymous: f64,
}

impl Default for ClassMultipliers {
    fn default() -> Self {
        Self {
            admin: 5.0,
            service: 10.0,
            authenticated: 1.0,
            anonymous: 0.5,
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Base number of requests allowed per window (for the default class)
    pub requests_per_window: u32,

    /// Duration of the rate limiting window
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Key prefix in the shared store
    pub key_prefix: String,

    /// Per-class budget multipliers
    pub class_multipliers: ClassMultipliers,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 100,
            window: Duration::from_secs(60),
            key_prefix: "rate_limit".to_string(),
            class_multipliers: ClassMultipliers::default(),
        }
    }
}

/// Authorization requirement for a group of routes
///
/// An empty `required_roles` list is the explicit any-authenticated policy:
/// the request must carry a valid token but no particular role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutePolicy {
    /// HTTP methods this policy applies to
    pub methods: Vec<String>,

    /// Path prefix this policy applies to
    pub path_prefix: String,

    /// Roles of which at least one must be held
    #[serde(default)]
    pub required_roles: Vec<String>,
}

/// Identity provider and authorization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Base URL of the OIDC identity provider
    pub oidc_url: String,

    /// Realm to verify tokens against
    pub realm: String,

    /// Client identifier presented to the provider
    pub client_id: String,

    /// Expected token audience; when unset, audience validation is skipped
    pub audience: Option<String>,

    /// Path prefixes that bypass authentication and authorization entirely
    pub public_paths: Vec<String>,

    /// Maximum age of the cached provider public key before refetch
    #[serde(with = "humantime_serde")]
    pub public_key_max_age: Duration,

    /// Timeout for calls to the identity provider
    #[serde(with = "humantime_serde")]
    pub provider_timeout: Duration,

    /// Per-route role requirements, first match wins
    pub route_policies: Vec<RoutePolicy>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            oidc_url: "http://keycloak:8080/auth".to_string(),
            realm: "retail".to_string(),
            client_id: "retail-gateway".to_string(),
            audience: None,
            public_paths: vec!["/health".to_string(), "/metrics".to_string()],
            public_key_max_age: Duration::from_secs(300),
            provider_timeout: Duration::from_secs(5),
            route_policies: vec![
                RoutePolicy {
                    methods: vec!["POST".to_string(), "PUT".to_string(), "PATCH".to_string()],
                    path_prefix: "/api/products".to_string(),
                    required_roles: vec!["admin".to_string(), "store_manager".to_string()],
                },
                RoutePolicy {
                    methods: vec!["DELETE".to_string()],
                    path_prefix: "/api/products".to_string(),
                    required_roles: vec!["admin".to_string()],
                },
            ],
        }
    }
}

impl AuthConfig {
    /// Check if a path matches one of the configured public prefixes
    pub fn is_public_path(&self, path: &str) -> bool {
        self.public_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Look up the role requirement for a method + path, if any policy matches
    pub fn required_roles_for(&self, method: &str, path: &str) -> Option<&[String]> {
        self.route_policies
            .iter()
            .find(|policy| {
                policy.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
                    && path.starts_with(policy.path_prefix.as_str())
            })
            .map(|policy| policy.required_roles.as_slice())
    }
}

/// Retry behavior for backend calls
///
/// Transport failures are not retried unless `max_attempts` is raised above
/// zero; HTTP-level errors are never retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Number of retries after the initial attempt
    pub max_attempts: u32,

    /// Base delay before the first retry
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,

    /// Multiplier applied to the delay for each subsequent retry
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            backoff_base: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        }
    }
}

/// A single upstream service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL requests are proxied to
    pub base_url: String,

    /// Timeout covering connect and read for a single call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Retry policy for transport failures
    pub retry: RetryConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://product-service:8001/api".to_string(),
            timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }
}

/// Degraded-service policies
///
/// When a named policy is enabled, the corresponding read endpoints substitute
/// a fixed fallback payload for `ServiceUnavailable`/`NotFound` backend
/// results instead of propagating the error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradedModeConfig {
    /// Serve the static product payload when product reads fail
    pub product_read_fallback: bool,
}

/// CORS settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins; `*` allows any
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level filter when RUST_LOG is unset
    pub level: String,

    /// Output format: "json" or "pretty"
    pub format: String,

    /// Paths excluded from per-request start/completion logs
    pub exclude_paths: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            exclude_paths: vec!["/health".to_string(), "/metrics".to_string()],
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether the Prometheus endpoint is exposed
    pub enabled: bool,

    /// Path the scrape endpoint is mounted at
    pub endpoint_path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint_path: "/metrics".to_string(),
        }
    }
}

/// Observability settings (logging + metrics)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl GatewayConfig {
    /// Load configuration from a YAML file, apply environment overrides,
    /// and validate.
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file: {e}")))?;

        let mut config: GatewayConfig = serde_yaml::from_str(&content)
            .map_err(|e| GatewayError::config(format!("Failed to parse config: {e}")))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from defaults plus environment overrides only
    ///
    /// Used when no config file is supplied; mirrors the env-driven settings
    /// the deployment environment provides.
    pub fn from_env() -> GatewayResult<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Variables follow the pattern `GATEWAY_<SECTION>_<FIELD>`, e.g.
    /// `GATEWAY_SERVER_PORT=8080`.
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        use std::env;

        if let Ok(addr) = env::var("GATEWAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Ok(port) = env::var("GATEWAY_SERVER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_SERVER_PORT: {e}")))?;
        }

        if let Ok(url) = env::var("GATEWAY_REDIS_URL") {
            self.redis.url = url;
        }

        if let Ok(limit) = env::var("GATEWAY_RATE_LIMIT_PER_WINDOW") {
            self.rate_limit.requests_per_window = limit.parse().map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_RATE_LIMIT_PER_WINDOW: {e}"))
            })?;
        }

        if let Ok(window) = env::var("GATEWAY_RATE_LIMIT_WINDOW") {
            self.rate_limit.window = humantime::parse_duration(&window).map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_RATE_LIMIT_WINDOW: {e}"))
            })?;
        }

        if let Ok(url) = env::var("GATEWAY_OIDC_URL") {
            self.auth.oidc_url = url;
        }

        if let Ok(realm) = env::var("GATEWAY_KEYCLOAK_REALM") {
            self.auth.realm = realm;
        }

        if let Ok(client_id) = env::var("GATEWAY_KEYCLOAK_CLIENT_ID") {
            self.auth.client_id = client_id;
        }

        if let Ok(audience) = env::var("GATEWAY_AUTH_AUDIENCE") {
            self.auth.audience = Some(audience);
        }

        if let Ok(url) = env::var("GATEWAY_PRODUCT_SERVICE_URL") {
            self.backends
                .entry("product".to_string())
                .or_default()
                .base_url = url;
        }

        if let Ok(enabled) = env::var("GATEWAY_PRODUCT_READ_FALLBACK") {
            self.degraded.product_read_fallback = enabled.parse().map_err(|e| {
                GatewayError::config(format!("Invalid GATEWAY_PRODUCT_READ_FALLBACK: {e}"))
            })?;
        }

        if let Ok(level) = env::var("GATEWAY_LOG_LEVEL") {
            self.observability.logging.level = level;
        }

        if let Ok(format) = env::var("GATEWAY_LOG_FORMAT") {
            self.observability.logging.format = format;
        }

        Ok(())
    }

    /// Validate the configuration, collecting every problem into one error
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        if self.server.bind_address.is_empty() {
            errors.push("bind_address cannot be empty".to_string());
        }

        if self.server.port == 0 {
            errors.push("server port must be non-zero".to_string());
        }

        if !self.server.api_prefix.starts_with('/') {
            errors.push("api_prefix must start with '/'".to_string());
        }

        if self.rate_limit.requests_per_window == 0 {
            errors.push("rate_limit.requests_per_window must be greater than 0".to_string());
        }

        if self.rate_limit.window.as_secs() == 0 {
            errors.push("rate_limit.window must be at least one second".to_string());
        }

        let multipliers = &self.rate_limit.class_multipliers;
        for (name, value) in [
            ("admin", multipliers.admin),
            ("service", multipliers.service),
            ("authenticated", multipliers.authenticated),
            ("anonymous", multipliers.anonymous),
        ] {
            if value <= 0.0 {
                errors.push(format!("class multiplier '{name}' must be positive"));
            }
        }

        if Url::parse(&self.auth.oidc_url).is_err() {
            errors.push(format!("invalid oidc_url '{}'", self.auth.oidc_url));
        }

        if self.auth.realm.is_empty() {
            errors.push("auth.realm cannot be empty".to_string());
        }

        if self.backends.is_empty() {
            errors.push("at least one backend must be configured".to_string());
        }

        for (name, backend) in &self.backends {
            if Url::parse(&backend.base_url).is_err() {
                errors.push(format!(
                    "backend '{}' has invalid base_url '{}'",
                    name, backend.base_url
                ));
            }
            if backend.timeout.as_millis() == 0 {
                errors.push(format!("backend '{name}' timeout must be greater than 0"));
            }
        }

        for policy in &self.auth.route_policies {
            if policy.methods.is_empty() {
                errors.push(format!(
                    "route policy for '{}' has no HTTP methods",
                    policy.path_prefix
                ));
            }
            if policy.path_prefix.is_empty() {
                errors.push("route policy has empty path_prefix".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::config(errors.join("; ")))
        }
    }

    /// Look up a backend by name
    pub fn backend(&self, name: &str) -> GatewayResult<&BackendConfig> {
        self.backends
            .get(name)
            .ok_or_else(|| GatewayError::config(format!("unknown backend '{name}'")))
    }
}

impl RateLimitConfig {
    /// Effective budget for a client class: base limit scaled by the class
    /// multiplier, never below one.
    pub fn limit_for(&self, class: crate::core::types::ClientClass) -> u32 {
        use crate::core::types::ClientClass;

        let multiplier = match class {
            ClientClass::Admin => self.class_multipliers.admin,
            ClientClass::Service => self.class_multipliers.service,
            ClientClass::Authenticated => self.class_multipliers.authenticated,
            ClientClass::Anonymous => self.class_multipliers.anonymous,
        };

        ((self.requests_per_window as f64 * multiplier) as u32).max(1)
    }
}
