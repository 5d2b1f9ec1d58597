//! # Backend Service Client
//!
//! Outbound calls to named backend services with timeout enforcement,
//! header forwarding, optional retry with exponential backoff, and mapping
//! of failures onto the gateway error taxonomy.
//!
//! A call yields exactly one of: a decoded JSON payload, or a classified
//! error. Transport failures (connection refused, timeout, DNS) classify as
//! `BackendUnavailable` and are the only retryable category; HTTP-level
//! errors map per status code and are never retried.

use axum::http::Method;
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::core::config::{BackendConfig, RetryConfig};
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::RequestContext;

/// Per-call options beyond method and path
#[derive(Default)]
pub struct CallOptions<'a> {
    /// Request context whose bearer token and request ID are forwarded
    pub context: Option<&'a RequestContext>,
    /// Raw query string to append to the target URL
    pub query: Option<&'a str>,
    /// JSON body to send
    pub json: Option<&'a Value>,
    /// Override for the client's default timeout
    pub timeout: Option<Duration>,
}

/// Degraded-service policy a route applies to its backend call result
///
/// `StaticPayload` substitutes the fixed payload when the backend is
/// unavailable or reports the resource missing; every other error still
/// propagates. The substitution is logged so degraded responses are visible
/// in operations, never silent.
#[derive(Debug, Clone)]
pub enum FallbackPolicy {
    /// Propagate classified backend errors unchanged
    Propagate,
    /// Serve this payload for `BackendUnavailable`/`BackendNotFound` results
    StaticPayload(Arc<Value>),
}

impl FallbackPolicy {
    pub fn apply(&self, result: GatewayResult<Value>) -> GatewayResult<Value> {
        match (self, result) {
            (Self::StaticPayload(payload), Err(error))
                if matches!(
                    error,
                    GatewayError::BackendUnavailable { .. } | GatewayError::BackendNotFound { .. }
                ) =>
            {
                info!(
                    error_type = error.error_type(),
                    "Backend degraded, serving fallback payload"
                );
                metrics::counter!("gateway_fallback_served_total").increment(1);
                Ok(payload.as_ref().clone())
            }
            (_, result) => result,
        }
    }
}

/// Compute the delay before retry number `attempt` (zero-based)
fn backoff_delay(retry: &RetryConfig, attempt: u32) -> Duration {
    let base = retry.backoff_base.as_millis() as f64
        * retry.backoff_multiplier.powi(attempt as i32);
    let jitter = rand::thread_rng().gen_range(0.0..=0.1) * base;
    Duration::from_millis((base + jitter) as u64)
}

/// Client for one named backend service
///
/// Stateless per call; the underlying `reqwest::Client` connection pool is
/// shared process-wide and injected at construction.
pub struct ServiceClient {
    service_name: String,
    base_url: String,
    timeout: Duration,
    retry: RetryConfig,
    http: reqwest::Client,
}

impl ServiceClient {
    pub fn new(service_name: impl Into<String>, config: &BackendConfig, http: reqwest::Client) -> Self {
        let service_name = service_name.into();
        info!(
            service = %service_name,
            base_url = %config.base_url,
            "Initialized backend client"
        );
        Self {
            service_name,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
            retry: config.retry.clone(),
            http,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Make a request to the backend, retrying transport failures per the
    /// configured policy.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        options: CallOptions<'_>,
    ) -> GatewayResult<Value> {
        let mut attempt = 0;
        loop {
            match self.execute_once(&method, path, &options).await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = backoff_delay(&self.retry, attempt);
                    warn!(
                        service = %self.service_name,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying backend call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn execute_once(
        &self,
        method: &Method,
        path: &str,
        options: &CallOptions<'_>,
    ) -> GatewayResult<Value> {
        let mut url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        if let Some(query) = options.query {
            if !query.is_empty() {
                url.push('?');
                url.push_str(query);
            }
        }

        let method = reqwest::Method::from_bytes(method.as_str().as_bytes())
            .map_err(|e| GatewayError::internal(format!("invalid method: {e}")))?;
        let timeout = options.timeout.unwrap_or(self.timeout);

        let mut builder = self
            .http
            .request(method.clone(), &url)
            .timeout(timeout)
            .header("x-service-client", &self.service_name);

        let request_id = options
            .context
            .map(|ctx| ctx.request_id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        builder = builder.header("x-request-id", &request_id);

        if let Some(token) = options.context.and_then(|ctx| ctx.bearer_token.as_deref()) {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }

        if let Some(json) = options.json {
            builder = builder.json(json);
        }

        debug!(
            service = %self.service_name,
            method = %method,
            url = %url,
            timeout_ms = timeout.as_millis() as u64,
            request_id = %request_id,
            "Calling backend"
        );

        let started = Instant::now();
        let response = builder.send().await.map_err(|error| {
            let reason = if error.is_timeout() {
                format!("request timed out after {}ms", timeout.as_millis())
            } else {
                error.to_string()
            };
            warn!(
                service = %self.service_name,
                url = %url,
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %reason,
                request_id = %request_id,
                "Backend transport failure"
            );
            GatewayError::BackendUnavailable {
                service: self.service_name.clone(),
                reason,
            }
        })?;

        let status = response.status();
        info!(
            service = %self.service_name,
            method = %method,
            path = path,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            request_id = %request_id,
            "Backend call completed"
        );

        if status.is_success() {
            let bytes = response.bytes().await.map_err(|e| GatewayError::DecodeError {
                service: self.service_name.clone(),
                reason: e.to_string(),
            })?;
            // 204-style empty bodies decode as null rather than an error
            if bytes.is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_slice(&bytes).map_err(|e| GatewayError::DecodeError {
                service: self.service_name.clone(),
                reason: e.to_string(),
            });
        }

        let detail = Self::extract_detail(response, &self.service_name).await;
        Err(self.classify_status(status.as_u16(), detail))
    }

    /// Pull the `detail` field out of an error body, falling back to a
    /// generic message when the body is not the expected shape.
    async fn extract_detail(response: reqwest::Response, service: &str) -> String {
        match response.json::<Value>().await {
            Ok(body) => body
                .get("detail")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| "Unknown error".to_string()),
            Err(_) => format!("Error from {service} service"),
        }
    }

    fn classify_status(&self, status: u16, detail: String) -> GatewayError {
        match status {
            404 => GatewayError::BackendNotFound { detail },
            400 => GatewayError::BackendBadRequest { detail },
            401 | 403 => GatewayError::UpstreamUnauthorized {
                service: self.service_name.clone(),
                status,
            },
            _ => GatewayError::UpstreamError {
                service: self.service_name.clone(),
                detail,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(retry: RetryConfig) -> ServiceClient {
        let config = BackendConfig {
            base_url: "http://product-service:8001/api/".to_string(),
            timeout: Duration::from_secs(10),
            retry,
        };
        ServiceClient::new("product", &config, reqwest::Client::new())
    }

    #[test]
    fn test_base_url_is_normalized() {
        let client = test_client(RetryConfig::default());
        assert_eq!(client.base_url, "http://product-service:8001/api");
    }

    #[test]
    fn test_status_classification() {
        let client = test_client(RetryConfig::default());

        assert_eq!(
            client.classify_status(404, "gone".into()).error_type(),
            "backend_not_found"
        );
        assert_eq!(
            client.classify_status(400, "bad".into()).error_type(),
            "backend_bad_request"
        );
        assert_eq!(
            client.classify_status(401, "no".into()).error_type(),
            "upstream_unauthorized"
        );
        assert_eq!(
            client.classify_status(403, "no".into()).error_type(),
            "upstream_unauthorized"
        );
        assert_eq!(
            client.classify_status(500, "boom".into()).error_type(),
            "upstream_error"
        );
        assert_eq!(
            client.classify_status(503, "down".into()).error_type(),
            "upstream_error"
        );
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let retry = RetryConfig {
            max_attempts: 3,
            backoff_base: Duration::from_millis(100),
            backoff_multiplier: 2.0,
        };

        let first = backoff_delay(&retry, 0);
        let second = backoff_delay(&retry, 1);
        let third = backoff_delay(&retry, 2);

        // Each delay is base * 2^n plus up to 10% jitter
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(110));
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(220));
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(440));
    }

    #[test]
    fn test_fallback_policy_substitutes_for_unavailable_and_missing() {
        let payload = Arc::new(serde_json::json!({"data": {"id": "demo"}}));
        let policy = FallbackPolicy::StaticPayload(payload.clone());

        let result = policy.apply(Err(GatewayError::backend_unavailable(
            "product",
            "connection refused",
        )));
        assert_eq!(result.unwrap(), *payload);

        let result = policy.apply(Err(GatewayError::BackendNotFound {
            detail: "missing".to_string(),
        }));
        assert_eq!(result.unwrap(), *payload);
    }

    #[test]
    fn test_fallback_policy_propagates_other_errors() {
        let policy = FallbackPolicy::StaticPayload(Arc::new(serde_json::json!({})));

        let err = policy
            .apply(Err(GatewayError::UpstreamError {
                service: "product".to_string(),
                detail: "boom".to_string(),
            }))
            .unwrap_err();
        assert_eq!(err.error_type(), "upstream_error");
    }

    #[test]
    fn test_propagate_policy_is_transparent() {
        let policy = FallbackPolicy::Propagate;
        let err = policy
            .apply(Err(GatewayError::BackendNotFound {
                detail: "missing".to_string(),
            }))
            .unwrap_err();
        assert_eq!(err.error_type(), "backend_not_found");

        let ok = policy.apply(Ok(serde_json::json!({"fine": true}))).unwrap();
        assert_eq!(ok["fine"], true);
    }
}
