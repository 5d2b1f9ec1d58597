//! Request logging: structured start/completion/failure records plus the
//! per-request metrics that feed the Prometheus endpoint. Paths on the
//! exclusion list (health probes, metrics scrapes) skip the per-request log
//! lines but still count toward metrics; errors are always logged.

use axum::http::StatusCode;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::core::error::GatewayError;
use crate::core::types::{IncomingRequest, RequestContext};

pub struct RequestLogger {
    exclude_paths: Vec<String>,
}

impl RequestLogger {
    pub fn new(exclude_paths: Vec<String>) -> Self {
        Self { exclude_paths }
    }

    fn is_excluded(&self, path: &str) -> bool {
        self.exclude_paths
            .iter()
            .any(|excluded| path.starts_with(excluded.as_str()))
    }

    pub fn log_start(&self, request: &IncomingRequest, ctx: &RequestContext) {
        if self.is_excluded(request.path()) {
            return;
        }

        info!(
            method = %request.method,
            path = request.path(),
            request_id = %ctx.request_id,
            "Request started"
        );
        debug!(
            method = %request.method,
            path = request.path(),
            client_ip = %ctx.client_ip,
            user_agent = request.header("user-agent").unwrap_or("unknown"),
            request_id = %ctx.request_id,
            "Request details"
        );
    }

    pub fn log_completion(
        &self,
        request: &IncomingRequest,
        ctx: &RequestContext,
        status: StatusCode,
        duration: Duration,
    ) {
        metrics::counter!(
            "gateway_requests_total",
            "method" => request.method.to_string(),
            "path" => request.path().to_string(),
            "status" => status.as_u16().to_string(),
        )
        .increment(1);
        metrics::histogram!(
            "gateway_request_duration_seconds",
            "method" => request.method.to_string(),
            "path" => request.path().to_string(),
        )
        .record(duration.as_secs_f64());

        // Always log errors, even on excluded paths
        if self.is_excluded(request.path()) && status.as_u16() < 400 {
            return;
        }

        let duration_ms = duration.as_millis() as u64;
        if status.as_u16() < 400 {
            info!(
                method = %request.method,
                path = request.path(),
                status = status.as_u16(),
                duration_ms,
                user_id = ctx
                    .identity
                    .as_deref()
                    .map(|identity| identity.subject.as_str())
                    .unwrap_or("anonymous"),
                request_id = %ctx.request_id,
                "Request completed"
            );
        } else {
            warn!(
                method = %request.method,
                path = request.path(),
                status = status.as_u16(),
                duration_ms,
                request_id = %ctx.request_id,
                "Request failed"
            );
        }
    }

    /// Log a stage failure with a severity matched to its category.
    ///
    /// Identity-provider outages and internal faults are infrastructure
    /// problems and log at error level with full detail; everything else is a
    /// client-attributable rejection and logs at warn.
    pub fn log_stage_error(&self, stage: &str, error: &GatewayError, ctx: &RequestContext) {
        match error {
            GatewayError::AuthProviderUnavailable { reason } => {
                error!(
                    stage,
                    error_type = error.error_type(),
                    reason = %reason,
                    request_id = %ctx.request_id,
                    "Identity provider unreachable, rejecting request"
                );
            }
            GatewayError::Internal { message } | GatewayError::Configuration { message } => {
                error!(
                    stage,
                    error_type = error.error_type(),
                    message = %message,
                    request_id = %ctx.request_id,
                    "Unexpected failure"
                );
            }
            other => {
                warn!(
                    stage,
                    error_type = other.error_type(),
                    error = %other,
                    request_id = %ctx.request_id,
                    "Request rejected"
                );
            }
        }

        metrics::counter!(
            "gateway_stage_errors_total",
            "stage" => stage.to_string(),
            "error_type" => error.error_type(),
        )
        .increment(1);
    }
}
