//! # Health Routes
//!
//! Public liveness and readiness endpoints: a full dependency report at
//! `/health`, a lightweight `/health/ping`, and a `/health/ready` probe that
//! fails when the shared counter store is unreachable (rate limiting runs
//! degraded without it, so orchestrators should hold traffic until it
//! recovers).

use axum::http::{Method, StatusCode};
use serde::Serialize;
use serde_json::json;
use std::time::{Duration, Instant};

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{GatewayResponse, IncomingRequest, RequestContext};

/// Health status of a single dependency
#[derive(Debug, Clone, Serialize)]
pub struct DependencyHealth {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct HealthReport {
    status: String,
    api_version: String,
    timestamp: String,
    uptime_secs: u64,
    dependencies: Vec<DependencyHealth>,
}

pub struct HealthRoutes {
    redis_url: String,
    started_at: Instant,
}

impl HealthRoutes {
    pub fn new(redis_url: String) -> Self {
        Self {
            redis_url,
            started_at: Instant::now(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        path == "/health" || path.starts_with("/health/")
    }

    pub async fn handle(
        &self,
        request: &IncomingRequest,
        _ctx: &RequestContext,
    ) -> GatewayResult<GatewayResponse> {
        if request.method != Method::GET {
            return Err(GatewayError::BackendNotFound {
                detail: "Not Found".to_string(),
            });
        }

        match request.path() {
            "/health" => self.report().await,
            "/health/ping" => self.ping(),
            "/health/ready" => self.ready().await,
            _ => Err(GatewayError::BackendNotFound {
                detail: "Not Found".to_string(),
            }),
        }
    }

    async fn report(&self) -> GatewayResult<GatewayResponse> {
        let redis = self.check_redis().await;

        let status = match redis.status.as_str() {
            "healthy" => "healthy",
            "failing" => "unhealthy",
            _ => "degraded",
        };

        let report = HealthReport {
            status: status.to_string(),
            api_version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            dependencies: vec![redis],
        };

        Ok(GatewayResponse::json(StatusCode::OK, &report)?)
    }

    fn ping(&self) -> GatewayResult<GatewayResponse> {
        Ok(GatewayResponse::json(
            StatusCode::OK,
            &json!({
                "message": "pong",
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }),
        )?)
    }

    async fn ready(&self) -> GatewayResult<GatewayResponse> {
        let redis = self.check_redis().await;
        if redis.status != "healthy" {
            return Err(GatewayError::BackendUnavailable {
                service: "redis".to_string(),
                reason: redis
                    .error
                    .unwrap_or_else(|| "connection failed".to_string()),
            });
        }

        Ok(GatewayResponse::json(
            StatusCode::OK,
            &json!({
                "status": "ready",
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }),
        )?)
    }

    /// Probe the shared counter store with a short deadline
    async fn check_redis(&self) -> DependencyHealth {
        let started = Instant::now();

        let probe = async {
            let client = redis::Client::open(self.redis_url.as_str())?;
            let mut conn = client.get_async_connection().await?;
            redis::cmd("PING").query_async::<_, String>(&mut conn).await
        };

        match tokio::time::timeout(Duration::from_secs(1), probe).await {
            Ok(Ok(_)) => DependencyHealth {
                name: "redis".to_string(),
                status: "healthy".to_string(),
                message: Some("Connection successful".to_string()),
                error: None,
                latency_ms: Some(started.elapsed().as_millis() as u64),
            },
            Ok(Err(error)) => DependencyHealth {
                name: "redis".to_string(),
                status: "failing".to_string(),
                message: None,
                error: Some(format!("Connection error: {error}")),
                latency_ms: None,
            },
            Err(_) => DependencyHealth {
                name: "redis".to_string(),
                status: "failing".to_string(),
                message: None,
                error: Some("Connection timed out".to_string()),
                latency_ms: None,
            },
        }
    }
}
