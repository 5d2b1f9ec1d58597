//! # HTTP Server Module
//!
//! Axum server wiring: converts inbound requests into the pipeline's unified
//! request type, routes them through the stage chain to the product and
//! health handlers, and exposes the Prometheus scrape endpoint. Shared
//! resources (the upstream HTTP client pool and the Redis store) are created
//! once here and injected into the components that use them.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    response::IntoResponse,
    routing::get,
    Router as AxumRouter,
};
use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::stage::AuthStage;
use crate::auth::verifier::{OidcTokenVerifier, TokenVerifier};
use crate::core::config::GatewayConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{GatewayResponse, IncomingRequest, RequestContext};
use crate::middleware::pipeline::{Pipeline, RouteDispatch};
use crate::middleware::rate_limiting::{RateLimitStage, RateLimitStore, RateLimiter, RedisStore};
use crate::middleware::request_logging::RequestLogger;
use crate::routes::{HealthRoutes, ProductRoutes};
use crate::upstream::client::ServiceClient;

/// Largest request body the gateway will buffer
const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Routes pipeline-approved requests to the matching resource handler
struct GatewayRouter {
    products: Arc<ProductRoutes>,
    health: Arc<HealthRoutes>,
}

#[async_trait]
impl RouteDispatch for GatewayRouter {
    async fn route(
        &self,
        request: &IncomingRequest,
        ctx: &RequestContext,
    ) -> GatewayResult<GatewayResponse> {
        let path = request.path();
        if self.health.matches(path) {
            self.health.handle(request, ctx).await
        } else if self.products.matches(path) {
            self.products.handle(request, ctx).await
        } else {
            Err(GatewayError::BackendNotFound {
                detail: "Not Found".to_string(),
            })
        }
    }
}

/// Shared application state for the axum handlers
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    router: Arc<GatewayRouter>,
    prometheus: Option<PrometheusHandle>,
}

/// The assembled gateway server
pub struct GatewayServer {
    config: Arc<GatewayConfig>,
    state: AppState,
}

impl GatewayServer {
    /// Wire up every component from configuration.
    ///
    /// The Redis store and the upstream HTTP client are created here once and
    /// shared across all requests for the life of the process.
    pub fn build(
        config: GatewayConfig,
        prometheus: Option<PrometheusHandle>,
    ) -> GatewayResult<Self> {
        let config = Arc::new(config);

        let store: Arc<dyn RateLimitStore> = Arc::new(
            RedisStore::new(&config.redis.url)
                .map_err(|e| GatewayError::config(format!("invalid redis url: {e}")))?,
        );
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone(), store));

        let auth_config = Arc::new(config.auth.clone());
        let verifier: Arc<dyn TokenVerifier> = Arc::new(OidcTokenVerifier::new(&config.auth)?);

        let logger = RequestLogger::new(config.observability.logging.exclude_paths.clone());
        let pipeline = Arc::new(
            Pipeline::new(logger)
                .with_stage(Arc::new(RateLimitStage::new(limiter)))
                .with_stage(Arc::new(AuthStage::new(verifier, auth_config))),
        );

        let upstream_http = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::config(format!("failed to build upstream client: {e}")))?;
        let product_client = Arc::new(ServiceClient::new(
            "product",
            config.backend("product")?,
            upstream_http,
        ));

        let router = Arc::new(GatewayRouter {
            products: Arc::new(ProductRoutes::new(
                product_client,
                &config.server.api_prefix,
                &config.degraded,
            )),
            health: Arc::new(HealthRoutes::new(config.redis.url.clone())),
        });

        Ok(Self {
            state: AppState {
                pipeline,
                router,
                prometheus,
            },
            config,
        })
    }

    /// Build the axum router for this server
    pub fn router(&self) -> AxumRouter {
        let mut router = AxumRouter::new();

        if self.config.observability.metrics.enabled {
            router = router.route(
                &self.config.observability.metrics.endpoint_path,
                get(metrics_endpoint),
            );
        }

        router
            .fallback(gateway_entry)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors_layer(&self.config)),
            )
            .with_state(self.state.clone())
    }

    /// Bind the listener and serve until shutdown is signalled
    pub async fn run(self) -> GatewayResult<()> {
        let addr = format!(
            "{}:{}",
            self.config.server.bind_address, self.config.server.port
        );
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| GatewayError::config(format!("failed to bind {addr}: {e}")))?;

        info!(
            addr = %addr,
            stages = ?self.state.pipeline.stage_names(),
            "Gateway listening"
        );

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| GatewayError::internal(format!("server error: {e}")))?;

        Ok(())
    }
}

fn cors_layer(config: &GatewayConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.cors.allowed_origins.iter().any(|origin| origin == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<axum::http::HeaderValue> = config
            .cors
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        layer.allow_origin(origins)
    }
}

/// Every gateway route funnels through here and into the pipeline
async fn gateway_entry(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> axum::response::Response {
    let (parts, body) = request.into_parts();

    let bytes = match axum::body::to_bytes(body, MAX_BODY_SIZE).await {
        Ok(bytes) => bytes,
        Err(error) => {
            warn!(error = %error, "Failed to read request body");
            return GatewayError::BackendBadRequest {
                detail: "Failed to read request body".to_string(),
            }
            .into_response();
        }
    };

    let incoming = IncomingRequest::new(
        parts.method,
        parts.uri,
        parts.headers,
        bytes.to_vec(),
        remote_addr,
    );

    state
        .pipeline
        .dispatch(incoming, state.router.as_ref())
        .await
        .into_response()
}

/// Prometheus scrape endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> axum::response::Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => GatewayError::internal("metrics recorder not installed").into_response(),
    }
}

/// Resolve on ctrl-c or SIGTERM so in-flight requests can drain
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(error = %error, "Failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => warn!(error = %error, "Failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
