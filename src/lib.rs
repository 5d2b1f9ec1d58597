//! # Retail API Gateway
//!
//! A secure gateway in front of the retail backend services. It terminates
//! client HTTP requests, verifies bearer tokens against the identity
//! provider, enforces per-client rate limits through a shared Redis counter
//! store, and proxies to the product backend with timeouts, optional retries,
//! and a normalized error shape.
//!
//! The heart of the crate is the request pipeline: an ordered chain of
//! stages (rate limiting, then authentication and authorization) wrapped in
//! request logging and driven by a dispatcher that always produces exactly
//! one response per request.

/// Error types, configuration, and the core request/response structures
pub mod core;

/// Middleware pipeline: dispatcher, rate limiting, request logging
pub mod middleware;

/// Token verification and the authentication/authorization stage
pub mod auth;

/// Outbound backend clients with retry and error classification
pub mod upstream;

/// Per-resource route handlers (products, health)
pub mod routes;

/// Axum server wiring and graceful shutdown
pub mod gateway;

/// Logging and metrics initialization
pub mod observability;

pub use crate::core::config::GatewayConfig;
pub use crate::core::error::{GatewayError, GatewayResult};
pub use crate::core::types::{GatewayResponse, Identity, IncomingRequest, RequestContext};
pub use crate::gateway::server::GatewayServer;
pub use crate::middleware::pipeline::{Pipeline, PipelineStage, RouteDispatch, StageOutcome};
