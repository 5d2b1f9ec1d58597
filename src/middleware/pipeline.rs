//! # Request Pipeline
//!
//! The ordered middleware chain applied to every inbound request, and the
//! dispatcher that drives it.
//!
//! Stages run in registration order over a shared mutable [`RequestContext`].
//! Each stage either continues, short-circuits with a terminal response, or
//! fails with a [`GatewayError`]; once a stage terminates the request no
//! later stage (or the route handler) runs. The dispatcher owns request-ID
//! assignment and latency timing, wraps the whole chain in start/completion
//! logs, and always emits exactly one response carrying every header the
//! stages collected along the way.
//!
//! Fixed ordering for the gateway: rate limiting precedes authentication so
//! unauthenticated clients are still throttled, and authentication precedes
//! route dispatch.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{GatewayResponse, IncomingRequest, RequestContext};
use crate::middleware::request_logging::RequestLogger;

/// What a stage decided about the request
#[derive(Debug)]
pub enum StageOutcome {
    /// Hand the request to the next stage (or the route handler)
    Continue,
    /// Stop processing and send this response
    ShortCircuit(GatewayResponse),
}

/// A single pipeline stage
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Stage name for logs and metrics
    fn name(&self) -> &'static str;

    /// Inspect the request, possibly mutating the context.
    ///
    /// Returning an error terminates the request; the dispatcher converts it
    /// into a structured response at this boundary.
    async fn handle(
        &self,
        request: &IncomingRequest,
        ctx: &mut RequestContext,
    ) -> GatewayResult<StageOutcome>;
}

/// Routes a request that passed every pipeline stage to its handler
#[async_trait]
pub trait RouteDispatch: Send + Sync {
    async fn route(
        &self,
        request: &IncomingRequest,
        ctx: &RequestContext,
    ) -> GatewayResult<GatewayResponse>;
}

/// Ordered stage chain plus the logging wrapper
pub struct Pipeline {
    stages: Vec<Arc<dyn PipelineStage>>,
    logger: RequestLogger,
}

impl Pipeline {
    pub fn new(logger: RequestLogger) -> Self {
        Self {
            stages: Vec::new(),
            logger,
        }
    }

    /// Append a stage; stages execute in the order they were added
    pub fn with_stage(mut self, stage: Arc<dyn PipelineStage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Names of the registered stages, in execution order
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Run the full chain for one request and produce its single response
    pub async fn dispatch(
        &self,
        request: IncomingRequest,
        router: &dyn RouteDispatch,
    ) -> GatewayResponse {
        let mut ctx = RequestContext::new(&request);
        self.logger.log_start(&request, &ctx);

        for stage in &self.stages {
            match stage.handle(&request, &mut ctx).await {
                Ok(StageOutcome::Continue) => {
                    debug!(stage = stage.name(), request_id = %ctx.request_id, "Stage passed");
                }
                Ok(StageOutcome::ShortCircuit(response)) => {
                    debug!(
                        stage = stage.name(),
                        request_id = %ctx.request_id,
                        status = response.status.as_u16(),
                        "Stage short-circuited"
                    );
                    return self.finalize(&request, &ctx, response);
                }
                Err(error) => {
                    self.logger.log_stage_error(stage.name(), &error, &ctx);
                    let response = GatewayResponse::from_error(&error);
                    return self.finalize(&request, &ctx, response);
                }
            }
        }

        let response = match router.route(&request, &ctx).await {
            Ok(response) => response,
            Err(error) => {
                self.logger.log_stage_error("handler", &error, &ctx);
                GatewayResponse::from_error(&error)
            }
        };
        self.finalize(&request, &ctx, response)
    }

    /// Attach collected and tracking headers, then emit the completion log.
    ///
    /// Runs for successes and short-circuits alike so rate-limit metadata and
    /// the request ID survive early exits.
    fn finalize(
        &self,
        request: &IncomingRequest,
        ctx: &RequestContext,
        mut response: GatewayResponse,
    ) -> GatewayResponse {
        for (name, value) in ctx.response_headers.iter() {
            response.headers.insert(name.clone(), value.clone());
        }

        if let Ok(value) = ctx.request_id.parse() {
            response.headers.insert("x-request-id", value);
        }

        let elapsed = ctx.elapsed();
        if let Ok(value) = format!("{:.6}", elapsed.as_secs_f64()).parse() {
            response.headers.insert("x-process-time", value);
        }

        self.logger
            .log_completion(request, ctx, response.status, elapsed);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderName, Method, StatusCode};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct RecordingStage {
        name: &'static str,
        calls: AtomicU32,
        behavior: Behavior,
    }

    enum Behavior {
        Continue,
        ShortCircuit(StatusCode),
        Fail(GatewayError),
    }

    impl RecordingStage {
        fn passing(name: &'static str) -> Self {
            Self {
                name,
                calls: AtomicU32::new(0),
                behavior: Behavior::Continue,
            }
        }

        fn short_circuiting(name: &'static str, status: StatusCode) -> Self {
            Self {
                name,
                calls: AtomicU32::new(0),
                behavior: Behavior::ShortCircuit(status),
            }
        }

        fn failing(name: &'static str, error: GatewayError) -> Self {
            Self {
                name,
                calls: AtomicU32::new(0),
                behavior: Behavior::Fail(error),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl PipelineStage for RecordingStage {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn handle(
            &self,
            _request: &IncomingRequest,
            ctx: &mut RequestContext,
        ) -> GatewayResult<StageOutcome> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            ctx.response_headers.insert(
                format!("x-stage-{}", self.name).parse::<HeaderName>().unwrap(),
                "seen".parse().unwrap(),
            );

            match &self.behavior {
                Behavior::Continue => Ok(StageOutcome::Continue),
                Behavior::ShortCircuit(status) => Ok(StageOutcome::ShortCircuit(
                    GatewayResponse::new(*status, HeaderMap::new(), Vec::new()),
                )),
                Behavior::Fail(error) => Err(error.clone()),
            }
        }
    }

    fn test_request() -> IncomingRequest {
        IncomingRequest::new(
            Method::GET,
            "/api/products".parse().unwrap(),
            HeaderMap::new(),
            Vec::new(),
            "127.0.0.1:9999".parse().unwrap(),
        )
    }

    fn test_pipeline() -> RequestLogger {
        RequestLogger::new(vec!["/health".to_string()])
    }

    struct OkHandler;

    #[async_trait]
    impl RouteDispatch for OkHandler {
        async fn route(
            &self,
            _request: &IncomingRequest,
            _ctx: &RequestContext,
        ) -> GatewayResult<GatewayResponse> {
            Ok(GatewayResponse::new(
                StatusCode::OK,
                HeaderMap::new(),
                b"ok".to_vec(),
            ))
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl RouteDispatch for PanickingHandler {
        async fn route(
            &self,
            _request: &IncomingRequest,
            _ctx: &RequestContext,
        ) -> GatewayResult<GatewayResponse> {
            panic!("handler must not run after a short-circuit");
        }
    }

    struct FailingHandler(GatewayError);

    #[async_trait]
    impl RouteDispatch for FailingHandler {
        async fn route(
            &self,
            _request: &IncomingRequest,
            _ctx: &RequestContext,
        ) -> GatewayResult<GatewayResponse> {
            Err(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_stages_run_in_order_then_handler() {
        let first = Arc::new(RecordingStage::passing("first"));
        let second = Arc::new(RecordingStage::passing("second"));
        let pipeline = Pipeline::new(test_pipeline())
            .with_stage(first.clone())
            .with_stage(second.clone());

        let response = pipeline.dispatch(test_request(), &OkHandler).await;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
        assert_eq!(pipeline.stage_names(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_later_stages_and_handler() {
        let gate = Arc::new(RecordingStage::short_circuiting(
            "gate",
            StatusCode::TOO_MANY_REQUESTS,
        ));
        let after = Arc::new(RecordingStage::passing("after"));
        let pipeline = Pipeline::new(test_pipeline())
            .with_stage(gate.clone())
            .with_stage(after.clone());

        let response = pipeline.dispatch(test_request(), &PanickingHandler).await;

        assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(gate.calls(), 1);
        assert_eq!(after.calls(), 0);
    }

    #[tokio::test]
    async fn test_stage_error_becomes_structured_response() {
        let failing = Arc::new(RecordingStage::failing(
            "auth",
            GatewayError::auth_malformed("missing Authorization header"),
        ));
        let pipeline = Pipeline::new(test_pipeline()).with_stage(failing);

        let response = pipeline.dispatch(test_request(), &OkHandler).await;

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers.get("www-authenticate").unwrap(), "Bearer");
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert!(body["detail"].as_str().unwrap().contains("Not authenticated"));
    }

    #[tokio::test]
    async fn test_collected_headers_survive_stage_error() {
        let marking = Arc::new(RecordingStage::passing("rate_limit"));
        let failing = Arc::new(RecordingStage::failing(
            "auth",
            GatewayError::auth_invalid("expired"),
        ));
        let pipeline = Pipeline::new(test_pipeline())
            .with_stage(marking)
            .with_stage(failing);

        let response = pipeline.dispatch(test_request(), &OkHandler).await;

        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        // Header recorded by the earlier stage is still attached
        assert_eq!(response.headers.get("x-stage-rate_limit").unwrap(), "seen");
        assert!(response.headers.contains_key("x-request-id"));
        assert!(response.headers.contains_key("x-process-time"));
    }

    #[tokio::test]
    async fn test_handler_error_is_mapped() {
        let pipeline = Pipeline::new(test_pipeline());

        let response = pipeline
            .dispatch(
                test_request(),
                &FailingHandler(GatewayError::backend_unavailable(
                    "product",
                    "connection refused",
                )),
            )
            .await;

        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(
            body["detail"],
            "product service unavailable: connection refused"
        );
    }

    #[tokio::test]
    async fn test_tracking_headers_on_success() {
        let pipeline = Pipeline::new(test_pipeline());
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "req-42".parse().unwrap());
        let request = IncomingRequest::new(
            Method::GET,
            "/api/products".parse().unwrap(),
            headers,
            Vec::new(),
            "127.0.0.1:9999".parse().unwrap(),
        );

        let response = pipeline.dispatch(request, &OkHandler).await;

        assert_eq!(response.headers.get("x-request-id").unwrap(), "req-42");
        let process_time: f64 = response
            .headers
            .get("x-process-time")
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(process_time >= 0.0);
    }
}
