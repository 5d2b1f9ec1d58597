pub mod pipeline;
pub mod rate_limiting;
pub mod request_logging;

pub use pipeline::{Pipeline, PipelineStage, RouteDispatch, StageOutcome};
pub use rate_limiting::{
    AdmitOutcome, ClientResolver, DefaultClientResolver, InMemoryStore, RateLimitDecision,
    RateLimitStage, RateLimitStore, RateLimiter, RedisStore,
};
pub use request_logging::RequestLogger;
