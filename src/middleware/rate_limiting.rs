//! # Rate Limiting
//!
//! Distributed request throttling backed by a shared counter store.
//!
//! ## Architecture
//! - [`RateLimitStore`]: abstraction over the shared counter store. The Redis
//!   implementation runs INCR + EXPIRE-on-create + TTL as a single atomic
//!   batch so a freshly created counter is never observable without its
//!   window expiry, and concurrent first-requests cannot create duplicate
//!   windows: the store's atomic increment guarantees exactly one caller
//!   observes count == 1.
//! - [`ClientResolver`]: pluggable client classification. The default keys
//!   authenticated requests by subject with a role-derived class, and
//!   everything else by IP as anonymous.
//! - [`RateLimiter`]: applies per-class budgets and computes the decision
//!   metadata (limit, remaining, reset, retry-after) surfaced as response
//!   headers.
//!
//! When the store is unreachable the limiter fails open: the request
//! proceeds unthrottled and the failure is logged at warn level.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::core::config::RateLimitConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{ClientClass, IncomingRequest, RequestContext};
use crate::middleware::pipeline::{PipelineStage, StageOutcome};

/// Errors that can occur talking to the shared counter store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Counter state observed after an increment
#[derive(Debug, Clone, Copy)]
pub struct WindowCount {
    /// The counter value after this increment
    pub count: u64,
    /// Unix timestamp at which the window expires
    pub reset_at: u64,
}

/// Shared counter store abstraction
///
/// Implementations must make `incr` atomic per key: two concurrent calls for
/// the same key observe distinct counts and the window expiry is set exactly
/// once, by whichever caller created the counter.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically increment the counter for `key`, creating it with the
    /// window TTL when absent or expired.
    async fn incr(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError>;
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Redis-backed store
///
/// Holds one multiplexed connection manager for the whole process, created
/// lazily so a Redis outage at startup degrades to fail-open instead of
/// preventing boot.
pub struct RedisStore {
    client: redis::Client,
    manager: RwLock<Option<ConnectionManager>>,
}

impl RedisStore {
    /// Create a store for the given URL. No connection is made yet.
    pub fn new(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            manager: RwLock::new(None),
        })
    }

    /// Get the process-wide connection manager, establishing it on first use
    async fn manager(&self) -> Result<ConnectionManager, StoreError> {
        if let Some(manager) = self.manager.read().await.as_ref() {
            return Ok(manager.clone());
        }

        let mut slot = self.manager.write().await;
        // Another task may have connected while we waited for the lock
        if let Some(manager) = slot.as_ref() {
            return Ok(manager.clone());
        }

        let manager = ConnectionManager::new(self.client.clone()).await?;
        *slot = Some(manager.clone());
        Ok(manager)
    }
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn incr(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let mut conn = self.manager().await?;

        // INCR, EXPIRE NX, and TTL execute as one MULTI/EXEC batch: the
        // create and its expiry are never observably separated, and the
        // expiry is only set by the increment that created the counter.
        let (count, _expire_set, ttl): (u64, i64, i64) = redis::pipe()
            .atomic()
            .incr(key, 1u64)
            .cmd("EXPIRE")
            .arg(key)
            .arg(window.as_secs())
            .arg("NX")
            .cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await?;

        let ttl = if ttl > 0 { ttl as u64 } else { window.as_secs() };
        Ok(WindowCount {
            count,
            reset_at: unix_now() + ttl,
        })
    }
}

struct MemoryWindow {
    count: u64,
    expires_at: Instant,
    reset_at: u64,
}

/// In-memory store for tests and single-node deployments
#[derive(Default)]
pub struct InMemoryStore {
    windows: DashMap<String, MemoryWindow>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryStore {
    async fn incr(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| MemoryWindow {
                count: 0,
                expires_at: now + window,
                reset_at: unix_now() + window.as_secs(),
            });

        if entry.expires_at <= now {
            entry.count = 0;
            entry.expires_at = now + window;
            entry.reset_at = unix_now() + window.as_secs();
        }
        entry.count += 1;

        Ok(WindowCount {
            count: entry.count,
            reset_at: entry.reset_at,
        })
    }
}

/// Client identity for rate limiting purposes
#[derive(Debug, Clone)]
pub struct ClientKey {
    /// Shared-counter key component, e.g. `user:alice` or `ip:203.0.113.9`
    pub id: String,
    /// Class that selects the budget multiplier
    pub class: ClientClass,
}

/// Pluggable client classification
pub trait ClientResolver: Send + Sync {
    fn resolve(&self, request: &IncomingRequest, ctx: &RequestContext) -> ClientKey;
}

/// Default resolver: authenticated subject + role-derived class when an
/// identity is present on the context, otherwise IP + anonymous.
///
/// With the standard stage ordering the limiter runs before authentication,
/// so inbound traffic is classified by IP; deployments that populate the
/// identity earlier get subject-keyed class budgets without limiter changes.
pub struct DefaultClientResolver;

impl ClientResolver for DefaultClientResolver {
    fn resolve(&self, _request: &IncomingRequest, ctx: &RequestContext) -> ClientKey {
        match ctx.identity.as_deref() {
            Some(identity) => ClientKey {
                id: format!("user:{}", identity.subject),
                class: ctx.client_class(),
            },
            None => ClientKey {
                id: format!("ip:{}", ctx.client_ip),
                class: ClientClass::Anonymous,
            },
        }
    }
}

/// Outcome of an admit check with the metadata surfaced in response headers
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp at which the current window resets
    pub reset_at: u64,
    /// Seconds until the window resets; only meaningful on denial
    pub retry_after_secs: u64,
}

/// Result of consulting the rate limiter for a request
#[derive(Debug, Clone, Copy)]
pub enum AdmitOutcome {
    /// Under budget; decision metadata attaches to the response
    Allowed(RateLimitDecision),
    /// Over budget; the request must be rejected with 429
    Denied(RateLimitDecision),
    /// Store unreachable; fail open and skip throttling for this request
    Bypassed,
}

/// Main rate limiter
pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn RateLimitStore>,
    resolver: Arc<dyn ClientResolver>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            config,
            store,
            resolver: Arc::new(DefaultClientResolver),
        }
    }

    /// Replace the client resolver
    pub fn with_resolver(mut self, resolver: Arc<dyn ClientResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Check whether the request is within its client's budget
    pub async fn admit(&self, request: &IncomingRequest, ctx: &RequestContext) -> AdmitOutcome {
        let client = self.resolver.resolve(request, ctx);
        let limit = self.config.limit_for(client.class);
        let key = format!("{}:{}", self.config.key_prefix, client.id);

        let window = match self.store.incr(&key, self.config.window).await {
            Ok(window) => window,
            Err(error) => {
                warn!(
                    key = %key,
                    error = %error,
                    "Rate limit store unreachable, failing open"
                );
                metrics::counter!("gateway_rate_limit_store_errors_total").increment(1);
                return AdmitOutcome::Bypassed;
            }
        };

        debug!(
            key = %key,
            class = %client.class,
            count = window.count,
            limit = limit,
            "Rate limit window consulted"
        );

        let retry_after_secs = window.reset_at.saturating_sub(unix_now());
        if window.count > u64::from(limit) {
            metrics::counter!("gateway_rate_limited_total", "class" => client.class.as_str())
                .increment(1);
            AdmitOutcome::Denied(RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_at: window.reset_at,
                retry_after_secs,
            })
        } else {
            AdmitOutcome::Allowed(RateLimitDecision {
                allowed: true,
                limit,
                remaining: limit - window.count as u32,
                reset_at: window.reset_at,
                retry_after_secs,
            })
        }
    }
}

/// Pipeline stage wrapping the limiter
///
/// Decision headers are recorded on the context so they reach the terminal
/// response whether the request is admitted or rejected.
pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
}

impl RateLimitStage {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }

    fn record_headers(ctx: &mut RequestContext, decision: &RateLimitDecision) {
        let headers = &mut ctx.response_headers;
        if let Ok(value) = decision.limit.to_string().parse() {
            headers.insert("x-ratelimit-limit", value);
        }
        if let Ok(value) = decision.remaining.to_string().parse() {
            headers.insert("x-ratelimit-remaining", value);
        }
        if let Ok(value) = decision.reset_at.to_string().parse() {
            headers.insert("x-ratelimit-reset", value);
        }
        if !decision.allowed {
            if let Ok(value) = decision.retry_after_secs.to_string().parse() {
                headers.insert("retry-after", value);
            }
        }
    }
}

#[async_trait]
impl PipelineStage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn handle(
        &self,
        request: &IncomingRequest,
        ctx: &mut RequestContext,
    ) -> GatewayResult<StageOutcome> {
        match self.limiter.admit(request, ctx).await {
            AdmitOutcome::Bypassed => Ok(StageOutcome::Continue),
            AdmitOutcome::Allowed(decision) => {
                Self::record_headers(ctx, &decision);
                Ok(StageOutcome::Continue)
            }
            AdmitOutcome::Denied(decision) => {
                Self::record_headers(ctx, &decision);
                Err(GatewayError::RateLimitExceeded {
                    limit: decision.limit,
                    retry_after_secs: decision.retry_after_secs,
                })
            }
        }
    }
}
