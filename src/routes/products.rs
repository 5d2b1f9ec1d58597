//! # Product Routes
//!
//! Thin per-resource translation between inbound requests and the product
//! backend: list/get/create/update/delete, query passthrough, and the
//! degraded-service fallback policy for read endpoints.

use axum::http::{Method, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::core::config::DegradedModeConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{GatewayResponse, IncomingRequest, RequestContext};
use crate::upstream::client::{CallOptions, FallbackPolicy, ServiceClient};

/// Static payload served when the product backend is degraded and the
/// fallback policy is enabled. Marked as mock data so consumers can tell it
/// apart from real catalog entries.
fn fallback_product_payload() -> Value {
    let now = chrono::Utc::now().to_rfc3339();
    json!({
        "data": {
            "id": "demo-product-1",
            "sku": "DEMO-12345",
            "name": "Demo Product",
            "description": "This is a demo product used when the product service is unavailable",
            "category": "Demo",
            "price": {
                "amount": 99.99,
                "currency": "USD",
                "is_discounted": true,
                "original_amount": 129.99
            },
            "inventory": 42,
            "images": [
                {
                    "url": "https://example.com/images/demo-product.jpg",
                    "alt_text": "Demo Product Image",
                    "is_primary": true
                }
            ],
            "attributes": {
                "color": "Blue",
                "size": "Medium",
                "weight": "1.2kg"
            },
            "created_at": now,
            "updated_at": now
        },
        "meta": {
            "is_mock": true,
            "source": "gateway_fallback"
        }
    })
}

/// Proxy handlers for the product resource
pub struct ProductRoutes {
    client: Arc<ServiceClient>,
    prefix: String,
    read_fallback: FallbackPolicy,
}

impl ProductRoutes {
    pub fn new(client: Arc<ServiceClient>, api_prefix: &str, degraded: &DegradedModeConfig) -> Self {
        let read_fallback = if degraded.product_read_fallback {
            FallbackPolicy::StaticPayload(Arc::new(fallback_product_payload()))
        } else {
            FallbackPolicy::Propagate
        };

        Self {
            client,
            prefix: format!("{}/products", api_prefix.trim_end_matches('/')),
            read_fallback,
        }
    }

    /// Whether this handler serves the given path
    pub fn matches(&self, path: &str) -> bool {
        path == self.prefix || path.starts_with(&format!("{}/", self.prefix))
    }

    /// Dispatch a request to the matching product operation
    pub async fn handle(
        &self,
        request: &IncomingRequest,
        ctx: &RequestContext,
    ) -> GatewayResult<GatewayResponse> {
        let rest = request
            .path()
            .strip_prefix(&self.prefix)
            .unwrap_or("")
            .trim_matches('/');

        match (request.method.as_str(), rest) {
            ("GET", "") => self.list(request, ctx).await,
            ("POST", "") => self.create(request, ctx).await,
            ("GET", id) => self.get(id, request, ctx).await,
            ("PUT", id) | ("PATCH", id) => self.update(id, request, ctx).await,
            ("DELETE", id) => self.delete(id, request, ctx).await,
            _ => Err(GatewayError::BackendNotFound {
                detail: "Not Found".to_string(),
            }),
        }
    }

    async fn list(
        &self,
        request: &IncomingRequest,
        ctx: &RequestContext,
    ) -> GatewayResult<GatewayResponse> {
        let result = self
            .client
            .request(
                Method::GET,
                "products",
                CallOptions {
                    context: Some(ctx),
                    query: request.query(),
                    ..Default::default()
                },
            )
            .await;

        let payload = self.read_fallback.apply(result)?;
        Ok(GatewayResponse::json(StatusCode::OK, &payload)?)
    }

    async fn get(
        &self,
        id: &str,
        _request: &IncomingRequest,
        ctx: &RequestContext,
    ) -> GatewayResult<GatewayResponse> {
        let result = self
            .client
            .request(
                Method::GET,
                &format!("products/{id}"),
                CallOptions {
                    context: Some(ctx),
                    ..Default::default()
                },
            )
            .await;

        let payload = self.read_fallback.apply(result)?;
        Ok(GatewayResponse::json(StatusCode::OK, &payload)?)
    }

    async fn create(
        &self,
        request: &IncomingRequest,
        ctx: &RequestContext,
    ) -> GatewayResult<GatewayResponse> {
        let body = request.json_body()?;
        let payload = self
            .client
            .request(
                Method::POST,
                "products",
                CallOptions {
                    context: Some(ctx),
                    json: Some(&body),
                    ..Default::default()
                },
            )
            .await?;

        Ok(GatewayResponse::json(StatusCode::CREATED, &payload)?)
    }

    async fn update(
        &self,
        id: &str,
        request: &IncomingRequest,
        ctx: &RequestContext,
    ) -> GatewayResult<GatewayResponse> {
        let body = request.json_body()?;
        let payload = self
            .client
            .request(
                request.method.clone(),
                &format!("products/{id}"),
                CallOptions {
                    context: Some(ctx),
                    json: Some(&body),
                    ..Default::default()
                },
            )
            .await?;

        Ok(GatewayResponse::json(StatusCode::OK, &payload)?)
    }

    async fn delete(
        &self,
        id: &str,
        _request: &IncomingRequest,
        ctx: &RequestContext,
    ) -> GatewayResult<GatewayResponse> {
        self.client
            .request(
                Method::DELETE,
                &format!("products/{id}"),
                CallOptions {
                    context: Some(ctx),
                    ..Default::default()
                },
            )
            .await?;

        Ok(GatewayResponse::json(
            StatusCode::OK,
            &json!({ "message": "Product deleted successfully" }),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::BackendConfig;

    fn routes(fallback: bool) -> ProductRoutes {
        let client = Arc::new(ServiceClient::new(
            "product",
            &BackendConfig::default(),
            reqwest::Client::new(),
        ));
        ProductRoutes::new(
            client,
            "/api",
            &DegradedModeConfig {
                product_read_fallback: fallback,
            },
        )
    }

    #[test]
    fn test_path_matching() {
        let routes = routes(false);
        assert!(routes.matches("/api/products"));
        assert!(routes.matches("/api/products/42"));
        assert!(!routes.matches("/api/orders"));
        assert!(!routes.matches("/api/productscatalog"));
    }

    #[test]
    fn test_fallback_payload_is_marked_as_mock() {
        let payload = fallback_product_payload();
        assert_eq!(payload["meta"]["is_mock"], true);
        assert_eq!(payload["meta"]["source"], "gateway_fallback");
        assert_eq!(payload["data"]["sku"], "DEMO-12345");
    }

    #[test]
    fn test_policy_selection_follows_config() {
        assert!(matches!(
            routes(true).read_fallback,
            FallbackPolicy::StaticPayload(_)
        ));
        assert!(matches!(
            routes(false).read_fallback,
            FallbackPolicy::Propagate
        ));
    }
}
