//! Authentication and authorization pipeline stage.
//!
//! Requests to configured public-path prefixes bypass both checks entirely.
//! Everything else must present a well-formed bearer token that verifies
//! against the identity provider; routes with a role policy additionally
//! require the identity to hold at least one of the listed roles.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::verifier::TokenVerifier;
use crate::core::config::AuthConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{Identity, IncomingRequest, RequestContext};
use crate::middleware::pipeline::{PipelineStage, StageOutcome};

/// Check an identity against a route's role requirement.
///
/// An empty requirement is the explicit any-authenticated policy; a non-empty
/// one admits the identity when the intersection with its roles is non-empty.
pub fn authorize(identity: &Identity, required_roles: &[String]) -> GatewayResult<()> {
    if required_roles.is_empty() || identity.has_any_role(required_roles) {
        return Ok(());
    }

    warn!(
        subject = %identity.subject,
        required = ?required_roles,
        held = ?identity.roles,
        "Authorization denied"
    );
    Err(GatewayError::Forbidden {
        required_roles: required_roles.to_vec(),
    })
}

pub struct AuthStage {
    verifier: Arc<dyn TokenVerifier>,
    config: Arc<AuthConfig>,
}

impl AuthStage {
    pub fn new(verifier: Arc<dyn TokenVerifier>, config: Arc<AuthConfig>) -> Self {
        Self { verifier, config }
    }
}

#[async_trait]
impl PipelineStage for AuthStage {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn handle(
        &self,
        request: &IncomingRequest,
        ctx: &mut RequestContext,
    ) -> GatewayResult<StageOutcome> {
        let path = request.path();

        if self.config.is_public_path(path) {
            debug!(path, "Public path, skipping authentication");
            return Ok(StageOutcome::Continue);
        }

        let token = request.bearer_token()?.to_string();
        let identity = self.verifier.verify(&token).await?;
        ctx.bearer_token = Some(token);

        if let Some(required) = self.config.required_roles_for(request.method.as_str(), path) {
            authorize(&identity, required)?;
        }

        ctx.set_identity(identity);
        Ok(StageOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Claims, RealmAccess};
    use axum::http::{HeaderMap, Method};

    /// Verifier stub that panics if consulted; used to prove public paths
    /// never reach verification.
    struct PanickingVerifier;

    #[async_trait]
    impl TokenVerifier for PanickingVerifier {
        async fn verify(&self, _token: &str) -> GatewayResult<Identity> {
            panic!("verifier must not be invoked for public paths");
        }
    }

    struct StaticVerifier {
        roles: Vec<String>,
    }

    #[async_trait]
    impl TokenVerifier for StaticVerifier {
        async fn verify(&self, _token: &str) -> GatewayResult<Identity> {
            Ok(Identity::from_claims(Claims {
                sub: "tester".to_string(),
                exp: 4102444800,
                iat: None,
                iss: None,
                aud: None,
                preferred_username: None,
                realm_access: Some(RealmAccess {
                    roles: self.roles.clone(),
                }),
                scope: None,
            }))
        }
    }

    fn identity_with_roles(roles: &[&str]) -> Identity {
        Identity::from_claims(Claims {
            sub: "tester".to_string(),
            exp: 4102444800,
            iat: None,
            iss: None,
            aud: None,
            preferred_username: None,
            realm_access: Some(RealmAccess {
                roles: roles.iter().map(|r| r.to_string()).collect(),
            }),
            scope: None,
        })
    }

    fn request(method: Method, path: &str, bearer: Option<&str>) -> IncomingRequest {
        let mut headers = HeaderMap::new();
        if let Some(token) = bearer {
            headers.insert(
                "authorization",
                format!("Bearer {token}").parse().unwrap(),
            );
        }
        IncomingRequest::new(
            method,
            path.parse().unwrap(),
            headers,
            Vec::new(),
            "127.0.0.1:5000".parse().unwrap(),
        )
    }

    #[test]
    fn test_authorize_any_authenticated_when_no_roles_required() {
        let identity = identity_with_roles(&["customer"]);
        assert!(authorize(&identity, &[]).is_ok());
    }

    #[test]
    fn test_authorize_role_intersection() {
        let admin = identity_with_roles(&["admin"]);
        let customer = identity_with_roles(&["customer"]);
        let required = vec!["admin".to_string(), "store_manager".to_string()];

        assert!(authorize(&admin, &required).is_ok());
        let err = authorize(&customer, &required).unwrap_err();
        assert_eq!(err.error_type(), "forbidden");
    }

    #[tokio::test]
    async fn test_public_path_bypasses_verification() {
        let stage = AuthStage::new(
            Arc::new(PanickingVerifier),
            Arc::new(AuthConfig::default()),
        );
        let request = request(Method::GET, "/health/ready", None);
        let mut ctx = RequestContext::new(&request);

        assert!(matches!(
            stage.handle(&request, &mut ctx).await,
            Ok(StageOutcome::Continue)
        ));
        assert!(ctx.identity.is_none());
    }

    #[tokio::test]
    async fn test_missing_header_is_malformed() {
        let stage = AuthStage::new(
            Arc::new(StaticVerifier { roles: vec![] }),
            Arc::new(AuthConfig::default()),
        );
        let request = request(Method::GET, "/api/products", None);
        let mut ctx = RequestContext::new(&request);

        let err = stage.handle(&request, &mut ctx).await.unwrap_err();
        assert_eq!(err.error_type(), "auth_malformed");
    }

    #[tokio::test]
    async fn test_authenticated_get_passes_without_roles() {
        let stage = AuthStage::new(
            Arc::new(StaticVerifier {
                roles: vec!["customer".to_string()],
            }),
            Arc::new(AuthConfig::default()),
        );
        let request = request(Method::GET, "/api/products/42", Some("tok"));
        let mut ctx = RequestContext::new(&request);

        assert!(matches!(
            stage.handle(&request, &mut ctx).await,
            Ok(StageOutcome::Continue)
        ));
        assert_eq!(ctx.identity.as_ref().unwrap().subject, "tester");
        assert_eq!(ctx.bearer_token.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_write_without_role_is_forbidden() {
        let stage = AuthStage::new(
            Arc::new(StaticVerifier {
                roles: vec!["customer".to_string()],
            }),
            Arc::new(AuthConfig::default()),
        );
        let request = request(Method::POST, "/api/products", Some("tok"));
        let mut ctx = RequestContext::new(&request);

        let err = stage.handle(&request, &mut ctx).await.unwrap_err();
        assert_eq!(err.error_type(), "forbidden");
    }

    #[tokio::test]
    async fn test_store_manager_can_write_but_not_delete() {
        let verifier = Arc::new(StaticVerifier {
            roles: vec!["store_manager".to_string()],
        });
        let config = Arc::new(AuthConfig::default());

        let stage = AuthStage::new(verifier.clone(), config.clone());
        let post = request(Method::POST, "/api/products", Some("tok"));
        let mut ctx = RequestContext::new(&post);
        assert!(stage.handle(&post, &mut ctx).await.is_ok());

        let delete = request(Method::DELETE, "/api/products/42", Some("tok"));
        let mut ctx = RequestContext::new(&delete);
        let err = stage.handle(&delete, &mut ctx).await.unwrap_err();
        assert_eq!(err.error_type(), "forbidden");
    }
}
