//! # Token Verification
//!
//! Bearer-token verification against an external OIDC identity provider.
//!
//! The provider's realm public key is fetched once and cached process-wide;
//! verification itself (signature, audience, expiry) happens locally with
//! `jsonwebtoken`, so the provider is only contacted on cache misses or when
//! the cached key ages out. Provider outages are fail-closed: if no key is
//! available the request is rejected, with the outage logged separately from
//! invalid-credential failures.

use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::core::config::AuthConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{Claims, Identity};

/// Verifies bearer tokens and extracts the caller's identity
#[async_trait::async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> GatewayResult<Identity>;
}

/// Realm document returned by the provider; only the key material is used
#[derive(Debug, Deserialize)]
struct RealmDocument {
    public_key: String,
}

struct CachedKey {
    key: DecodingKey,
    fetched_at: Instant,
}

/// Token verifier backed by a Keycloak-style OIDC provider
pub struct OidcTokenVerifier {
    realm_endpoint: String,
    audience: Option<String>,
    algorithm: Algorithm,
    http: reqwest::Client,
    key_cache: RwLock<Option<CachedKey>>,
    key_max_age: Duration,
    static_key: Option<DecodingKey>,
}

impl OidcTokenVerifier {
    /// Create a verifier for the configured provider realm
    pub fn new(config: &AuthConfig) -> GatewayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.provider_timeout)
            .build()
            .map_err(|e| GatewayError::config(format!("failed to build provider client: {e}")))?;

        Ok(Self {
            realm_endpoint: format!(
                "{}/realms/{}",
                config.oidc_url.trim_end_matches('/'),
                config.realm
            ),
            audience: config.audience.clone(),
            algorithm: Algorithm::RS256,
            http,
            key_cache: RwLock::new(None),
            key_max_age: config.public_key_max_age,
            static_key: None,
        })
    }

    /// Create a verifier with a pinned key, skipping provider fetches
    ///
    /// Used in tests and in deployments that distribute the key out of band.
    pub fn with_static_key(
        key: DecodingKey,
        algorithm: Algorithm,
        audience: Option<String>,
    ) -> Self {
        Self {
            realm_endpoint: String::new(),
            audience,
            algorithm,
            http: reqwest::Client::new(),
            key_cache: RwLock::new(None),
            key_max_age: Duration::from_secs(u64::MAX),
            static_key: Some(key),
        }
    }

    /// Get the verification key: pinned, cached, or freshly fetched.
    ///
    /// A stale cached key is still used when a refresh attempt fails; only
    /// when no key has ever been obtained does provider unavailability
    /// surface to the caller.
    async fn decoding_key(&self) -> GatewayResult<DecodingKey> {
        if let Some(key) = &self.static_key {
            return Ok(key.clone());
        }

        if let Some(cached) = self.key_cache.read().await.as_ref() {
            if cached.fetched_at.elapsed() < self.key_max_age {
                return Ok(cached.key.clone());
            }
        }

        match self.fetch_key().await {
            Ok(key) => {
                let mut cache = self.key_cache.write().await;
                *cache = Some(CachedKey {
                    key: key.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(key)
            }
            Err(error) => {
                if let Some(cached) = self.key_cache.read().await.as_ref() {
                    warn!(
                        error = %error,
                        "Provider key refresh failed, using cached key"
                    );
                    return Ok(cached.key.clone());
                }
                Err(error)
            }
        }
    }

    async fn fetch_key(&self) -> GatewayResult<DecodingKey> {
        debug!(endpoint = %self.realm_endpoint, "Fetching realm public key");

        let response = self
            .http
            .get(&self.realm_endpoint)
            .send()
            .await
            .map_err(|e| GatewayError::provider_unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GatewayError::provider_unavailable(format!(
                "realm endpoint returned {}",
                response.status()
            )));
        }

        let document: RealmDocument = response
            .json()
            .await
            .map_err(|e| GatewayError::provider_unavailable(format!("invalid realm document: {e}")))?;

        let pem = format!(
            "-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----\n",
            document.public_key
        );
        DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| GatewayError::provider_unavailable(format!("invalid public key: {e}")))
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        validation
    }
}

#[async_trait::async_trait]
impl TokenVerifier for OidcTokenVerifier {
    async fn verify(&self, token: &str) -> GatewayResult<Identity> {
        let key = self.decoding_key().await?;

        let data = decode::<Claims>(token, &key, &self.validation()).map_err(|error| {
            let reason = match error.kind() {
                ErrorKind::ExpiredSignature => "token expired".to_string(),
                ErrorKind::InvalidAudience => "invalid audience".to_string(),
                ErrorKind::InvalidSignature => "invalid signature".to_string(),
                ErrorKind::ImmatureSignature => "token not yet valid".to_string(),
                _ => error.to_string(),
            };
            GatewayError::auth_invalid(reason)
        })?;

        let identity = Identity::from_claims(data.claims);
        debug!(subject = %identity.subject, "Token verified");
        Ok(identity)
    }
}
