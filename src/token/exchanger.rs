//! Identity-preserving token exchange against the management cluster
//!
//! A validated workload identity is exchanged for a fresh management
//! cluster token for the service account with the same namespace and
//! name. No identity mapping, renaming, or namespace translation
//! happens here; the management-side service account must have been
//! pre-provisioned by the operator, and RBAC on that account controls
//! what the minted token can do.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{TokenRequest, TokenRequestSpec};
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::PostParams;
use kube::{Api, Client};
use tracing::debug;

use super::cache::{CachedToken, TokenCache};
use super::ServiceAccountIdentity;
use crate::error::{Error, Result};

/// Default audience for minted tokens
const DEFAULT_AUDIENCE: &str = "https://kubernetes.default.svc";

/// Default requested token lifetime (1 hour)
const DEFAULT_TTL_SECONDS: i64 = 3600;

/// Default per-RPC deadline for management cluster calls
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for token exchange
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Audiences for minted tokens
    pub audiences: Vec<String>,
    /// Requested token lifetime in seconds
    pub ttl_seconds: i64,
    /// Deadline for each management cluster RPC
    pub request_timeout: Duration,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            audiences: vec![DEFAULT_AUDIENCE.to_string()],
            ttl_seconds: DEFAULT_TTL_SECONDS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Minimal view of a management cluster service account
#[derive(Debug, Clone)]
pub struct ServiceAccountRef {
    /// Namespace of the service account
    pub namespace: String,
    /// Name of the service account
    pub name: String,
    /// UID of the service account in the management cluster
    pub uid: String,
}

/// A token minted by the management cluster
#[derive(Debug, Clone)]
pub struct MintedToken {
    /// The minted JWT
    pub token: String,
    /// Authoritative expiration reported by the API server
    pub expires_at: SystemTime,
}

/// The two-operation contract against the management cluster
///
/// [`KubeManagementClient`] is the production implementation; tests use
/// fakes that return pre-seeded accounts and deterministic tokens.
#[async_trait]
pub trait ManagementClient: Send + Sync {
    /// Fetch a service account, failing if it does not exist
    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccountRef>;

    /// Mint a token for a service account via the TokenRequest API
    async fn create_service_account_token(
        &self,
        namespace: &str,
        name: &str,
        audiences: &[String],
        ttl_seconds: i64,
    ) -> Result<MintedToken>;
}

/// Management cluster client over the Kubernetes API
#[derive(Clone)]
pub struct KubeManagementClient {
    client: Client,
}

impl KubeManagementClient {
    /// Create a client from a kube client for the management cluster
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ManagementClient for KubeManagementClient {
    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccountRef> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);

        let sa = api.get(name).await.map_err(|e| match e {
            kube::Error::Api(ae) if ae.code == 404 => {
                Error::service_account_not_found(namespace, name)
            }
            other => Error::Kube(other),
        })?;

        Ok(ServiceAccountRef {
            namespace: namespace.to_string(),
            name: name.to_string(),
            uid: sa.metadata.uid.unwrap_or_default(),
        })
    }

    async fn create_service_account_token(
        &self,
        namespace: &str,
        name: &str,
        audiences: &[String],
        ttl_seconds: i64,
    ) -> Result<MintedToken> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);

        let token_request = TokenRequest {
            spec: TokenRequestSpec {
                audiences: audiences.to_vec(),
                expiration_seconds: Some(ttl_seconds),
                bound_object_ref: None,
            },
            ..Default::default()
        };

        let result = api
            .create_token_request(name, &PostParams::default(), &token_request)
            .await?;

        let status = result
            .status
            .ok_or_else(|| Error::mgmt_api("TokenRequest returned no status"))?;

        Ok(MintedToken {
            token: status.token,
            expires_at: SystemTime::from(status.expiration_timestamp.0),
        })
    }
}

/// Per-exchange metadata alongside the minted token
#[derive(Debug, Clone)]
pub struct TokenMetadata {
    /// The minted JWT
    pub token: String,
    /// Namespace of the exchanged identity
    pub namespace: String,
    /// Name of the exchanged identity
    pub service_account: String,
    /// Authoritative expiration recorded at mint time
    pub expires_at: SystemTime,
    /// UID of the workload-side service account the exchange was keyed by
    pub service_account_uid: String,
}

/// Exchanges validated workload identities for management cluster tokens
///
/// Minted tokens are cached by workload UID until their authoritative
/// expiry, so repeated checks from the same identity cost one TokenRequest
/// call per token lifetime instead of one per check. Failures are never
/// cached; a transient error fails only the current request.
pub struct Exchanger {
    client: Arc<dyn ManagementClient>,
    config: ExchangeConfig,
    cache: TokenCache,
}

impl Exchanger {
    /// Create an exchanger with a freshly started token cache
    ///
    /// An empty audience list in the configuration falls back to the
    /// default Kubernetes API server audience.
    pub fn new(client: Arc<dyn ManagementClient>, config: ExchangeConfig) -> Self {
        Self::with_cache(client, config, TokenCache::new())
    }

    /// Create an exchanger with a caller-supplied cache
    pub fn with_cache(
        client: Arc<dyn ManagementClient>,
        mut config: ExchangeConfig,
        cache: TokenCache,
    ) -> Self {
        if config.audiences.is_empty() {
            config.audiences = vec![DEFAULT_AUDIENCE.to_string()];
        }

        Self {
            client,
            config,
            cache,
        }
    }

    /// Exchange an identity for a management cluster bearer token
    pub async fn exchange(&self, identity: &ServiceAccountIdentity) -> Result<String> {
        Ok(self.cached_or_mint(identity).await?.token)
    }

    /// Exchange an identity and return the token with its metadata
    pub async fn exchange_with_metadata(
        &self,
        identity: &ServiceAccountIdentity,
    ) -> Result<TokenMetadata> {
        let entry = self.cached_or_mint(identity).await?;

        Ok(TokenMetadata {
            token: entry.token,
            namespace: identity.namespace.clone(),
            service_account: identity.name.clone(),
            expires_at: entry.expires_at,
            service_account_uid: identity.uid.clone(),
        })
    }

    /// Halt the cache's background sweeper
    pub fn stop(&self) {
        self.cache.stop();
    }

    async fn cached_or_mint(&self, identity: &ServiceAccountIdentity) -> Result<CachedToken> {
        if let Some(entry) = self.cache.get(&identity.uid) {
            return Ok(entry);
        }

        let timeout = self.config.request_timeout;

        // The same-named service account must exist before a token is
        // requested; a miss here is the operator-facing "not provisioned"
        // signal.
        let sa = tokio::time::timeout(
            timeout,
            self.client
                .get_service_account(&identity.namespace, &identity.name),
        )
        .await
        .map_err(|_| Error::DeadlineExceeded)??;

        debug!(
            namespace = %identity.namespace,
            service_account = %identity.name,
            management_uid = %sa.uid,
            "Service account present in management cluster"
        );

        let minted = tokio::time::timeout(
            timeout,
            self.client.create_service_account_token(
                &identity.namespace,
                &identity.name,
                &self.config.audiences,
                self.config.ttl_seconds,
            ),
        )
        .await
        .map_err(|_| Error::DeadlineExceeded)??;

        if minted.token.is_empty() {
            return Err(Error::mgmt_api("received empty token from TokenRequest API"));
        }

        self.cache
            .set(&identity.uid, minted.token.clone(), minted.expires_at);

        Ok(CachedToken {
            token: minted.token,
            expires_at: minted.expires_at,
        })
    }
}
