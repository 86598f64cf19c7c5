//! Token validation, exchange, and caching
//!
//! The pipeline for one authorization check: a bearer JWT is verified
//! against the issuing workload cluster's keys, the service account
//! identity is extracted from its claims, and a fresh management cluster
//! token is minted for the same identity via the TokenRequest API.

mod cache;
mod exchanger;
mod jwks;
mod review;
mod validator;

pub use cache::{CachedToken, TokenCache};
pub use exchanger::{
    ExchangeConfig, Exchanger, KubeManagementClient, ManagementClient, MintedToken,
    ServiceAccountRef, TokenMetadata,
};
pub use jwks::{Jwk, JwkSet, JwksProvider};
pub use review::ReviewValidator;
pub use validator::JwksValidator;

use async_trait::async_trait;

use crate::error::Result;

/// A validated Kubernetes service account identity
///
/// Produced by a [`TokenValidator`], consumed by the [`Exchanger`].
/// Values only; nothing holds onto an identity beyond the check that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccountIdentity {
    /// Namespace of the service account
    pub namespace: String,
    /// Name of the service account
    pub name: String,
    /// UID of the service account in the workload cluster
    pub uid: String,
    /// Canonical username, `system:serviceaccount:<namespace>:<name>`
    pub username: String,
}

impl ServiceAccountIdentity {
    /// Build an identity, deriving the canonical username
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        uid: impl Into<String>,
    ) -> Self {
        let namespace = namespace.into();
        let name = name.into();
        let username = format!("system:serviceaccount:{namespace}:{name}");
        Self {
            namespace,
            name,
            uid: uid.into(),
            username,
        }
    }
}

/// Verifies a bearer credential and returns the identity it asserts
///
/// Two implementations exist: [`JwksValidator`] verifies signatures
/// locally against per-issuer key sets, and [`ReviewValidator`] defers to
/// the workload cluster's TokenReview API. They are interchangeable at
/// process start.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate a bearer token and extract the service account identity
    async fn validate(&self, bearer_token: &str) -> Result<ServiceAccountIdentity>;
}
