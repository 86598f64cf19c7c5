//! Token validation via the Kubernetes TokenReview API
//!
//! Defers verification to the workload cluster's API server instead of
//! checking signatures locally. Costs one network round-trip per check;
//! the JWKS validator is preferred where the operator can distribute
//! key sets.

use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{TokenReview, TokenReviewSpec, TokenReviewStatus};
use kube::api::PostParams;
use kube::{Api, Client};
use tracing::debug;

use super::{ServiceAccountIdentity, TokenValidator};
use crate::error::{Error, Result};

const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

/// Validates bearer tokens by submitting them to the workload cluster's
/// TokenReview API
pub struct ReviewValidator {
    client: Client,
    audiences: Option<Vec<String>>,
}

impl ReviewValidator {
    /// Create a validator over a workload cluster client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            audiences: None,
        }
    }

    /// Create a validator that also checks token audiences
    pub fn with_audiences(client: Client, audiences: Vec<String>) -> Self {
        Self {
            client,
            audiences: Some(audiences),
        }
    }
}

#[async_trait]
impl TokenValidator for ReviewValidator {
    async fn validate(&self, bearer_token: &str) -> Result<ServiceAccountIdentity> {
        let api: Api<TokenReview> = Api::all(self.client.clone());

        let token_review = TokenReview {
            spec: TokenReviewSpec {
                token: Some(bearer_token.to_string()),
                audiences: self.audiences.clone(),
            },
            ..Default::default()
        };

        let result = api.create(&PostParams::default(), &token_review).await?;

        let status = result
            .status
            .ok_or_else(|| Error::token_rejected("TokenReview returned no status"))?;

        let identity = identity_from_status(&status)?;

        debug!(
            namespace = %identity.namespace,
            service_account = %identity.name,
            "TokenReview validated token"
        );

        Ok(identity)
    }
}

/// Extract the service account identity from a TokenReview status
fn identity_from_status(status: &TokenReviewStatus) -> Result<ServiceAccountIdentity> {
    if !status.authenticated.unwrap_or(false) {
        let message = status
            .error
            .as_deref()
            .unwrap_or("token is not authenticated");
        return Err(Error::token_rejected(message));
    }

    let user = status
        .user
        .as_ref()
        .ok_or_else(|| Error::token_rejected("TokenReview authenticated but no user info"))?;

    let username = user
        .username
        .as_deref()
        .ok_or_else(|| Error::malformed_claims("username"))?;
    let uid = user.uid.as_deref().unwrap_or_default();

    parse_service_account_username(username, uid)
}

/// Parse a `system:serviceaccount:<namespace>:<name>` username
fn parse_service_account_username(username: &str, uid: &str) -> Result<ServiceAccountIdentity> {
    let remainder = username
        .strip_prefix(SERVICE_ACCOUNT_PREFIX)
        .ok_or_else(|| Error::malformed_claims("username"))?;

    let (namespace, name) = remainder
        .split_once(':')
        .ok_or_else(|| Error::malformed_claims("username"))?;

    if namespace.is_empty() || name.is_empty() {
        return Err(Error::malformed_claims("username"));
    }
    if uid.is_empty() {
        return Err(Error::malformed_claims("uid"));
    }

    Ok(ServiceAccountIdentity::new(namespace, name, uid))
}
