//! Error types for the token federation service

use thiserror::Error;

/// TokenSmith error taxonomy
///
/// Precise kinds propagate inside the service for logging; the ext_authz
/// boundary collapses them into two deny families (see
/// [`Error::is_credential_failure`]).
#[derive(Debug, Error)]
pub enum Error {
    /// No `authorization` header on the request
    #[error("authorization header not found")]
    HeaderMissing,

    /// Header present but not a well-formed Bearer credential
    #[error("authorization header is not a Bearer token")]
    HeaderMalformed,

    /// Credential is not a signed JWT of an accepted algorithm
    #[error("malformed token: {message}")]
    MalformedToken {
        /// Error message
        message: String,
    },

    /// Token issuer is not present in the cluster registry
    #[error("unknown issuer: {issuer}")]
    UnknownIssuer {
        /// The offending `iss` claim
        issuer: String,
    },

    /// JWKS fetch failed and no usable cache entry exists
    #[error("JWKS unavailable for {uri}: {message}")]
    JwksUnavailable {
        /// JWKS URI the fetch targeted
        uri: String,
        /// Error message
        message: String,
    },

    /// No key in the issuer's JWKS verifies the token signature
    #[error("token signature verification failed")]
    SignatureInvalid,

    /// The `exp` claim is not strictly in the future
    #[error("token expired")]
    TokenExpired,

    /// The `nbf` claim is in the future
    #[error("token not yet valid")]
    TokenNotYetValid,

    /// Required Kubernetes service account claim missing or wrong type
    #[error("missing or invalid claim: {claim}")]
    MalformedIdentityClaims {
        /// Name of the offending claim
        claim: String,
    },

    /// Workload cluster rejected the token via TokenReview
    #[error("token rejected: {message}")]
    TokenRejected {
        /// Rejection reason reported by the TokenReview API
        message: String,
    },

    /// The management cluster has no service account with this identity
    #[error("service account {namespace}/{name} not found in management cluster")]
    ServiceAccountNotFound {
        /// Service account namespace
        namespace: String,
        /// Service account name
        name: String,
    },

    /// Transport or server error from the management cluster
    #[error("management cluster API error: {message}")]
    MgmtApi {
        /// Error message
        message: String,
    },

    /// Outbound I/O exceeded its deadline
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Invalid service configuration
    #[error("configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// gRPC transport error
    #[error("gRPC error: {message}")]
    Grpc {
        /// Error message
        message: String,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

impl Error {
    /// Create a malformed token error
    pub fn malformed_token(msg: impl Into<String>) -> Self {
        Self::MalformedToken {
            message: msg.into(),
        }
    }

    /// Create an unknown issuer error
    pub fn unknown_issuer(issuer: impl Into<String>) -> Self {
        Self::UnknownIssuer {
            issuer: issuer.into(),
        }
    }

    /// Create a JWKS unavailable error
    pub fn jwks_unavailable(uri: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::JwksUnavailable {
            uri: uri.into(),
            message: msg.into(),
        }
    }

    /// Create a malformed identity claims error
    pub fn malformed_claims(claim: impl Into<String>) -> Self {
        Self::MalformedIdentityClaims {
            claim: claim.into(),
        }
    }

    /// Create a token rejected error
    pub fn token_rejected(msg: impl Into<String>) -> Self {
        Self::TokenRejected {
            message: msg.into(),
        }
    }

    /// Create a service account not found error
    pub fn service_account_not_found(
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::ServiceAccountNotFound {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a management cluster API error
    pub fn mgmt_api(msg: impl Into<String>) -> Self {
        Self::MgmtApi {
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create a gRPC transport error
    pub fn grpc(msg: impl Into<String>) -> Self {
        Self::Grpc {
            message: msg.into(),
        }
    }

    /// Check whether this error means the credential itself is untrusted
    ///
    /// Credential failures map to Unauthenticated (HTTP 401) at the
    /// ext_authz boundary. Everything else means the credential was
    /// authentic but the exchange was refused, which maps to
    /// PermissionDenied (HTTP 403).
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self,
            Error::HeaderMissing
                | Error::HeaderMalformed
                | Error::MalformedToken { .. }
                | Error::UnknownIssuer { .. }
                | Error::JwksUnavailable { .. }
                | Error::SignatureInvalid
                | Error::TokenExpired
                | Error::TokenNotYetValid
                | Error::MalformedIdentityClaims { .. }
                | Error::TokenRejected { .. }
        )
    }
}

/// Result type for TokenSmith operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_issuer_error() {
        let err = Error::unknown_issuer("https://unknown.example.com");
        assert!(err.to_string().contains("https://unknown.example.com"));
        assert!(err.is_credential_failure());
    }

    #[test]
    fn test_service_account_not_found_error() {
        let err = Error::service_account_not_found("app-prod", "eso-sa");
        assert!(err.to_string().contains("app-prod/eso-sa"));
        assert!(!err.is_credential_failure());
    }

    #[test]
    fn test_credential_failure_classification() {
        assert!(Error::HeaderMissing.is_credential_failure());
        assert!(Error::malformed_token("garbage").is_credential_failure());
        assert!(Error::SignatureInvalid.is_credential_failure());
        assert!(Error::TokenExpired.is_credential_failure());
        assert!(Error::TokenNotYetValid.is_credential_failure());
        assert!(Error::malformed_claims("kubernetes.io/serviceaccount/namespace")
            .is_credential_failure());
        assert!(!Error::mgmt_api("boom").is_credential_failure());
        assert!(!Error::DeadlineExceeded.is_credential_failure());
        assert!(!Error::configuration("bad").is_credential_failure());
    }
}
