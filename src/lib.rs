//! TokenSmith: cross-cluster service account token federation
//!
//! An Envoy ext_authz service that lets workloads in peripheral
//! ("workload") Kubernetes clusters reach a central ("management")
//! cluster API server as their own identity, without long-lived
//! credentials.
//!
//! For each authorization check:
//!
//! ```text
//! workload pod ──Bearer JWT──▶ Envoy ──ext_authz Check──▶ TokenSmith
//!     1. verify the JWT against the issuing cluster's JWKS
//!     2. extract the service account identity from its claims
//!     3. mint a management cluster token for the same namespace/name
//!        via the TokenRequest API (cached per workload UID)
//!     4. allow, rewriting `authorization: Bearer <minted token>`
//! ```
//!
//! Trusted workload clusters are declared in a YAML registry keyed by
//! OIDC issuer, each carrying its verifying keys inline or by JWKS URI.
//! The management-side service account with the same namespace and name
//! must be pre-provisioned; its RBAC bounds what the minted token can do.

#![deny(missing_docs)]

pub mod authz;
pub mod config;
pub mod error;
pub mod token;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{Error, Result};
