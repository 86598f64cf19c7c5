//! Workload cluster trust configuration
//!
//! The clusters YAML file names every workload cluster whose tokens the
//! service will accept, keyed by OIDC issuer. Each entry carries its
//! verifying keys either inline (`jwks_data`, preferred) or as a URI to
//! fetch from (`jwks_uri`).

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::token::JwkSet;

/// Configuration for the set of trusted workload clusters
///
/// Deserialized from the top-level `clusters` list of the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct ClustersConfig {
    /// Workload cluster entries, in file order
    pub clusters: Vec<ClusterConfig>,
}

/// Configuration for a single trusted workload cluster
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Operator-facing identifier; unique across entries
    pub name: String,

    /// OIDC issuer URL; must equal the `iss` claim of this cluster's
    /// tokens byte-exactly
    pub issuer: String,

    /// URL to fetch the JWKS from
    #[serde(default)]
    pub jwks_uri: Option<String>,

    /// Inline JWKS; avoids runtime network calls
    #[serde(default)]
    pub jwks_data: Option<JwkSet>,
}

impl ClusterConfig {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::configuration("name is required"));
        }
        if self.issuer.is_empty() {
            return Err(Error::configuration("issuer is required"));
        }
        match (&self.jwks_uri, &self.jwks_data) {
            (None, None) => {
                return Err(Error::configuration(
                    "either jwks_uri or jwks_data must be provided",
                ));
            }
            (Some(_), Some(_)) => {
                return Err(Error::configuration(
                    "jwks_uri and jwks_data are mutually exclusive",
                ));
            }
            (Some(uri), None) if uri.is_empty() => {
                return Err(Error::configuration("jwks_uri must not be empty"));
            }
            (None, Some(jwks)) if jwks.keys.is_empty() => {
                return Err(Error::configuration(
                    "jwks_data must contain at least one key",
                ));
            }
            _ => {}
        }
        Ok(())
    }
}

impl ClustersConfig {
    /// Validate the configuration
    ///
    /// Checks every entry and rejects duplicate names and duplicate
    /// issuers. Issuers are trust anchors, so comparison is byte-exact
    /// with no URL canonicalization.
    pub fn validate(&self) -> Result<()> {
        if self.clusters.is_empty() {
            return Err(Error::configuration(
                "at least one cluster must be configured",
            ));
        }

        let mut names: HashMap<&str, usize> = HashMap::new();
        let mut issuers: HashMap<&str, usize> = HashMap::new();

        for (i, cluster) in self.clusters.iter().enumerate() {
            cluster
                .validate()
                .map_err(|e| Error::configuration(format!("cluster[{i}]: {e}")))?;

            if names.insert(&cluster.name, i).is_some() {
                return Err(Error::configuration(format!(
                    "cluster[{i}]: duplicate name {:?}",
                    cluster.name
                )));
            }
            if issuers.insert(&cluster.issuer, i).is_some() {
                return Err(Error::configuration(format!(
                    "cluster[{i}]: duplicate issuer {:?}",
                    cluster.issuer
                )));
            }
        }

        Ok(())
    }
}

/// Load and validate a clusters configuration from a YAML file
pub fn load_clusters_config(path: impl AsRef<Path>) -> Result<ClustersConfig> {
    let data = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        Error::configuration(format!(
            "failed to read config file {}: {e}",
            path.as_ref().display()
        ))
    })?;

    let config: ClustersConfig = serde_yaml::from_str(&data)
        .map_err(|e| Error::configuration(format!("failed to parse YAML: {e}")))?;

    config.validate()?;

    Ok(config)
}

/// Immutable issuer-indexed view of a validated [`ClustersConfig`]
///
/// Built once at startup; lookup is a single map probe.
#[derive(Debug)]
pub struct ClusterRegistry {
    entries: Vec<ClusterConfig>,
    by_issuer: HashMap<String, usize>,
}

impl ClusterRegistry {
    /// Build a registry from a clusters configuration
    ///
    /// Validates the configuration; an invalid configuration is fatal
    /// for the process.
    pub fn new(config: ClustersConfig) -> Result<Self> {
        config.validate()?;

        let by_issuer = config
            .clusters
            .iter()
            .enumerate()
            .map(|(i, c)| (c.issuer.clone(), i))
            .collect();

        Ok(Self {
            entries: config.clusters,
            by_issuer,
        })
    }

    /// Look up a cluster by the exact `iss` claim value
    pub fn find_by_issuer(&self, issuer: &str) -> Option<&ClusterConfig> {
        self.by_issuer.get(issuer).map(|&i| &self.entries[i])
    }

    /// All registered clusters, in configuration order
    pub fn clusters(&self) -> &[ClusterConfig] {
        &self.entries
    }
}
