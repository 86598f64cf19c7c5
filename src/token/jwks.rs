//! JWKS (JSON Web Key Set) sourcing and caching
//!
//! Yields the current verifying keys for a cluster: inline key sets are
//! returned directly, remote key sets are fetched over HTTPS and cached
//! per URI.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::ClusterConfig;
use crate::error::{Error, Result};

/// How long a fetched JWKS stays fresh (1 hour)
const FRESHNESS: Duration = Duration::from_secs(3600);

/// Per-request timeout for JWKS fetches
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A JSON Web Key
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA", "EC")
    pub kty: String,

    /// Key ID
    #[serde(default)]
    pub kid: Option<String>,

    /// Algorithm (e.g., "RS256", "ES256")
    #[serde(default)]
    pub alg: Option<String>,

    /// Public key use (e.g., "sig")
    #[serde(default, rename = "use")]
    pub use_: Option<String>,

    // RSA key components
    /// RSA modulus (base64url)
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent (base64url)
    #[serde(default)]
    pub e: Option<String>,

    // EC key components
    /// EC curve name (e.g., "P-256")
    #[serde(default)]
    pub crv: Option<String>,

    /// EC x coordinate (base64url)
    #[serde(default)]
    pub x: Option<String>,

    /// EC y coordinate (base64url)
    #[serde(default)]
    pub y: Option<String>,
}

impl Jwk {
    /// Check if this key can be used for signature verification
    pub fn is_signing_key(&self) -> bool {
        self.use_.as_deref() != Some("enc")
    }

    /// Check if this is an RSA key
    pub fn is_rsa(&self) -> bool {
        self.kty == "RSA" && self.n.is_some() && self.e.is_some()
    }

    /// Check if this is an EC key
    pub fn is_ec(&self) -> bool {
        self.kty == "EC" && self.x.is_some() && self.y.is_some()
    }
}

/// JSON Web Key Set
#[derive(Debug, Clone, Deserialize)]
pub struct JwkSet {
    /// Array of JSON Web Keys
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Find a key by key id
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }

    /// All keys usable for signature verification
    pub fn signing_keys(&self) -> impl Iterator<Item = &Jwk> {
        self.keys.iter().filter(|k| k.is_signing_key())
    }
}

/// Cached remote JWKS entry
#[derive(Debug, Clone)]
struct CachedJwks {
    jwks: JwkSet,
    fetched_at: Instant,
}

impl CachedJwks {
    fn new(jwks: JwkSet) -> Self {
        Self {
            jwks,
            fetched_at: Instant::now(),
        }
    }

    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < FRESHNESS
    }
}

/// Yields the current verifying key set for a cluster
///
/// Inline key sets (`jwks_data`) are returned as-is; remote key sets
/// (`jwks_uri`) are fetched with a bounded timeout and cached for one
/// hour per URI. A failed refresh leaves the previous entry in place and
/// surfaces the error. Concurrent callers may race to fetch the same
/// URI; duplicate fetches cost network, not correctness.
#[derive(Debug)]
pub struct JwksProvider {
    cache: RwLock<HashMap<String, CachedJwks>>,
    client: reqwest::Client,
}

impl Default for JwksProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl JwksProvider {
    /// Create a new provider with a default HTTP client
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self::with_client(client)
    }

    /// Create a provider with a custom HTTP client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            client,
        }
    }

    /// Get the verifying keys for a cluster
    pub async fn get_keys(&self, cluster: &ClusterConfig) -> Result<JwkSet> {
        if let Some(jwks) = &cluster.jwks_data {
            return Ok(jwks.clone());
        }

        let uri = cluster.jwks_uri.as_deref().ok_or_else(|| {
            Error::configuration(format!("cluster {:?} has no JWKS source", cluster.name))
        })?;

        {
            let cache = self.cache.read();
            if let Some(cached) = cache.get(uri) {
                if cached.is_fresh() {
                    return Ok(cached.jwks.clone());
                }
            }
        }

        // Fetch runs outside the lock. A failure leaves any stale entry
        // untouched.
        let jwks = self.fetch(uri).await?;

        self.cache
            .write()
            .insert(uri.to_string(), CachedJwks::new(jwks.clone()));

        Ok(jwks)
    }

    async fn fetch(&self, uri: &str) -> Result<JwkSet> {
        debug!(jwks_uri = %uri, "Fetching JWKS");

        let response = self.client.get(uri).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::DeadlineExceeded
            } else {
                Error::jwks_unavailable(uri, format!("request failed: {e}"))
            }
        })?;

        if !response.status().is_success() {
            return Err(Error::jwks_unavailable(
                uri,
                format!("HTTP {}", response.status()),
            ));
        }

        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| Error::jwks_unavailable(uri, format!("invalid JSON: {e}")))?;

        info!(
            jwks_uri = %uri,
            key_count = jwks.keys.len(),
            "JWKS fetched successfully"
        );

        Ok(jwks)
    }
}
