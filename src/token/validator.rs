//! JWKS-based JWT validation
//!
//! Verifies workload cluster service account tokens locally against the
//! issuer's key set. This is the recommended validation mode: after the
//! key sets are loaded, no network round-trip is needed per check.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::jwks::{Jwk, JwkSet, JwksProvider};
use super::{ServiceAccountIdentity, TokenValidator};
use crate::config::ClusterRegistry;
use crate::error::{Error, Result};

/// Signature algorithms accepted on inbound tokens
///
/// Asymmetric only; `none` and HMAC algorithms are rejected by
/// construction.
const ACCEPTED_ALGORITHMS: &[&str] = &["RS256", "RS384", "RS512", "ES256", "ES384", "ES512"];

/// Claim carrying the service account namespace
const NAMESPACE_CLAIM: &str = "kubernetes.io/serviceaccount/namespace";

/// Claim carrying the service account name
const NAME_CLAIM: &str = "kubernetes.io/serviceaccount/service-account.name";

/// Claim carrying the service account UID
const UID_CLAIM: &str = "kubernetes.io/serviceaccount/service-account.uid";

/// JWT header
#[derive(Debug, Deserialize)]
struct JwtHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

/// Validates bearer JWTs against the registered workload clusters
///
/// The issuer claim selects the cluster, the cluster's JWKS verifies the
/// signature, and the Kubernetes projected-token claims yield the
/// identity. No identity is derived from an unverified claim: the `iss`
/// read happens before verification only to select the key set, and the
/// claim set is trusted only after the signature checks out.
pub struct JwksValidator {
    registry: Arc<ClusterRegistry>,
    keys: Arc<JwksProvider>,
}

impl JwksValidator {
    /// Create a validator over a cluster registry and JWKS provider
    pub fn new(registry: Arc<ClusterRegistry>, keys: Arc<JwksProvider>) -> Self {
        Self { registry, keys }
    }
}

#[async_trait]
impl TokenValidator for JwksValidator {
    async fn validate(&self, bearer_token: &str) -> Result<ServiceAccountIdentity> {
        let parts: Vec<&str> = bearer_token.split('.').collect();
        if parts.len() != 3 {
            return Err(Error::malformed_token("not a compact JWS"));
        }
        let (header_b64, payload_b64, signature_b64) = (parts[0], parts[1], parts[2]);

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|e| Error::malformed_token(format!("invalid header encoding: {e}")))?;
        let header: JwtHeader = serde_json::from_slice(&header_bytes)
            .map_err(|e| Error::malformed_token(format!("invalid header: {e}")))?;

        if !ACCEPTED_ALGORITHMS.contains(&header.alg.as_str()) {
            return Err(Error::malformed_token(format!(
                "unacceptable algorithm: {}",
                header.alg
            )));
        }

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|e| Error::malformed_token(format!("invalid payload encoding: {e}")))?;
        let claims: Map<String, Value> = serde_json::from_slice(&payload_bytes)
            .map_err(|e| Error::malformed_token(format!("invalid payload: {e}")))?;

        // The issuer is read before verification only to select the key
        // set. Nothing else is trusted until the signature is checked.
        let issuer = claims
            .get("iss")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::malformed_token("missing iss claim"))?;

        let cluster = self
            .registry
            .find_by_issuer(issuer)
            .ok_or_else(|| Error::unknown_issuer(issuer))?;

        let jwks = self.keys.get_keys(cluster).await?;

        verify_signature(&header, &jwks, header_b64, payload_b64, signature_b64)?;

        validate_temporal_claims(&claims)?;

        let namespace = claim_string(&claims, NAMESPACE_CLAIM)?;
        let name = claim_string(&claims, NAME_CLAIM)?;
        let uid = claim_string(&claims, UID_CLAIM)?;

        debug!(
            cluster = %cluster.name,
            namespace = %namespace,
            service_account = %name,
            "Token validated against cluster JWKS"
        );

        Ok(ServiceAccountIdentity::new(namespace, name, uid))
    }
}

/// Read a required string claim, failing cleanly on absence or type
/// mismatch
fn claim_string(claims: &Map<String, Value>, name: &str) -> Result<String> {
    claims
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| Error::malformed_claims(name))
}

/// Check `exp` and `nbf` against the current instant
///
/// `exp` is required and must be strictly in the future; `nbf`, when
/// present, must not be.
fn validate_temporal_claims(claims: &Map<String, Value>) -> Result<()> {
    let now = unix_now();

    let exp = claims
        .get("exp")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::malformed_token("missing or invalid exp claim"))?;
    if exp <= now {
        return Err(Error::TokenExpired);
    }

    if let Some(nbf_value) = claims.get("nbf") {
        let nbf = nbf_value
            .as_i64()
            .ok_or_else(|| Error::malformed_token("invalid nbf claim"))?;
        if nbf > now {
            return Err(Error::TokenNotYetValid);
        }
    }

    Ok(())
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Verify the JWS signature against the issuer's key set
///
/// Key-id-aware: a `kid` in the token header selects the matching key;
/// without one, every signature-use key is tried. Ordinary signing key
/// rotation needs no special handling because the set may list both the
/// old and the new key.
fn verify_signature(
    header: &JwtHeader,
    jwks: &JwkSet,
    header_b64: &str,
    payload_b64: &str,
    signature_b64: &str,
) -> Result<()> {
    let message = format!("{header_b64}.{payload_b64}");
    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|e| Error::malformed_token(format!("invalid signature encoding: {e}")))?;

    match header.kid.as_deref() {
        Some(kid) => {
            let key = jwks.find(kid).ok_or(Error::SignatureInvalid)?;
            verify_with_key(&header.alg, key, message.as_bytes(), &signature)
        }
        None => {
            for key in jwks.signing_keys() {
                if verify_with_key(&header.alg, key, message.as_bytes(), &signature).is_ok() {
                    return Ok(());
                }
            }
            Err(Error::SignatureInvalid)
        }
    }
}

fn verify_with_key(alg: &str, jwk: &Jwk, message: &[u8], signature: &[u8]) -> Result<()> {
    match alg {
        "RS256" | "RS384" | "RS512" => verify_rsa_signature(alg, jwk, message, signature),
        "ES256" | "ES384" | "ES512" => verify_ec_signature(alg, jwk, message, signature),
        _ => Err(Error::malformed_token(format!(
            "unacceptable algorithm: {alg}"
        ))),
    }
}

fn verify_rsa_signature(alg: &str, jwk: &Jwk, message: &[u8], signature: &[u8]) -> Result<()> {
    use aws_lc_rs::signature::{self, UnparsedPublicKey};

    let n = jwk.n.as_ref().ok_or(Error::SignatureInvalid)?;
    let e = jwk.e.as_ref().ok_or(Error::SignatureInvalid)?;

    let n_bytes = URL_SAFE_NO_PAD
        .decode(n)
        .map_err(|_| Error::SignatureInvalid)?;
    let e_bytes = URL_SAFE_NO_PAD
        .decode(e)
        .map_err(|_| Error::SignatureInvalid)?;

    // aws-lc-rs takes the public key in PKCS#1 DER form.
    let public_key_der = build_rsa_public_key_der(&n_bytes, &e_bytes);

    let algorithm: &dyn signature::VerificationAlgorithm = match alg {
        "RS256" => &signature::RSA_PKCS1_2048_8192_SHA256,
        "RS384" => &signature::RSA_PKCS1_2048_8192_SHA384,
        "RS512" => &signature::RSA_PKCS1_2048_8192_SHA512,
        _ => return Err(Error::SignatureInvalid),
    };

    let public_key = UnparsedPublicKey::new(algorithm, &public_key_der);
    public_key
        .verify(message, signature)
        .map_err(|_| Error::SignatureInvalid)
}

fn verify_ec_signature(alg: &str, jwk: &Jwk, message: &[u8], signature: &[u8]) -> Result<()> {
    use aws_lc_rs::signature::{self, UnparsedPublicKey};

    let x = jwk.x.as_ref().ok_or(Error::SignatureInvalid)?;
    let y = jwk.y.as_ref().ok_or(Error::SignatureInvalid)?;

    let x_bytes = URL_SAFE_NO_PAD
        .decode(x)
        .map_err(|_| Error::SignatureInvalid)?;
    let y_bytes = URL_SAFE_NO_PAD
        .decode(y)
        .map_err(|_| Error::SignatureInvalid)?;

    // Uncompressed SEC1 point: 0x04 || x || y
    let mut public_key_bytes = vec![0x04];
    public_key_bytes.extend_from_slice(&x_bytes);
    public_key_bytes.extend_from_slice(&y_bytes);

    let algorithm: &dyn signature::VerificationAlgorithm = match alg {
        "ES256" => &signature::ECDSA_P256_SHA256_FIXED,
        "ES384" => &signature::ECDSA_P384_SHA384_FIXED,
        "ES512" => &signature::ECDSA_P521_SHA512_FIXED,
        _ => return Err(Error::SignatureInvalid),
    };

    let public_key = UnparsedPublicKey::new(algorithm, &public_key_bytes);
    public_key
        .verify(message, signature)
        .map_err(|_| Error::SignatureInvalid)
}

/// Build an RSA public key in PKCS#1 DER format from n and e components
fn build_rsa_public_key_der(n: &[u8], e: &[u8]) -> Vec<u8> {
    // RSAPublicKey ::= SEQUENCE {
    //     modulus           INTEGER,
    //     publicExponent    INTEGER
    // }

    fn encode_integer(value: &[u8]) -> Vec<u8> {
        let mut encoded = Vec::new();

        // Strip leading zeros but keep one if the high bit is set
        let value = match value.iter().position(|&b| b != 0) {
            Some(pos) => &value[pos..],
            None => &[0u8],
        };

        // Add leading zero if high bit is set (to ensure positive number)
        let needs_padding = !value.is_empty() && (value[0] & 0x80) != 0;
        let len = value.len() + if needs_padding { 1 } else { 0 };

        encoded.push(0x02); // INTEGER tag
        encode_length(len, &mut encoded);
        if needs_padding {
            encoded.push(0x00);
        }
        encoded.extend_from_slice(value);

        encoded
    }

    fn encode_length(len: usize, out: &mut Vec<u8>) {
        if len < 128 {
            out.push(len as u8);
        } else if len < 256 {
            out.push(0x81);
            out.push(len as u8);
        } else {
            out.push(0x82);
            out.push((len >> 8) as u8);
            out.push(len as u8);
        }
    }

    let n_encoded = encode_integer(n);
    let e_encoded = encode_integer(e);
    let content_len = n_encoded.len() + e_encoded.len();

    let mut der = Vec::new();
    der.push(0x30); // SEQUENCE tag
    encode_length(content_len, &mut der);
    der.extend_from_slice(&n_encoded);
    der.extend_from_slice(&e_encoded);

    der
}
