//! Test helpers for minting Kubernetes-style service account JWTs
//!
//! Each [`JwtSigner`] holds a freshly generated RSA key pair and exports
//! its public half as a JWK, so tests can register the signer as a
//! workload cluster and validate the tokens it mints.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::Value;

use crate::token::{Jwk, JwkSet};

/// Signs Kubernetes service account JWTs with a generated RSA key pair
pub(crate) struct JwtSigner {
    encoding_key: EncodingKey,
    jwk: Jwk,
    issuer: String,
    key_id: String,
}

impl JwtSigner {
    /// Create a signer with a random key id
    pub(crate) fn new(issuer: &str) -> Self {
        Self::with_key_id(issuer, &uuid::Uuid::new_v4().to_string())
    }

    /// Create a signer with a specific key id
    pub(crate) fn with_key_id(issuer: &str, key_id: &str) -> Self {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("generate RSA key");

        let pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .expect("encode private key PEM");
        let encoding_key =
            EncodingKey::from_rsa_pem(pem.as_bytes()).expect("load RSA signing key");

        let public_key = private_key.to_public_key();
        let jwk = Jwk {
            kty: "RSA".to_string(),
            kid: Some(key_id.to_string()),
            alg: Some("RS256".to_string()),
            use_: Some("sig".to_string()),
            n: Some(URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be())),
            e: Some(URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be())),
            crv: None,
            x: None,
            y: None,
        };

        Self {
            encoding_key,
            jwk,
            issuer: issuer.to_string(),
            key_id: key_id.to_string(),
        }
    }

    pub(crate) fn key_id(&self) -> &str {
        &self.key_id
    }

    /// The public half of the signing key
    pub(crate) fn jwk(&self) -> Jwk {
        self.jwk.clone()
    }

    /// A JWKS containing only this signer's key
    pub(crate) fn jwks(&self) -> JwkSet {
        JwkSet {
            keys: vec![self.jwk.clone()],
        }
    }

    /// Sign a service account token with the flat claim layout Kubernetes
    /// emits for projected tokens
    pub(crate) fn sign_service_account_token(
        &self,
        namespace: &str,
        name: &str,
        uid: &str,
        audiences: &[&str],
        expires_at: SystemTime,
    ) -> String {
        let now = unix_seconds(SystemTime::now());
        let claims = serde_json::json!({
            "iss": self.issuer,
            "sub": format!("system:serviceaccount:{namespace}:{name}"),
            "aud": audiences,
            "exp": unix_seconds(expires_at),
            "iat": now,
            "nbf": now,
            "jti": uuid::Uuid::new_v4().to_string(),
            "kubernetes.io/serviceaccount/namespace": namespace,
            "kubernetes.io/serviceaccount/service-account.name": name,
            "kubernetes.io/serviceaccount/service-account.uid": uid,
        });

        self.sign_claims(claims, Some(&self.key_id))
    }

    /// Sign an arbitrary claim set, optionally stamping a key id
    pub(crate) fn sign_claims(&self, claims: Value, kid: Option<&str>) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = kid.map(str::to_owned);
        encode(&header, &claims, &self.encoding_key).expect("sign JWT")
    }
}

/// Sign a claim set with HS256; the validator must reject symmetric
/// algorithms regardless of the key
pub(crate) fn sign_hs256(claims: Value) -> String {
    let header = Header::new(Algorithm::HS256);
    let key = EncodingKey::from_secret(b"test-secret");
    encode(&header, &claims, &key).expect("sign JWT")
}

fn unix_seconds(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}
