//! Possession-proof construction (RFC 9449 `DPoP` proofs).
//!
//! A proof is a compact ES256 JWT:
//!
//! - header: `typ = "dpop+jwt"`, `alg = "ES256"`, `jwk` = the process public key
//! - payload: `jti`, `htm`, `htu`, `iat`, and `ath` when bound to an access token
//!
//! Proofs are never cached; every outbound request gets its own `jti`.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, Header};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use gateway_core::DPOP_JWT_TYPE;

use super::keys::KeyMaterialStore;
use crate::{Error, Result};

/// Payload of a possession proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofClaims {
    /// Unique proof identifier (UUID v4)
    pub jti: String,
    /// HTTP method of the request the proof is for
    pub htm: String,
    /// Target URI without query or fragment
    pub htu: String,
    /// Issued-at (Unix seconds)
    pub iat: u64,
    /// Access-token hash, present when the proof is bound to a token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ath: Option<String>,
}

/// Builds signed possession proofs with the process key.
pub struct ProofBuilder {
    keys: Arc<KeyMaterialStore>,
}

impl ProofBuilder {
    /// Create a builder that signs with `keys`.
    #[must_use]
    pub fn new(keys: Arc<KeyMaterialStore>) -> Self {
        Self { keys }
    }

    /// The key store backing this builder.
    #[must_use]
    pub fn key_store(&self) -> &Arc<KeyMaterialStore> {
        &self.keys
    }

    /// Build a proof for one request.
    ///
    /// `http_method` is used verbatim. When `access_token` is given the proof
    /// carries its `ath` hash and cannot be replayed alongside another token.
    ///
    /// # Errors
    ///
    /// - [`Error::KeyUnavailable`] if the key pair cannot be obtained
    /// - [`Error::Proof`] if `target_url` does not parse or signing fails
    pub async fn build_proof(
        &self,
        target_url: &str,
        http_method: &str,
        access_token: Option<&str>,
    ) -> Result<String> {
        let htu = normalize_htu(target_url)?;
        let keys = self.keys.get_or_create_key_pair().await?;

        let claims = ProofClaims {
            jti: uuid::Uuid::new_v4().to_string(),
            htm: http_method.to_string(),
            htu,
            iat: unix_now(),
            ath: access_token.map(access_token_hash),
        };

        let mut header = Header::new(Algorithm::ES256);
        header.typ = Some(DPOP_JWT_TYPE.to_string());
        header.jwk = Some(keys.public_jwk().clone());

        jsonwebtoken::encode(&header, &claims, keys.encoding_key())
            .map_err(|e| Error::Proof(format!("signing failed: {e}")))
    }

    /// [`build_proof`](Self::build_proof) bounded by `deadline`.
    ///
    /// The first call in a process may hit the disk; this keeps a stuck
    /// filesystem from stalling the caller indefinitely.
    pub async fn build_proof_within(
        &self,
        target_url: &str,
        http_method: &str,
        access_token: Option<&str>,
        deadline: Duration,
    ) -> Result<String> {
        tokio::time::timeout(
            deadline,
            self.build_proof(target_url, http_method, access_token),
        )
        .await
        .map_err(|_| Error::Proof(format!("deadline of {deadline:?} exceeded")))?
    }
}

/// `ath`: base64url (no padding) of the SHA-256 of the access token's ASCII bytes.
#[must_use]
pub fn access_token_hash(access_token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(access_token.as_bytes()))
}

/// `htu`: the target URI with query and fragment removed.
pub fn normalize_htu(target_url: &str) -> Result<String> {
    let mut url = Url::parse(target_url)
        .map_err(|e| Error::Proof(format!("invalid target URL '{target_url}': {e}")))?;
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
