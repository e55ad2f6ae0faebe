//! Signature and claim verification against one trust domain.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) for `alg` and `kid`.
//! 2. Refuse algorithms outside the domain's configured list.
//! 3. Pick the signing key from the domain's JWKS by `kid`; a token without
//!    `kid` is accepted only when the set holds exactly one key. An unknown
//!    `kid` triggers a single forced refresh before failing.
//! 4. Verify signature, `exp` (with leeway), `iss` and `aud`.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{
    Algorithm, DecodingKey, Validation,
    jwk::{Jwk, JwkSet},
};
use tracing::debug;

use super::jwks::{HttpJwksFetcher, JwksCache, JwksError, JwksFetcher};
use super::principal::PrincipalClaims;
use crate::config::{TrustConfig, TrustDomain};
use crate::{Error, Result};

/// Why a token failed verification. Collapsed to an opaque rejection at the
/// gate; the detail goes to logs only.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Key set unavailable
    #[error(transparent)]
    Jwks(#[from] JwksError),

    /// No key in the set matches the token
    #[error("no signing key for kid {0:?}")]
    UnknownKey(Option<String>),

    /// The matching JWK cannot be turned into a verification key
    #[error("unusable signing key: {0}")]
    UnusableKey(String),

    /// Token `alg` is not one the domain accepts
    #[error("algorithm {0:?} not accepted")]
    AlgorithmNotAllowed(Algorithm),

    /// Header, signature or claim validation failed
    #[error("JWT verification failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Verification did not finish within its deadline
    #[error("verification exceeded deadline of {0:?}")]
    Timeout(Duration),
}

/// Verifies bearer tokens for exactly one [`TrustDomain`].
pub struct TokenVerifier {
    domain: TrustDomain,
    jwks: JwksCache,
    leeway_secs: u64,
}

impl TokenVerifier {
    /// Verifier over an explicit key cache.
    #[must_use]
    pub fn new(domain: TrustDomain, jwks: JwksCache, leeway_secs: u64) -> Self {
        Self {
            domain,
            jwks,
            leeway_secs,
        }
    }

    /// Verifier with its own HTTP fetcher and cache, built from shared trust
    /// settings.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if HTTPS is required and the JWKS URI is not HTTPS,
    /// [`Error::Http`] if the fetcher's client cannot be built.
    pub fn from_config(domain: TrustDomain, trust: &TrustConfig) -> Result<Self> {
        if trust.require_https && !domain.jwks_uri.starts_with("https://") {
            return Err(Error::Config(format!(
                "trust.{}.jwks_uri must use HTTPS: {}",
                domain.kind, domain.jwks_uri
            )));
        }

        let fetcher: Arc<dyn JwksFetcher> = Arc::new(HttpJwksFetcher::new(
            trust.verify_timeout,
            trust.require_https,
        )?);
        let jwks = JwksCache::new(
            domain.jwks_uri.clone(),
            fetcher,
            trust.jwks_cache_ttl,
            domain.jwks_requests_per_minute,
        );
        Ok(Self::new(domain, jwks, trust.leeway_secs))
    }

    /// The domain this verifier enforces.
    #[must_use]
    pub fn domain(&self) -> &TrustDomain {
        &self.domain
    }

    /// Verify `token` and return its claims.
    ///
    /// # Errors
    ///
    /// [`VerifyError`] describing the first check that failed.
    pub async fn verify(&self, token: &str) -> std::result::Result<PrincipalClaims, VerifyError> {
        let header = jsonwebtoken::decode_header(token)?;
        if !self.domain.algorithms.contains(&header.alg) {
            return Err(VerifyError::AlgorithmNotAllowed(header.alg));
        }

        let key = self.decoding_key(header.kid.as_deref()).await?;

        // Allow-list already checked; the key verifies only its own family
        let mut validation = Validation::new(header.alg);
        validation.leeway = self.leeway_secs;
        validation.set_issuer(&[&self.domain.issuer]);
        validation.set_audience(&[&self.domain.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        let data = jsonwebtoken::decode::<PrincipalClaims>(token, &key, &validation)?;
        Ok(data.claims)
    }

    /// [`verify`](Self::verify) bounded by `deadline`, JWKS fetch included.
    pub async fn verify_within(
        &self,
        token: &str,
        deadline: Duration,
    ) -> std::result::Result<PrincipalClaims, VerifyError> {
        tokio::time::timeout(deadline, self.verify(token))
            .await
            .map_err(|_| VerifyError::Timeout(deadline))?
    }

    async fn decoding_key(
        &self,
        kid: Option<&str>,
    ) -> std::result::Result<DecodingKey, VerifyError> {
        let jwks = self.jwks.get(false).await?;
        if let Some(jwk) = select_jwk(&jwks, kid) {
            return to_decoding_key(jwk);
        }

        // Unknown kid: refresh once and retry
        debug!(domain = %self.domain.kind, kid = ?kid, "Key not in cached JWKS, refreshing");
        let jwks = self.jwks.get(true).await?;
        select_jwk(&jwks, kid)
            .map(to_decoding_key)
            .unwrap_or_else(|| Err(VerifyError::UnknownKey(kid.map(String::from))))
    }
}

fn select_jwk<'a>(jwks: &'a JwkSet, kid: Option<&str>) -> Option<&'a Jwk> {
    match kid {
        Some(kid) => jwks.find(kid),
        None if jwks.keys.len() == 1 => jwks.keys.first(),
        None => None,
    }
}

fn to_decoding_key(jwk: &Jwk) -> std::result::Result<DecodingKey, VerifyError> {
    DecodingKey::from_jwk(jwk).map_err(|e| VerifyError::UnusableKey(e.to_string()))
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::jwk::CommonParameters;

    use super::*;
    use crate::dpop::SigningKeyPair;

    fn jwk_with_kid(kid: Option<&str>) -> Jwk {
        let pair = SigningKeyPair::generate().unwrap();
        let mut jwk = pair.public_jwk().clone();
        jwk.common = CommonParameters {
            key_id: kid.map(String::from),
            ..CommonParameters::default()
        };
        jwk
    }

    #[test]
    fn key_selected_by_kid() {
        let set = JwkSet {
            keys: vec![jwk_with_kid(Some("a")), jwk_with_kid(Some("b"))],
        };
        assert_eq!(
            select_jwk(&set, Some("b")).and_then(|k| k.common.key_id.as_deref()),
            Some("b")
        );
        assert!(select_jwk(&set, Some("c")).is_none());
    }

    #[test]
    fn missing_kid_needs_single_key_set() {
        let single = JwkSet {
            keys: vec![jwk_with_kid(Some("only"))],
        };
        assert!(select_jwk(&single, None).is_some());

        let pair = JwkSet {
            keys: vec![jwk_with_kid(Some("a")), jwk_with_kid(Some("b"))],
        };
        assert!(select_jwk(&pair, None).is_none());
    }

    #[test]
    fn ec_jwk_converts_to_decoding_key() {
        assert!(to_decoding_key(&jwk_with_kid(None)).is_ok());
    }
}
