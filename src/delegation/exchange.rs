//! Delegated token exchange (RFC 8693) with a DPoP-bound request.
//!
//! The caller's access token (the *subject token*) is traded at the
//! authorization server for a narrower token aimed at the configured
//! resource. The request authenticates with client credentials and carries a
//! possession proof for the token endpoint; it has no `Authorization` header.
//!
//! Results are cached per subject token until shortly before they expire.
//! Failures are returned as [`Error::DelegationFailed`] and never retried
//! here: repeated failures must stay visible to whoever owns retry policy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use gateway_core::{ACCESS_TOKEN_TYPE, TOKEN_EXCHANGE_GRANT};

use super::cache::{DelegatedTokenCache, DelegatedTokenCacheEntry, now_ms};
use crate::config::{DelegationConfig, ExchangeClient};
use crate::dpop::{DPOP, ProofBuilder};
use crate::{Error, Result};

/// Form body of a token-exchange request.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct TokenExchangeForm {
    /// Always the token-exchange grant URN
    pub grant_type: &'static str,
    /// Client identifier
    pub client_id: String,
    /// Client secret
    pub client_secret: String,
    /// The caller's access token
    pub subject_token: String,
    /// Always the access-token type URN
    pub subject_token_type: &'static str,
    /// Target resource / audience
    pub resource: String,
}

impl TokenExchangeForm {
    /// Build the form for `subject_token` using `client` credentials.
    #[must_use]
    pub fn new(client: &ExchangeClient, subject_token: &str) -> Self {
        Self {
            grant_type: TOKEN_EXCHANGE_GRANT,
            client_id: client.client_id.clone(),
            client_secret: client.client_secret.clone(),
            subject_token: subject_token.to_string(),
            subject_token_type: ACCESS_TOKEN_TYPE,
            resource: client.resource.clone(),
        }
    }
}

impl std::fmt::Debug for TokenExchangeForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchangeForm")
            .field("grant_type", &self.grant_type)
            .field("client_id", &self.client_id)
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

/// Token endpoint success response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenExchangeResponse {
    /// The delegated token
    pub access_token: String,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Token type as reported by the server (`Bearer`, `DPoP`)
    #[serde(default)]
    pub token_type: Option<String>,
}

/// OAuth error body (RFC 6749 section 5.2)
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

/// How a token-exchange request reaches the authorization server.
#[async_trait]
pub trait ExchangeTransport: Send + Sync {
    /// POST `form` to `token_url` with `proof` in the `DPoP` header.
    async fn exchange(
        &self,
        token_url: &str,
        form: &TokenExchangeForm,
        proof: &str,
    ) -> Result<TokenExchangeResponse>;
}

/// [`ExchangeTransport`] over `reqwest`.
pub struct HttpExchangeTransport {
    http: Client,
}

impl HttpExchangeTransport {
    /// Send exchanges through `http`.
    #[must_use]
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ExchangeTransport for HttpExchangeTransport {
    async fn exchange(
        &self,
        token_url: &str,
        form: &TokenExchangeForm,
        proof: &str,
    ) -> Result<TokenExchangeResponse> {
        let response = self
            .http
            .post(token_url)
            .header(DPOP, proof)
            .form(form)
            .send()
            .await
            .map_err(|e| Error::DelegationFailed(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::DelegationFailed(format!(
                "token exchange failed: HTTP {status} - {}",
                oauth_error_detail(&body)
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::DelegationFailed(format!("failed to parse token response: {e}")))
    }
}

/// Prefer `error_description`, then `error`, then the raw body.
fn oauth_error_detail(body: &str) -> String {
    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(OAuthErrorBody {
            error_description: Some(description),
            ..
        }) => description,
        Ok(OAuthErrorBody {
            error: Some(error), ..
        }) => error,
        _ if body.trim().is_empty() => "empty response body".to_string(),
        _ => body.trim().to_string(),
    }
}

/// Exchanges subject tokens for delegated tokens, with caching.
pub struct DelegationExchanger {
    config: DelegationConfig,
    proofs: Arc<ProofBuilder>,
    transport: Arc<dyn ExchangeTransport>,
    cache: DelegatedTokenCache,
}

impl DelegationExchanger {
    /// Create an exchanger with an explicit transport.
    #[must_use]
    pub fn new(
        config: DelegationConfig,
        proofs: Arc<ProofBuilder>,
        transport: Arc<dyn ExchangeTransport>,
    ) -> Self {
        Self {
            config,
            proofs,
            transport,
            cache: DelegatedTokenCache::new(),
        }
    }

    /// Create an exchanger that talks HTTP through `http`.
    #[must_use]
    pub fn with_http(config: DelegationConfig, proofs: Arc<ProofBuilder>, http: Client) -> Self {
        Self::new(config, proofs, Arc::new(HttpExchangeTransport::new(http)))
    }

    /// Exchange with the configured deadline.
    ///
    /// # Errors
    ///
    /// [`Error::DelegationFailed`] on missing configuration, an empty subject
    /// token, a failed proof, a non-success response, or a missed deadline.
    pub async fn exchange_for_delegated_token(&self, subject_token: &str) -> Result<String> {
        self.exchange_within(subject_token, self.config.timeout).await
    }

    /// Exchange with a caller-supplied deadline for the network round-trip.
    pub async fn exchange_within(&self, subject_token: &str, deadline: Duration) -> Result<String> {
        if subject_token.trim().is_empty() {
            return Err(Error::DelegationFailed(
                "subject token is required for exchange".to_string(),
            ));
        }

        let client = self.config.resolve()?;

        let key = DelegatedTokenCache::cache_key(subject_token);
        let key_id = &key[..12];
        if let Some(token) = self.cache.get(&key, now_ms()) {
            debug!(subject = %key_id, "Delegated token cache hit");
            return Ok(token);
        }

        info!(
            subject = %key_id,
            resource = %client.resource,
            "Exchanging subject token for delegated token"
        );

        let response = tokio::time::timeout(deadline, self.request(&client, subject_token))
            .await
            .map_err(|_| {
                Error::DelegationFailed(format!("token exchange exceeded deadline of {deadline:?}"))
            })
            .and_then(|r| r)
            .inspect_err(|e| warn!(subject = %key_id, error = %e, "Token exchange failed"))?;

        let expires_in = response.expires_in.unwrap_or(0);
        self.cache.insert(
            key.clone(),
            DelegatedTokenCacheEntry::new(
                response.access_token.clone(),
                now_ms(),
                expires_in,
                self.config.safety_buffer,
            ),
        );

        info!(subject = %key_id, expires_in, "Delegated token obtained");
        Ok(response.access_token)
    }

    async fn request(
        &self,
        client: &ExchangeClient,
        subject_token: &str,
    ) -> Result<TokenExchangeResponse> {
        // No token in hand yet, so the proof is not token-bound
        let proof = self
            .proofs
            .build_proof(&client.token_url, "POST", None)
            .await
            .map_err(|e| Error::DelegationFailed(format!("proof for token endpoint: {e}")))?;

        let form = TokenExchangeForm::new(client, subject_token);
        self.transport
            .exchange(&client.token_url, &form, &proof)
            .await
            .map_err(|e| match e {
                Error::DelegationFailed(_) => e,
                other => Error::DelegationFailed(other.to_string()),
            })
    }

    /// Drop stale cache entries now rather than on next read.
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired(now_ms())
    }

    /// Number of cached entries, stale ones included.
    #[must_use]
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}
