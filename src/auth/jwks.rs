//! JWKS retrieval and caching for one trust domain.
//!
//! # Refresh policy
//!
//! - A fetched key set is trusted for the configured TTL (default 1 hour).
//! - A forced refresh (unknown `kid`) bypasses the TTL.
//! - Network fetches are budgeted per minute; when the budget is spent a
//!   previously fetched set is served instead, and a cold cache fails.
//! - Concurrent cold or stale lookups collapse into one fetch: callers queue
//!   on the refresh lock and re-check the cache once they hold it.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use jsonwebtoken::jwk::JwkSet;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, warn};

type FetchLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Failure to obtain a key set.
#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    /// Network, HTTP status, or body decoding failure
    #[error("JWKS fetch from {uri} failed: {reason}")]
    Fetch {
        /// Endpoint that was queried
        uri: String,
        /// What went wrong
        reason: String,
    },

    /// Fetch budget spent and nothing cached to fall back on
    #[error("JWKS re-fetch budget exhausted for {0}")]
    RateLimited(String),
}

/// Where key sets come from.
#[async_trait]
pub trait JwksFetcher: Send + Sync {
    /// Fetch the key set published at `jwks_uri`.
    async fn fetch(&self, jwks_uri: &str) -> Result<JwkSet, JwksError>;
}

/// [`JwksFetcher`] over `reqwest`.
pub struct HttpJwksFetcher {
    http: reqwest::Client,
}

impl HttpJwksFetcher {
    /// Build a fetcher with its own client.
    ///
    /// With `require_https` the client refuses plain-HTTP endpoints outright.
    ///
    /// # Errors
    ///
    /// [`Error::Http`](crate::Error::Http) if the client cannot be built.
    pub fn new(timeout: Duration, require_https: bool) -> crate::Result<Self> {
        let http = reqwest::Client::builder()
            .https_only(require_https)
            .timeout(timeout)
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl JwksFetcher for HttpJwksFetcher {
    async fn fetch(&self, jwks_uri: &str) -> Result<JwkSet, JwksError> {
        let fail = |e: reqwest::Error| JwksError::Fetch {
            uri: jwks_uri.to_string(),
            reason: e.to_string(),
        };

        self.http
            .get(jwks_uri)
            .send()
            .await
            .map_err(fail)?
            .error_for_status()
            .map_err(fail)?
            .json::<JwkSet>()
            .await
            .map_err(fail)
    }
}

struct CachedJwks {
    keys: Arc<JwkSet>,
    fetched_at: Instant,
}

/// Cached key set of one JWKS endpoint.
pub struct JwksCache {
    jwks_uri: String,
    fetcher: Arc<dyn JwksFetcher>,
    ttl: Duration,
    cached: RwLock<Option<CachedJwks>>,
    refresh: Mutex<()>,
    limiter: FetchLimiter,
}

impl JwksCache {
    /// Cache for `jwks_uri`, allowing `fetches_per_minute` network fetches.
    #[must_use]
    pub fn new(
        jwks_uri: impl Into<String>,
        fetcher: Arc<dyn JwksFetcher>,
        ttl: Duration,
        fetches_per_minute: u32,
    ) -> Self {
        let per_minute = NonZeroU32::new(fetches_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            jwks_uri: jwks_uri.into(),
            fetcher,
            ttl,
            cached: RwLock::new(None),
            refresh: Mutex::new(()),
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
        }
    }

    /// The endpoint this cache serves.
    #[must_use]
    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    /// Current key set, fetching when cold, stale, or `force_refresh`.
    ///
    /// # Errors
    ///
    /// [`JwksError`] if a needed fetch fails or the fetch budget is spent
    /// with nothing cached.
    pub async fn get(&self, force_refresh: bool) -> Result<Arc<JwkSet>, JwksError> {
        let requested_at = Instant::now();
        if !force_refresh {
            if let Some(keys) = self.fresh() {
                return Ok(keys);
            }
        }

        let _refresh = self.refresh.lock().await;

        // Someone else may have fetched while we queued
        if let Some(cached) = self.cached.read().as_ref() {
            let fetched_since_request = cached.fetched_at >= requested_at;
            let fresh = cached.fetched_at.elapsed() < self.ttl;
            if fetched_since_request || (!force_refresh && fresh) {
                return Ok(Arc::clone(&cached.keys));
            }
        }

        if self.limiter.check().is_err() {
            warn!(jwks_uri = %self.jwks_uri, "JWKS re-fetch budget exhausted");
            return self
                .cached
                .read()
                .as_ref()
                .map(|cached| Arc::clone(&cached.keys))
                .ok_or_else(|| JwksError::RateLimited(self.jwks_uri.clone()));
        }

        debug!(jwks_uri = %self.jwks_uri, force_refresh, "Fetching JWKS");
        let keys = Arc::new(self.fetcher.fetch(&self.jwks_uri).await?);
        debug!(jwks_uri = %self.jwks_uri, keys = keys.keys.len(), "JWKS fetched");

        *self.cached.write() = Some(CachedJwks {
            keys: Arc::clone(&keys),
            fetched_at: Instant::now(),
        });
        Ok(keys)
    }

    fn fresh(&self) -> Option<Arc<JwkSet>> {
        self.cached
            .read()
            .as_ref()
            .filter(|cached| cached.fetched_at.elapsed() < self.ttl)
            .map(|cached| Arc::clone(&cached.keys))
    }
}
