//! Delegated-token cache.
//!
//! Keyed by the hex SHA-256 of the subject token. Entries are written whole
//! and never mutated; expiry is lazy (checked on read), with no background
//! sweeper.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

/// One cached delegated token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegatedTokenCacheEntry {
    /// The delegated access token
    pub access_token: String,
    /// Serve until this instant (Unix ms); already net of the safety buffer
    pub expires_at_ms: u64,
}

impl DelegatedTokenCacheEntry {
    /// Build an entry for a token the server said lives `expires_in_secs`,
    /// pulled forward by `safety_buffer`.
    #[must_use]
    pub fn new(
        access_token: String,
        now_ms: u64,
        expires_in_secs: u64,
        safety_buffer: Duration,
    ) -> Self {
        let lifetime_ms = expires_in_secs.saturating_mul(1000);
        let buffer_ms = u64::try_from(safety_buffer.as_millis()).unwrap_or(u64::MAX);
        Self {
            access_token,
            expires_at_ms: now_ms.saturating_add(lifetime_ms).saturating_sub(buffer_ms),
        }
    }

    /// Whether the entry may still be handed out at `now_ms`.
    #[must_use]
    pub fn is_fresh(&self, now_ms: u64) -> bool {
        self.expires_at_ms > now_ms
    }
}

/// Shared map of subject-token digest to delegated token.
#[derive(Debug, Default)]
pub struct DelegatedTokenCache {
    entries: DashMap<String, DelegatedTokenCacheEntry>,
}

impl DelegatedTokenCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache identity of a subject token: full SHA-256, hex encoded.
    #[must_use]
    pub fn cache_key(subject_token: &str) -> String {
        hex::encode(Sha256::digest(subject_token.as_bytes()))
    }

    /// Fresh token for `key`, evicting a stale entry on the way.
    pub fn get(&self, key: &str, now_ms: u64) -> Option<String> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_fresh(now_ms) {
                return Some(entry.access_token.clone());
            }
        }
        self.entries.remove_if(key, |_, entry| !entry.is_fresh(now_ms));
        None
    }

    /// Store (or replace) the entry for `key`.
    pub fn insert(&self, key: String, entry: DelegatedTokenCacheEntry) {
        self.entries.insert(key, entry);
    }

    /// Drop every stale entry; returns how many were removed.
    pub fn purge_expired(&self, now_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now_ms));
        before.saturating_sub(self.entries.len())
    }

    /// Number of entries, stale ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Wall-clock now in Unix milliseconds.
#[must_use]
pub fn now_ms() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
