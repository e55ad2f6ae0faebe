//! Error types for the DPoP gateway

use std::io;

use thiserror::Error;

/// Result type alias for the DPoP gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the outbound side (key store, proofs, delegation) and by
/// configuration / process plumbing.
///
/// Inbound authentication failures are not represented here; they are
/// [`AuthRejection`](crate::auth::AuthRejection) values that terminate the
/// request with HTTP 401.
#[derive(Error, Debug)]
pub enum Error {
    /// Signing key could not be loaded, generated or persisted.
    ///
    /// Retry only after the persisted key path is confirmed writable.
    #[error("Key material unavailable: {0}")]
    KeyUnavailable(String),

    /// Proof could not be built (unparsable target URL, signing failure)
    #[error("Proof construction failed: {0}")]
    Proof(String),

    /// Token exchange failed; never retried by the gateway itself
    #[error("Delegation failed: {0}")]
    DelegationFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
