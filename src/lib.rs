//! DPoP Gateway Library
//!
//! Proof-of-possession token plumbing for a service that both receives and
//! makes bearer-authenticated calls.
//!
//! # Features
//!
//! - **Signing key lifecycle**: one ES256 key pair per process, loaded from or
//!   persisted to a JSON file
//! - **Possession proofs**: RFC 9449 `DPoP` proofs, optionally bound to an
//!   access token, attached best-effort to outbound bearer calls
//! - **Delegation**: RFC 8693 token exchange, cached per subject token
//! - **Inbound gates**: issuer-routed verification across tenant and service
//!   trust domains, plus an audience-scoped downstream gate

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod context;
pub mod delegation;
pub mod dpop;
pub mod error;
pub mod gateway;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
