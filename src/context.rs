//! Process-wide proof-of-possession state.
//!
//! The key store, proof builder, outbound guard and delegation exchanger are
//! built once at startup and handed to whoever needs them. Nothing here is a
//! module-level global; two contexts in one process are fully independent.

use std::sync::Arc;

use reqwest::Client;
use tracing::debug;

use crate::Result;
use crate::config::Config;
use crate::delegation::DelegationExchanger;
use crate::dpop::{KeyMaterialStore, OutboundRequestGuard, ProofBuilder};

/// Owned singletons of the outbound side.
#[derive(Clone)]
pub struct PopContext {
    /// Signing key pair, loaded or generated on first use
    pub keys: Arc<KeyMaterialStore>,
    /// Builds possession proofs with `keys`
    pub proofs: Arc<ProofBuilder>,
    /// HTTP client wrapper that attaches proofs to bearer calls
    pub outbound: Arc<OutboundRequestGuard>,
    /// Token exchange with its cache
    pub delegation: Arc<DelegationExchanger>,
}

impl PopContext {
    /// Wire everything from configuration. No disk or network I/O happens
    /// here; the key pair is created on first proof.
    ///
    /// # Errors
    ///
    /// [`Error::Http`](crate::Error::Http) if an HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let keys = Arc::new(KeyMaterialStore::new(config.key_store.path.clone()));
        let proofs = Arc::new(ProofBuilder::new(Arc::clone(&keys)));

        let outbound_client = Client::builder().timeout(config.outbound.timeout).build()?;
        let outbound = Arc::new(OutboundRequestGuard::new(
            outbound_client,
            Arc::clone(&proofs),
        ));

        let exchange_client = Client::builder()
            .timeout(config.delegation.timeout)
            .build()?;
        let delegation = Arc::new(DelegationExchanger::with_http(
            config.delegation.clone(),
            Arc::clone(&proofs),
            exchange_client,
        ));

        debug!(key_path = %keys.path().display(), "Proof-of-possession context ready");

        Ok(Self {
            keys,
            proofs,
            outbound,
            delegation,
        })
    }
}
