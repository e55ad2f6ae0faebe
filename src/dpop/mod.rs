//! Proof-of-possession (`DPoP`) for outbound calls.
//!
//! - [`KeyMaterialStore`]: the process ES256 key pair, loaded or generated once
//! - [`ProofBuilder`]: per-request signed proofs, optionally token-bound (`ath`)
//! - [`OutboundRequestGuard`]: best-effort proof attachment on bearer calls

mod guard;
mod keys;
mod proof;

pub use guard::{DPOP, OutboundRequestGuard};
pub use keys::{KeyMaterialStore, PersistedKeyPair, SigningKeyPair};
pub use proof::{ProofBuilder, ProofClaims, access_token_hash, normalize_htu};
