//! Delegated token exchange.
//!
//! - [`DelegationExchanger`]: RFC 8693 exchange with a possession proof, cached
//! - [`DelegatedTokenCache`]: subject-digest keyed cache with lazy expiry
//! - [`ExchangeTransport`]: the seam between exchanger and token endpoint

mod cache;
mod exchange;

pub use cache::{DelegatedTokenCache, DelegatedTokenCacheEntry};
pub use exchange::{
    DelegationExchanger, ExchangeTransport, HttpExchangeTransport, TokenExchangeForm,
    TokenExchangeResponse,
};
