//! Inbound bearer-token authentication.
//!
//! - [`IssuerRouter`]: reads the unverified issuer and hands the token to the
//!   tenant or service verifier
//! - [`DownstreamAudienceGate`]: separate gate for audience-scoped routes
//! - [`TokenVerifier`] / [`JwksCache`]: per-domain signature and claim checks
//!
//! Every failure ends the request with HTTP 401 via [`AuthRejection`].

mod downstream;
mod jwks;
mod principal;
mod router;
mod verifier;

pub use downstream::{DownstreamAudienceGate, downstream_auth_middleware};
pub use jwks::{HttpJwksFetcher, JwksCache, JwksError, JwksFetcher};
pub use principal::{AuthRejection, AuthenticatedPrincipal, PrincipalClaims, TrustDomainKind};
pub use router::{IssuerRouter, issuer_auth_middleware, require_tenant_middleware};
pub use verifier::{TokenVerifier, VerifyError};
