//! Wire-level protocol constants for the DPoP gateway.
//!
//! Kept dependency-light so that clients of the gateway can share the exact
//! header names and grant URNs without pulling in the HTTP stack.

use serde::{Deserialize, Serialize};

/// Request header carrying the possession proof (RFC 9449), in the lowercase
/// form HTTP header maps store.
pub const DPOP_HEADER: &str = "dpop";

/// `typ` header value of a possession proof JWT.
pub const DPOP_JWT_TYPE: &str = "dpop+jwt";

/// OAuth token-exchange grant (RFC 8693).
pub const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";

/// Subject token type for an OAuth access token (RFC 8693).
pub const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";

/// Authorization scheme accepted on inbound requests and detected on outbound ones.
pub const BEARER_SCHEME: &str = "Bearer";

/// The trust domains a token can be verified against.
///
/// Closed set: an issuer that maps to none of these is rejected before any
/// signature work happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustDomainKind {
    /// Human / organization tokens from the tenant identity provider.
    Tenant,
    /// Machine-to-machine tokens from the internal service issuer.
    Service,
    /// Audience-scoped tokens accepted only on downstream-protected routes.
    Downstream,
}

impl TrustDomainKind {
    /// Stable lowercase label used in logs and JSON.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tenant => "tenant",
            Self::Service => "service",
            Self::Downstream => "downstream",
        }
    }
}

impl std::fmt::Display for TrustDomainKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proof_header_name_is_lowercase() {
        assert_eq!(DPOP_HEADER, DPOP_HEADER.to_ascii_lowercase());
    }

    #[test]
    fn trust_domain_labels_are_stable() {
        assert_eq!(TrustDomainKind::Tenant.to_string(), "tenant");
        assert_eq!(TrustDomainKind::Service.as_str(), "service");
        assert_eq!(TrustDomainKind::Downstream.as_str(), "downstream");
    }
}
