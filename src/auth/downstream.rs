//! Audience-scoped gate for downstream-protected routes.
//!
//! Independent of the issuer router: its own trust domain, verifier and JWKS
//! cache. Tenant and delegated tokens carry a different audience and are
//! turned away here even when their signature is good.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, info};

use super::principal::{AuthRejection, AuthenticatedPrincipal, TrustDomainKind};
use super::router::{extract_bearer, is_compact_jws, verify_as};
use super::verifier::TokenVerifier;
use crate::Result;
use crate::config::TrustConfig;

/// Second-factor gate accepting only tokens for the downstream audience.
pub struct DownstreamAudienceGate {
    verifier: TokenVerifier,
    verify_timeout: Duration,
}

impl DownstreamAudienceGate {
    /// Gate over a prepared verifier.
    #[must_use]
    pub fn new(verifier: TokenVerifier, verify_timeout: Duration) -> Self {
        Self {
            verifier,
            verify_timeout,
        }
    }

    /// Build from the `trust.downstream` section.
    ///
    /// Returns `None` when the downstream domain is not configured; the
    /// protected routes are then not mounted at all.
    ///
    /// # Errors
    ///
    /// [`Error::Config`](crate::Error::Config) if the domain is configured but
    /// its JWKS URI violates the HTTPS requirement.
    pub fn from_config(trust: &TrustConfig) -> Result<Option<Self>> {
        let domain = match trust.downstream.resolve(TrustDomainKind::Downstream) {
            Ok(domain) => domain,
            Err(e) => {
                info!(reason = %e, "Downstream audience gate not configured");
                return Ok(None);
            }
        };
        Ok(Some(Self::new(
            TokenVerifier::from_config(domain, trust)?,
            trust.verify_timeout,
        )))
    }

    /// Audience this gate demands.
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.verifier.domain().audience
    }

    /// Authenticate a request by its headers.
    ///
    /// # Errors
    ///
    /// - [`AuthRejection::MissingCredential`] without a bearer token
    /// - [`AuthRejection::MalformedToken`] if it is not three segments
    /// - [`AuthRejection::InvalidToken`] for anything the verifier refuses
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
    ) -> std::result::Result<AuthenticatedPrincipal, AuthRejection> {
        let token = extract_bearer(headers)?;
        if !is_compact_jws(token) {
            return Err(AuthRejection::MalformedToken);
        }
        verify_as(&self.verifier, token, self.verify_timeout).await
    }
}

/// Middleware: authenticate through the [`DownstreamAudienceGate`] and insert
/// the [`AuthenticatedPrincipal`] into request extensions.
pub async fn downstream_auth_middleware(
    State(gate): State<Arc<DownstreamAudienceGate>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    match gate.authenticate(request.headers()).await {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(rejection) => {
            debug!(
                path = %request.uri().path(),
                reason = rejection.code(),
                "Downstream request rejected"
            );
            rejection.into_response()
        }
    }
}
