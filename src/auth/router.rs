//! Issuer-first inbound authentication.
//!
//! The unverified `iss` claim selects which trust domain verifies the token.
//! Tenant and service domains each own a verifier with its own JWKS cache, so
//! their keys rotate independently and one never falls back to the other.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde_json::Value;
use tracing::{debug, warn};

use gateway_core::BEARER_SCHEME;

use super::principal::{AuthRejection, AuthenticatedPrincipal, TrustDomainKind};
use super::verifier::TokenVerifier;
use crate::Result;
use crate::config::{TrustConfig, TrustDomain};

/// Dispatches inbound bearer tokens to the tenant or service verifier.
pub struct IssuerRouter {
    tenant: TokenVerifier,
    service: TokenVerifier,
    verify_timeout: Duration,
}

impl IssuerRouter {
    /// Router over two prepared verifiers.
    #[must_use]
    pub fn new(tenant: TokenVerifier, service: TokenVerifier, verify_timeout: Duration) -> Self {
        Self {
            tenant,
            service,
            verify_timeout,
        }
    }

    /// Build both verifiers from configuration.
    ///
    /// # Errors
    ///
    /// [`Error::Config`](crate::Error::Config) if either domain is incomplete
    /// or has a non-HTTPS JWKS URI while HTTPS is required.
    pub fn from_config(trust: &TrustConfig) -> Result<Self> {
        let tenant = trust.tenant.resolve(TrustDomainKind::Tenant)?;
        let service = trust.service.resolve(TrustDomainKind::Service)?;
        Ok(Self::new(
            TokenVerifier::from_config(tenant, trust)?,
            TokenVerifier::from_config(service, trust)?,
            trust.verify_timeout,
        ))
    }

    /// The tenant and service domains, in dispatch order.
    #[must_use]
    pub fn domains(&self) -> [&TrustDomain; 2] {
        [self.tenant.domain(), self.service.domain()]
    }

    /// Trust domain for an issuer string, if any.
    #[must_use]
    pub fn route(&self, issuer: &str) -> Option<TrustDomainKind> {
        if issuer == self.tenant.domain().issuer {
            Some(TrustDomainKind::Tenant)
        } else if issuer == self.service.domain().issuer {
            Some(TrustDomainKind::Service)
        } else {
            None
        }
    }

    /// Authenticate a request by its headers.
    ///
    /// # Errors
    ///
    /// The [`AuthRejection`] that ends the request.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
    ) -> std::result::Result<AuthenticatedPrincipal, AuthRejection> {
        let token = extract_bearer(headers)?;
        self.authenticate_token(token).await
    }

    /// Authenticate a bare token.
    pub async fn authenticate_token(
        &self,
        token: &str,
    ) -> std::result::Result<AuthenticatedPrincipal, AuthRejection> {
        let issuer = peek_issuer(token)?;

        let Some(kind) = self.route(&issuer) else {
            warn!(issuer = %issuer, "Token from unknown issuer");
            return Err(AuthRejection::UnknownIssuer);
        };

        let verifier = match kind {
            TrustDomainKind::Tenant => &self.tenant,
            TrustDomainKind::Service => &self.service,
            TrustDomainKind::Downstream => return Err(AuthRejection::UnknownIssuer),
        };

        verify_as(verifier, token, self.verify_timeout).await
    }
}

/// Verify with `verifier`, logging the detail and collapsing the failure.
pub(crate) async fn verify_as(
    verifier: &TokenVerifier,
    token: &str,
    deadline: Duration,
) -> std::result::Result<AuthenticatedPrincipal, AuthRejection> {
    let kind = verifier.domain().kind;
    match verifier.verify_within(token, deadline).await {
        Ok(claims) => {
            debug!(domain = %kind, sub = ?claims.sub, "Authenticated request");
            Ok(AuthenticatedPrincipal { kind, claims })
        }
        Err(e) => {
            warn!(domain = %kind, error = %e, "Token verification failed");
            Err(AuthRejection::InvalidToken(kind))
        }
    }
}

/// Bare token from `Authorization: Bearer <token>`.
///
/// The header must split on spaces into exactly two parts.
pub(crate) fn extract_bearer(headers: &HeaderMap) -> std::result::Result<&str, AuthRejection> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthRejection::MissingCredential)?;

    match value.split(' ').collect::<Vec<_>>().as_slice() {
        [scheme, token] if scheme.eq_ignore_ascii_case(BEARER_SCHEME) && !token.is_empty() => {
            Ok(*token)
        }
        _ => Err(AuthRejection::MissingCredential),
    }
}

/// Whether `token` has the three dot-separated segments of a compact JWS.
pub(crate) fn is_compact_jws(token: &str) -> bool {
    token.split('.').count() == 3
}

/// Read `iss` from an unverified token. No signature check happens here.
pub(crate) fn peek_issuer(token: &str) -> std::result::Result<String, AuthRejection> {
    if !is_compact_jws(token) {
        return Err(AuthRejection::MalformedToken);
    }

    let payload = token.split('.').nth(1).ok_or(AuthRejection::MalformedToken)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| AuthRejection::MalformedToken)?;
    let claims: Value = serde_json::from_slice(&bytes).map_err(|_| AuthRejection::MalformedToken)?;

    match claims.get("iss").and_then(Value::as_str) {
        Some(iss) if !iss.is_empty() => Ok(iss.to_string()),
        _ => Err(AuthRejection::MalformedToken),
    }
}

/// Middleware: authenticate through the [`IssuerRouter`] and insert the
/// [`AuthenticatedPrincipal`] into request extensions.
pub async fn issuer_auth_middleware(
    State(router): State<Arc<IssuerRouter>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    match router.authenticate(request.headers()).await {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(rejection) => {
            debug!(path = %request.uri().path(), reason = rejection.code(), "Request rejected");
            rejection.into_response()
        }
    }
}

/// Middleware: require a tenant scope on the authenticated principal.
///
/// Runs after [`issuer_auth_middleware`]; a request without a principal is
/// treated as unauthenticated.
pub async fn require_tenant_middleware(request: Request<Body>, next: Next) -> Response {
    let Some(principal) = request.extensions().get::<AuthenticatedPrincipal>() else {
        return AuthRejection::MissingCredential.into_response();
    };

    if principal.claims.tenant_id().is_none() {
        warn!(domain = %principal.kind, sub = ?principal.claims.sub, "Token has no tenant scope");
        return AuthRejection::MissingTenant.into_response();
    }

    next.run(request).await
}
