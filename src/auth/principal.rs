//! Authenticated principal and inbound rejection types.

use axum::{
    Json,
    http::{StatusCode, header::WWW_AUTHENTICATE},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

pub use gateway_core::TrustDomainKind;

/// Verified claim set of an inbound bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipalClaims {
    /// Issuer
    pub iss: String,
    /// Subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Audience (single string or array)
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub aud: Value,
    /// Expiry (Unix seconds), validated by the verifier
    pub exp: u64,
    /// Issued-at (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    /// Tenant scope, when the issuer provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Value>,
    /// Space-delimited scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Every other claim, untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PrincipalClaims {
    /// Tenant identifier as text; `None` when absent, null, or empty.
    #[must_use]
    pub fn tenant_id(&self) -> Option<String> {
        match self.tenant_id.as_ref()? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// The result of passing an inbound gate. Lives for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthenticatedPrincipal {
    /// Which trust domain vouched for the token
    pub kind: TrustDomainKind,
    /// Verified claims
    pub claims: PrincipalClaims,
}

impl AuthenticatedPrincipal {
    /// Human or organization token
    #[must_use]
    pub fn is_tenant(&self) -> bool {
        self.kind == TrustDomainKind::Tenant
    }

    /// Machine-to-machine token
    #[must_use]
    pub fn is_service(&self) -> bool {
        self.kind == TrustDomainKind::Service
    }

    /// `sub` claim
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.claims.sub.as_deref()
    }
}

/// Why an inbound request was turned away.
///
/// Every variant becomes HTTP 401. `InvalidToken` carries the trust domain
/// for logging only; the response body is the same for every domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthRejection {
    /// No `Authorization: Bearer <token>` header, or not exactly two parts
    #[error("Missing or invalid Authorization header")]
    MissingCredential,
    /// Not three segments, payload not JSON, or no `iss`
    #[error("Malformed token")]
    MalformedToken,
    /// `iss` matches no configured trust domain
    #[error("Unknown issuer")]
    UnknownIssuer,
    /// Signature, audience, issuer, algorithm or expiry check failed
    #[error("Invalid token")]
    InvalidToken(TrustDomainKind),
    /// Verified token carries no tenant scope on a tenant-scoped route
    #[error("Missing tenant_id in token")]
    MissingTenant,
}

impl AuthRejection {
    /// Stable machine-readable code for the response body.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::MalformedToken => "malformed_token",
            Self::UnknownIssuer => "unknown_issuer",
            Self::InvalidToken(_) => "invalid_token",
            Self::MissingTenant => "missing_tenant",
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            [(WWW_AUTHENTICATE, "Bearer")],
            Json(json!({
                "error": self.code(),
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}
