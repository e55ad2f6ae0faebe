//! Outbound request guard: attaches a possession proof to bearer calls.
//!
//! Every request sent through [`OutboundRequestGuard::execute`] that carries
//! `Authorization: Bearer <token>` gets a `DPoP` header bound to that token,
//! the request's method and its URL. Attachment is best-effort: if the proof
//! cannot be built the request still goes out, unsigned, and a warning is
//! logged. A hard requirement on the upstream side shows up as its own 401.

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, HeaderName, HeaderValue};
use reqwest::{Client, Request, Response};
use tracing::{debug, warn};

use gateway_core::{BEARER_SCHEME, DPOP_HEADER};

use super::proof::ProofBuilder;
use crate::{Error, Result};

/// `DPoP` as a typed header name.
pub const DPOP: HeaderName = HeaderName::from_static(DPOP_HEADER);

/// Wraps an HTTP client so bearer calls carry a fresh proof.
pub struct OutboundRequestGuard {
    client: Client,
    proofs: Arc<ProofBuilder>,
}

impl OutboundRequestGuard {
    /// Create a guard sending through `client`.
    #[must_use]
    pub fn new(client: Client, proofs: Arc<ProofBuilder>) -> Self {
        Self { client, proofs }
    }

    /// The underlying client, for building requests.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Attach a proof if the request carries a bearer credential.
    ///
    /// Returns `true` when a proof header was attached. Never fails: proof
    /// construction errors are logged and the request is left untouched.
    pub async fn attach_proof(&self, request: &mut Request) -> bool {
        let Some(token) = bearer_token(request) else {
            return false;
        };

        let url = request.url().as_str().to_owned();
        let method = request.method().as_str().to_owned();

        let proof = match self.proofs.build_proof(&url, &method, Some(token.as_str())).await {
            Ok(proof) => proof,
            Err(e) => {
                warn!(
                    method = %method,
                    url = %url,
                    error = %e,
                    "DPoP proof not attached, sending without it"
                );
                return false;
            }
        };

        match HeaderValue::from_str(&proof) {
            Ok(value) => {
                request.headers_mut().insert(DPOP, value);
                debug!(method = %method, url = %url, "Attached DPoP proof");
                true
            }
            Err(e) => {
                warn!(error = %e, "DPoP proof is not a valid header value");
                false
            }
        }
    }

    /// Attach a proof (best-effort) and send.
    ///
    /// # Errors
    ///
    /// Only transport errors from the HTTP client; proof failures never
    /// surface here.
    pub async fn execute(&self, mut request: Request) -> Result<Response> {
        self.attach_proof(&mut request).await;
        self.client.execute(request).await.map_err(Error::from)
    }
}

/// Bare token from `Authorization: Bearer <token>` (scheme case-insensitive).
fn bearer_token(request: &Request) -> Option<String> {
    let value = request.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case(BEARER_SCHEME) && !token.is_empty()).then(|| token.to_string())
}
