//! Shared fixtures: an in-memory issuer that mints ES256 tokens and serves
//! its key set through a counting [`JwksFetcher`].

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::jwk::{CommonParameters, Jwk, JwkSet};
use jsonwebtoken::{Algorithm, Header};
use parking_lot::Mutex;
use serde_json::{Value, json};

use dpop_gateway::auth::{
    DownstreamAudienceGate, IssuerRouter, JwksCache, JwksError, JwksFetcher, TokenVerifier,
    TrustDomainKind,
};
use dpop_gateway::config::TrustDomain;
use dpop_gateway::dpop::SigningKeyPair;

pub const TENANT_ISSUER: &str = "https://tenant.example.com/";
pub const TENANT_AUDIENCE: &str = "api://gateway";
pub const SERVICE_ISSUER: &str = "https://service.example.com/";
pub const SERVICE_AUDIENCE: &str = "api://gateway-internal";
pub const DOWNSTREAM_ISSUER: &str = "https://downstream.example.com/";
pub const DOWNSTREAM_AUDIENCE: &str = "api://billing";

/// JWKS endpoint whose key set can be swapped and whose fetches are counted
pub struct StaticJwks {
    keys: Mutex<JwkSet>,
    pub fetches: AtomicUsize,
}

impl StaticJwks {
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn publish(&self, keys: Vec<Jwk>) {
        *self.keys.lock() = JwkSet { keys };
    }
}

#[async_trait]
impl JwksFetcher for StaticJwks {
    async fn fetch(&self, _jwks_uri: &str) -> Result<JwkSet, JwksError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.keys.lock().clone())
    }
}

/// One signing authority: key pair, `kid`, issuer and audience
pub struct TestIssuer {
    pub issuer: String,
    pub audience: String,
    pub kid: String,
    pub pair: SigningKeyPair,
    pub jwks: Arc<StaticJwks>,
}

impl TestIssuer {
    pub fn new(issuer: &str, audience: &str, kid: &str) -> Self {
        let pair = SigningKeyPair::generate().unwrap();
        let jwks = Arc::new(StaticJwks {
            keys: Mutex::new(JwkSet { keys: Vec::new() }),
            fetches: AtomicUsize::new(0),
        });
        let issuer = Self {
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            kid: kid.to_string(),
            pair,
            jwks,
        };
        issuer.jwks.publish(vec![issuer.jwk()]);
        issuer
    }

    /// Public key as published in the JWKS
    pub fn jwk(&self) -> Jwk {
        let mut jwk = self.pair.public_jwk().clone();
        jwk.common = CommonParameters {
            key_id: Some(self.kid.clone()),
            ..CommonParameters::default()
        };
        jwk
    }

    pub fn domain(&self, kind: TrustDomainKind) -> TrustDomain {
        TrustDomain {
            kind,
            issuer: self.issuer.clone(),
            audience: self.audience.clone(),
            jwks_uri: format!("{}.well-known/jwks.json", self.issuer),
            algorithms: vec![Algorithm::ES256],
            jwks_requests_per_minute: 5,
        }
    }

    pub fn verifier(&self, kind: TrustDomainKind) -> TokenVerifier {
        self.verifier_allowing(kind, &[Algorithm::ES256])
    }

    /// Verifier whose domain accepts exactly `algorithms`
    pub fn verifier_allowing(
        &self,
        kind: TrustDomainKind,
        algorithms: &[Algorithm],
    ) -> TokenVerifier {
        let domain = TrustDomain {
            algorithms: algorithms.to_vec(),
            ..self.domain(kind)
        };
        let cache = JwksCache::new(
            domain.jwks_uri.clone(),
            Arc::clone(&self.jwks) as Arc<dyn JwksFetcher>,
            Duration::from_secs(3600),
            domain.jwks_requests_per_minute,
        );
        TokenVerifier::new(domain, cache, 60)
    }

    /// Standard claims for this issuer, valid for ten minutes
    pub fn claims(&self) -> Value {
        json!({
            "iss": self.issuer,
            "aud": self.audience,
            "sub": "subject-1",
            "exp": now() + 600,
            "iat": now(),
        })
    }

    /// Sign `claims` with this issuer's key and `kid`
    pub fn sign(&self, claims: &Value) -> String {
        self.sign_with_kid(claims, Some(&self.kid))
    }

    pub fn sign_with_kid(&self, claims: &Value, kid: Option<&str>) -> String {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = kid.map(String::from);
        jsonwebtoken::encode(&header, claims, self.pair.encoding_key()).unwrap()
    }

    /// A valid token with extra claims merged in
    pub fn token_with(&self, extra: &Value) -> String {
        let mut claims = self.claims();
        if let (Some(base), Some(extra)) = (claims.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        self.sign(&claims)
    }
}

/// Tenant, service and downstream issuers plus the gates built on them
pub struct TrustFixture {
    pub tenant: TestIssuer,
    pub service: TestIssuer,
    pub downstream: TestIssuer,
}

impl TrustFixture {
    pub fn new() -> Self {
        Self {
            tenant: TestIssuer::new(TENANT_ISSUER, TENANT_AUDIENCE, "tenant-key-1"),
            service: TestIssuer::new(SERVICE_ISSUER, SERVICE_AUDIENCE, "service-key-1"),
            downstream: TestIssuer::new(DOWNSTREAM_ISSUER, DOWNSTREAM_AUDIENCE, "downstream-key-1"),
        }
    }

    pub fn router(&self) -> IssuerRouter {
        IssuerRouter::new(
            self.tenant.verifier(TrustDomainKind::Tenant),
            self.service.verifier(TrustDomainKind::Service),
            Duration::from_secs(5),
        )
    }

    pub fn downstream_gate(&self) -> DownstreamAudienceGate {
        DownstreamAudienceGate::new(
            self.downstream.verifier(TrustDomainKind::Downstream),
            Duration::from_secs(5),
        )
    }
}

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}
