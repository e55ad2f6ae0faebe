//! HTTP surface tests
//!
//! Drives the axum router in-process with `oneshot`:
//! - Public health endpoint
//! - 401 shape (status, `WWW-Authenticate`, JSON body) for every rejection
//! - Tenant scoping on top of the issuer router
//! - Downstream route isolated to its own audience

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

use common::TrustFixture;
use dpop_gateway::config::Config;
use dpop_gateway::context::PopContext;
use dpop_gateway::gateway::{AppState, create_router};

struct Harness {
    _dir: tempfile::TempDir,
    fx: TrustFixture,
    app: Router,
}

fn harness(with_downstream: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.key_store.path = dir.path().join("dpop-keys.json");

    let fx = TrustFixture::new();
    let state = Arc::new(AppState {
        issuers: Arc::new(fx.router()),
        downstream: with_downstream.then(|| Arc::new(fx.downstream_gate())),
        pop: PopContext::from_config(&config).unwrap(),
    });
    let app = create_router(state, Duration::from_secs(5));

    Harness {
        _dir: dir,
        fx,
        app,
    }
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, body)
}

/// Test that health is public and reports the gate layout
#[tokio::test]
async fn test_health_is_public() {
    let h = harness(true);

    let (status, _, body) = send(&h.app, get("/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["downstream_gate"], true);
    // No proof has been built yet, so no key is loaded
    assert_eq!(body["signing_key_thumbprint"], Value::Null);
}

/// Test the 401 response shape without credentials
#[tokio::test]
async fn test_missing_credential_is_401_with_challenge() {
    let h = harness(false);

    let (status, headers, body) = send(&h.app, get("/v1/principal", None)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(headers[header::WWW_AUTHENTICATE], "Bearer");
    assert_eq!(body["error"], "missing_credential");
    assert!(body["message"].is_string());
}

/// Test that failures in different trust domains are indistinguishable
#[tokio::test]
async fn test_invalid_token_bodies_do_not_leak_domain() {
    let h = harness(false);
    let tenant_bad = h.fx.tenant.token_with(&json!({ "aud": "api://nope" }));
    let service_bad = h.fx.service.token_with(&json!({ "aud": "api://nope" }));

    let (s1, _, tenant_body) = send(&h.app, get("/v1/principal", Some(&tenant_bad))).await;
    let (s2, _, service_body) = send(&h.app, get("/v1/principal", Some(&service_bad))).await;

    assert_eq!(s1, StatusCode::UNAUTHORIZED);
    assert_eq!(s2, StatusCode::UNAUTHORIZED);
    assert_eq!(tenant_body, service_body);
    assert_eq!(tenant_body["error"], "invalid_token");
}

/// Test that a verified principal reaches the handler
#[tokio::test]
async fn test_principal_route_returns_verified_claims() {
    let h = harness(false);
    let token = h.fx.service.sign(&h.fx.service.claims());

    let (status, _, body) = send(&h.app, get("/v1/principal", Some(&token))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "service");
    assert_eq!(body["claims"]["iss"], common::SERVICE_ISSUER);
}

/// Test that the tenant route requires a `tenant_id` claim
#[tokio::test]
async fn test_tenant_route_requires_tenant_id() {
    let h = harness(false);

    // GIVEN: a tenant token lacking tenant_id
    let bare = h.fx.tenant.sign(&h.fx.tenant.claims());
    let (status, _, body) = send(&h.app, get("/v1/tenant", Some(&bare))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "missing_tenant");

    // GIVEN: a tenant token carrying tenant_id
    let scoped = h.fx.tenant.token_with(&json!({ "tenant_id": "acme" }));
    let (status, _, body) = send(&h.app, get("/v1/tenant", Some(&scoped))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tenant_id"], "acme");
    assert_eq!(body["principal"]["kind"], "tenant");
}

/// Test that the downstream route accepts only downstream-audience tokens
#[tokio::test]
async fn test_downstream_route_isolated_to_its_audience() {
    let h = harness(true);

    let tenant_token = h.fx.tenant.sign(&h.fx.tenant.claims());
    let (status, _, body) = send(&h.app, get("/v1/downstream", Some(&tenant_token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token");

    let token = h.fx.downstream.sign(&h.fx.downstream.claims());
    let (status, _, body) = send(&h.app, get("/v1/downstream", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "downstream");
}

/// Test that the downstream route is absent when no gate is configured
#[tokio::test]
async fn test_downstream_route_absent_without_gate() {
    let h = harness(false);
    let token = h.fx.downstream.sign(&h.fx.downstream.claims());

    let (status, _, _) = send(&h.app, get("/v1/downstream", Some(&token))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
