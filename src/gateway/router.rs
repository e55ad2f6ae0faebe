//! HTTP router and handlers

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Extension, Json, Router,
    extract::State,
    middleware,
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::auth::{
    AuthenticatedPrincipal, DownstreamAudienceGate, IssuerRouter, downstream_auth_middleware,
    issuer_auth_middleware, require_tenant_middleware,
};
use crate::context::PopContext;

/// Shared application state
pub struct AppState {
    /// Tenant / service dispatch
    pub issuers: Arc<IssuerRouter>,
    /// Audience-scoped gate; `None` when not configured
    pub downstream: Option<Arc<DownstreamAudienceGate>>,
    /// Outbound proof-of-possession state
    pub pop: PopContext,
}

/// Create the router
///
/// - `GET /health`: public
/// - `GET /v1/principal`: issuer router
/// - `GET /v1/tenant`: issuer router, then tenant scope
/// - `GET /v1/downstream`: downstream gate (only when configured)
pub fn create_router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    let issuer_routes = Router::new()
        .route("/v1/principal", get(principal_handler))
        .route(
            "/v1/tenant",
            get(tenant_handler).layer(middleware::from_fn(require_tenant_middleware)),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.issuers),
            issuer_auth_middleware,
        ));

    let mut app = Router::new()
        .route("/health", get(health_handler))
        .merge(issuer_routes);

    if let Some(gate) = &state.downstream {
        app = app.merge(
            Router::new()
                .route("/v1/downstream", get(principal_handler))
                .route_layer(middleware::from_fn_with_state(
                    Arc::clone(gate),
                    downstream_auth_middleware,
                )),
        );
    }

    app.layer(TimeoutLayer::new(request_timeout))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let signing_key = state
        .pop
        .keys
        .loaded()
        .map(|pair| pair.thumbprint().to_string());

    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "downstream_gate": state.downstream.is_some(),
        "signing_key_thumbprint": signing_key,
    }))
}

/// GET /v1/principal, GET /v1/downstream
async fn principal_handler(
    Extension(principal): Extension<AuthenticatedPrincipal>,
) -> Json<AuthenticatedPrincipal> {
    Json(principal)
}

/// GET /v1/tenant
async fn tenant_handler(
    Extension(principal): Extension<AuthenticatedPrincipal>,
) -> impl IntoResponse {
    Json(json!({
        "tenant_id": principal.claims.tenant_id(),
        "principal": principal,
    }))
}
