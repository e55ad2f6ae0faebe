//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{info, warn};

use super::router::{AppState, create_router};
use crate::auth::{DownstreamAudienceGate, IssuerRouter};
use crate::config::Config;
use crate::context::PopContext;
use crate::{Error, Result};

/// DPoP gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared state handed to every request
    state: Arc<AppState>,
}

impl Gateway {
    /// Create a new gateway
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the tenant or service trust domain is incomplete,
    /// or a configured JWKS URI violates the HTTPS requirement.
    pub fn new(config: Config) -> Result<Self> {
        let issuers = Arc::new(IssuerRouter::from_config(&config.trust)?);
        let downstream = DownstreamAudienceGate::from_config(&config.trust)?.map(Arc::new);
        let pop = PopContext::from_config(&config)?;

        Ok(Self {
            config,
            state: Arc::new(AppState {
                issuers,
                downstream,
                pop,
            }),
        })
    }

    /// Shared state
    #[must_use]
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// The HTTP application, without binding a socket
    #[must_use]
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state), self.config.server.request_timeout)
    }

    /// Run the gateway until Ctrl-C / SIGTERM, then drain for at most the
    /// configured shutdown timeout.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = self.router();
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("DPOP GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        for domain in self.state.issuers.domains() {
            info!(
                domain = %domain.kind,
                issuer = %domain.issuer,
                audience = %domain.audience,
                "Trust domain"
            );
        }
        if let Some(gate) = &self.state.downstream {
            info!(audience = %gate.audience(), "Downstream gate mounted at /v1/downstream");
        }
        info!(key_path = %self.state.pop.keys.path().display(), "DPoP signing key");
        info!("============================================================");

        let shutdown = Arc::new(Notify::new());
        let signalled = Arc::clone(&shutdown);
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            shutdown_signal().await;
            signalled.notify_one();
        });
        let mut server = tokio::spawn(async move { serve.await });

        tokio::select! {
            joined = &mut server => return flatten(joined),
            () = shutdown.notified() => {}
        }

        let drain = self.config.server.shutdown_timeout;
        if let Ok(joined) = tokio::time::timeout(drain, &mut server).await {
            flatten(joined)?;
        } else {
            warn!(timeout = ?drain, "In-flight requests did not drain in time, aborting");
            server.abort();
        }

        let purged = self.state.pop.delegation.purge_expired();
        info!(purged, "Gateway stopped");
        Ok(())
    }
}

fn flatten(
    joined: std::result::Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    joined
        .map_err(|e| Error::Internal(format!("server task failed: {e}")))?
        .map_err(Error::from)
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
