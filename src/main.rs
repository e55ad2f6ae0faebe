//! DPoP gateway binary
//!
//! Serves the inbound gates, or runs one-shot key, proof and exchange
//! commands against the same configuration.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use dpop_gateway::{
    cli::{Cli, Command},
    config::Config,
    context::PopContext,
    gateway::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = match cli.command {
        Some(Command::Keygen) => run_keygen(&config).await,
        Some(Command::Proof {
            url,
            method,
            access_token,
        }) => run_proof(&config, &url, &method, access_token.as_deref()).await,
        Some(Command::Exchange { subject_token }) => run_exchange(&config, &subject_token).await,
        Some(Command::Serve) | None => run_server(config).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host.clone_from(host);
    }
    if let Some(ref key_path) = cli.key_path {
        config.key_store.path.clone_from(key_path);
    }
    Ok(config)
}

async fn run_keygen(config: &Config) -> anyhow::Result<()> {
    let ctx = PopContext::from_config(config)?;
    let pair = ctx
        .keys
        .get_or_create_key_pair()
        .await
        .context("signing key unavailable")?;

    println!("{}", serde_json::to_string_pretty(pair.public_jwk())?);
    println!("thumbprint: {}", pair.thumbprint());
    println!("key file:   {}", ctx.keys.path().display());
    Ok(())
}

async fn run_proof(
    config: &Config,
    url: &str,
    method: &str,
    access_token: Option<&str>,
) -> anyhow::Result<()> {
    let ctx = PopContext::from_config(config)?;
    let proof = ctx
        .proofs
        .build_proof(url, method, access_token)
        .await
        .with_context(|| format!("cannot build proof for {method} {url}"))?;
    println!("{proof}");
    Ok(())
}

async fn run_exchange(config: &Config, subject_token: &str) -> anyhow::Result<()> {
    let ctx = PopContext::from_config(config)?;
    let token = ctx
        .delegation
        .exchange_for_delegated_token(subject_token)
        .await?;
    println!("{token}");
    Ok(())
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        "Starting DPoP gateway"
    );

    let gateway = Gateway::new(config).context("failed to create gateway")?;
    gateway.run().await.context("gateway error")?;

    info!("Gateway shutdown complete");
    Ok(())
}
