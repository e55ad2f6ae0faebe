//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// DPoP gateway - proof-of-possession proofs, delegated token exchange and
/// issuer-routed bearer authentication
#[derive(Parser, Debug)]
#[command(name = "dpop-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "DPOP_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "DPOP_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "DPOP_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Persisted signing key file
    #[arg(long, env = "DPOP_GATEWAY_KEY_PATH", global = true)]
    pub key_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "DPOP_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "DPOP_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Load or create the signing key and print its public JWK and thumbprint
    Keygen,

    /// Print a possession proof for one request
    Proof {
        /// Target URL of the request
        #[arg(required = true)]
        url: String,

        /// HTTP method of the request
        #[arg(short, long, default_value = "GET")]
        method: String,

        /// Access token to bind the proof to (`ath`)
        #[arg(long, env = "DPOP_GATEWAY_ACCESS_TOKEN")]
        access_token: Option<String>,
    },

    /// Exchange a subject token for a delegated token and print it
    Exchange {
        /// The caller's access token
        #[arg(long, env = "DPOP_GATEWAY_SUBJECT_TOKEN")]
        subject_token: String,
    },
}
