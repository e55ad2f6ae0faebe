//! Configuration management
//!
//! Layering: optional YAML file, then `DPOP_GATEWAY_*` environment variables
//! (`__` separates nested keys). Credential and identifier fields accept a
//! literal, `env:VAR`, or `${VAR}` / `${VAR:-default}`.

use std::{env, path::Path, path::PathBuf, sync::LazyLock, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use jsonwebtoken::Algorithm;
use regex::Regex;
use serde::{Deserialize, Serialize};

use gateway_core::TrustDomainKind;

use crate::{Error, Result};

static ENV_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").ok());

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files loaded into the process environment before values
    /// are resolved. Paths support `~` expansion; missing files are skipped.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Signing key persistence
    pub key_store: KeyStoreConfig,
    /// Outbound HTTP configuration
    pub outbound: OutboundConfig,
    /// Inbound trust domains
    pub trust: TrustConfig,
    /// Token-exchange (delegation) configuration
    pub delegation: DelegationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env_files: vec![".env".to_string()],
            server: ServerConfig::default(),
            key_store: KeyStoreConfig::default(),
            outbound: OutboundConfig::default(),
            trust: TrustConfig::default(),
            delegation: DelegationConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("DPOP_GATEWAY_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();

        Ok(config)
    }

    /// Load environment files into the process environment.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }
}

/// Resolve a configured value.
///
/// - `env:VAR` reads `VAR`; an unset or empty variable resolves to `None`.
/// - `${VAR}` / `${VAR:-default}` are expanded in place.
/// - Anything else is taken literally. Empty results are `None`.
#[must_use]
pub fn resolve_value(raw: &str) -> Option<String> {
    let value = if let Some(var_name) = raw.strip_prefix("env:") {
        env::var(var_name).ok()?
    } else {
        expand_string(raw)
    };

    let value = value.trim().to_string();
    if value.is_empty() { None } else { Some(value) }
}

/// Expand `${VAR}` and `${VAR:-default}` patterns in a string
fn expand_string(value: &str) -> String {
    let Some(re) = ENV_PATTERN.as_ref() else {
        return value.to_string();
    };
    re.replace_all(value, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map_or("", |m| m.as_str());
        env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .into_owned()
}

fn resolve_optional(raw: Option<&String>) -> Option<String> {
    raw.and_then(|v| resolve_value(v))
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Signing key persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyStoreConfig {
    /// Persisted key file, relative to the working directory unless absolute
    pub path: PathBuf,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("dpop-keys.json"),
        }
    }
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    /// Timeout applied to every guarded outbound call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Inbound trust configuration: three independently configured domains
/// plus the knobs they share.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Tenant-facing issuer (human / organization tokens)
    pub tenant: TrustDomainConfig,
    /// Service-facing issuer (machine-to-machine tokens)
    pub service: TrustDomainConfig,
    /// Audience-scoped gate for downstream-protected routes
    pub downstream: TrustDomainConfig,
    /// How long a fetched JWKS is trusted before a refresh
    #[serde(with = "humantime_serde")]
    pub jwks_cache_ttl: Duration,
    /// Clock skew tolerance for `exp` / `nbf` (seconds)
    pub leeway_secs: u64,
    /// Upper bound on one verification, JWKS fetch included
    #[serde(with = "humantime_serde")]
    pub verify_timeout: Duration,
    /// Refuse JWKS URIs that are not HTTPS
    pub require_https: bool,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            tenant: TrustDomainConfig::from_env_prefix("TENANT", 5),
            service: TrustDomainConfig::from_env_prefix("SERVICE", 5),
            downstream: TrustDomainConfig::from_env_prefix("DOWNSTREAM", 10),
            jwks_cache_ttl: Duration::from_secs(3600),
            leeway_secs: 60,
            verify_timeout: Duration::from_secs(10),
            require_https: true,
        }
    }
}

/// One trust domain as written in configuration (unresolved)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustDomainConfig {
    /// Expected `iss` claim
    pub issuer: Option<String>,
    /// Expected `aud` claim
    pub audience: Option<String>,
    /// JWKS endpoint
    pub jwks_uri: Option<String>,
    /// Accepted signature algorithms
    pub algorithms: Vec<Algorithm>,
    /// JWKS network fetches allowed per minute
    pub jwks_requests_per_minute: u32,
}

impl Default for TrustDomainConfig {
    fn default() -> Self {
        Self {
            issuer: None,
            audience: None,
            jwks_uri: None,
            algorithms: vec![Algorithm::RS256],
            jwks_requests_per_minute: 5,
        }
    }
}

impl TrustDomainConfig {
    fn from_env_prefix(prefix: &str, jwks_requests_per_minute: u32) -> Self {
        Self {
            issuer: Some(format!("env:{prefix}_ISSUER")),
            audience: Some(format!("env:{prefix}_AUDIENCE")),
            jwks_uri: Some(format!("env:{prefix}_JWKS_URL")),
            jwks_requests_per_minute,
            ..Self::default()
        }
    }

    /// Resolve into an immutable [`TrustDomain`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming every field that resolved to nothing.
    pub fn resolve(&self, kind: TrustDomainKind) -> Result<TrustDomain> {
        let issuer = resolve_optional(self.issuer.as_ref());
        let audience = resolve_optional(self.audience.as_ref());
        let jwks_uri = resolve_optional(self.jwks_uri.as_ref());

        match (issuer, audience, jwks_uri) {
            (Some(issuer), Some(audience), Some(jwks_uri)) => {
                if self.algorithms.is_empty() {
                    return Err(Error::Config(format!(
                        "trust.{kind}.algorithms must not be empty"
                    )));
                }
                Ok(TrustDomain {
                    kind,
                    issuer,
                    audience,
                    jwks_uri,
                    algorithms: self.algorithms.clone(),
                    jwks_requests_per_minute: self.jwks_requests_per_minute,
                })
            }
            (issuer, audience, jwks_uri) => {
                let missing: Vec<&str> = [
                    ("issuer", issuer.is_none()),
                    ("audience", audience.is_none()),
                    ("jwks_uri", jwks_uri.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, absent)| absent.then_some(name))
                .collect();
                Err(Error::Config(format!(
                    "trust.{kind} is missing: {}",
                    missing.join(", ")
                )))
            }
        }
    }
}

/// A resolved, immutable (issuer, audience, key source) triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustDomain {
    /// Which domain this is
    pub kind: TrustDomainKind,
    /// Expected `iss` claim
    pub issuer: String,
    /// Expected `aud` claim
    pub audience: String,
    /// JWKS endpoint
    pub jwks_uri: String,
    /// Accepted signature algorithms
    pub algorithms: Vec<Algorithm>,
    /// JWKS network fetches allowed per minute
    pub jwks_requests_per_minute: u32,
}

/// Token-exchange (delegation) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegationConfig {
    /// Authorization server token endpoint
    pub token_url: Option<String>,
    /// Client identifier
    pub client_id: Option<String>,
    /// Client secret
    pub client_secret: Option<String>,
    /// Target resource / audience of the delegated token
    pub resource: Option<String>,
    /// Cached tokens stop being served this long before their real expiry
    #[serde(with = "humantime_serde")]
    pub safety_buffer: Duration,
    /// Default deadline for one exchange round-trip
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            token_url: Some("env:TOKEN_EXCHANGE_URL".to_string()),
            client_id: Some("env:TOKEN_EXCHANGE_CLIENT_ID".to_string()),
            client_secret: Some("env:TOKEN_EXCHANGE_CLIENT_SECRET".to_string()),
            resource: Some("env:TOKEN_EXCHANGE_RESOURCE".to_string()),
            safety_buffer: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Resolved token-exchange client settings
#[derive(Clone, PartialEq, Eq)]
pub struct ExchangeClient {
    /// Authorization server token endpoint
    pub token_url: String,
    /// Client identifier
    pub client_id: String,
    /// Client secret
    pub client_secret: String,
    /// Target resource / audience
    pub resource: String,
}

impl std::fmt::Debug for ExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeClient")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("resource", &self.resource)
            .finish()
    }
}

impl DelegationConfig {
    /// Resolve the exchange client settings.
    ///
    /// Called per exchange rather than at startup so that a process can run
    /// without delegation configured; the missing pieces surface as a
    /// delegation failure only when delegation is actually attempted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DelegationFailed`] naming the missing settings.
    pub fn resolve(&self) -> Result<ExchangeClient> {
        let token_url = resolve_optional(self.token_url.as_ref());
        let client_id = resolve_optional(self.client_id.as_ref());
        let client_secret = resolve_optional(self.client_secret.as_ref());
        let resource = resolve_optional(self.resource.as_ref());

        if let (Some(token_url), Some(client_id), Some(client_secret), Some(resource)) =
            (&token_url, &client_id, &client_secret, &resource)
        {
            return Ok(ExchangeClient {
                token_url: token_url.clone(),
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
                resource: resource.clone(),
            });
        }

        let missing: Vec<&str> = [
            ("token_url", token_url.is_none()),
            ("client_id", client_id.is_none()),
            ("client_secret", client_secret.is_none()),
            ("resource", resource.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();

        Err(Error::DelegationFailed(format!(
            "missing OAuth configuration: {}",
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_values_resolve_verbatim() {
        assert_eq!(
            resolve_value("https://issuer.example.com/"),
            Some("https://issuer.example.com/".to_string())
        );
        assert_eq!(resolve_value("   "), None);
    }

    #[test]
    fn env_reference_to_unset_var_is_absent() {
        // GIVEN: a variable nobody sets
        let raw = "env:DPOP_GATEWAY_TEST_SURELY_UNSET_VARIABLE";

        // THEN: it resolves to nothing instead of the literal reference
        assert_eq!(resolve_value(raw), None);
    }

    #[test]
    fn brace_expansion_uses_default_when_unset() {
        let resolved = resolve_value("${DPOP_GATEWAY_TEST_UNSET_HOST:-auth.local}/token");
        assert_eq!(resolved, Some("auth.local/token".to_string()));
    }

    #[test]
    fn trust_domain_resolution_lists_missing_fields() {
        // GIVEN: a domain with only the issuer filled in
        let cfg = TrustDomainConfig {
            issuer: Some("https://tenant.example.com/".to_string()),
            audience: None,
            jwks_uri: Some("env:DPOP_GATEWAY_TEST_UNSET_JWKS".to_string()),
            ..TrustDomainConfig::default()
        };

        // WHEN: resolved
        let err = cfg.resolve(TrustDomainKind::Tenant).unwrap_err();

        // THEN: both missing pieces are named
        let msg = err.to_string();
        assert!(msg.contains("trust.tenant"));
        assert!(msg.contains("audience"));
        assert!(msg.contains("jwks_uri"));
        assert!(!msg.contains("issuer,"));
    }

    #[test]
    fn trust_domain_resolves_when_complete() {
        let cfg = TrustDomainConfig {
            issuer: Some("https://svc.example.com/".to_string()),
            audience: Some("api://gateway".to_string()),
            jwks_uri: Some("https://svc.example.com/.well-known/jwks.json".to_string()),
            algorithms: vec![Algorithm::ES256],
            jwks_requests_per_minute: 7,
        };

        let domain = cfg.resolve(TrustDomainKind::Service).unwrap();
        assert_eq!(domain.kind, TrustDomainKind::Service);
        assert_eq!(domain.audience, "api://gateway");
        assert_eq!(domain.algorithms, vec![Algorithm::ES256]);
        assert_eq!(domain.jwks_requests_per_minute, 7);
    }

    #[test]
    fn delegation_resolution_reports_missing_settings() {
        let cfg = DelegationConfig {
            token_url: Some("https://auth.example.com/token".to_string()),
            client_id: None,
            client_secret: Some("s3cret".to_string()),
            resource: None,
            ..DelegationConfig::default()
        };

        let err = cfg.resolve().unwrap_err();
        assert!(matches!(err, Error::DelegationFailed(_)));
        let msg = err.to_string();
        assert!(msg.contains("client_id"));
        assert!(msg.contains("resource"));
        assert!(!msg.contains("s3cret"));
    }

    #[test]
    fn exchange_client_debug_redacts_secret() {
        let client = ExchangeClient {
            token_url: "https://auth.example.com/token".to_string(),
            client_id: "gateway".to_string(),
            client_secret: "s3cret".to_string(),
            resource: "api://calendar".to_string(),
        };
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn defaults_point_at_environment() {
        let config = Config::default();
        assert_eq!(config.key_store.path, PathBuf::from("dpop-keys.json"));
        assert_eq!(config.delegation.safety_buffer, Duration::from_secs(30));
        assert_eq!(config.trust.tenant.jwks_requests_per_minute, 5);
        assert_eq!(config.trust.downstream.jwks_requests_per_minute, 10);
        assert_eq!(
            config.trust.service.issuer.as_deref(),
            Some("env:SERVICE_ISSUER")
        );
    }
}
