//! Signing key material for possession proofs.
//!
//! One ES256 (P-256) key pair per process. The first call to
//! [`KeyMaterialStore::get_or_create_key_pair`] loads the persisted pair or
//! generates and persists a new one; every later call returns the same
//! in-memory pair without touching disk.
//!
//! # Persisted format
//!
//! ```json
//! { "publicKey": { "kty": "EC", "crv": "P-256", "x": "...", "y": "..." },
//!   "privateKey": { "kty": "EC", "crv": "P-256", "x": "...", "y": "...", "d": "..." } }
//! ```
//!
//! A missing, unreadable or inconsistent file is replaced by a freshly
//! generated pair. Servers that saw the old public key in earlier proofs
//! simply see a new key on the next proof.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::EncodingKey;
use jsonwebtoken::jwk::{
    AlgorithmParameters, CommonParameters, EllipticCurve, EllipticCurveKeyParameters,
    EllipticCurveKeyType, Jwk,
};
use p256::elliptic_curve::JwkEcKey;
use p256::elliptic_curve::rand_core::OsRng;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::EncodePrivateKey;
use p256::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// On-disk representation: both halves as JWKs.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedKeyPair {
    /// Public half (`kty`, `crv`, `x`, `y`)
    pub public_key: JwkEcKey,
    /// Private half (adds `d`)
    pub private_key: JwkEcKey,
}

/// The process's ES256 signing key pair.
pub struct SigningKeyPair {
    secret: SecretKey,
    public: PublicKey,
    encoding_key: EncodingKey,
    public_jwk: Jwk,
    thumbprint: String,
}

impl SigningKeyPair {
    /// Generate a fresh P-256 key pair.
    pub fn generate() -> Result<Self> {
        Self::from_secret(SecretKey::random(&mut OsRng))
    }

    /// Build the pair (and its derived forms) from a private key.
    pub fn from_secret(secret: SecretKey) -> Result<Self> {
        let public = secret.public_key();

        let der = secret
            .to_pkcs8_der()
            .map_err(|e| Error::KeyUnavailable(format!("PKCS#8 encoding failed: {e}")))?;
        let encoding_key = EncodingKey::from_ec_der(der.as_bytes());

        let point = public.to_encoded_point(false);
        let (Some(x), Some(y)) = (point.x(), point.y()) else {
            return Err(Error::KeyUnavailable(
                "public key has no affine coordinates".to_string(),
            ));
        };
        let x = URL_SAFE_NO_PAD.encode(x);
        let y = URL_SAFE_NO_PAD.encode(y);

        // RFC 7638: required members only, lexicographic order, no whitespace
        let canonical = format!(r#"{{"crv":"P-256","kty":"EC","x":"{x}","y":"{y}"}}"#);
        let thumbprint = URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()));

        let public_jwk = Jwk {
            common: CommonParameters::default(),
            algorithm: AlgorithmParameters::EllipticCurve(EllipticCurveKeyParameters {
                key_type: EllipticCurveKeyType::EC,
                curve: EllipticCurve::P256,
                x,
                y,
            }),
        };

        Ok(Self {
            secret,
            public,
            encoding_key,
            public_jwk,
            thumbprint,
        })
    }

    /// Rebuild from the persisted JWK pair.
    ///
    /// Rejects a file whose public half does not belong to its private half.
    pub fn from_persisted(stored: &PersistedKeyPair) -> Result<Self> {
        let secret = SecretKey::from_jwk(&stored.private_key)
            .map_err(|e| Error::KeyUnavailable(format!("invalid private JWK: {e}")))?;
        let public = PublicKey::from_jwk(&stored.public_key)
            .map_err(|e| Error::KeyUnavailable(format!("invalid public JWK: {e}")))?;

        if secret.public_key() != public {
            return Err(Error::KeyUnavailable(
                "public key does not match private key".to_string(),
            ));
        }

        Self::from_secret(secret)
    }

    /// Export both halves for persistence.
    #[must_use]
    pub fn to_persisted(&self) -> PersistedKeyPair {
        PersistedKeyPair {
            public_key: self.public.to_jwk(),
            private_key: self.secret.to_jwk(),
        }
    }

    /// Public key as embedded in proof headers.
    #[must_use]
    pub fn public_jwk(&self) -> &Jwk {
        &self.public_jwk
    }

    /// Private key in the form the JWT encoder wants.
    #[must_use]
    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    /// RFC 7638 SHA-256 thumbprint of the public key (base64url).
    #[must_use]
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    /// Raw public key.
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("alg", &"ES256")
            .field("thumbprint", &self.thumbprint)
            .finish_non_exhaustive()
    }
}

/// Owns the process's signing key pair.
///
/// Construct once at startup and share by `Arc`. Initialization is
/// single-flight: concurrent first callers wait on the same load/generate
/// sequence, so at most one pair is generated and persisted per store.
pub struct KeyMaterialStore {
    path: PathBuf,
    cell: OnceCell<Arc<SigningKeyPair>>,
}

impl KeyMaterialStore {
    /// Create a store backed by `path`. Nothing is read until first use.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cell: OnceCell::new(),
        }
    }

    /// Persisted key file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The key pair, if already loaded in this process.
    #[must_use]
    pub fn loaded(&self) -> Option<Arc<SigningKeyPair>> {
        self.cell.get().cloned()
    }

    /// Return the process key pair, loading or generating it on first call.
    ///
    /// # Errors
    ///
    /// [`Error::KeyUnavailable`] when a new pair cannot be persisted. The
    /// store stays uninitialized in that case, so a later call retries.
    pub async fn get_or_create_key_pair(&self) -> Result<Arc<SigningKeyPair>> {
        self.cell
            .get_or_try_init(|| self.load_or_generate())
            .await
            .map(Arc::clone)
    }

    async fn load_or_generate(&self) -> Result<Arc<SigningKeyPair>> {
        match self.load().await {
            Ok(pair) => {
                info!(
                    path = %self.path.display(),
                    thumbprint = %pair.thumbprint(),
                    "Loaded existing DPoP key pair"
                );
                return Ok(Arc::new(pair));
            }
            Err(LoadFailure::Missing) => {
                debug!(path = %self.path.display(), "No persisted DPoP key pair");
            }
            Err(LoadFailure::Invalid(reason)) => {
                warn!(
                    path = %self.path.display(),
                    reason = %reason,
                    "Persisted DPoP key pair unusable, regenerating"
                );
            }
        }

        info!("Generating new ES256 key pair");
        let pair = SigningKeyPair::generate()?;
        self.persist(&pair).await?;
        info!(
            path = %self.path.display(),
            thumbprint = %pair.thumbprint(),
            "Saved new DPoP key pair"
        );
        Ok(Arc::new(pair))
    }

    async fn load(&self) -> std::result::Result<SigningKeyPair, LoadFailure> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(LoadFailure::Missing),
            Err(e) => return Err(LoadFailure::Invalid(e.to_string())),
        };

        let stored: PersistedKeyPair =
            serde_json::from_str(&content).map_err(|e| LoadFailure::Invalid(e.to_string()))?;

        SigningKeyPair::from_persisted(&stored).map_err(|e| LoadFailure::Invalid(e.to_string()))
    }

    /// Write to a sibling temp file, then rename over the target.
    async fn persist(&self, pair: &SigningKeyPair) -> Result<()> {
        let unavailable =
            |e: std::io::Error| Error::KeyUnavailable(format!("{}: {e}", self.path.display()));

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(unavailable)?;
            }
        }

        let content = serde_json::to_string_pretty(&pair.to_persisted())
            .map_err(|e| Error::KeyUnavailable(format!("failed to serialize key pair: {e}")))?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        tokio::fs::write(&tmp_path, content).await.map_err(unavailable)?;

        // Owner read/write only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = tokio::fs::set_permissions(&tmp_path, perms).await;
        }

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

enum LoadFailure {
    Missing,
    Invalid(String),
}
