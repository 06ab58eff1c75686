//! TLS trust and client-certificate material for network KMS providers.
//!
//! A bundle is a PEM file laid out as: client certificate chain (leaf
//! first), the client private key, then one or more CA certificates.
//!
//! Passphrase-protected bundles are sealed: `FVTB\x01`, a 16-byte salt,
//! then the PEM sealed with AES-256-GCM under an Argon2id key derived from
//! the passphrase.

use std::fmt;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use rustls_pemfile::Item;
use tracing::debug;

use fieldvault_crypto::{aead, kdf, random};

use crate::error::KmsError;

/// Header of a sealed bundle.
pub const SEALED_MAGIC: &[u8; 5] = b"FVTB\x01";

/// Parsed trust material, ready to open mutual-TLS connections.
#[derive(Clone)]
pub struct TrustBundle {
    config: Arc<ClientConfig>,
    ca_certificates: usize,
    chain_len: usize,
}

impl TrustBundle {
    /// Parses an unsealed PEM bundle.
    pub fn from_pem(pem: &[u8]) -> Result<Self, KmsError> {
        let mut chain: Vec<CertificateDer<'static>> = Vec::new();
        let mut cas: Vec<CertificateDer<'static>> = Vec::new();
        let mut key: Option<PrivateKeyDer<'static>> = None;

        let mut reader = BufReader::new(pem);
        for item in rustls_pemfile::read_all(&mut reader) {
            let item = item.map_err(|e| KmsError::Credential(format!("malformed PEM: {e}")))?;
            let found: Option<PrivateKeyDer<'static>> = match item {
                Item::X509Certificate(cert) => {
                    if key.is_some() {
                        cas.push(cert);
                    } else {
                        chain.push(cert);
                    }
                    None
                }
                Item::Pkcs1Key(k) => Some(k.into()),
                Item::Pkcs8Key(k) => Some(k.into()),
                Item::Sec1Key(k) => Some(k.into()),
                _ => None,
            };

            if let Some(found) = found {
                if key.is_some() {
                    return Err(KmsError::Credential(
                        "bundle contains more than one private key".into(),
                    ));
                }
                key = Some(found);
            }
        }

        let key = key.ok_or_else(|| KmsError::Credential("bundle has no private key".into()))?;
        if chain.is_empty() {
            return Err(KmsError::Credential(
                "bundle has no client certificate before the private key".into(),
            ));
        }
        if cas.is_empty() {
            return Err(KmsError::Credential(
                "bundle has no CA certificate after the private key".into(),
            ));
        }

        let ca_certificates = cas.len();
        let chain_len = chain.len();

        let mut roots = RootCertStore::empty();
        for ca in cas {
            roots
                .add(ca)
                .map_err(|e| KmsError::Credential(format!("invalid CA certificate: {e}")))?;
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| KmsError::Credential(e.to_string()))?
            .with_root_certificates(roots)
            .with_client_auth_cert(chain, key)
            .map_err(|e| KmsError::Credential(format!("client certificate rejected: {e}")))?;

        Ok(Self {
            config: Arc::new(config),
            ca_certificates,
            chain_len,
        })
    }

    /// TLS client configuration presenting the client certificate.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.config)
    }

    /// Number of trusted CA certificates.
    pub fn ca_certificates(&self) -> usize {
        self.ca_certificates
    }

    /// Length of the client certificate chain.
    pub fn chain_len(&self) -> usize {
        self.chain_len
    }
}

impl fmt::Debug for TrustBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustBundle")
            .field("ca_certificates", &self.ca_certificates)
            .field("chain_len", &self.chain_len)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Loads a trust bundle from disk.
///
/// With a passphrase the file must be sealed; without one it must be plain
/// PEM. Wrong passphrases and malformed content fail with `Credential`.
pub fn load_trust_bundle(
    path: impl AsRef<Path>,
    passphrase: Option<&str>,
) -> Result<TrustBundle, KmsError> {
    let path = path.as_ref();
    let raw = zeroize::Zeroizing::new(std::fs::read(path).map_err(|e| {
        KmsError::Credential(format!("cannot read trust bundle {}: {e}", path.display()))
    })?);

    let sealed = raw.starts_with(SEALED_MAGIC);
    debug!(path = %path.display(), sealed = sealed, "Loading trust bundle");

    match (passphrase, sealed) {
        (Some(passphrase), true) => {
            let pem = open_sealed(&raw, passphrase)?;
            TrustBundle::from_pem(&pem)
        }
        (Some(_), false) => Err(KmsError::Credential(
            "passphrase given but trust bundle is not sealed".into(),
        )),
        (None, true) => Err(KmsError::Credential(
            "trust bundle is sealed; a passphrase is required".into(),
        )),
        (None, false) => TrustBundle::from_pem(&raw),
    }
}

/// Seals a PEM bundle under a passphrase.
pub fn seal_trust_bundle(pem: &[u8], passphrase: &str) -> Result<Vec<u8>, KmsError> {
    if passphrase.is_empty() {
        return Err(KmsError::Credential("passphrase cannot be empty".into()));
    }

    let salt = random::generate_salt();
    let key = kdf::derive_passphrase_key(passphrase.as_bytes(), &salt)?;
    let blob = aead::seal(key.as_ref(), pem, SEALED_MAGIC)?;

    let mut out = Vec::with_capacity(SEALED_MAGIC.len() + salt.len() + blob.len());
    out.extend_from_slice(SEALED_MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&blob);
    Ok(out)
}

fn open_sealed(raw: &[u8], passphrase: &str) -> Result<zeroize::Zeroizing<Vec<u8>>, KmsError> {
    let body = &raw[SEALED_MAGIC.len()..];
    if body.len() < random::SALT_SIZE {
        return Err(KmsError::Credential("sealed trust bundle is truncated".into()));
    }
    let (salt, blob) = body.split_at(random::SALT_SIZE);

    let key = kdf::derive_passphrase_key(passphrase.as_bytes(), salt)?;
    aead::open(key.as_ref(), blob, SEALED_MAGIC).map_err(|_| {
        KmsError::Credential("wrong passphrase or corrupted trust bundle".into())
    })
}
