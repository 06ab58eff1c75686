//! Key material types with automatic memory zeroization.
//!
//! All key types implement `Zeroize` and `ZeroizeOnDrop` so that key bytes
//! are erased from memory when dropped, and redact themselves in `Debug`.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::random::fill_random;

/// Size of a local master key in bytes.
pub const MASTER_KEY_SIZE: usize = 96;

/// Size of generated data encryption key material in bytes.
pub const DATA_KEY_SIZE: usize = 96;

/// A 96-byte local master key.
///
/// Used directly by the local KMS provider and, after retrieval, by the
/// network KMS provider.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct LocalMasterKey {
    bytes: [u8; MASTER_KEY_SIZE],
}

impl LocalMasterKey {
    /// Generates a new random master key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; MASTER_KEY_SIZE];
        fill_random(&mut bytes);
        Self { bytes }
    }

    /// Creates a master key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientKeyMaterial` for shorter input and `InvalidKey`
    /// for longer input. Nothing is padded or truncated.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < MASTER_KEY_SIZE {
            return Err(CryptoError::InsufficientKeyMaterial {
                expected: MASTER_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        if bytes.len() > MASTER_KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "expected {} bytes, got {}",
                MASTER_KEY_SIZE,
                bytes.len()
            )));
        }

        let mut key_bytes = [0u8; MASTER_KEY_SIZE];
        key_bytes.copy_from_slice(bytes);

        Ok(Self { bytes: key_bytes })
    }

    /// Returns the raw key bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for LocalMasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Freshly generated plaintext DEK material, before wrapping.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DataKeyMaterial {
    bytes: [u8; DATA_KEY_SIZE],
}

impl DataKeyMaterial {
    /// Generates new random DEK material.
    pub fn generate() -> Self {
        let mut bytes = [0u8; DATA_KEY_SIZE];
        fill_random(&mut bytes);
        Self { bytes }
    }

    /// Returns the raw key bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for DataKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKeyMaterial")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Loads a local master key from a flat binary file.
///
/// Reads the first 96 bytes of the file. A file shorter than that is
/// rejected with `InsufficientKeyMaterial`.
pub fn load_local_master_key(path: impl AsRef<Path>) -> Result<LocalMasterKey, CryptoError> {
    let file = File::open(path.as_ref())?;

    let mut buf = zeroize::Zeroizing::new(Vec::with_capacity(MASTER_KEY_SIZE));
    file.take(MASTER_KEY_SIZE as u64).read_to_end(&mut buf)?;

    LocalMasterKey::from_bytes(&buf)
}

/// Writes a master key to `path` as a flat 96-byte binary file.
pub fn write_local_master_key(
    path: impl AsRef<Path>,
    key: &LocalMasterKey,
) -> Result<(), CryptoError> {
    let mut file = File::create(path.as_ref())?;
    file.write_all(key.as_bytes())?;
    file.sync_all()?;
    Ok(())
}
