//! Key derivation functions.
//!
//! - HKDF-SHA256 (RFC 5869) turns a 96-byte master key into a 32-byte
//!   wrapping key.
//! - Argon2id turns a keystore passphrase into a 32-byte sealing key.

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::aead::KEY_SIZE;
use crate::error::CryptoError;

/// Salt used when deriving wrapping keys from a local master key.
const WRAP_SALT: &[u8] = b"fieldvault-kek-v1";

/// Argon2id memory cost in KiB.
const PASSPHRASE_M_COST: u32 = 19 * 1024;

/// Argon2id iterations.
const PASSPHRASE_T_COST: u32 = 2;

/// Derives a 32-byte wrapping key from master key material.
///
/// `context` domain-separates keys derived from the same master key.
pub fn derive_wrapping_key(
    master_key: &[u8],
    context: &[u8],
) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    if master_key.is_empty() {
        return Err(CryptoError::InvalidKey("empty master key".to_string()));
    }

    let hkdf = Hkdf::<Sha256>::new(Some(WRAP_SALT), master_key);

    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(context, okm.as_mut())
        .map_err(|_| CryptoError::InvalidInput("HKDF expansion failed".to_string()))?;

    Ok(okm)
}

/// Derives a 32-byte key from a passphrase and salt using Argon2id.
pub fn derive_passphrase_key(
    passphrase: &[u8],
    salt: &[u8],
) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    let params = Params::new(PASSPHRASE_M_COST, PASSPHRASE_T_COST, 1, Some(KEY_SIZE))
        .map_err(|e| CryptoError::InvalidInput(format!("invalid KDF params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(passphrase, salt, output.as_mut())
        .map_err(|e| CryptoError::InvalidInput(format!("KDF failed: {e}")))?;

    Ok(output)
}
