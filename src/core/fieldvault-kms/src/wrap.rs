//! Key wrapping seam and the local wrapper.

use async_trait::async_trait;
use zeroize::Zeroizing;

use fieldvault_crypto::{aead, kdf, LocalMasterKey};
use fieldvault_storage::{KeyId, MasterKeyDescriptor};

use crate::error::KmsError;

/// Domain separation for wrapping keys derived from a master key.
const WRAP_CONTEXT: &[u8] = b"fieldvault-dek-wrap-v1";

/// Wraps and unwraps DEK material under a provider's master key.
#[async_trait]
pub trait KeyWrapper: Send + Sync {
    /// Where the wrapping master key lives.
    fn descriptor(&self) -> MasterKeyDescriptor;

    /// Encrypts DEK material. The key id is bound as associated data where
    /// the backend allows it.
    async fn wrap(&self, key_id: &KeyId, plaintext: &[u8]) -> Result<Vec<u8>, KmsError>;

    /// Decrypts DEK material produced by [`KeyWrapper::wrap`].
    async fn unwrap(
        &self,
        key_id: &KeyId,
        wrapped: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KmsError>;
}

/// Wraps with a 96-byte master key held in process.
pub struct LocalWrapper {
    descriptor: MasterKeyDescriptor,
    master_key: LocalMasterKey,
}

impl LocalWrapper {
    /// Creates a wrapper over `master_key`.
    pub fn new(descriptor: MasterKeyDescriptor, master_key: LocalMasterKey) -> Self {
        Self {
            descriptor,
            master_key,
        }
    }
}

#[async_trait]
impl KeyWrapper for LocalWrapper {
    fn descriptor(&self) -> MasterKeyDescriptor {
        self.descriptor.clone()
    }

    async fn wrap(&self, key_id: &KeyId, plaintext: &[u8]) -> Result<Vec<u8>, KmsError> {
        wrap_with_master(&self.master_key, key_id, plaintext)
    }

    async fn unwrap(
        &self,
        key_id: &KeyId,
        wrapped: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        unwrap_with_master(&self.master_key, key_id, wrapped)
    }
}

/// AES-256-GCM under an HKDF-derived KEK, key id as AAD.
pub(crate) fn wrap_with_master(
    master_key: &LocalMasterKey,
    key_id: &KeyId,
    plaintext: &[u8],
) -> Result<Vec<u8>, KmsError> {
    let kek = kdf::derive_wrapping_key(master_key.as_bytes(), WRAP_CONTEXT)?;
    Ok(aead::seal(kek.as_ref(), plaintext, key_id.as_bytes())?)
}

pub(crate) fn unwrap_with_master(
    master_key: &LocalMasterKey,
    key_id: &KeyId,
    wrapped: &[u8],
) -> Result<Zeroizing<Vec<u8>>, KmsError> {
    let kek = kdf::derive_wrapping_key(master_key.as_bytes(), WRAP_CONTEXT)?;
    Ok(aead::open(kek.as_ref(), wrapped, key_id.as_bytes())?)
}
