//! # Fieldvault Crypto
//!
//! Key material and key-wrapping primitives for Fieldvault.
//!
//! This crate provides:
//! - Local master keys (96 raw bytes) loaded from flat binary files
//! - Data encryption key material generation
//! - AES-256-GCM sealing used to wrap key material
//! - Key derivation (HKDF-SHA256 for wrapping keys, Argon2id for passphrases)
//! - Secure random generation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aead;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod random;

pub use error::CryptoError;
pub use keys::{
    load_local_master_key, write_local_master_key, DataKeyMaterial, LocalMasterKey,
    MASTER_KEY_SIZE,
};
