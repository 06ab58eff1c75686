//! # Fieldvault Keys
//!
//! Data encryption key lifecycle on top of a key vault store.
//!
//! ## Guarantees
//!
//! - At most one DEK per alt-name, enforced by the store's unique partial
//!   index on `keyAltNames` rather than by in-process locking
//! - `find_or_create` converges under concurrent creators: a uniqueness
//!   violation becomes one fallback read
//! - Lookups return `None` for absent keys; absence is never an error

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod index;
pub mod service;

pub use error::KeyError;
pub use index::{IndexOutcome, KeyVaultIndexManager};
pub use service::{DataEncryptionKey, DataEncryptionKeyService};
