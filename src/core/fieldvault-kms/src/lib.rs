//! # Fieldvault KMS
//!
//! Named KMS provider configurations and the key wrappers built from them.
//!
//! ## Providers
//!
//! - `local` - a 96-byte master key held by the caller
//! - `cloud` - a cloud KMS key reached over HTTPS
//! - `network` - a KMIP server reached over mutual TLS
//!
//! Every provider wraps and unwraps DEK material through [`KeyWrapper`].
//! Wrappers open their connections per call and release them on every path.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cloud;
pub mod context;
pub mod error;
pub mod kmip;
pub mod provider;
pub mod registry;
#[cfg(test)]
mod testing;
pub mod trust_bundle;
pub mod ttlv;
pub mod wrap;

pub use context::{Interrupted, OperationContext};
pub use error::KmsError;
pub use provider::{CloudCredentials, KmsProviderConfig, ProviderKind};
pub use registry::KmsProviderRegistry;
pub use trust_bundle::{load_trust_bundle, seal_trust_bundle, TrustBundle};
pub use wrap::{KeyWrapper, LocalWrapper};
