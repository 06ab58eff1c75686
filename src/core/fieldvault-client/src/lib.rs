//! # Fieldvault Client
//!
//! Builds encrypting client handles from a provider, a schema and a
//! document driver.
//!
//! Field encryption itself is done by the driver and its encryption helper
//! process. This crate only checks that the helper is reachable (spawning it
//! if allowed) and hands the driver its auto-encryption options.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod driver;
pub mod error;
pub mod factory;
pub mod helper;

pub use driver::{AutoEncryptionOptions, DocumentDriver, DriverSession};
pub use error::ClientError;
pub use factory::{EncryptingClientFactory, EncryptingClientHandle};
pub use helper::{EncryptionHelper, HelperOptions, ProcessHelper};
