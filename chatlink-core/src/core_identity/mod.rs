//! Identity resolution module
//!
//! Canonical addresses and the opaque-identifier resolver.

use thiserror::Error;

pub mod address;
pub mod resolver;

pub use address::Address;
pub use resolver::IdentityResolver;

/// Identity resolution errors
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt identity mapping: {0}")]
    Corrupt(String),

    #[error("Tenant id not usable as storage key: {0}")]
    InvalidTenant(String),
}
