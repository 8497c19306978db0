//! Error types for the session layer

use crate::core_creds::CredStoreError;
use crate::core_identity::IdentityError;
use crate::core_pairing::PairingError;
use crate::tenant::TenantId;
use crate::transport::TransportError;
use thiserror::Error;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by the session manager facade.
///
/// Expected operational states (disconnected peers, QR lockouts, expired
/// codes) travel as events, not errors; these variants cover programmer
/// misuse and real failures.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Tenant id missing or empty on an operation that requires one
    #[error("tenant id is required")]
    MissingTenant,

    /// Publish attempted against a tenant with no live transport
    #[error("tenant {0} is not connected")]
    NotConnected(TenantId),

    /// Operation referenced a tenant with no session at all
    #[error("no session for tenant {0}")]
    UnknownTenant(TenantId),

    #[error("pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("credential store error: {0}")]
    Credentials(#[from] CredStoreError),

    #[error("identity store error: {0}")]
    Identity(#[from] IdentityError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The supervisor task did not come up in time
    #[error("session for tenant {0} failed to start: {1}")]
    StartupTimeout(TenantId, String),
}
