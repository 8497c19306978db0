//! Multi-tenant messaging session manager
//!
//! Each tenant gets one supervised transport connection, credentials are
//! kept in a three-tier store (local cache, SQLite, optional remote
//! archive), and device pairing runs through either a gated QR flow or a
//! TTL-bound numeric code flow. External code talks to [`SessionManager`]
//! and nothing else.

pub mod config;
pub mod core_creds;
pub mod core_identity;
pub mod core_pairing;
pub mod core_session;
pub mod logging;
pub mod tenant;
pub mod test_utils;
pub mod transport;
pub mod util;

pub use config::Config;
pub use core_creds::{Credential, CredentialStore};
pub use core_identity::{Address, IdentityResolver};
pub use core_pairing::{PairingAttempt, PairingController};
pub use core_session::{
    InboundMessage, OutboundEnvelope, SessionEvent, SessionManager, SessionStatus,
};
pub use logging::{init_logging, LogLevel};
pub use tenant::TenantId;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        // Ensure the main exports are accessible
        let _ = LogLevel::Info;
        let _ = SessionStatus::Disconnected;
        let _ = TenantId::new("t");
    }
}
