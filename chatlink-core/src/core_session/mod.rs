//! Session layer
//!
//! The supervisor runs one tenant's connection; the manager is the
//! process-wide façade over all of them plus the inbound message pipeline
//! (resolve, dedup, dispatch) and the status event stream.

pub mod dedup;
pub mod errors;
pub mod manager;
pub mod metrics;
pub mod supervisor;
pub mod types;

pub use dedup::DeduplicationGuard;
pub use errors::{SessionError, SessionResult};
pub use manager::SessionManager;
pub use supervisor::ConnectionSupervisor;
pub use types::{
    ContentType, GroupNotice, InboundMessage, OutboundEnvelope, SessionEvent, SessionStatus,
    TenantConnectionState,
};
