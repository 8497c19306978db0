//! Transport seam
//!
//! The wire protocol itself (framing, encryption, multi-device sync) is
//! supplied by an external library. This module pins down the narrow shape
//! the session manager needs from it: a factory that opens one transport
//! per tenant, a handle for outbound operations, and a bounded event enum
//! replacing the library's callback surface.

use crate::core_creds::Credential;
use crate::tenant::TenantId;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mock;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),

    #[error("pairing code request failed: {0}")]
    Pairing(String),

    #[error("failed to open transport: {0}")]
    Open(String),
}

/// Why a connection closed. Drives the supervisor's reconnect decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The user logged the device out remotely; credentials are dead.
    LoggedOut,
    /// The server rejected the credential.
    AuthRejected,
    /// Network blip or server-side drop; safe to reconnect.
    TransportLost,
    /// We asked for the close ourselves.
    Requested,
}

impl CloseReason {
    /// Auth-fatal closes wipe credentials and must not auto-reconnect.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, CloseReason::LoggedOut | CloseReason::AuthRejected)
    }
}

/// Message payload for outbound sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Document { path: String, caption: Option<String> },
    Image { path: String, caption: Option<String> },
}

/// Kind of an inbound frame. Protocol frames carry no user content and are
/// dropped before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireKind {
    Text,
    Document,
    Image,
    Protocol,
}

/// Raw inbound message as the transport delivers it (sender unresolved).
#[derive(Debug, Clone)]
pub struct WireInbound {
    pub id: String,
    pub from: String,
    pub to: String,
    pub kind: WireKind,
    pub body: String,
    pub media_ref: Option<String>,
    pub timestamp_ms: i64,
    pub is_group: bool,
    /// Sending member inside a group conversation
    pub participant: Option<String>,
}

/// Outbound frame handed to the transport.
#[derive(Debug, Clone)]
pub struct WireOutbound {
    pub to: String,
    pub payload: Payload,
    pub reply_to: Option<String>,
}

/// A group membership change pushed by the network.
#[derive(Debug, Clone)]
pub struct GroupUpdate {
    pub group: String,
    pub participants: Vec<String>,
    pub action: GroupAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupAction {
    Added,
    Removed,
    Promoted,
    Demoted,
}

/// Lifecycle and traffic events a transport instance emits.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport mutated its credential (pairing finished, key
    /// rotation); the new state must be persisted before further events
    /// are processed.
    CredentialUpdate(Box<Credential>),
    /// Authenticated and online, with the address the network assigned.
    Opened { address: String },
    /// A scannable code was issued for pairing.
    Qr { code: String },
    /// A contact-sync pushed an opaque-id to address mapping.
    ContactSync { opaque_id: String, address: String },
    /// An inbound message arrived.
    Message(Box<WireInbound>),
    /// A group membership change arrived.
    Group(GroupUpdate),
    /// The connection closed.
    Closed { reason: CloseReason },
}

/// Handle for outbound operations on one tenant's live transport.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, outbound: WireOutbound) -> Result<(), TransportError>;

    /// Ask the server for a numeric pairing code for the given phone
    /// number. Only meaningful on an unregistered transport.
    async fn request_pairing_code(&self, phone: &str) -> Result<String, TransportError>;

    /// Log the device out server-side (invalidates the credential).
    async fn logout(&self) -> Result<(), TransportError>;

    /// Tear the connection down without touching registration.
    async fn close(&self);
}

/// Opens transports. One call per (tenant, connection attempt); the
/// returned receiver delivers that instance's events in wire order.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(
        &self,
        tenant: &TenantId,
        credential: Credential,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), TransportError>;
}
