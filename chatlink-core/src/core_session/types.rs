//! Session-layer types
//!
//! The normalized message shapes crossing the manager's boundary and the
//! per-tenant connection state the supervisor maintains.

use crate::core_identity::Address;
use crate::tenant::TenantId;
use crate::transport::{CloseReason, GroupUpdate, Payload};
use std::time::SystemTime;

/// Connection lifecycle status for one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    QrPending,
    PairingPending,
    Connected,
    Error,
}

/// In-memory connection state for one tenant. Owned by the supervisor,
/// mutated only by its event handlers, snapshot-readable through the
/// facade. Never persisted; reconstructible from the credential store and
/// transport events.
#[derive(Debug, Clone)]
pub struct TenantConnectionState {
    pub tenant: TenantId,
    pub status: SessionStatus,
    /// Network-assigned address, once connected
    pub address: Option<Address>,
    pub last_error: Option<String>,
    pub connected_at: Option<SystemTime>,
}

impl TenantConnectionState {
    pub fn new(tenant: TenantId) -> Self {
        Self {
            tenant,
            status: SessionStatus::Disconnected,
            address: None,
            last_error: None,
            connected_at: None,
        }
    }
}

/// Content type of a normalized inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Text,
    Document,
    Image,
}

/// Normalized inbound message handed to the external dispatcher.
/// Delivered at-least-once per process lifetime: duplicates are filtered
/// within a run, not across restarts.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: String,
    pub tenant: TenantId,
    pub from: Address,
    pub to: Address,
    pub content_type: ContentType,
    pub body: String,
    pub media_ref: Option<String>,
    pub timestamp_ms: i64,
    pub is_group: bool,
    /// Resolved sending member inside a group conversation
    pub participant: Option<Address>,
}

/// Outbound message from an external publisher. The tenant id is
/// mandatory; the facade rejects envelopes without one before any I/O.
#[derive(Debug, Clone)]
pub struct OutboundEnvelope {
    pub tenant: TenantId,
    pub to: Address,
    pub content: Payload,
    pub reply_to: Option<String>,
}

impl OutboundEnvelope {
    pub fn text(tenant: TenantId, to: Address, body: impl Into<String>) -> Self {
        Self {
            tenant,
            to,
            content: Payload::Text(body.into()),
            reply_to: None,
        }
    }

    pub fn document(
        tenant: TenantId,
        to: Address,
        path: impl Into<String>,
        caption: Option<String>,
    ) -> Self {
        Self {
            tenant,
            to,
            content: Payload::Document {
                path: path.into(),
                caption,
            },
            reply_to: None,
        }
    }

    pub fn image(
        tenant: TenantId,
        to: Address,
        path: impl Into<String>,
        caption: Option<String>,
    ) -> Self {
        Self {
            tenant,
            to,
            content: Payload::Image {
                path: path.into(),
                caption,
            },
            reply_to: None,
        }
    }

    pub fn in_reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to = Some(message_id.into());
        self
    }
}

/// Group membership change forwarded to the external group handler.
#[derive(Debug, Clone)]
pub struct GroupNotice {
    pub tenant: TenantId,
    pub update: GroupUpdate,
}

/// Status events observable per tenant through the facade.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    QrIssued { code: String, attempt: u32 },
    QrLocked { until: SystemTime },
    PairingCodeIssued { code: String, expires_at: SystemTime },
    PairingCodeExpired,
    PairingError { message: String },
    Connected { address: Address },
    Disconnected { reason: CloseReason },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_builders() {
        let envelope = OutboundEnvelope::text(
            TenantId::new("school-1"),
            Address::new("123@c.us"),
            "hello",
        )
        .in_reply_to("msg-7");

        assert_eq!(envelope.tenant.as_str(), "school-1");
        assert!(matches!(envelope.content, Payload::Text(ref s) if s == "hello"));
        assert_eq!(envelope.reply_to.as_deref(), Some("msg-7"));
    }

    #[test]
    fn test_new_state_is_disconnected() {
        let state = TenantConnectionState::new(TenantId::new("t"));
        assert_eq!(state.status, SessionStatus::Disconnected);
        assert!(state.address.is_none());
        assert!(state.connected_at.is_none());
    }
}
