//! Fixture builders for tests

use crate::core_creds::{Credential, KeyPair, SessionKey};
use crate::tenant::TenantId;
use crate::transport::{WireInbound, WireKind};
use uuid::Uuid;

/// An unregistered credential with deterministic key material.
pub fn sample_credential() -> Credential {
    let mut credential = Credential::empty();
    credential.identity_key = KeyPair::new(vec![0x11; 32], vec![0x22; 32]);
    credential.noise_key = KeyPair::new(vec![0x33; 32], vec![0x44; 32]);
    credential
        .session_keys
        .insert("app-state".to_string(), SessionKey(vec![0x55; 32]));
    credential
}

/// A credential that has completed pairing.
pub fn registered_credential() -> Credential {
    let mut credential = sample_credential();
    credential.registered = true;
    credential
}

pub fn tenant(name: &str) -> TenantId {
    TenantId::new(name)
}

/// A plain inbound text frame with a unique message id.
pub fn text_frame(from: &str, body: &str) -> WireInbound {
    WireInbound {
        id: Uuid::new_v4().to_string(),
        from: from.to_string(),
        to: "service@c.us".to_string(),
        kind: WireKind::Text,
        body: body.to_string(),
        media_ref: None,
        timestamp_ms: 1_700_000_000_000,
        is_group: false,
        participant: None,
    }
}

/// A group text frame with the sending member attached.
pub fn group_frame(group: &str, participant: &str, body: &str) -> WireInbound {
    WireInbound {
        id: Uuid::new_v4().to_string(),
        from: group.to_string(),
        to: "service@c.us".to_string(),
        kind: WireKind::Text,
        body: body.to_string(),
        media_ref: None,
        timestamp_ms: 1_700_000_000_000,
        is_group: true,
        participant: Some(participant.to_string()),
    }
}

/// A protocol frame that must never reach the dispatcher.
pub fn protocol_frame(from: &str) -> WireInbound {
    WireInbound {
        id: Uuid::new_v4().to_string(),
        from: from.to_string(),
        to: "service@c.us".to_string(),
        kind: WireKind::Protocol,
        body: String::new(),
        media_ref: None,
        timestamp_ms: 1_700_000_000_000,
        is_group: false,
        participant: None,
    }
}
