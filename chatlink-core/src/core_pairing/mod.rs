//! Device pairing
//!
//! Two flows register a tenant's device with the network. The QR flow is
//! transport-driven: codes arrive as events and this module only gates and
//! counts them, persisting the counter so a restart cannot reset a lockout.
//! The pairing-code flow is caller-driven: a phone number goes in, a short
//! numeric code comes out, cached per tenant until its TTL runs out.

use crate::config::PairingConfig;
use crate::core_creds::{CredStoreError, CredentialStore};
use crate::core_session::types::SessionEvent;
use crate::tenant::TenantId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub mod code;
pub mod phone;
pub mod qr;

pub use code::PairingAttempt;
pub use phone::validate_phone;
pub use qr::QrGate;

#[derive(Debug, Error)]
pub enum PairingError {
    #[error("invalid phone number: {0}")]
    InvalidPhone(String),

    /// QR issuance refused; the tenant must wait out the cooldown
    #[error("QR pairing locked for another {remaining_secs}s")]
    QrLocked { remaining_secs: u64 },

    #[error("pairing code request failed: {0}")]
    CodeRequest(String),

    #[error("credential store error: {0}")]
    Creds(#[from] CredStoreError),

    /// The session was torn down while a pairing request was in flight
    #[error("pairing aborted by disconnect")]
    Aborted,
}

pub(crate) fn epoch_ms(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub(crate) fn from_epoch_ms(ms: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms.max(0) as u64)
}

/// Per-tenant pairing bookkeeping held in memory. The QR counter itself
/// lives in the durable store; only code-flow state is process-local
/// because an unexpired code is useless after a restart anyway (the
/// transport that requested it is gone).
struct TenantPairing {
    attempt: Option<PairingAttempt>,
    expiry_timer: Option<JoinHandle<()>>,
    /// Serializes code issuance for one tenant across concurrent callers
    issuance: Arc<tokio::sync::Mutex<()>>,
}

impl TenantPairing {
    fn new() -> Self {
        Self {
            attempt: None,
            expiry_timer: None,
            issuance: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn clear_attempt(&mut self) {
        if let Some(timer) = self.expiry_timer.take() {
            timer.abort();
        }
        self.attempt = None;
    }
}

/// Coordinates both pairing flows for every tenant.
pub struct PairingController {
    creds: Arc<CredentialStore>,
    config: PairingConfig,
    events: broadcast::Sender<(TenantId, SessionEvent)>,
    state: Mutex<HashMap<TenantId, TenantPairing>>,
}

impl PairingController {
    pub fn new(
        creds: Arc<CredentialStore>,
        config: PairingConfig,
        events: broadcast::Sender<(TenantId, SessionEvent)>,
    ) -> Self {
        Self {
            creds,
            config,
            events,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &PairingConfig {
        &self.config
    }

    fn emit(&self, tenant: &TenantId, event: SessionEvent) {
        // No subscribers is fine; events are observability, not control flow
        let _ = self.events.send((tenant.clone(), event));
    }

    fn with_state<R>(&self, tenant: &TenantId, f: impl FnOnce(&mut TenantPairing) -> R) -> R {
        let mut map = self.state.lock().unwrap();
        f(map.entry(tenant.clone()).or_insert_with(TenantPairing::new))
    }

    /// Drop all in-memory pairing state for a tenant. Called when its
    /// session disconnects; any running expiry timer is aborted.
    pub fn invalidate(&self, tenant: &TenantId) {
        let mut map = self.state.lock().unwrap();
        if let Some(mut pairing) = map.remove(tenant) {
            pairing.clear_attempt();
        }
    }
}
