//! QR issuance gate
//!
//! The transport emits QR codes on its own schedule while a device is
//! unregistered; each one is a registration attempt. The gate counts
//! issuances in the durable store (so restarts cannot launder the count)
//! and imposes a cooldown once the threshold is hit.

use super::{epoch_ms, from_epoch_ms, PairingController, PairingError};
use crate::core_session::metrics;
use crate::core_session::types::SessionEvent;
use crate::tenant::TenantId;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// What the supervisor should do with a QR code the transport produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QrGate {
    /// Code was forwarded to subscribers; keep the connection open
    Issued { attempt: u32 },
    /// This code tripped the threshold; close the connection
    Locked { until: SystemTime },
    /// A lockout was already active; the code was swallowed
    Refused { until: SystemTime },
}

impl PairingController {
    /// Fast check for the connect path: refuse to even open a QR session
    /// while a lockout is active.
    pub fn check_qr_allowed(&self, tenant: &TenantId) -> Result<(), PairingError> {
        let state = self.creds.qr_state(tenant)?;
        if let Some(until_ms) = state.locked_until_ms {
            let now_ms = epoch_ms(SystemTime::now());
            if until_ms > now_ms {
                return Err(PairingError::QrLocked {
                    remaining_secs: ((until_ms - now_ms) / 1000).max(1) as u64,
                });
            }
        }
        Ok(())
    }

    /// Gate one QR code the transport just produced. Persists the attempt,
    /// forwards the code to subscribers, and imposes the lockout when the
    /// persisted count reaches the configured threshold.
    pub fn handle_qr(&self, tenant: &TenantId, code: &str) -> Result<QrGate, PairingError> {
        let state = self.creds.qr_state(tenant)?;
        if let Some(until_ms) = state.locked_until_ms {
            if until_ms > epoch_ms(SystemTime::now()) {
                debug!(tenant = %tenant, "QR code swallowed, lockout active");
                return Ok(QrGate::Refused {
                    until: from_epoch_ms(until_ms),
                });
            }
        }

        let attempt = self.creds.record_qr_attempt(tenant)?;
        metrics::record_qr_issued();
        self.emit(
            tenant,
            SessionEvent::QrIssued {
                code: code.to_string(),
                attempt,
            },
        );

        if attempt >= self.config.qr_lock_threshold {
            let until = SystemTime::now() + self.config.qr_lock_cooldown;
            self.creds.set_qr_lock(tenant, epoch_ms(until))?;
            metrics::record_qr_lockout();
            warn!(
                tenant = %tenant,
                attempts = attempt,
                cooldown_secs = self.config.qr_lock_cooldown.as_secs(),
                "QR issuance threshold reached, locking tenant out"
            );
            self.emit(tenant, SessionEvent::QrLocked { until });
            return Ok(QrGate::Locked { until });
        }

        info!(tenant = %tenant, attempt, "QR code issued");
        Ok(QrGate::Issued { attempt })
    }

    /// Clear the QR counter and any lockout. Called on a successful
    /// connection and by admin tooling.
    pub fn reset_qr(&self, tenant: &TenantId) -> Result<(), PairingError> {
        self.creds.reset_qr(tenant)?;
        Ok(())
    }
}
