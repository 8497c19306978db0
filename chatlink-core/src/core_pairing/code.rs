//! Numeric pairing-code flow
//!
//! The caller supplies a phone number; the server answers with a short
//! code the user types into their device. One attempt is cached per tenant
//! until its TTL elapses, so repeated UI polls reuse the same code instead
//! of hammering the server. Issuance is serialized per tenant to keep
//! concurrent callers from racing two requests.

use super::{PairingController, PairingError};
use crate::core_pairing::phone::validate_phone;
use crate::core_session::metrics;
use crate::core_session::types::SessionEvent;
use crate::tenant::TenantId;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// One issued pairing code. Stays cached (and inspectable) after expiry;
/// only a new issuance or a disconnect replaces it.
#[derive(Debug, Clone)]
pub struct PairingAttempt {
    pub code: String,
    pub phone: String,
    pub issued_at: SystemTime,
    pub expires_at: SystemTime,
}

impl PairingAttempt {
    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at
            .duration_since(SystemTime::now())
            .unwrap_or_default()
    }
}

impl PairingController {
    /// The tenant's cached attempt, expired or not.
    pub fn current_code(&self, tenant: &TenantId) -> Option<PairingAttempt> {
        self.with_state(tenant, |s| s.attempt.clone())
    }

    /// Idempotent issuance: an unexpired cached code for the same phone is
    /// returned as-is, otherwise a fresh one is requested.
    pub async fn request_code(
        &self,
        tenant: &TenantId,
        phone: &str,
        transport: &Arc<dyn Transport>,
    ) -> Result<PairingAttempt, PairingError> {
        self.issue_code(tenant, phone, transport, false).await
    }

    /// Forced issuance: the cached code (if any) is discarded first.
    pub async fn request_new_code(
        &self,
        tenant: &TenantId,
        phone: &str,
        transport: &Arc<dyn Transport>,
    ) -> Result<PairingAttempt, PairingError> {
        self.issue_code(tenant, phone, transport, true).await
    }

    async fn issue_code(
        &self,
        tenant: &TenantId,
        phone: &str,
        transport: &Arc<dyn Transport>,
        force: bool,
    ) -> Result<PairingAttempt, PairingError> {
        validate_phone(phone)?;

        let issuance = self.with_state(tenant, |s| s.issuance.clone());
        let _guard = issuance.lock().await;

        if !force {
            if let Some(attempt) = self.with_state(tenant, |s| s.attempt.clone()) {
                if !attempt.is_expired() && attempt.phone == phone {
                    debug!(tenant = %tenant, "Reusing unexpired pairing code");
                    return Ok(attempt);
                }
            }
        }

        self.with_state(tenant, |s| s.clear_attempt());

        let code = match transport.request_pairing_code(phone).await {
            Ok(code) => code,
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "Pairing code request failed");
                self.emit(
                    tenant,
                    SessionEvent::PairingError {
                        message: e.to_string(),
                    },
                );
                return Err(PairingError::CodeRequest(e.to_string()));
            }
        };

        let issued_at = SystemTime::now();
        let expires_at = issued_at + self.config.code_ttl;
        let attempt = PairingAttempt {
            code,
            phone: phone.to_string(),
            issued_at,
            expires_at,
        };

        // Announce the expiry when it happens; the attempt itself stays
        // cached so callers can still inspect it afterwards.
        let events = self.events.clone();
        let timer_tenant = tenant.clone();
        let ttl = self.config.code_ttl;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let _ = events.send((timer_tenant, SessionEvent::PairingCodeExpired));
        });

        self.with_state(tenant, |s| {
            s.attempt = Some(attempt.clone());
            s.expiry_timer = Some(timer);
        });

        metrics::record_pairing_code_issued();
        info!(
            tenant = %tenant,
            expires_in_secs = ttl.as_secs(),
            "Pairing code issued"
        );
        self.emit(
            tenant,
            SessionEvent::PairingCodeIssued {
                code: attempt.code.clone(),
                expires_at,
            },
        );
        Ok(attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PairingConfig, StoreConfig};
    use crate::core_creds::{Credential, CredentialStore};
    use crate::transport::mock::MockTransportFactory;
    use crate::transport::{TransportError, TransportFactory};
    use tempfile::TempDir;
    use tokio::sync::broadcast;

    struct Fixture {
        controller: PairingController,
        events: broadcast::Receiver<(TenantId, SessionEvent)>,
        factory: MockTransportFactory,
        _dir: TempDir,
    }

    fn fixture(code_ttl: Duration) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store_config = StoreConfig {
            data_dir: dir.path().to_path_buf(),
            db_path: dir.path().join("chatlink.db"),
            seal_passphrase: None,
        };
        let creds = Arc::new(CredentialStore::new(&store_config, None).unwrap());
        let config = PairingConfig {
            code_ttl,
            ..PairingConfig::default()
        };
        let (tx, rx) = broadcast::channel(32);
        Fixture {
            controller: PairingController::new(creds, config, tx),
            events: rx,
            factory: MockTransportFactory::new(),
            _dir: dir,
        }
    }

    async fn open_transport(fixture: &Fixture, tenant: &TenantId) -> Arc<dyn Transport> {
        let (transport, _rx) = fixture
            .factory
            .open(tenant, Credential::empty())
            .await
            .unwrap();
        transport
    }

    #[tokio::test]
    async fn test_repeat_request_reuses_unexpired_code() {
        let fixture = fixture(Duration::from_secs(120));
        let tenant = TenantId::new("school-1");
        let transport = open_transport(&fixture, &tenant).await;

        let first = fixture
            .controller
            .request_code(&tenant, "14155550123", &transport)
            .await
            .unwrap();
        let second = fixture
            .controller
            .request_code(&tenant, "14155550123", &transport)
            .await
            .unwrap();

        assert_eq!(first.code, second.code);
        assert_eq!(
            fixture.controller.current_code(&tenant).unwrap().code,
            first.code
        );
    }

    #[tokio::test]
    async fn test_forced_request_issues_fresh_code() {
        let fixture = fixture(Duration::from_secs(120));
        let tenant = TenantId::new("school-1");
        let transport = open_transport(&fixture, &tenant).await;

        let first = fixture
            .controller
            .request_code(&tenant, "14155550123", &transport)
            .await
            .unwrap();
        let second = fixture
            .controller
            .request_new_code(&tenant, "14155550123", &transport)
            .await
            .unwrap();

        assert_ne!(first.code, second.code);
    }

    #[tokio::test]
    async fn test_different_phone_issues_fresh_code() {
        let fixture = fixture(Duration::from_secs(120));
        let tenant = TenantId::new("school-1");
        let transport = open_transport(&fixture, &tenant).await;

        let first = fixture
            .controller
            .request_code(&tenant, "14155550123", &transport)
            .await
            .unwrap();
        let second = fixture
            .controller
            .request_code(&tenant, "14155550124", &transport)
            .await
            .unwrap();

        assert_ne!(first.code, second.code);
        assert_eq!(second.phone, "14155550124");
    }

    #[tokio::test]
    async fn test_expiry_emits_event_and_allows_reissue() {
        let mut fixture = fixture(Duration::from_millis(50));
        let tenant = TenantId::new("school-1");
        let transport = open_transport(&fixture, &tenant).await;

        let first = fixture
            .controller
            .request_code(&tenant, "14155550123", &transport)
            .await
            .unwrap();

        // Drain the issuance event, then wait for the expiry announcement
        let (_, event) = fixture.events.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::PairingCodeIssued { .. }));
        let (_, event) = fixture.events.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::PairingCodeExpired));

        // Entry survives expiry for inspection
        let cached = fixture.controller.current_code(&tenant).unwrap();
        assert_eq!(cached.code, first.code);
        assert!(cached.is_expired());

        // An idempotent request now issues a fresh code
        let second = fixture
            .controller
            .request_code(&tenant, "14155550123", &transport)
            .await
            .unwrap();
        assert_ne!(first.code, second.code);
    }

    #[tokio::test]
    async fn test_invalid_phone_rejected_before_transport() {
        let fixture = fixture(Duration::from_secs(120));
        let tenant = TenantId::new("school-1");
        let transport = open_transport(&fixture, &tenant).await;

        let result = fixture
            .controller
            .request_code(&tenant, "+1415555", &transport)
            .await;
        assert!(matches!(result, Err(PairingError::InvalidPhone(_))));
        assert!(fixture.controller.current_code(&tenant).is_none());
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces_error_and_event() {
        let mut fixture = fixture(Duration::from_secs(120));
        let tenant = TenantId::new("school-1");
        let transport = open_transport(&fixture, &tenant).await;
        let handle = fixture.factory.handle_for(&tenant).unwrap();
        handle
            .transport
            .script_pairing_code(Err(TransportError::Pairing("server said no".to_string())));

        let result = fixture
            .controller
            .request_code(&tenant, "14155550123", &transport)
            .await;
        assert!(matches!(result, Err(PairingError::CodeRequest(_))));

        let (_, event) = fixture.events.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::PairingError { .. }));
    }

    #[tokio::test]
    async fn test_invalidate_drops_cached_code() {
        let fixture = fixture(Duration::from_secs(120));
        let tenant = TenantId::new("school-1");
        let transport = open_transport(&fixture, &tenant).await;

        fixture
            .controller
            .request_code(&tenant, "14155550123", &transport)
            .await
            .unwrap();
        fixture.controller.invalidate(&tenant);
        assert!(fixture.controller.current_code(&tenant).is_none());
    }
}
