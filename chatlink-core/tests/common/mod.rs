//! Shared harness for integration tests

use chatlink_core::config::Config;
use chatlink_core::core_creds::CredentialStore;
use chatlink_core::core_session::{SessionEvent, SessionManager, SessionStatus};
use chatlink_core::tenant::TenantId;
use chatlink_core::transport::mock::{MockHandle, MockTransportFactory};
use chatlink_core::transport::TransportEvent;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Instant};

pub const WAIT: Duration = Duration::from_secs(2);

pub struct Harness {
    pub manager: SessionManager,
    pub factory: Arc<MockTransportFactory>,
    pub dir: TempDir,
}

pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.store.data_dir = dir.path().to_path_buf();
    config.store.db_path = dir.path().join("chatlink.db");
    config.session.reconnect_delay = Duration::from_millis(50);
    config.pairing.teardown_wait = Duration::from_millis(10);
    config
}

pub fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    harness_with(test_config(&dir), dir)
}

pub fn harness_with(config: Config, dir: TempDir) -> Harness {
    let factory = Arc::new(MockTransportFactory::new());
    let manager = SessionManager::new(config, factory.clone()).unwrap();
    Harness {
        manager,
        factory,
        dir,
    }
}

/// A second handle on the same tier-1/2 storage, for seeding and
/// post-mortem inspection.
pub fn storage(harness: &Harness) -> CredentialStore {
    CredentialStore::new(&test_config(&harness.dir).store, None).unwrap()
}

/// Drive a freshly opened transport through registration to connected.
pub async fn complete_pairing(handle: &MockHandle) {
    handle
        .events
        .send(TransportEvent::CredentialUpdate(Box::new(
            chatlink_core::test_utils::registered_credential(),
        )))
        .await
        .unwrap();
    handle
        .events
        .send(TransportEvent::Opened {
            address: format!("{}@c.us", handle.tenant),
        })
        .await
        .unwrap();
}

/// Connect a tenant end to end and return its live transport handle.
pub async fn connect_registered(harness: &Harness, tenant: &TenantId) -> MockHandle {
    // Count earlier opens for this tenant so a reconnect waits for the
    // instance created by *this* connect, not a stale handle.
    let seen = harness
        .factory
        .handles()
        .iter()
        .filter(|h| &h.tenant == tenant)
        .count();
    harness.manager.connect(tenant, None).await.unwrap();
    let handle = harness
        .factory
        .wait_for_reopen(tenant, seen, WAIT)
        .await
        .expect("transport never opened");
    complete_pairing(&handle).await;
    wait_for_status(harness, tenant, SessionStatus::Connected).await;
    handle
}

pub async fn wait_for_status(harness: &Harness, tenant: &TenantId, wanted: SessionStatus) {
    let deadline = Instant::now() + WAIT;
    loop {
        if let Some(state) = harness.manager.status(tenant).await {
            if state.status == wanted {
                return;
            }
        }
        if Instant::now() >= deadline {
            panic!("tenant {tenant} never reached {wanted:?}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Next event for the given tenant, skipping other tenants' events.
pub async fn next_event_for(
    rx: &mut broadcast::Receiver<(TenantId, SessionEvent)>,
    tenant: &TenantId,
) -> SessionEvent {
    loop {
        let (who, event) = timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if &who == tenant {
            return event;
        }
    }
}
