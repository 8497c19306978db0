//! Identity resolution through the inbound pipeline, and tier-3 recovery

mod common;

use chatlink_core::core_creds::{ArchiveTier, Credential, MemoryArchive, SessionKey};
use chatlink_core::core_session::{SessionManager, SessionStatus};
use chatlink_core::tenant::TenantId;
use chatlink_core::test_utils::{group_frame, registered_credential, text_frame};
use chatlink_core::transport::mock::MockTransportFactory;
use chatlink_core::transport::TransportEvent;
use common::*;
use std::sync::Arc;
use tokio::time::timeout;

#[tokio::test]
async fn test_contact_sync_resolves_later_messages() {
    let harness = harness();
    let tenant = TenantId::new("school-1");
    let mut inbound = harness.manager.take_inbound().unwrap();
    let handle = connect_registered(&harness, &tenant).await;

    handle
        .events
        .send(TransportEvent::ContactSync {
            opaque_id: "98765@lid".to_string(),
            address: "4479123456789@c.us".to_string(),
        })
        .await
        .unwrap();
    handle
        .events
        .send(TransportEvent::Message(Box::new(text_frame(
            "98765@lid",
            "who am i",
        ))))
        .await
        .unwrap();

    let message = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    assert_eq!(message.from.as_str(), "4479123456789@c.us");
}

#[tokio::test]
async fn test_unknown_opaque_id_echoes_through() {
    let harness = harness();
    let tenant = TenantId::new("school-1");
    let mut inbound = harness.manager.take_inbound().unwrap();
    let handle = connect_registered(&harness, &tenant).await;

    handle
        .events
        .send(TransportEvent::Message(Box::new(text_frame(
            "55555@lid",
            "mystery sender",
        ))))
        .await
        .unwrap();

    let message = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    assert_eq!(message.from.as_str(), "55555@lid");
}

#[tokio::test]
async fn test_group_participant_resolved_and_notice_forwarded() {
    let harness = harness();
    let tenant = TenantId::new("school-1");
    let mut inbound = harness.manager.take_inbound().unwrap();
    let handle = connect_registered(&harness, &tenant).await;

    handle
        .events
        .send(TransportEvent::ContactSync {
            opaque_id: "1111@lid".to_string(),
            address: "4479000000001@c.us".to_string(),
        })
        .await
        .unwrap();
    handle
        .events
        .send(TransportEvent::Message(Box::new(group_frame(
            "group-7@g.us",
            "1111@lid",
            "from the group",
        ))))
        .await
        .unwrap();

    let message = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    assert!(message.is_group);
    assert_eq!(
        message.participant.unwrap().as_str(),
        "4479000000001@c.us"
    );
}

#[tokio::test]
async fn test_mappings_survive_session_restart() {
    let harness = harness();
    let tenant = TenantId::new("school-1");
    let handle = connect_registered(&harness, &tenant).await;

    handle
        .events
        .send(TransportEvent::ContactSync {
            opaque_id: "2222@lid".to_string(),
            address: "4479000000002@c.us".to_string(),
        })
        .await
        .unwrap();
    // Let the mapping flush to disk before tearing down
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    harness.manager.disconnect(&tenant).await.unwrap();

    let mut inbound = harness.manager.take_inbound().unwrap();
    let handle = connect_registered(&harness, &tenant).await;
    handle
        .events
        .send(TransportEvent::Message(Box::new(text_frame(
            "2222@lid",
            "back again",
        ))))
        .await
        .unwrap();

    let message = timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
    assert_eq!(message.from.as_str(), "4479000000002@c.us");
}

#[tokio::test]
async fn test_fresh_machine_restores_from_archive() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = test_config(&dir);
    let archive = Arc::new(MemoryArchive::new());
    let tenant = TenantId::new("school-5");

    // The archive already holds this tenant's credential; local tiers
    // are empty, as on a brand new machine
    archive
        .store(&tenant, &registered_credential().to_blob().unwrap())
        .await
        .unwrap();

    let factory = Arc::new(MockTransportFactory::new());
    let manager =
        SessionManager::with_archive(config, factory.clone(), Some(archive)).unwrap();

    manager.connect(&tenant, None).await.unwrap();
    let handle = factory.wait_for_open(&tenant, WAIT).await.unwrap();
    assert!(handle.credential.registered);

    handle
        .events
        .send(TransportEvent::Opened {
            address: "school-5@c.us".to_string(),
        })
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if let Some(state) = manager.status(&tenant).await {
            if state.status == SessionStatus::Connected {
                break;
            }
        }
        assert!(tokio::time::Instant::now() < deadline, "never connected");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_key_rotation_while_connected_refreshes_archive() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = test_config(&dir);
    let archive = Arc::new(MemoryArchive::new());
    let tenant = TenantId::new("school-6");

    let factory = Arc::new(MockTransportFactory::new());
    let manager =
        SessionManager::with_archive(config, factory.clone(), Some(archive.clone())).unwrap();

    manager.connect(&tenant, None).await.unwrap();
    let handle = factory.wait_for_open(&tenant, WAIT).await.unwrap();
    handle
        .events
        .send(TransportEvent::CredentialUpdate(Box::new(
            registered_credential(),
        )))
        .await
        .unwrap();
    handle
        .events
        .send(TransportEvent::Opened {
            address: "school-6@c.us".to_string(),
        })
        .await
        .unwrap();

    // The connected transition pushes the first archive copy
    wait_for_archived_keys(&archive, &tenant, &["app-state"]).await;

    // The transport rotates a session key mid-connection
    let mut rotated = registered_credential();
    rotated
        .session_keys
        .insert("rotated-key".to_string(), SessionKey(vec![0x66; 32]));
    handle
        .events
        .send(TransportEvent::CredentialUpdate(Box::new(rotated)))
        .await
        .unwrap();

    wait_for_archived_keys(&archive, &tenant, &["app-state", "rotated-key"]).await;
}

/// Poll the archive until the stored blob holds exactly these session
/// keys. Archive pushes run off the event path, so tests have to wait.
async fn wait_for_archived_keys(archive: &MemoryArchive, tenant: &TenantId, wanted: &[&str]) {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if let Some(blob) = archive.fetch(tenant).await.unwrap() {
            let stored = Credential::from_blob(&blob).unwrap();
            let keys: Vec<&str> = stored.session_keys.keys().map(String::as_str).collect();
            if keys == wanted {
                return;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "archive never caught up to session keys {:?}",
            wanted
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
