//! QR pairing flow: issuance events, lockout, and recovery

mod common;

use chatlink_core::core_session::{SessionEvent, SessionStatus};
use chatlink_core::tenant::TenantId;
use chatlink_core::transport::TransportEvent;
use common::*;
use std::time::Duration;
use tokio::time::sleep;

fn qr_harness(threshold: u32) -> Harness {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.pairing.qr_lock_threshold = threshold;
    config.pairing.qr_lock_cooldown = Duration::from_secs(300);
    harness_with(config, dir)
}

#[tokio::test]
async fn test_qr_codes_forwarded_with_attempt_numbers() {
    let harness = qr_harness(10);
    let tenant = TenantId::new("school-1");
    let mut events = harness.manager.subscribe();

    harness.manager.connect(&tenant, None).await.unwrap();
    let handle = harness.factory.wait_for_open(&tenant, WAIT).await.unwrap();

    for n in 1..=3u32 {
        handle
            .events
            .send(TransportEvent::Qr {
                code: format!("qr-{n}"),
            })
            .await
            .unwrap();
        match next_event_for(&mut events, &tenant).await {
            SessionEvent::QrIssued { code, attempt } => {
                assert_eq!(code, format!("qr-{n}"));
                assert_eq!(attempt, n);
            }
            other => panic!("expected QrIssued, got {other:?}"),
        }
    }

    assert_eq!(
        harness.manager.status(&tenant).await.unwrap().status,
        SessionStatus::QrPending
    );
}

#[tokio::test]
async fn test_qr_lockout_closes_session_and_blocks_reconnect() {
    let harness = qr_harness(3);
    let tenant = TenantId::new("school-1");
    let mut events = harness.manager.subscribe();

    harness.manager.connect(&tenant, None).await.unwrap();
    let handle = harness.factory.wait_for_open(&tenant, WAIT).await.unwrap();

    for n in 1..=3u32 {
        handle
            .events
            .send(TransportEvent::Qr {
                code: format!("qr-{n}"),
            })
            .await
            .unwrap();
    }

    // Third issuance trips the lock
    let mut locked = false;
    for _ in 0..4 {
        if let SessionEvent::QrLocked { .. } = next_event_for(&mut events, &tenant).await {
            locked = true;
            break;
        }
    }
    assert!(locked, "never saw the QrLocked event");

    // The pairing transport is torn down, not left polling
    sleep(Duration::from_millis(100)).await;
    assert!(handle.transport.is_closed());
    let opens_after_lock = harness.factory.open_count();

    // A new connect attempt is refused before any transport is opened
    harness.manager.connect(&tenant, None).await.unwrap();
    sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.factory.open_count(), opens_after_lock);
    assert_eq!(
        harness.manager.status(&tenant).await.unwrap().status,
        SessionStatus::Error
    );
}

#[tokio::test]
async fn test_qr_counter_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.pairing.qr_lock_threshold = 5;

    // First process: two issuances
    let harness = harness_with(config.clone(), dir);
    let tenant = TenantId::new("school-1");
    let mut events = harness.manager.subscribe();
    harness.manager.connect(&tenant, None).await.unwrap();
    let handle = harness.factory.wait_for_open(&tenant, WAIT).await.unwrap();
    for n in 1..=2u32 {
        handle
            .events
            .send(TransportEvent::Qr {
                code: format!("qr-{n}"),
            })
            .await
            .unwrap();
        next_event_for(&mut events, &tenant).await;
    }
    let dir = harness.dir;
    harness.manager.shutdown().await;
    drop(harness.factory);

    // Second process on the same storage: the counter picks up at 3
    let harness = harness_with(config, dir);
    let mut events = harness.manager.subscribe();
    harness.manager.connect(&tenant, None).await.unwrap();
    let handle = harness.factory.wait_for_open(&tenant, WAIT).await.unwrap();
    handle
        .events
        .send(TransportEvent::Qr {
            code: "qr-next".to_string(),
        })
        .await
        .unwrap();
    match next_event_for(&mut events, &tenant).await {
        SessionEvent::QrIssued { attempt, .. } => assert_eq!(attempt, 3),
        other => panic!("expected QrIssued, got {other:?}"),
    }
}

#[tokio::test]
async fn test_successful_connect_resets_qr_counter() {
    let harness = qr_harness(10);
    let tenant = TenantId::new("school-1");
    let mut events = harness.manager.subscribe();

    harness.manager.connect(&tenant, None).await.unwrap();
    let handle = harness.factory.wait_for_open(&tenant, WAIT).await.unwrap();
    for n in 1..=4u32 {
        handle
            .events
            .send(TransportEvent::Qr {
                code: format!("qr-{n}"),
            })
            .await
            .unwrap();
        next_event_for(&mut events, &tenant).await;
    }

    // Pairing succeeds; the counter must restart from one afterwards
    complete_pairing(&handle).await;
    wait_for_status(&harness, &tenant, SessionStatus::Connected).await;

    let storage = storage(&harness);
    assert_eq!(storage.qr_state(&tenant).unwrap().attempt_count, 0);
}
