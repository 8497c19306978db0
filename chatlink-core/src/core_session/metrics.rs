/*
    Metrics - session-layer counters for monitoring

    Connection churn, pairing activity, and inbound pipeline outcomes.
    Exported through whatever recorder the embedding binary installs.
*/

use metrics::{counter, describe_counter};

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    describe_counter!(
        "chatlink_connects_total",
        "Successful connected transitions, labeled by mode (restore, qr, pairing)"
    );

    describe_counter!(
        "chatlink_reconnects_total",
        "Reconnect attempts scheduled after a transport loss"
    );

    describe_counter!(
        "chatlink_disconnects_total",
        "Connection closes, labeled by reason (logged_out, auth_rejected, transport_lost, requested)"
    );

    describe_counter!(
        "chatlink_messages_inbound_total",
        "Inbound messages forwarded to the dispatcher"
    );

    describe_counter!(
        "chatlink_messages_deduplicated_total",
        "Inbound messages dropped as retransmissions"
    );

    describe_counter!(
        "chatlink_publish_failures_total",
        "Publish calls rejected (missing tenant, not connected)"
    );

    describe_counter!(
        "chatlink_qr_issued_total",
        "QR codes issued across all tenants"
    );

    describe_counter!(
        "chatlink_qr_lockouts_total",
        "QR lockouts imposed after excessive issuance"
    );

    describe_counter!(
        "chatlink_pairing_codes_issued_total",
        "Numeric pairing codes issued across all tenants"
    );
}

pub fn record_connect(mode: &'static str) {
    counter!("chatlink_connects_total", "mode" => mode).increment(1);
}

pub fn record_reconnect() {
    counter!("chatlink_reconnects_total").increment(1);
}

pub fn record_disconnect(reason: &'static str) {
    counter!("chatlink_disconnects_total", "reason" => reason).increment(1);
}

pub fn record_inbound() {
    counter!("chatlink_messages_inbound_total").increment(1);
}

pub fn record_deduplicated() {
    counter!("chatlink_messages_deduplicated_total").increment(1);
}

pub fn record_publish_failure() {
    counter!("chatlink_publish_failures_total").increment(1);
}

pub fn record_qr_issued() {
    counter!("chatlink_qr_issued_total").increment(1);
}

pub fn record_qr_lockout() {
    counter!("chatlink_qr_lockouts_total").increment(1);
}

pub fn record_pairing_code_issued() {
    counter!("chatlink_pairing_codes_issued_total").increment(1);
}
