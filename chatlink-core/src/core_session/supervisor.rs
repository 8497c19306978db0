//! Per-tenant connection supervisor
//!
//! One supervisor owns one tenant's transport lifecycle: it decides the
//! connect mode from the stored credential, opens the transport, pumps its
//! events, and applies the reconnect policy when the connection drops.
//! Runs as a single spawned task per tenant; the façade talks to it only
//! through `Arc` methods and the shutdown watch.

use crate::config::SessionConfig;
use crate::core_creds::{Credential, CredentialStore};
use crate::core_identity::{Address, IdentityResolver};
use crate::core_pairing::{PairingController, QrGate};
use crate::core_session::dedup::DeduplicationGuard;
use crate::core_session::errors::{SessionError, SessionResult};
use crate::core_session::metrics;
use crate::core_session::types::{
    ContentType, GroupNotice, InboundMessage, SessionEvent, SessionStatus, TenantConnectionState,
};
use crate::tenant::TenantId;
use crate::transport::{
    CloseReason, Payload, Transport, TransportEvent, TransportFactory, WireInbound, WireKind,
    WireOutbound,
};
use crate::util::backoff::retry_fixed;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Service handles shared by every supervisor.
pub(crate) struct SessionShared {
    pub creds: Arc<CredentialStore>,
    pub resolver: Arc<IdentityResolver>,
    pub pairing: Arc<PairingController>,
    pub dedup: Arc<DeduplicationGuard>,
    pub factory: Arc<dyn TransportFactory>,
    pub config: SessionConfig,
    pub events: broadcast::Sender<(TenantId, SessionEvent)>,
    pub inbound: mpsc::Sender<InboundMessage>,
    pub groups: mpsc::Sender<GroupNotice>,
}

/// How this session will authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConnectMode {
    /// Registered credential on hand, no pairing flow
    Restore,
    /// Unregistered with a phone number: numeric pairing-code flow
    Pairing,
    /// Unregistered without a phone number: QR flow
    Qr,
}

impl ConnectMode {
    fn metric_label(&self) -> &'static str {
        match self {
            ConnectMode::Restore => "restore",
            ConnectMode::Pairing => "pairing",
            ConnectMode::Qr => "qr",
        }
    }
}

/// What the event pump decided when it returned.
enum PumpOutcome {
    /// Transient loss; schedule a reconnect
    Reconnect,
    /// Terminal for this session; leave the loop
    Stop,
}

pub struct ConnectionSupervisor {
    tenant: TenantId,
    shared: Arc<SessionShared>,
    /// Phone number for the pairing-code flow, when one was supplied
    phone: Option<String>,
    state: Mutex<TenantConnectionState>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    registered: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl ConnectionSupervisor {
    pub(crate) fn new(tenant: TenantId, shared: Arc<SessionShared>, phone: Option<String>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            state: Mutex::new(TenantConnectionState::new(tenant.clone())),
            tenant,
            shared,
            phone,
            transport: Mutex::new(None),
            registered: AtomicBool::new(false),
            shutdown,
        }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn status(&self) -> TenantConnectionState {
        self.state.lock().unwrap().clone()
    }

    /// True when this session was opened for the pairing-code flow with
    /// the given phone number.
    pub fn is_pairing_for(&self, phone: &str) -> bool {
        self.phone.as_deref() == Some(phone)
    }

    /// Ask the run loop to wind down. Idempotent; the task closes the
    /// transport and exits on its own schedule.
    pub fn signal_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Send one envelope through this tenant's live transport. Fails
    /// loudly when the session is anything but connected.
    pub async fn publish(
        &self,
        to: Address,
        payload: Payload,
        reply_to: Option<String>,
    ) -> SessionResult<()> {
        let transport = {
            let status = self.state.lock().unwrap().status;
            if status != SessionStatus::Connected {
                metrics::record_publish_failure();
                return Err(SessionError::NotConnected(self.tenant.clone()));
            }
            self.transport.lock().unwrap().clone()
        };
        let Some(transport) = transport else {
            metrics::record_publish_failure();
            return Err(SessionError::NotConnected(self.tenant.clone()));
        };
        transport
            .send(WireOutbound {
                to: to.as_str().to_string(),
                payload,
                reply_to,
            })
            .await?;
        Ok(())
    }

    /// Poll until this session has a live transport (any status with one
    /// open, not just connected). Used by the pairing-code path, which
    /// needs the unauthenticated transport to ask the server for a code.
    pub async fn wait_for_transport(&self, timeout: Duration) -> Option<Arc<dyn Transport>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(transport) = self.transport.lock().unwrap().clone() {
                return Some(transport);
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Log the device out server-side, then wipe its credentials. The
    /// close event the transport emits afterwards drives the rest of the
    /// teardown through the normal event path.
    pub async fn logout(&self) -> SessionResult<()> {
        let transport = self.transport.lock().unwrap().clone();
        match transport {
            Some(transport) => {
                transport.logout().await?;
                Ok(())
            }
            None => Err(SessionError::NotConnected(self.tenant.clone())),
        }
    }

    fn set_status(&self, status: SessionStatus) {
        let mut state = self.state.lock().unwrap();
        state.status = status;
        if status != SessionStatus::Connected {
            state.connected_at = None;
        }
        if status == SessionStatus::Disconnected {
            state.address = None;
        }
    }

    fn set_error(&self, message: String) {
        let mut state = self.state.lock().unwrap();
        state.status = SessionStatus::Error;
        state.last_error = Some(message);
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.shared.events.send((self.tenant.clone(), event));
    }

    /// The per-tenant task body. Owns the connect/reconnect loop until a
    /// terminal close or a shutdown signal.
    pub(crate) async fn run(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let (credential, mode) = match self.prepare_credential().await {
                Ok(prepared) => prepared,
                Err(e) => {
                    error!(tenant = %self.tenant, error = %e, "Cannot load credential, giving up");
                    self.set_error(e.to_string());
                    break;
                }
            };

            // A locked-out tenant in QR mode is refused before any
            // transport is opened.
            if mode == ConnectMode::Qr {
                if let Err(e) = self.shared.pairing.check_qr_allowed(&self.tenant) {
                    warn!(tenant = %self.tenant, error = %e, "QR session refused");
                    self.set_error(e.to_string());
                    break;
                }
            }

            self.set_status(SessionStatus::Connecting);
            self.registered.store(credential.registered, Ordering::SeqCst);

            let opened = self.shared.factory.open(&self.tenant, credential).await;
            let (transport, rx) = match opened {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(tenant = %self.tenant, error = %e, "Transport open failed");
                    if self.registered.load(Ordering::SeqCst) {
                        metrics::record_reconnect();
                        self.set_status(SessionStatus::Connecting);
                        if self.sleep_or_shutdown(&mut shutdown_rx).await {
                            break;
                        }
                        continue;
                    }
                    self.set_error(e.to_string());
                    break;
                }
            };

            *self.transport.lock().unwrap() = Some(transport.clone());
            self.set_status(match mode {
                ConnectMode::Restore => SessionStatus::Connecting,
                ConnectMode::Pairing => SessionStatus::PairingPending,
                ConnectMode::Qr => SessionStatus::QrPending,
            });

            let outcome = self.pump_events(rx, &mut shutdown_rx, &mode).await;
            transport.close().await;
            *self.transport.lock().unwrap() = None;

            match outcome {
                PumpOutcome::Reconnect => {
                    metrics::record_reconnect();
                    info!(
                        tenant = %self.tenant,
                        delay_secs = self.shared.config.reconnect_delay.as_secs(),
                        "Scheduling reconnect"
                    );
                    self.set_status(SessionStatus::Connecting);
                    if self.sleep_or_shutdown(&mut shutdown_rx).await {
                        break;
                    }
                }
                PumpOutcome::Stop => break,
            }
        }

        // Whatever state the loop left behind, the task ending means the
        // tenant is offline.
        {
            let mut state = self.state.lock().unwrap();
            if state.status != SessionStatus::Error {
                state.status = SessionStatus::Disconnected;
            }
            state.address = None;
            state.connected_at = None;
        }
        self.shared.pairing.invalidate(&self.tenant);
        self.shared.dedup.forget(&self.tenant);
        debug!(tenant = %self.tenant, "Supervisor task finished");
    }

    /// Load (or initialize) the credential and pick the connect mode.
    /// A fresh pairing must not inherit a half-initialized credential
    /// directory, so the stale unregistered tier-1 state is cleared first.
    async fn prepare_credential(&self) -> SessionResult<(Credential, ConnectMode)> {
        let stored = self.shared.creds.load(&self.tenant).await?;
        match stored {
            Some(credential) if credential.registered => Ok((credential, ConnectMode::Restore)),
            stored => {
                if self.phone.is_some() {
                    if stored.is_some() {
                        debug!(tenant = %self.tenant, "Clearing stale unregistered credential before pairing");
                        self.shared.creds.clear_local(&self.tenant)?;
                    }
                    Ok((Credential::empty(), ConnectMode::Pairing))
                } else {
                    Ok((stored.unwrap_or_else(Credential::empty), ConnectMode::Qr))
                }
            }
        }
    }

    /// Sleep the reconnect delay; returns true if shutdown arrived first.
    async fn sleep_or_shutdown(&self, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = sleep(self.shared.config.reconnect_delay) => false,
            _ = shutdown_rx.changed() => *shutdown_rx.borrow(),
        }
    }

    /// Consume one transport instance's events until it closes, the
    /// channel dies, or shutdown is signalled.
    async fn pump_events(
        &self,
        mut rx: mpsc::Receiver<TransportEvent>,
        shutdown_rx: &mut watch::Receiver<bool>,
        mode: &ConnectMode,
    ) -> PumpOutcome {
        loop {
            let event = tokio::select! {
                event = rx.recv() => event,
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        debug!(tenant = %self.tenant, "Shutdown signalled, closing transport");
                        return PumpOutcome::Stop;
                    }
                    continue;
                }
            };

            let Some(event) = event else {
                // Transport dropped its sender without a close event;
                // treat like a transport loss.
                warn!(tenant = %self.tenant, "Transport event channel closed unexpectedly");
                if self.registered.load(Ordering::SeqCst) {
                    return PumpOutcome::Reconnect;
                }
                return PumpOutcome::Stop;
            };

            match event {
                TransportEvent::CredentialUpdate(credential) => {
                    self.on_credential_update(*credential);
                }
                TransportEvent::Opened { address } => {
                    self.on_opened(address, mode).await;
                }
                TransportEvent::Qr { code } => {
                    if !self.on_qr(&code) {
                        return PumpOutcome::Stop;
                    }
                }
                TransportEvent::ContactSync { opaque_id, address } => {
                    if let Err(e) = self
                        .shared
                        .resolver
                        .learn(&self.tenant, &opaque_id, &Address::new(address))
                        .await
                    {
                        warn!(tenant = %self.tenant, error = %e, "Failed to persist identity mapping");
                    }
                }
                TransportEvent::Message(wire) => {
                    self.on_message(*wire).await;
                }
                TransportEvent::Group(update) => {
                    let notice = GroupNotice {
                        tenant: self.tenant.clone(),
                        update,
                    };
                    if self.shared.groups.send(notice).await.is_err() {
                        debug!(tenant = %self.tenant, "Group channel closed, dropping notice");
                    }
                }
                TransportEvent::Closed { reason } => {
                    return self.on_closed(reason).await;
                }
            }
        }
    }

    /// Write-through persistence of every credential mutation. Tier 1 is
    /// synchronous; durable and archive tiers follow once connected.
    fn on_credential_update(&self, credential: Credential) {
        self.registered.store(credential.registered, Ordering::SeqCst);
        if let Err(e) = self.shared.creds.save_local(&self.tenant, &credential) {
            error!(tenant = %self.tenant, error = %e, "Failed to persist credential update locally");
        }
        if self.state.lock().unwrap().status == SessionStatus::Connected {
            self.persist_durable_in_background(credential.clone());
            self.archive_in_background(credential);
        }
    }

    async fn on_opened(&self, address: String, mode: &ConnectMode) {
        let address = Address::new(address);
        {
            let mut state = self.state.lock().unwrap();
            state.status = SessionStatus::Connected;
            state.address = Some(address.clone());
            state.last_error = None;
            state.connected_at = Some(SystemTime::now());
        }
        info!(tenant = %self.tenant, address = %address, mode = mode.metric_label(), "Session connected");
        metrics::record_connect(mode.metric_label());

        if let Err(e) = self.shared.pairing.reset_qr(&self.tenant) {
            warn!(tenant = %self.tenant, error = %e, "Failed to reset QR counter");
        }

        // The durable tier is only written at the connected transition,
        // so half-finished pairings never reach it.
        match self.shared.creds.load(&self.tenant).await {
            Ok(Some(credential)) => {
                if let Err(e) = self.shared.creds.save_durable(&self.tenant, &credential) {
                    warn!(tenant = %self.tenant, error = %e, "Durable save failed, scheduling reconciliation");
                    self.persist_durable_in_background(credential.clone());
                }
                if let Err(e) = self.shared.creds.set_active(&self.tenant, true) {
                    warn!(tenant = %self.tenant, error = %e, "Failed to mark tenant active");
                }
                self.archive_in_background(credential);
            }
            Ok(None) => {
                warn!(tenant = %self.tenant, "Connected without a stored credential");
            }
            Err(e) => {
                warn!(tenant = %self.tenant, error = %e, "Could not reload credential after connect");
            }
        }

        self.emit(SessionEvent::Connected { address });
    }

    /// Retry the durable write off the event path so a flaky database
    /// never stalls the live session.
    fn persist_durable_in_background(&self, credential: Credential) {
        let creds = self.shared.creds.clone();
        let tenant = self.tenant.clone();
        tokio::spawn(async move {
            let result = retry_fixed(5, Duration::from_secs(2), "durable-save", || {
                let creds = creds.clone();
                let tenant = tenant.clone();
                let credential = credential.clone();
                async move { creds.save_durable(&tenant, &credential) }
            })
            .await;
            if let Err(e) = result {
                error!(tenant = %tenant, error = %e, "Durable save still failing after retries");
            }
        });
    }

    fn archive_in_background(&self, credential: Credential) {
        let creds = self.shared.creds.clone();
        let tenant = self.tenant.clone();
        tokio::spawn(async move {
            let result = retry_fixed(3, Duration::from_secs(5), "archive-push", || {
                let creds = creds.clone();
                let tenant = tenant.clone();
                let credential = credential.clone();
                async move { creds.archive(&tenant, &credential).await }
            })
            .await;
            if let Err(e) = result {
                warn!(tenant = %tenant, error = %e, "Remote archive push failed");
            }
        });
    }

    /// Returns false when the lockout means this session must close.
    fn on_qr(&self, code: &str) -> bool {
        match self.shared.pairing.handle_qr(&self.tenant, code) {
            Ok(QrGate::Issued { .. }) => {
                self.set_status(SessionStatus::QrPending);
                true
            }
            Ok(QrGate::Locked { .. }) | Ok(QrGate::Refused { .. }) => {
                info!(tenant = %self.tenant, "QR lockout active, closing pairing session");
                false
            }
            Err(e) => {
                warn!(tenant = %self.tenant, error = %e, "QR gate error");
                true
            }
        }
    }

    async fn on_message(&self, wire: WireInbound) {
        let content_type = match wire.kind {
            WireKind::Text => ContentType::Text,
            WireKind::Document => ContentType::Document,
            WireKind::Image => ContentType::Image,
            WireKind::Protocol => {
                debug!(tenant = %self.tenant, id = %wire.id, "Skipping protocol frame");
                return;
            }
        };

        if !self.shared.dedup.should_process(&self.tenant, &wire.id) {
            metrics::record_deduplicated();
            debug!(tenant = %self.tenant, id = %wire.id, "Dropping retransmitted message");
            return;
        }

        let from = self.shared.resolver.resolve(&self.tenant, &wire.from).await;
        let participant = match wire.participant {
            Some(p) => Some(self.shared.resolver.resolve(&self.tenant, &p).await),
            None => None,
        };

        let message = InboundMessage {
            id: wire.id,
            tenant: self.tenant.clone(),
            from,
            to: Address::new(wire.to),
            content_type,
            body: wire.body,
            media_ref: wire.media_ref,
            timestamp_ms: wire.timestamp_ms,
            is_group: wire.is_group,
            participant,
        };

        metrics::record_inbound();
        if self.shared.inbound.send(message).await.is_err() {
            warn!(tenant = %self.tenant, "Inbound channel closed, message dropped");
        }
    }

    async fn on_closed(&self, reason: CloseReason) -> PumpOutcome {
        let label = match reason {
            CloseReason::LoggedOut => "logged_out",
            CloseReason::AuthRejected => "auth_rejected",
            CloseReason::TransportLost => "transport_lost",
            CloseReason::Requested => "requested",
        };
        metrics::record_disconnect(label);
        self.emit(SessionEvent::Disconnected { reason });

        if reason.is_auth_failure() {
            // The credential is dead; a fresh pairing is required.
            info!(tenant = %self.tenant, reason = label, "Auth-terminal close, wiping credentials");
            if let Err(e) = self.shared.creds.delete(&self.tenant).await {
                error!(tenant = %self.tenant, error = %e, "Credential wipe incomplete");
            }
            self.registered.store(false, Ordering::SeqCst);
            self.set_status(SessionStatus::Disconnected);
            return PumpOutcome::Stop;
        }

        if reason == CloseReason::Requested {
            self.set_status(SessionStatus::Disconnected);
            return PumpOutcome::Stop;
        }

        // Transport lost. Only a registered credential may auto-reconnect;
        // an unregistered one would just loop through failed pairings.
        if self.registered.load(Ordering::SeqCst) {
            return PumpOutcome::Reconnect;
        }
        info!(tenant = %self.tenant, "Unregistered session lost transport, not reconnecting");
        self.set_status(SessionStatus::Disconnected);
        PumpOutcome::Stop
    }
}
