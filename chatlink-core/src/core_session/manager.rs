//! Session manager façade
//!
//! The one entry point external code talks to. Owns the map of live
//! tenant supervisors behind a single lock so the one-transport-per-tenant
//! invariant is enforced in exactly one place, and owns the shared service
//! singletons every supervisor borrows.

use crate::config::Config;
use crate::core_creds::{ArchiveTier, CredentialStore, HttpArchive, TenantRow};
use crate::core_identity::IdentityResolver;
use crate::core_pairing::{validate_phone, PairingAttempt, PairingController, PairingError};
use crate::core_session::dedup::DeduplicationGuard;
use crate::core_session::errors::{SessionError, SessionResult};
use crate::core_session::supervisor::{ConnectionSupervisor, SessionShared};
use crate::core_session::types::{
    GroupNotice, InboundMessage, OutboundEnvelope, SessionEvent, TenantConnectionState,
};
use crate::core_session::metrics;
use crate::tenant::TenantId;
use crate::transport::TransportFactory;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long to wait for a freshly spawned pairing session to open its
/// transport before giving up on a pairing-code request.
const PAIRING_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `disconnect` waits for a supervisor task to wind down before
/// aborting it.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

struct SessionEntry {
    supervisor: Arc<ConnectionSupervisor>,
    task: JoinHandle<()>,
}

pub struct SessionManager {
    shared: Arc<SessionShared>,
    sessions: RwLock<HashMap<TenantId, SessionEntry>>,
    /// Handed out once to the embedding dispatcher
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    group_rx: Mutex<Option<mpsc::Receiver<GroupNotice>>>,
}

impl SessionManager {
    /// Build the manager and its service singletons from configuration.
    /// The remote archive tier is attached when the config enables it.
    pub fn new(config: Config, factory: Arc<dyn TransportFactory>) -> SessionResult<Self> {
        let archive = HttpArchive::from_config(&config.archive)?
            .map(|a| Arc::new(a) as Arc<dyn ArchiveTier>);
        Self::with_archive(config, factory, archive)
    }

    /// Like [`SessionManager::new`] but with an explicit archive tier.
    /// Tests inject a `MemoryArchive` through here.
    pub fn with_archive(
        config: Config,
        factory: Arc<dyn TransportFactory>,
        archive: Option<Arc<dyn ArchiveTier>>,
    ) -> SessionResult<Self> {
        metrics::init_metrics();

        let creds = Arc::new(CredentialStore::new(&config.store, archive)?);
        let resolver = Arc::new(IdentityResolver::new(
            config.store.data_dir.join("identity"),
        )?);
        let dedup = Arc::new(DeduplicationGuard::new(config.session.dedup_threshold));
        let (events, _) = broadcast::channel(config.session.event_buffer);
        let pairing = Arc::new(PairingController::new(
            creds.clone(),
            config.pairing.clone(),
            events.clone(),
        ));
        let (inbound_tx, inbound_rx) = mpsc::channel(config.session.inbound_buffer);
        let (group_tx, group_rx) = mpsc::channel(config.session.inbound_buffer);

        Ok(Self {
            shared: Arc::new(SessionShared {
                creds,
                resolver,
                pairing,
                dedup,
                factory,
                config: config.session,
                events,
                inbound: inbound_tx,
                groups: group_tx,
            }),
            sessions: RwLock::new(HashMap::new()),
            inbound_rx: Mutex::new(Some(inbound_rx)),
            group_rx: Mutex::new(Some(group_rx)),
        })
    }

    fn require_tenant(tenant: &TenantId) -> SessionResult<()> {
        if tenant.is_empty() {
            return Err(SessionError::MissingTenant);
        }
        Ok(())
    }

    /// Start (or keep) a session for the tenant. Idempotent: a second call
    /// while a session is live is a no-op, checked and inserted under one
    /// write lock so concurrent callers cannot race two transports.
    ///
    /// The optional phone number selects the pairing-code flow for an
    /// unregistered tenant; without it an unregistered tenant goes through
    /// the QR flow, and a registered one restores directly.
    pub async fn connect(&self, tenant: &TenantId, phone: Option<&str>) -> SessionResult<()> {
        Self::require_tenant(tenant)?;
        if let Some(phone) = phone {
            validate_phone(phone).map_err(SessionError::Pairing)?;
        }

        let mut sessions = self.sessions.write().await;
        let running = sessions
            .get(tenant)
            .map(|entry| !entry.task.is_finished())
            .unwrap_or(false);
        if running {
            debug!(tenant = %tenant, "Session already running, connect is a no-op");
            return Ok(());
        }
        sessions.remove(tenant);

        let entry = self.spawn_session(tenant, phone.map(str::to_string));
        sessions.insert(tenant.clone(), entry);
        info!(tenant = %tenant, pairing = phone.is_some(), "Session started");
        Ok(())
    }

    fn spawn_session(&self, tenant: &TenantId, phone: Option<String>) -> SessionEntry {
        let supervisor = Arc::new(ConnectionSupervisor::new(
            tenant.clone(),
            self.shared.clone(),
            phone,
        ));
        let task = tokio::spawn(supervisor.clone().run());
        SessionEntry { supervisor, task }
    }

    /// Stop the tenant's session without touching its registration.
    pub async fn disconnect(&self, tenant: &TenantId) -> SessionResult<()> {
        Self::require_tenant(tenant)?;
        let entry = self.sessions.write().await.remove(tenant);
        let Some(entry) = entry else {
            return Err(SessionError::UnknownTenant(tenant.clone()));
        };
        Self::wind_down(tenant, entry).await;
        Ok(())
    }

    async fn wind_down(tenant: &TenantId, entry: SessionEntry) {
        entry.supervisor.signal_shutdown();
        let abort = entry.task.abort_handle();
        if tokio::time::timeout(TEARDOWN_TIMEOUT, entry.task).await.is_err() {
            warn!(tenant = %tenant, "Supervisor did not stop in time, aborting task");
            abort.abort();
        }
        debug!(tenant = %tenant, "Session stopped");
    }

    /// Log the tenant's device out server-side. The resulting close event
    /// wipes every credential tier; the next connect needs a fresh pairing.
    pub async fn logout(&self, tenant: &TenantId) -> SessionResult<()> {
        Self::require_tenant(tenant)?;
        let supervisor = {
            let sessions = self.sessions.read().await;
            sessions
                .get(tenant)
                .map(|entry| entry.supervisor.clone())
                .ok_or_else(|| SessionError::UnknownTenant(tenant.clone()))?
        };
        supervisor.logout().await?;
        if let Err(e) = self.shared.creds.set_active(tenant, false) {
            warn!(tenant = %tenant, error = %e, "Failed to mark tenant inactive");
        }
        Ok(())
    }

    /// Send one envelope. Fails before any I/O when the tenant id is
    /// empty, and fails loudly when the tenant has no connected transport;
    /// nothing is ever queued on behalf of a disconnected tenant.
    pub async fn publish(&self, envelope: OutboundEnvelope) -> SessionResult<()> {
        if envelope.tenant.is_empty() {
            metrics::record_publish_failure();
            return Err(SessionError::MissingTenant);
        }
        let supervisor = {
            let sessions = self.sessions.read().await;
            sessions
                .get(&envelope.tenant)
                .map(|entry| entry.supervisor.clone())
        };
        let Some(supervisor) = supervisor else {
            metrics::record_publish_failure();
            return Err(SessionError::NotConnected(envelope.tenant));
        };
        supervisor
            .publish(envelope.to, envelope.content, envelope.reply_to)
            .await
    }

    /// Request a pairing code for the tenant, reusing an unexpired one.
    /// Returns `None` when the tenant is already registered: asking for a
    /// code on an authenticated device is meaningless and skipped outright.
    pub async fn request_pairing_code(
        &self,
        tenant: &TenantId,
        phone: &str,
    ) -> SessionResult<Option<PairingAttempt>> {
        self.pairing_code(tenant, phone, false).await
    }

    /// Like [`request_pairing_code`] but always discards the cached code
    /// first; the previous code is no longer accepted.
    ///
    /// [`request_pairing_code`]: SessionManager::request_pairing_code
    pub async fn request_new_pairing_code(
        &self,
        tenant: &TenantId,
        phone: &str,
    ) -> SessionResult<Option<PairingAttempt>> {
        self.pairing_code(tenant, phone, true).await
    }

    async fn pairing_code(
        &self,
        tenant: &TenantId,
        phone: &str,
        force: bool,
    ) -> SessionResult<Option<PairingAttempt>> {
        Self::require_tenant(tenant)?;
        validate_phone(phone).map_err(SessionError::Pairing)?;

        if let Some(credential) = self.shared.creds.load(tenant).await? {
            if credential.registered {
                info!(tenant = %tenant, "Pairing code request skipped, device already registered");
                return Ok(None);
            }
        }

        // Any non-pairing session for this tenant is torn down first; the
        // code must be requested through a transport opened for pairing.
        self.ensure_pairing_session(tenant, phone).await?;

        let supervisor = {
            let sessions = self.sessions.read().await;
            sessions
                .get(tenant)
                .map(|entry| entry.supervisor.clone())
                .ok_or_else(|| SessionError::UnknownTenant(tenant.clone()))?
        };
        let transport = supervisor
            .wait_for_transport(PAIRING_STARTUP_TIMEOUT)
            .await
            .ok_or_else(|| {
                SessionError::StartupTimeout(
                    tenant.clone(),
                    "pairing transport did not open".to_string(),
                )
            })?;

        let result = if force {
            self.shared
                .pairing
                .request_new_code(tenant, phone, &transport)
                .await
        } else {
            self.shared.pairing.request_code(tenant, phone, &transport).await
        };

        match result {
            Ok(attempt) => Ok(Some(attempt)),
            Err(e) => {
                // A disconnect racing the request closes the transport out
                // from under us; report that as an abort, not a server error.
                if self.sessions.read().await.get(tenant).is_none() {
                    return Err(SessionError::Pairing(PairingError::Aborted));
                }
                Err(e.into())
            }
        }
    }

    /// Make sure the tenant's live session (if any) is one opened for the
    /// pairing-code flow; anything else is wound down and replaced.
    async fn ensure_pairing_session(&self, tenant: &TenantId, phone: &str) -> SessionResult<()> {
        let stale = {
            let mut sessions = self.sessions.write().await;
            let reusable = sessions
                .get(tenant)
                .map(|entry| !entry.task.is_finished() && entry.supervisor.is_pairing_for(phone))
                .unwrap_or(false);
            if reusable {
                return Ok(());
            }
            sessions.remove(tenant)
        };

        if let Some(entry) = stale {
            debug!(tenant = %tenant, "Replacing existing session with a pairing session");
            Self::wind_down(tenant, entry).await;
            // Give the wire library a moment to release its socket
            tokio::time::sleep(self.shared.pairing.config().teardown_wait).await;
        }

        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(tenant) {
            let entry = self.spawn_session(tenant, Some(phone.to_string()));
            sessions.insert(tenant.clone(), entry);
        }
        Ok(())
    }

    /// The tenant's cached pairing attempt, expired or not.
    pub fn current_pairing_code(&self, tenant: &TenantId) -> Option<PairingAttempt> {
        self.shared.pairing.current_code(tenant)
    }

    /// Snapshot of one tenant's connection state.
    pub async fn status(&self, tenant: &TenantId) -> Option<TenantConnectionState> {
        let sessions = self.sessions.read().await;
        sessions.get(tenant).map(|entry| entry.supervisor.status())
    }

    /// Snapshot of every live session's state.
    pub async fn statuses(&self) -> Vec<TenantConnectionState> {
        let sessions = self.sessions.read().await;
        sessions
            .values()
            .map(|entry| entry.supervisor.status())
            .collect()
    }

    /// Subscribe to per-tenant status events.
    pub fn subscribe(&self) -> broadcast::Receiver<(TenantId, SessionEvent)> {
        self.shared.events.subscribe()
    }

    /// Take the inbound message receiver. Yields `Some` exactly once.
    pub fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx.lock().unwrap().take()
    }

    /// Take the group notice receiver. Yields `Some` exactly once.
    pub fn take_group_events(&self) -> Option<mpsc::Receiver<GroupNotice>> {
        self.group_rx.lock().unwrap().take()
    }

    /// Known tenants from the durable store, for admin tooling.
    pub fn list_tenants(&self) -> SessionResult<Vec<TenantRow>> {
        Ok(self.shared.creds.list_tenants()?)
    }

    /// Clear a tenant's QR counter and lockout.
    pub fn reset_qr(&self, tenant: &TenantId) -> SessionResult<()> {
        Self::require_tenant(tenant)?;
        self.shared
            .pairing
            .reset_qr(tenant)
            .map_err(SessionError::Pairing)
    }

    /// Wipe a tenant's credentials from every tier. The tenant must pair
    /// from scratch afterwards.
    pub async fn wipe(&self, tenant: &TenantId) -> SessionResult<()> {
        Self::require_tenant(tenant)?;
        if let Some(entry) = self.sessions.write().await.remove(tenant) {
            Self::wind_down(tenant, entry).await;
        }
        self.shared.creds.delete(tenant).await?;
        Ok(())
    }

    /// Wind down every session. Called once at process shutdown.
    pub async fn shutdown(&self) {
        let entries: Vec<(TenantId, SessionEntry)> =
            self.sessions.write().await.drain().collect();
        for (tenant, entry) in entries {
            Self::wind_down(&tenant, entry).await;
        }
        info!("Session manager shut down");
    }
}
