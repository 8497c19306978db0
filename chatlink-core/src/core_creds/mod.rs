//! Tiered credential store
//!
//! Three tiers, in decreasing access speed and increasing recovery scope:
//! tier 1 is a per-tenant directory on local disk, tier 2 a SQLite database,
//! tier 3 an optional remote archive. Reads repair downwards (a tier-2 hit
//! is written back into tier 1); tier 3 is only consulted when both local
//! tiers are empty. The store is the sole writer of credential state; the
//! connection supervisor reads credentials and forwards transport-driven
//! updates back here.

use crate::config::StoreConfig;
use crate::tenant::TenantId;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod archive_tier;
pub mod credential;
pub mod durable_tier;
pub mod local_tier;
pub mod migrations;
pub mod sealed;

pub use archive_tier::{ArchiveTier, HttpArchive, MemoryArchive};
pub use credential::{Credential, KeyPair, SessionKey};
pub use durable_tier::{QrState, TenantRow};

/// Errors from any credential tier
#[derive(Debug, Error)]
pub enum CredStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Sealing error: {0}")]
    Sealing(String),

    #[error("Unsealing error: {0}")]
    Unsealing(String),

    #[error("Invalid passphrase")]
    InvalidPassphrase,

    #[error("Tenant id not usable as storage key: {0}")]
    InvalidTenant(String),
}

/// Facade over the three tiers. Shared, thread-safe singleton; every
/// tenant's supervisor writes only its own rows and directories, so there
/// is no cross-tenant contention by construction.
pub struct CredentialStore {
    local: local_tier::LocalTier,
    durable: durable_tier::DurableTier,
    archive: Option<Arc<dyn ArchiveTier>>,
}

impl CredentialStore {
    pub fn new(
        config: &StoreConfig,
        archive: Option<Arc<dyn ArchiveTier>>,
    ) -> Result<Self, CredStoreError> {
        let local = local_tier::LocalTier::new(
            config.data_dir.join("creds"),
            config.seal_passphrase.clone(),
        )?;
        let durable = durable_tier::DurableTier::open(&config.db_path)?;
        Ok(Self {
            local,
            durable,
            archive,
        })
    }

    /// Tiered read with write-through repair.
    pub async fn load(&self, tenant: &TenantId) -> Result<Option<Credential>, CredStoreError> {
        if let Some(credential) = self.local.load(tenant)? {
            return Ok(Some(credential));
        }

        if let Some(credential) = self.durable.load(tenant)? {
            debug!(tenant = %tenant, "Credential restored from durable store, repairing local cache");
            self.local.save(tenant, &credential)?;
            return Ok(Some(credential));
        }

        // Fresh machine: both local tiers empty, try the archive
        if let Some(archive) = &self.archive {
            if let Some(blob) = archive.fetch(tenant).await? {
                let credential = Credential::from_blob(&blob)?;
                info!(tenant = %tenant, "Credential restored from remote archive");
                self.local.save(tenant, &credential)?;
                self.durable.save(tenant, &credential)?;
                return Ok(Some(credential));
            }
        }

        Ok(None)
    }

    /// Synchronous tier-1 write. Called on every credential mutation the
    /// transport emits; transport correctness depends on this landing
    /// before the next event is processed.
    pub fn save_local(&self, tenant: &TenantId, credential: &Credential) -> Result<(), CredStoreError> {
        self.local.save(tenant, credential)
    }

    /// Tier-2 write, awaited only when a connection transitions to
    /// connected so half-finished pairings never reach the durable store.
    pub fn save_durable(&self, tenant: &TenantId, credential: &Credential) -> Result<(), CredStoreError> {
        self.durable.save(tenant, credential)
    }

    /// Push the credential to the remote archive, if one is configured.
    pub async fn archive(&self, tenant: &TenantId, credential: &Credential) -> Result<(), CredStoreError> {
        if let Some(archive) = &self.archive {
            let blob = credential.to_blob()?;
            archive.store(tenant, &blob).await?;
        }
        Ok(())
    }

    /// Remove the tenant's credential from every tier. Best-effort: each
    /// tier is attempted and failures are logged; the last error (if any)
    /// is returned so callers can decide how loud to be.
    pub async fn delete(&self, tenant: &TenantId) -> Result<(), CredStoreError> {
        let mut last_err = None;

        if let Err(e) = self.local.delete(tenant) {
            warn!(tenant = %tenant, error = %e, "Failed to delete local credential");
            last_err = Some(e);
        }
        if let Err(e) = self.durable.delete(tenant) {
            warn!(tenant = %tenant, error = %e, "Failed to delete durable credential");
            last_err = Some(e);
        }
        if let Some(archive) = &self.archive {
            if let Err(e) = archive.remove(tenant).await {
                warn!(tenant = %tenant, error = %e, "Failed to delete archived credential");
                last_err = Some(e);
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drop only the tier-1 cache. Used before a fresh pairing so a
    /// half-initialized credential directory is never inherited.
    pub fn clear_local(&self, tenant: &TenantId) -> Result<(), CredStoreError> {
        self.local.delete(tenant)
    }

    pub fn set_active(&self, tenant: &TenantId, active: bool) -> Result<(), CredStoreError> {
        self.durable.set_active(tenant, active)
    }

    pub fn list_tenants(&self) -> Result<Vec<TenantRow>, CredStoreError> {
        self.durable.list()
    }

    // ===== QR rate-limit state (persisted next to the credentials) =====

    pub fn qr_state(&self, tenant: &TenantId) -> Result<QrState, CredStoreError> {
        self.durable.qr_state(tenant)
    }

    pub fn record_qr_attempt(&self, tenant: &TenantId) -> Result<u32, CredStoreError> {
        self.durable.record_qr_attempt(tenant)
    }

    pub fn set_qr_lock(&self, tenant: &TenantId, until_ms: i64) -> Result<(), CredStoreError> {
        self.durable.set_qr_lock(tenant, until_ms)
    }

    pub fn reset_qr(&self, tenant: &TenantId) -> Result<(), CredStoreError> {
        self.durable.reset_qr(tenant)
    }
}
