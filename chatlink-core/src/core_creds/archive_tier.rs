//! Tier-3 remote credential archive
//!
//! Disaster-recovery tier: written asynchronously after a session reaches
//! connected, read only when both local tiers are empty (fresh machine).
//! The wire format is the same gzip blob as tier 2, keyed by tenant id.

use super::CredStoreError;
use crate::config::ArchiveConfig;
use crate::tenant::TenantId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

#[async_trait]
pub trait ArchiveTier: Send + Sync {
    async fn fetch(&self, tenant: &TenantId) -> Result<Option<Vec<u8>>, CredStoreError>;
    async fn store(&self, tenant: &TenantId, blob: &[u8]) -> Result<(), CredStoreError>;
    async fn remove(&self, tenant: &TenantId) -> Result<(), CredStoreError>;
}

/// HTTP-backed archive: `{endpoint}/credentials/{tenant}` with optional
/// bearer auth. Any non-404 error surfaces as `CredStoreError::Archive`.
pub struct HttpArchive {
    client: reqwest::Client,
    endpoint: String,
    api_token: Option<String>,
}

impl HttpArchive {
    pub fn new(endpoint: String, api_token: Option<String>, timeout: Duration) -> Result<Self, CredStoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CredStoreError::Archive(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_token,
        })
    }

    /// Build from config; returns None when the archive tier is disabled.
    pub fn from_config(config: &ArchiveConfig) -> Result<Option<Self>, CredStoreError> {
        if !config.enabled {
            return Ok(None);
        }
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| CredStoreError::Archive("archive endpoint not configured".to_string()))?;
        Ok(Some(Self::new(
            endpoint,
            config.api_token.clone(),
            config.request_timeout,
        )?))
    }

    fn url(&self, tenant: &TenantId) -> String {
        format!("{}/credentials/{}", self.endpoint, tenant)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl ArchiveTier for HttpArchive {
    async fn fetch(&self, tenant: &TenantId) -> Result<Option<Vec<u8>>, CredStoreError> {
        let resp = self
            .authorize(self.client.get(self.url(tenant)))
            .send()
            .await
            .map_err(|e| CredStoreError::Archive(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| CredStoreError::Archive(e.to_string()))?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| CredStoreError::Archive(e.to_string()))?;
        Ok(Some(bytes.to_vec()))
    }

    async fn store(&self, tenant: &TenantId, blob: &[u8]) -> Result<(), CredStoreError> {
        self.authorize(self.client.put(self.url(tenant)))
            .body(blob.to_vec())
            .send()
            .await
            .map_err(|e| CredStoreError::Archive(e.to_string()))?
            .error_for_status()
            .map_err(|e| CredStoreError::Archive(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, tenant: &TenantId) -> Result<(), CredStoreError> {
        let resp = self
            .authorize(self.client.delete(self.url(tenant)))
            .send()
            .await
            .map_err(|e| CredStoreError::Archive(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        resp.error_for_status()
            .map_err(|e| CredStoreError::Archive(e.to_string()))?;
        Ok(())
    }
}

/// In-memory archive used by tests.
#[derive(Default)]
pub struct MemoryArchive {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl ArchiveTier for MemoryArchive {
    async fn fetch(&self, tenant: &TenantId) -> Result<Option<Vec<u8>>, CredStoreError> {
        Ok(self.entries.lock().await.get(tenant.as_str()).cloned())
    }

    async fn store(&self, tenant: &TenantId, blob: &[u8]) -> Result<(), CredStoreError> {
        self.entries
            .lock()
            .await
            .insert(tenant.as_str().to_string(), blob.to_vec());
        Ok(())
    }

    async fn remove(&self, tenant: &TenantId) -> Result<(), CredStoreError> {
        self.entries.lock().await.remove(tenant.as_str());
        Ok(())
    }
}
