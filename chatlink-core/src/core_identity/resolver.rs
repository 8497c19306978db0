//! Identity resolution
//!
//! Maps opaque per-tenant contact identifiers to stable canonical
//! addresses. Two sources feed the cache: contact-sync events pushed by the
//! network (via [`IdentityResolver::learn`]) and a per-tenant reverse-lookup
//! file on disk covering identifiers seen before the last restart.
//! Resolution is total: an unknown identifier resolves to itself, so
//! callers never branch on "unresolved".

use super::address::Address;
use super::IdentityError;
use crate::tenant::TenantId;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub struct IdentityResolver {
    root: PathBuf,
    /// tenant -> (opaque id -> canonical address)
    maps: RwLock<HashMap<TenantId, HashMap<String, String>>>,
}

impl IdentityResolver {
    pub fn new(root: PathBuf) -> Result<Self, IdentityError> {
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            maps: RwLock::new(HashMap::new()),
        })
    }

    fn mapping_path(&self, tenant: &TenantId) -> Result<PathBuf, IdentityError> {
        if !tenant.is_path_safe() {
            return Err(IdentityError::InvalidTenant(tenant.to_string()));
        }
        Ok(self.root.join(format!("{}.json", tenant)))
    }

    /// Resolve an opaque identifier to its canonical address.
    ///
    /// Memory first, then the on-disk reverse-lookup file (populating the
    /// memory map on a hit), then fall back to echoing the input.
    pub async fn resolve(&self, tenant: &TenantId, opaque_id: &str) -> Address {
        {
            let maps = self.maps.read().await;
            if let Some(address) = maps.get(tenant).and_then(|m| m.get(opaque_id)) {
                return Address::new(address.clone());
            }
        }

        // Miss: lazily load the tenant's reverse-lookup file. A tenant with
        // no file simply gets an empty map.
        let loaded = self.load_disk_map(tenant);
        {
            let mut maps = self.maps.write().await;
            let entry = maps.entry(tenant.clone()).or_default();
            for (k, v) in loaded {
                entry.entry(k).or_insert(v);
            }
            if let Some(address) = entry.get(opaque_id) {
                return Address::new(address.clone());
            }
        }

        Address::new(opaque_id)
    }

    /// Record a mapping from a contact-sync event. Last write wins; the
    /// on-disk file is rewritten so the mapping survives restarts.
    pub async fn learn(
        &self,
        tenant: &TenantId,
        opaque_id: &str,
        address: &Address,
    ) -> Result<(), IdentityError> {
        let snapshot = {
            let mut maps = self.maps.write().await;
            let entry = maps.entry(tenant.clone()).or_default();
            entry.insert(opaque_id.to_string(), address.as_str().to_string());
            entry.clone()
        };

        self.flush(tenant, &snapshot)?;
        debug!(tenant = %tenant, opaque_id, address = %address, "Learned identity mapping");
        Ok(())
    }

    fn load_disk_map(&self, tenant: &TenantId) -> HashMap<String, String> {
        let path = match self.mapping_path(tenant) {
            Ok(path) => path,
            Err(_) => return HashMap::new(),
        };
        if !path.exists() {
            return HashMap::new();
        }
        match fs::read(&path).map_err(IdentityError::from).and_then(|raw| {
            serde_json::from_slice::<HashMap<String, String>>(&raw)
                .map_err(|e| IdentityError::Corrupt(e.to_string()))
        }) {
            Ok(map) => map,
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "Ignoring unreadable identity mapping file");
                HashMap::new()
            }
        }
    }

    fn flush(&self, tenant: &TenantId, map: &HashMap<String, String>) -> Result<(), IdentityError> {
        let path = self.mapping_path(tenant)?;
        let json = serde_json::to_vec_pretty(map)
            .map_err(|e| IdentityError::Corrupt(e.to_string()))?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(tmp, path)?;
        Ok(())
    }
}
