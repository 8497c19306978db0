//! Tier-1 local credential cache
//!
//! One directory per tenant:
//! ```text
//! <root>/<tenant>/identity.json     identity + transport keys + registered flag
//! <root>/<tenant>/keys/<hex>.key    one file per rotating session key
//! ```
//! Files are sealed at rest when a passphrase is configured (see `sealed`).
//! Writes are atomic (temp file + rename) so a crash mid-save never leaves a
//! half-written credential behind.

use super::credential::{Credential, KeyPair, SessionKey};
use super::{sealed, CredStoreError};
use crate::tenant::TenantId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

/// On-disk shape of the identity file. Session keys live in separate files
/// so a single key rotation does not rewrite the whole credential.
#[derive(Serialize, Deserialize)]
struct IdentityRecord {
    identity_key: KeyPair,
    noise_key: KeyPair,
    registered: bool,
}

pub struct LocalTier {
    root: PathBuf,
    passphrase: Option<String>,
}

impl LocalTier {
    pub fn new(root: PathBuf, passphrase: Option<String>) -> Result<Self, CredStoreError> {
        fs::create_dir_all(&root)?;
        Ok(Self { root, passphrase })
    }

    fn tenant_dir(&self, tenant: &TenantId) -> Result<PathBuf, CredStoreError> {
        if !tenant.is_path_safe() {
            return Err(CredStoreError::InvalidTenant(tenant.to_string()));
        }
        Ok(self.root.join(tenant.as_str()))
    }

    pub fn load(&self, tenant: &TenantId) -> Result<Option<Credential>, CredStoreError> {
        let dir = self.tenant_dir(tenant)?;
        let identity_path = dir.join("identity.json");
        if !identity_path.exists() {
            return Ok(None);
        }

        let raw = fs::read(&identity_path)?;
        let opened = sealed::open(&raw, self.passphrase.as_deref())?;
        let record: IdentityRecord = serde_json::from_slice(&opened)
            .map_err(|e| CredStoreError::Serialization(e.to_string()))?;

        let mut session_keys = BTreeMap::new();
        let keys_dir = dir.join("keys");
        if keys_dir.exists() {
            for entry in fs::read_dir(&keys_dir)? {
                let entry = entry?;
                let filename = entry.file_name();
                let filename = filename.to_string_lossy();
                let Some(stem) = filename.strip_suffix(".key") else {
                    continue;
                };
                // File names are the hex of the transport's key name so any
                // name round-trips regardless of characters.
                let name = match hex::decode(stem).map(String::from_utf8) {
                    Ok(Ok(name)) => name,
                    _ => {
                        warn!(tenant = %tenant, file = %filename, "Skipping unreadable session key file");
                        continue;
                    }
                };
                let raw = fs::read(entry.path())?;
                let key = sealed::open(&raw, self.passphrase.as_deref())?;
                session_keys.insert(name, SessionKey(key));
            }
        }

        Ok(Some(Credential {
            identity_key: record.identity_key,
            noise_key: record.noise_key,
            session_keys,
            registered: record.registered,
        }))
    }

    pub fn save(&self, tenant: &TenantId, credential: &Credential) -> Result<(), CredStoreError> {
        let dir = self.tenant_dir(tenant)?;
        let keys_dir = dir.join("keys");
        fs::create_dir_all(&keys_dir)?;

        let record = IdentityRecord {
            identity_key: credential.identity_key.clone(),
            noise_key: credential.noise_key.clone(),
            registered: credential.registered,
        };
        let json = serde_json::to_vec(&record)
            .map_err(|e| CredStoreError::Serialization(e.to_string()))?;
        let payload = sealed::seal(&json, self.passphrase.as_deref())?;
        write_atomic(&dir.join("identity.json"), &payload)?;

        let mut expected: Vec<String> = Vec::new();
        for (name, key) in &credential.session_keys {
            let filename = format!("{}.key", hex::encode(name.as_bytes()));
            let payload = sealed::seal(&key.0, self.passphrase.as_deref())?;
            write_atomic(&keys_dir.join(&filename), &payload)?;
            expected.push(filename);
        }

        // Drop key files the transport no longer knows about
        for entry in fs::read_dir(&keys_dir)? {
            let entry = entry?;
            let filename = entry.file_name().to_string_lossy().into_owned();
            if filename.ends_with(".key") && !expected.contains(&filename) {
                fs::remove_file(entry.path())?;
            }
        }

        Ok(())
    }

    pub fn delete(&self, tenant: &TenantId) -> Result<(), CredStoreError> {
        let dir = self.tenant_dir(tenant)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write file atomically (write to temp, then rename)
fn write_atomic(path: &PathBuf, data: &[u8]) -> Result<(), CredStoreError> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, data)?;
    fs::rename(temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Credential {
        let mut cred = Credential::empty();
        cred.identity_key = KeyPair::new(vec![1; 32], vec![2; 32]);
        cred.noise_key = KeyPair::new(vec![3; 32], vec![4; 32]);
        cred.session_keys
            .insert("app-state".to_string(), SessionKey(vec![5; 48]));
        cred.session_keys
            .insert("sender/weird name".to_string(), SessionKey(vec![6; 16]));
        cred.registered = true;
        cred
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let tier = LocalTier::new(dir.path().to_path_buf(), None).unwrap();
        let tenant = TenantId::new("school-1");

        let cred = sample();
        tier.save(&tenant, &cred).unwrap();
        let loaded = tier.load(&tenant).unwrap().unwrap();
        assert_eq!(loaded, cred);
    }

    #[test]
    fn test_sealed_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let tier =
            LocalTier::new(dir.path().to_path_buf(), Some("passphrase".to_string())).unwrap();
        let tenant = TenantId::new("school-1");

        let cred = sample();
        tier.save(&tenant, &cred).unwrap();
        let loaded = tier.load(&tenant).unwrap().unwrap();
        assert_eq!(loaded, cred);
    }

    #[test]
    fn test_missing_tenant_is_none() {
        let dir = TempDir::new().unwrap();
        let tier = LocalTier::new(dir.path().to_path_buf(), None).unwrap();
        assert!(tier.load(&TenantId::new("nobody")).unwrap().is_none());
    }

    #[test]
    fn test_delete_removes_directory() {
        let dir = TempDir::new().unwrap();
        let tier = LocalTier::new(dir.path().to_path_buf(), None).unwrap();
        let tenant = TenantId::new("school-1");

        tier.save(&tenant, &sample()).unwrap();
        tier.delete(&tenant).unwrap();
        assert!(tier.load(&tenant).unwrap().is_none());
        // Deleting again is fine
        tier.delete(&tenant).unwrap();
    }

    #[test]
    fn test_stale_session_keys_are_pruned() {
        let dir = TempDir::new().unwrap();
        let tier = LocalTier::new(dir.path().to_path_buf(), None).unwrap();
        let tenant = TenantId::new("school-1");

        let mut cred = sample();
        tier.save(&tenant, &cred).unwrap();

        cred.session_keys.remove("app-state");
        tier.save(&tenant, &cred).unwrap();

        let loaded = tier.load(&tenant).unwrap().unwrap();
        assert_eq!(loaded, cred);
        assert!(!loaded.session_keys.contains_key("app-state"));
    }

    #[test]
    fn test_unsafe_tenant_id_rejected() {
        let dir = TempDir::new().unwrap();
        let tier = LocalTier::new(dir.path().to_path_buf(), None).unwrap();
        let err = tier.load(&TenantId::new("../escape")).unwrap_err();
        assert!(matches!(err, CredStoreError::InvalidTenant(_)));
    }
}
