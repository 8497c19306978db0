//! Tier-2 durable credential store (SQLite)
//!
//! One row per tenant with the credential as a gzip-compressed JSON blob,
//! plus the tenant_config table holding QR rate-limit state that has to
//! survive process restarts.

use super::credential::Credential;
use super::{migrations, CredStoreError};
use crate::tenant::TenantId;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Persisted QR rate-limit state for one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QrState {
    /// QR codes issued since the last successful connection or reset
    pub attempt_count: u32,
    /// Unix millis until which QR issuance is refused, if locked
    pub locked_until_ms: Option<i64>,
}

/// Row snapshot used by admin tooling.
#[derive(Debug, Clone)]
pub struct TenantRow {
    pub tenant: TenantId,
    pub last_active_at_ms: i64,
    pub is_active: bool,
    pub registered: bool,
}

pub struct DurableTier {
    pool: Pool<SqliteConnectionManager>,
}

impl DurableTier {
    /// Open (or create) the database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self, CredStoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::new(manager).map_err(|e| CredStoreError::Database(e.to_string()))?;
        migrations::migrate(&pool).map_err(|e| CredStoreError::Database(e.to_string()))?;
        Ok(Self { pool })
    }

    /// In-memory store for tests.
    pub fn memory() -> Result<Self, CredStoreError> {
        let manager = SqliteConnectionManager::memory();
        // Each pooled connection would get its own in-memory database, so
        // the pool is capped at a single connection.
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| CredStoreError::Database(e.to_string()))?;
        migrations::migrate(&pool).map_err(|e| CredStoreError::Database(e.to_string()))?;
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>, CredStoreError> {
        self.pool
            .get()
            .map_err(|e| CredStoreError::Database(e.to_string()))
    }

    pub fn load(&self, tenant: &TenantId) -> Result<Option<Credential>, CredStoreError> {
        let conn = self.conn()?;
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT credential_blob FROM tenants WHERE tenant_id = ?",
                params![tenant.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| CredStoreError::Database(e.to_string()))?;

        match blob {
            Some(blob) => Ok(Some(Credential::from_blob(&blob)?)),
            None => Ok(None),
        }
    }

    pub fn save(&self, tenant: &TenantId, credential: &Credential) -> Result<(), CredStoreError> {
        let blob = credential.to_blob()?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tenants (tenant_id, credential_blob, last_active_at, is_active)
             VALUES (?, ?, ?, 1)
             ON CONFLICT(tenant_id) DO UPDATE SET
                 credential_blob = excluded.credential_blob,
                 last_active_at = excluded.last_active_at,
                 is_active = 1",
            params![tenant.as_str(), blob, now_ms()],
        )
        .map_err(|e| CredStoreError::Database(e.to_string()))?;
        Ok(())
    }

    pub fn delete(&self, tenant: &TenantId) -> Result<(), CredStoreError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM tenants WHERE tenant_id = ?",
            params![tenant.as_str()],
        )
        .map_err(|e| CredStoreError::Database(e.to_string()))?;
        conn.execute(
            "DELETE FROM tenant_config WHERE tenant_id = ?",
            params![tenant.as_str()],
        )
        .map_err(|e| CredStoreError::Database(e.to_string()))?;
        Ok(())
    }

    /// Mark the tenant row inactive without dropping the credential.
    pub fn set_active(&self, tenant: &TenantId, active: bool) -> Result<(), CredStoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE tenants SET is_active = ?, last_active_at = ? WHERE tenant_id = ?",
            params![active as i64, now_ms(), tenant.as_str()],
        )
        .map_err(|e| CredStoreError::Database(e.to_string()))?;
        Ok(())
    }

    /// List all tenant rows (admin tooling).
    pub fn list(&self) -> Result<Vec<TenantRow>, CredStoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT tenant_id, credential_blob, last_active_at, is_active
                 FROM tenants ORDER BY tenant_id",
            )
            .map_err(|e| CredStoreError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                let tenant: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                let last_active_at_ms: i64 = row.get(2)?;
                let is_active: i64 = row.get(3)?;
                Ok((tenant, blob, last_active_at_ms, is_active))
            })
            .map_err(|e| CredStoreError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CredStoreError::Database(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for (tenant, blob, last_active_at_ms, is_active) in rows {
            let registered = Credential::from_blob(&blob)
                .map(|c| c.registered)
                .unwrap_or(false);
            out.push(TenantRow {
                tenant: TenantId::new(tenant),
                last_active_at_ms,
                is_active: is_active != 0,
                registered,
            });
        }
        Ok(out)
    }

    // ===== QR rate-limit state =====

    pub fn qr_state(&self, tenant: &TenantId) -> Result<QrState, CredStoreError> {
        let conn = self.conn()?;
        let state = conn
            .query_row(
                "SELECT qr_attempt_count, qr_locked_until FROM tenant_config WHERE tenant_id = ?",
                params![tenant.as_str()],
                |row| {
                    Ok(QrState {
                        attempt_count: row.get::<_, i64>(0)?.max(0) as u32,
                        locked_until_ms: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(|e| CredStoreError::Database(e.to_string()))?;

        Ok(state.unwrap_or(QrState {
            attempt_count: 0,
            locked_until_ms: None,
        }))
    }

    /// Atomically increment the QR attempt counter and return the new count.
    /// Runs inside a transaction so concurrent issuances never undercount.
    pub fn record_qr_attempt(&self, tenant: &TenantId) -> Result<u32, CredStoreError> {
        let conn = self.conn()?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| CredStoreError::Database(e.to_string()))?;

        tx.execute(
            "INSERT INTO tenant_config (tenant_id, qr_attempt_count) VALUES (?, 0)
             ON CONFLICT(tenant_id) DO NOTHING",
            params![tenant.as_str()],
        )
        .map_err(|e| CredStoreError::Database(e.to_string()))?;

        tx.execute(
            "UPDATE tenant_config SET qr_attempt_count = qr_attempt_count + 1 WHERE tenant_id = ?",
            params![tenant.as_str()],
        )
        .map_err(|e| CredStoreError::Database(e.to_string()))?;

        let count: i64 = tx
            .query_row(
                "SELECT qr_attempt_count FROM tenant_config WHERE tenant_id = ?",
                params![tenant.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| CredStoreError::Database(e.to_string()))?;

        tx.commit()
            .map_err(|e| CredStoreError::Database(e.to_string()))?;

        Ok(count.max(0) as u32)
    }

    pub fn set_qr_lock(&self, tenant: &TenantId, until_ms: i64) -> Result<(), CredStoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tenant_config (tenant_id, qr_attempt_count, qr_locked_until)
             VALUES (?, 0, ?)
             ON CONFLICT(tenant_id) DO UPDATE SET qr_locked_until = excluded.qr_locked_until",
            params![tenant.as_str(), until_ms],
        )
        .map_err(|e| CredStoreError::Database(e.to_string()))?;
        Ok(())
    }

    /// Reset the counter and clear any lockout. Called on a successful
    /// connection and by the admin reset command.
    pub fn reset_qr(&self, tenant: &TenantId) -> Result<(), CredStoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tenant_config (tenant_id, qr_attempt_count, qr_locked_until)
             VALUES (?, 0, NULL)
             ON CONFLICT(tenant_id) DO UPDATE SET qr_attempt_count = 0, qr_locked_until = NULL",
            params![tenant.as_str()],
        )
        .map_err(|e| CredStoreError::Database(e.to_string()))?;
        Ok(())
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_creds::credential::{KeyPair, SessionKey};

    fn sample() -> Credential {
        let mut cred = Credential::empty();
        cred.identity_key = KeyPair::new(vec![1; 32], vec![2; 32]);
        cred.session_keys
            .insert("k1".to_string(), SessionKey(vec![9; 16]));
        cred.registered = true;
        cred
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tier = DurableTier::memory().unwrap();
        let tenant = TenantId::new("school-1");

        assert!(tier.load(&tenant).unwrap().is_none());
        let cred = sample();
        tier.save(&tenant, &cred).unwrap();
        assert_eq!(tier.load(&tenant).unwrap().unwrap(), cred);
    }

    #[test]
    fn test_delete_clears_row_and_config() {
        let tier = DurableTier::memory().unwrap();
        let tenant = TenantId::new("school-1");

        tier.save(&tenant, &sample()).unwrap();
        tier.record_qr_attempt(&tenant).unwrap();
        tier.delete(&tenant).unwrap();

        assert!(tier.load(&tenant).unwrap().is_none());
        assert_eq!(tier.qr_state(&tenant).unwrap().attempt_count, 0);
    }

    #[test]
    fn test_qr_counter_increments() {
        let tier = DurableTier::memory().unwrap();
        let tenant = TenantId::new("school-1");

        assert_eq!(tier.record_qr_attempt(&tenant).unwrap(), 1);
        assert_eq!(tier.record_qr_attempt(&tenant).unwrap(), 2);
        assert_eq!(tier.record_qr_attempt(&tenant).unwrap(), 3);
        assert_eq!(tier.qr_state(&tenant).unwrap().attempt_count, 3);
    }

    #[test]
    fn test_qr_lock_and_reset() {
        let tier = DurableTier::memory().unwrap();
        let tenant = TenantId::new("school-1");

        tier.record_qr_attempt(&tenant).unwrap();
        tier.set_qr_lock(&tenant, 123_456).unwrap();
        let state = tier.qr_state(&tenant).unwrap();
        assert_eq!(state.locked_until_ms, Some(123_456));

        tier.reset_qr(&tenant).unwrap();
        let state = tier.qr_state(&tenant).unwrap();
        assert_eq!(state.attempt_count, 0);
        assert_eq!(state.locked_until_ms, None);
    }

    #[test]
    fn test_list_reports_registration() {
        let tier = DurableTier::memory().unwrap();
        tier.save(&TenantId::new("a"), &sample()).unwrap();
        tier.save(&TenantId::new("b"), &Credential::empty()).unwrap();

        let rows = tier.list().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().find(|r| r.tenant.as_str() == "a").unwrap().registered);
        assert!(!rows.iter().find(|r| r.tenant.as_str() == "b").unwrap().registered);
    }

    #[test]
    fn test_set_active() {
        let tier = DurableTier::memory().unwrap();
        let tenant = TenantId::new("school-1");
        tier.save(&tenant, &sample()).unwrap();
        tier.set_active(&tenant, false).unwrap();
        let rows = tier.list().unwrap();
        assert!(!rows[0].is_active);
    }
}
