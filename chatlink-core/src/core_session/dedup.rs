//! Deduplication guard
//!
//! Per-tenant bounded set of message ids seen during this process
//! lifetime. The transport retransmits messages it is unsure about, so the
//! first question for every inbound frame is "have we already processed
//! this id". The cache is cleared wholesale when it outgrows the
//! threshold rather than evicted entry-by-entry; a replay after a clear is
//! possible and accepted, since downstream consumers are idempotent.

use crate::tenant::TenantId;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::debug;

pub struct DeduplicationGuard {
    threshold: usize,
    /// tenant -> ids seen; per-tenant sets so one noisy tenant cannot
    /// flush another tenant's history
    seen: Mutex<HashMap<TenantId, HashSet<String>>>,
}

impl DeduplicationGuard {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// True exactly once per id (until the tenant's set is cleared).
    pub fn should_process(&self, tenant: &TenantId, message_id: &str) -> bool {
        let mut seen = self.seen.lock().unwrap();
        let set = seen.entry(tenant.clone()).or_default();

        if set.len() >= self.threshold {
            debug!(tenant = %tenant, size = set.len(), "Clearing seen-message cache");
            set.clear();
        }

        set.insert(message_id.to_string())
    }

    /// Forget a tenant entirely (session teardown).
    pub fn forget(&self, tenant: &TenantId) {
        self.seen.lock().unwrap().remove(tenant);
    }
}
