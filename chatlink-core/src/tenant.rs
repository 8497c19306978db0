//! Tenant identifier
//!
//! A tenant is an independent organization with its own isolated messaging
//! session. The id doubles as the storage key for every persistence tier,
//! so it must be safe to embed in file system paths.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier for a tenant (one organization, one session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Create a TenantId from any string-like value. No validation happens
    /// here; emptiness and path safety are checked at the API boundary.
    pub fn new(id: impl Into<String>) -> Self {
        TenantId(id.into())
    }

    /// Get the raw string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when the id can be used as a single path component. Ids with
    /// separators or parent references would escape the per-tenant
    /// directory, so every store rejects them.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && !self.0.contains('/')
            && !self.0.contains('\\')
            && self.0 != "."
            && self.0 != ".."
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        TenantId(s.to_string())
    }
}
