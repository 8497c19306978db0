//! Canonical network addresses
//!
//! Addresses have the `user@server` shape the transport uses on the wire.
//! Opaque per-tenant identifiers (LIDs) look the same but live on a
//! dedicated server suffix and must be resolved before they can be
//! cross-referenced with business records.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Server suffix for group conversations
pub const GROUP_SERVER: &str = "g.us";

/// Server suffix for opaque (unresolved) contact identifiers
pub const LID_SERVER: &str = "lid";

/// A canonical address on the messaging network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(raw: impl Into<String>) -> Self {
        Address(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before '@', or the whole string when there is no server.
    pub fn user(&self) -> &str {
        match self.0.split_once('@') {
            Some((user, _)) => user,
            None => &self.0,
        }
    }

    /// The part after '@', if any.
    pub fn server(&self) -> Option<&str> {
        self.0.split_once('@').map(|(_, server)| server)
    }

    pub fn is_group(&self) -> bool {
        self.server() == Some(GROUP_SERVER)
    }

    /// True when this is an opaque identifier still needing resolution.
    pub fn is_opaque(&self) -> bool {
        self.server() == Some(LID_SERVER)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_and_server() {
        let addr = Address::new("2348012345678@c.us");
        assert_eq!(addr.user(), "2348012345678");
        assert_eq!(addr.server(), Some("c.us"));
        assert!(!addr.is_group());
        assert!(!addr.is_opaque());
    }

    #[test]
    fn test_group_detection() {
        assert!(Address::new("1234-5678@g.us").is_group());
        assert!(!Address::new("1234@c.us").is_group());
    }

    #[test]
    fn test_opaque_detection() {
        assert!(Address::new("98765431234@lid").is_opaque());
        assert!(!Address::new("2348012345678@c.us").is_opaque());
    }

    #[test]
    fn test_bare_address() {
        let addr = Address::new("no-server");
        assert_eq!(addr.user(), "no-server");
        assert_eq!(addr.server(), None);
    }
}
