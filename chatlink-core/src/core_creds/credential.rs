//! Credential model
//!
//! Per-tenant authentication material for the messaging transport: an opaque
//! identity key pair, a transport key pair, and the rolling session keys the
//! transport hands back as it rotates them. All binary fields serialize as
//! base64 inside JSON so a credential always round-trips byte-exact.

use super::CredStoreError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use zeroize::Zeroize;

/// An opaque public/secret key pair supplied by the transport library.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct KeyPair {
    #[serde(with = "b64")]
    pub public: Vec<u8>,
    #[serde(with = "b64")]
    pub secret: Vec<u8>,
}

impl KeyPair {
    pub fn new(public: Vec<u8>, secret: Vec<u8>) -> Self {
        Self { public, secret }
    }

    pub fn is_empty(&self) -> bool {
        self.public.is_empty() && self.secret.is_empty()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(&self.public))
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// A single rotating session key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKey(#[serde(with = "b64")] pub Vec<u8>);

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey(<{} bytes>)", self.0.len())
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Everything a tenant needs to reopen its transport without re-pairing.
///
/// The store is the sole writer; the supervisor only reads it to open the
/// transport and forwards rotation events back into the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Long-term identity key pair
    pub identity_key: KeyPair,

    /// Transport-level key pair
    pub noise_key: KeyPair,

    /// Rotating session keys, keyed by the transport's key name
    pub session_keys: BTreeMap<String, SessionKey>,

    /// True once pairing has completed at least once
    pub registered: bool,
}

impl Credential {
    /// A fresh, unpaired credential. The transport populates the key
    /// material during pairing.
    pub fn empty() -> Self {
        Self {
            identity_key: KeyPair::default(),
            noise_key: KeyPair::default(),
            session_keys: BTreeMap::new(),
            registered: false,
        }
    }

    /// Serialize to JSON bytes (tier-1 on-disk format, pre-sealing)
    pub fn to_json(&self) -> Result<Vec<u8>, CredStoreError> {
        serde_json::to_vec(self).map_err(|e| CredStoreError::Serialization(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, CredStoreError> {
        serde_json::from_slice(bytes).map_err(|e| CredStoreError::Serialization(e.to_string()))
    }

    /// Serialize to a gzip-compressed JSON blob (tier-2/tier-3 format)
    pub fn to_blob(&self) -> Result<Vec<u8>, CredStoreError> {
        let json = self.to_json()?;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        Ok(encoder.finish()?)
    }

    pub fn from_blob(blob: &[u8]) -> Result<Self, CredStoreError> {
        let mut decoder = GzDecoder::new(blob);
        let mut json = Vec::new();
        decoder.read_to_end(&mut json)?;
        Self::from_json(&json)
    }
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
