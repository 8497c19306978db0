//! At-rest sealing of tier-1 credential files
//!
//! Sealed file format:
//! ```text
//! [Magic: 8 bytes "CLSC0001"]
//! [Version: 1 byte]
//! [Salt: 16 bytes]
//! [Nonce: 12 bytes]
//! [Ciphertext + AEAD tag: variable]
//! ```
//!
//! Without a passphrase, files carry a "CLSC_RAW" marker header instead so a
//! store can tell a plaintext file from a sealed one.

use super::CredStoreError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Argon2, Params};
use rand::RngCore;

/// Magic header for sealed credential files
const MAGIC_SEALED: &[u8; 8] = b"CLSC0001";

/// Marker header for unsealed credential files
const MAGIC_RAW: &[u8; 8] = b"CLSC_RAW";

const FORMAT_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const HEADER_SIZE: usize = 8 + 1 + SALT_LEN + NONCE_LEN;

/// Seal plaintext with AES-256-GCM under an Argon2id-derived key, or wrap it
/// with the raw marker when no passphrase is configured.
pub fn seal(data: &[u8], passphrase: Option<&str>) -> Result<Vec<u8>, CredStoreError> {
    match passphrase {
        Some(passphrase) => {
            let mut salt = [0u8; SALT_LEN];
            rand::thread_rng().fill_bytes(&mut salt);
            let key = derive_key(passphrase, &salt)?;

            let mut nonce_bytes = [0u8; NONCE_LEN];
            rand::thread_rng().fill_bytes(&mut nonce_bytes);
            let nonce = Nonce::from_slice(&nonce_bytes);

            let cipher = Aes256Gcm::new_from_slice(&key)
                .map_err(|e| CredStoreError::Sealing(format!("Invalid key: {}", e)))?;
            let ciphertext = cipher
                .encrypt(nonce, data)
                .map_err(|e| CredStoreError::Sealing(format!("Encryption failed: {}", e)))?;

            let mut out = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
            out.extend_from_slice(MAGIC_SEALED);
            out.push(FORMAT_VERSION);
            out.extend_from_slice(&salt);
            out.extend_from_slice(&nonce_bytes);
            out.extend_from_slice(&ciphertext);
            Ok(out)
        }
        None => {
            let mut out = Vec::with_capacity(9 + data.len());
            out.extend_from_slice(MAGIC_RAW);
            out.push(FORMAT_VERSION);
            out.extend_from_slice(data);
            Ok(out)
        }
    }
}

/// Reverse of [`seal`]. A sealed file without a passphrase, or a raw file
/// when one is configured, is an error rather than a silent downgrade.
pub fn open(data: &[u8], passphrase: Option<&str>) -> Result<Vec<u8>, CredStoreError> {
    if data.len() < 9 {
        return Err(CredStoreError::Unsealing("File too short".to_string()));
    }

    if &data[0..8] == MAGIC_RAW {
        if passphrase.is_some() {
            return Err(CredStoreError::Unsealing(
                "Sealed credential expected, found plaintext".to_string(),
            ));
        }
        return Ok(data[9..].to_vec());
    }

    if &data[0..8] != MAGIC_SEALED {
        return Err(CredStoreError::Unsealing("Invalid magic header".to_string()));
    }

    let version = data[8];
    if version != FORMAT_VERSION {
        return Err(CredStoreError::Unsealing(format!(
            "Unsupported version: {}",
            version
        )));
    }

    // 16 trailing bytes is the minimum AEAD tag
    if data.len() < HEADER_SIZE + 16 {
        return Err(CredStoreError::Unsealing("Truncated file".to_string()));
    }

    let passphrase = passphrase.ok_or_else(|| {
        CredStoreError::Unsealing("Passphrase required to open sealed credential".to_string())
    })?;

    let salt = &data[9..9 + SALT_LEN];
    let nonce_bytes = &data[9 + SALT_LEN..9 + SALT_LEN + NONCE_LEN];
    let nonce = Nonce::from_slice(nonce_bytes);
    let ciphertext = &data[HEADER_SIZE..];

    let key = derive_key(passphrase, salt)?;
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| CredStoreError::Unsealing(format!("Invalid key: {}", e)))?;

    // AEAD tag mismatch means wrong passphrase or corruption
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CredStoreError::InvalidPassphrase)
}

/// Derive a 256-bit key from the passphrase using Argon2id
fn derive_key(passphrase: &str, salt: &[u8]) -> Result<Vec<u8>, CredStoreError> {
    let params = Params::new(19 * 1024, 2, 1, Some(32))
        .map_err(|e| CredStoreError::Sealing(format!("Invalid Argon2 params: {}", e)))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut key = vec![0u8; 32];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| CredStoreError::Sealing(format!("Key derivation failed: {}", e)))?;

    Ok(key)
}
