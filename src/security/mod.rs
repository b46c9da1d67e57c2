//! # Security Module
//!
//! Client secrets in the endpoint registry are stored encrypted at rest and
//! only decrypted in memory at the moment a token is acquired. This module
//! holds the key ring used for that decryption.
//!
//! ## Format
//!
//! An encrypted secret is the base64 encoding of `nonce (12 bytes) || AES-256-GCM ciphertext`.
//! Each secret names the key it was sealed with (`secret_key_id`), which lets
//! keys be rotated by adding a new id before retiring the old one.
//!
//! ## Key Ring Configuration
//!
//! `STOREPROXY_SECRET_KEYS=primary:<base64 32-byte key>,previous:<base64 32-byte key>`
//!
//! ## Sub-modules
//!
//! - `http`: Outbound HTTP client configuration

pub mod http;

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Errors raised while parsing keys or sealing/opening secrets
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("malformed key ring entry '{0}', expected id:base64key")]
    MalformedEntry(String),

    #[error("key '{id}' must be 32 bytes, got {len}")]
    InvalidKeyLength { id: String, len: usize },

    #[error("duplicate key id '{0}'")]
    DuplicateKey(String),

    #[error("no key with id '{0}' in the key ring")]
    UnknownKey(String),

    #[error("invalid base64: {0}")]
    InvalidEncoding(String),

    #[error("encrypted secret is too short")]
    Truncated,

    #[error("decryption failed for key '{0}'")]
    Decryption(String),

    #[error("encryption failed for key '{0}'")]
    Encryption(String),
}

/// A client secret as held in memory between decryptions
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedSecret {
    pub key_id: String,
    sealed: Vec<u8>,
}

impl EncryptedSecret {
    /// Parse the base64 text stored in the registry file
    pub fn from_base64(key_id: &str, text: &str) -> Result<Self, SecretError> {
        let sealed = STANDARD
            .decode(text.trim())
            .map_err(|e| SecretError::InvalidEncoding(e.to_string()))?;

        if sealed.len() <= NONCE_LEN {
            return Err(SecretError::Truncated);
        }

        Ok(Self {
            key_id: key_id.to_string(),
            sealed,
        })
    }

    /// Base64 text suitable for the registry file
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.sealed)
    }
}

impl fmt::Debug for EncryptedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedSecret")
            .field("key_id", &self.key_id)
            .field("sealed", &"<redacted>")
            .finish()
    }
}

/// Named AES-256-GCM keys used to open client secrets
#[derive(Default)]
pub struct SecretKeyRing {
    keys: HashMap<String, [u8; KEY_LEN]>,
}

impl fmt::Debug for SecretKeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&String> = self.keys.keys().collect();
        ids.sort();
        f.debug_struct("SecretKeyRing").field("key_ids", &ids).finish()
    }
}

impl SecretKeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `id:base64key` entries separated by commas
    pub fn parse(entries: &str) -> Result<Self, SecretError> {
        let mut ring = Self::new();

        for entry in entries.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (id, encoded) = entry
                .split_once(':')
                .ok_or_else(|| SecretError::MalformedEntry(entry.to_string()))?;
            let id = id.trim();
            if id.is_empty() {
                return Err(SecretError::MalformedEntry(entry.to_string()));
            }

            let bytes = STANDARD
                .decode(encoded.trim())
                .map_err(|e| SecretError::InvalidEncoding(e.to_string()))?;
            if bytes.len() != KEY_LEN {
                return Err(SecretError::InvalidKeyLength {
                    id: id.to_string(),
                    len: bytes.len(),
                });
            }

            let mut key = [0u8; KEY_LEN];
            key.copy_from_slice(&bytes);
            ring.insert(id, key)?;
        }

        Ok(ring)
    }

    /// Add a key under a new id
    pub fn insert(&mut self, id: &str, key: [u8; KEY_LEN]) -> Result<(), SecretError> {
        if self.keys.contains_key(id) {
            return Err(SecretError::DuplicateKey(id.to_string()));
        }
        self.keys.insert(id.to_string(), key);
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.keys.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Seal a plaintext secret with the named key
    pub fn encrypt(&self, key_id: &str, plaintext: &str) -> Result<EncryptedSecret, SecretError> {
        let cipher = self.cipher(key_id)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = GenericArray::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| SecretError::Encryption(key_id.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(EncryptedSecret {
            key_id: key_id.to_string(),
            sealed,
        })
    }

    /// Open a sealed secret; the plaintext lives only as long as the caller keeps it
    pub fn decrypt(&self, secret: &EncryptedSecret) -> Result<String, SecretError> {
        let cipher = self.cipher(&secret.key_id)?;

        if secret.sealed.len() <= NONCE_LEN {
            return Err(SecretError::Truncated);
        }
        let (nonce, ciphertext) = secret.sealed.split_at(NONCE_LEN);

        let plaintext = cipher
            .decrypt(GenericArray::from_slice(nonce), ciphertext)
            .map_err(|_| SecretError::Decryption(secret.key_id.clone()))?;

        debug!(key_id = %secret.key_id, "Client secret decrypted");
        String::from_utf8(plaintext).map_err(|_| SecretError::Decryption(secret.key_id.clone()))
    }

    fn cipher(&self, key_id: &str) -> Result<Aes256Gcm, SecretError> {
        let key = self
            .keys
            .get(key_id)
            .ok_or_else(|| SecretError::UnknownKey(key_id.to_string()))?;
        Ok(Aes256Gcm::new(GenericArray::from_slice(key)))
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                       Public Functions                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Generate a random AES-256 key, base64 encoded
pub fn generate_key() -> String {
    let mut key = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut key);
    STANDARD.encode(key)
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
