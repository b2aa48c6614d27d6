//! Field-level encryption for records that leave the device.
//!
//! Which fields are sealed is an explicit policy, not a per-call choice. The
//! plaintext list records fields deliberately left readable so the exposure
//! is visible in configuration.

use std::collections::BTreeSet;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const SEALED_PREFIX: &str = "enc:v1:";

/// AES-256-GCM cipher for individual field values.
#[derive(Clone)]
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("FieldCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl FieldCipher {
    /// Build a cipher from a base64-encoded 32-byte key.
    pub fn from_base64_key(key: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(key.trim())
            .map_err(|error| Error::Crypto(format!("encryption key is not base64: {error}")))?;
        if bytes.len() != KEY_SIZE {
            return Err(Error::Crypto(format!(
                "encryption key must be {KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(&bytes)
            .map_err(|_| Error::Crypto("invalid encryption key length".to_string()))?;
        Ok(Self { cipher })
    }

    /// Generate a fresh random key, base64-encoded.
    pub fn generate_key() -> String {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        STANDARD.encode(bytes)
    }

    /// Whether a string carries the sealed-value prefix.
    pub fn is_sealed(value: &str) -> bool {
        value.starts_with(SEALED_PREFIX)
    }

    /// Encrypt to `enc:v1:` + base64(nonce || ciphertext).
    pub fn encrypt_str(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| Error::Crypto("encryption failed".to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);
        Ok(format!("{SEALED_PREFIX}{}", STANDARD.encode(payload)))
    }

    pub fn decrypt_str(&self, sealed: &str) -> Result<String> {
        let encoded = sealed
            .strip_prefix(SEALED_PREFIX)
            .ok_or_else(|| Error::Crypto("value is not sealed".to_string()))?;
        let payload = STANDARD
            .decode(encoded)
            .map_err(|error| Error::Crypto(format!("sealed value is not base64: {error}")))?;
        if payload.len() <= NONCE_SIZE {
            return Err(Error::Crypto("sealed value is truncated".to_string()));
        }

        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| Error::Crypto("decryption failed".to_string()))?;
        String::from_utf8(plaintext)
            .map_err(|error| Error::Crypto(format!("decrypted value is not UTF-8: {error}")))
    }
}

/// Which fields of a record kind are sealed and which stay readable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldEncryptionPolicy {
    pub encrypted_fields: BTreeSet<String>,
    pub plaintext_fields: BTreeSet<String>,
}

impl FieldEncryptionPolicy {
    pub fn new<E, P>(encrypted: E, plaintext: P) -> Self
    where
        E: IntoIterator,
        E::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            encrypted_fields: encrypted.into_iter().map(Into::into).collect(),
            plaintext_fields: plaintext.into_iter().map(Into::into).collect(),
        }
    }

    /// Audit records: context is sealed, the who/what/why stays searchable.
    pub fn audit_default() -> Self {
        Self::new(
            ["details", "ip_address", "user_agent"],
            ["user_name", "failure_reason", "action", "resource", "outcome"],
        )
    }

    /// A field may not be listed as both sealed and plaintext.
    pub fn validate(&self) -> Result<()> {
        if let Some(field) = self
            .encrypted_fields
            .intersection(&self.plaintext_fields)
            .next()
        {
            return Err(Error::Config(format!(
                "field '{field}' is listed as both encrypted and plaintext"
            )));
        }
        Ok(())
    }

    /// Encrypt policy fields in place; returns the number of fields sealed.
    ///
    /// Values are stored as their JSON text so `open` restores the original
    /// type. Null values and already sealed strings are left alone.
    pub fn seal(&self, cipher: &FieldCipher, record: &mut Map<String, Value>) -> Result<usize> {
        let mut sealed = 0;
        for field in &self.encrypted_fields {
            let Some(value) = record.get_mut(field) else {
                continue;
            };
            match value {
                Value::Null => continue,
                Value::String(text) if FieldCipher::is_sealed(text) => continue,
                _ => {}
            }
            let plaintext = serde_json::to_string(value)?;
            *value = Value::String(cipher.encrypt_str(&plaintext)?);
            sealed += 1;
        }
        Ok(sealed)
    }

    /// Decrypt policy fields in place; returns the number of fields opened.
    pub fn open(&self, cipher: &FieldCipher, record: &mut Map<String, Value>) -> Result<usize> {
        let mut opened = 0;
        for field in &self.encrypted_fields {
            let Some(Value::String(text)) = record.get(field) else {
                continue;
            };
            if !FieldCipher::is_sealed(text) {
                continue;
            }
            let plaintext = cipher.decrypt_str(text)?;
            record.insert(field.clone(), serde_json::from_str(&plaintext)?);
            opened += 1;
        }
        Ok(opened)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cipher() -> FieldCipher {
        FieldCipher::from_base64_key(&FieldCipher::generate_key()).unwrap()
    }

    #[test]
    fn rejects_short_keys() {
        let key = STANDARD.encode([7u8; 16]);
        assert!(FieldCipher::from_base64_key(&key).is_err());
        assert!(FieldCipher::from_base64_key("not base64!").is_err());
    }

    #[test]
    fn encrypt_decrypt_string() {
        let cipher = cipher();
        let sealed = cipher.encrypt_str("10.0.0.4").unwrap();
        assert!(FieldCipher::is_sealed(&sealed));
        assert_ne!(sealed, cipher.encrypt_str("10.0.0.4").unwrap());
        assert_eq!(cipher.decrypt_str(&sealed).unwrap(), "10.0.0.4");
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealed = cipher().encrypt_str("secret").unwrap();
        assert!(cipher().decrypt_str(&sealed).is_err());
    }

    #[test]
    fn seal_touches_only_policy_fields() {
        let cipher = cipher();
        let policy = FieldEncryptionPolicy::audit_default();
        let mut record = json!({
            "user_name": "Dana Reyes",
            "failure_reason": "bad password",
            "details": {"attempt": 3},
            "ip_address": "10.0.0.4",
            "user_agent": null
        })
        .as_object()
        .cloned()
        .unwrap();

        let sealed = policy.seal(&cipher, &mut record).unwrap();
        assert_eq!(sealed, 2);
        assert_eq!(record["user_name"], json!("Dana Reyes"));
        assert_eq!(record["failure_reason"], json!("bad password"));
        assert!(record["details"].as_str().is_some_and(FieldCipher::is_sealed));
        assert_eq!(record["user_agent"], Value::Null);

        // sealing twice is a no-op
        assert_eq!(policy.seal(&cipher, &mut record).unwrap(), 0);

        let opened = policy.open(&cipher, &mut record).unwrap();
        assert_eq!(opened, 2);
        assert_eq!(record["details"], json!({"attempt": 3}));
        assert_eq!(record["ip_address"], json!("10.0.0.4"));
    }

    #[test]
    fn overlapping_policy_is_rejected() {
        let policy = FieldEncryptionPolicy::new(["details"], ["details"]);
        assert!(policy.validate().is_err());
        assert!(FieldEncryptionPolicy::audit_default().validate().is_ok());
    }
}
