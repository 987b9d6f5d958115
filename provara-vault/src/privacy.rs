//! Crypto-shredding: erasure by destroying a per-payload key.
//!
//! Sensitive payloads are encrypted under a fresh AES-256-GCM key whose only
//! copy lives in a mutable SQLite sidecar outside the signed log. Deleting
//! the sidecar row makes the plaintext unrecoverable while the ciphertext,
//! chain, and signatures stay intact. The sidecar is the one mutable store
//! in the system and is never part of the manifest.

use std::path::PathBuf;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use tracing::info;

use provara_core::{ProvaraError, Result};

use crate::layout::VaultLayout;

/// Wrapper scheme tag carried in encrypted payloads.
pub const PRIVACY_SCHEME: &str = "aes-gcm-v1";

/// Mutable sidecar of per-payload keys: put, get, delete. Nothing else.
pub struct PrivacyKeyStore {
    db_path: PathBuf,
}

impl PrivacyKeyStore {
    /// Open (creating if needed) the sidecar at `identity/privacy_keys.db`.
    pub fn open(layout: &VaultLayout) -> Result<Self> {
        let store = PrivacyKeyStore {
            db_path: layout.privacy_db(),
        };
        let conn = store.connect()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS keys (
                key_id TEXT PRIMARY KEY,
                key_bytes BLOB NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )
        .map_err(sqlite_err)?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.db_path).map_err(sqlite_err)
    }

    pub fn put(&self, kid: &str, key_bytes: &[u8]) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO keys (key_id, key_bytes) VALUES (?1, ?2)",
            rusqlite::params![kid, key_bytes],
        )
        .map_err(sqlite_err)?;
        Ok(())
    }

    pub fn get(&self, kid: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT key_bytes FROM keys WHERE key_id = ?1",
            rusqlite::params![kid],
            |row| row.get(0),
        )
        .optional()
        .map_err(sqlite_err)
    }

    /// The erasure operation. True when a key was actually destroyed.
    pub fn delete(&self, kid: &str) -> Result<bool> {
        let conn = self.connect()?;
        let rows = conn
            .execute("DELETE FROM keys WHERE key_id = ?1", rusqlite::params![kid])
            .map_err(sqlite_err)?;
        Ok(rows > 0)
    }
}

fn sqlite_err(err: rusqlite::Error) -> ProvaraError {
    ProvaraError::Crypto {
        context: format!("privacy sidecar: {err}"),
    }
}

/// Encrypts and decrypts privacy-sensitive payloads against the sidecar.
pub struct PrivacyWrapper {
    store: PrivacyKeyStore,
}

impl PrivacyWrapper {
    pub fn open(layout: &VaultLayout) -> Result<Self> {
        Ok(PrivacyWrapper {
            store: PrivacyKeyStore::open(layout)?,
        })
    }

    pub fn store(&self) -> &PrivacyKeyStore {
        &self.store
    }

    /// Encrypt a payload under a fresh key; the key goes into the sidecar,
    /// the wrapper goes into the signed event.
    pub fn encrypt(&self, payload: &Value) -> Result<Value> {
        let mut key_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key_bytes);
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let kid = hex::encode({
            let mut kid_bytes = [0u8; 16];
            rand::thread_rng().fill_bytes(&mut kid_bytes);
            kid_bytes
        });

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        let plaintext = jcs_rs::canonicalize(payload)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_ref())
            .map_err(|_| ProvaraError::Crypto {
                context: "AES-GCM encryption failed".into(),
            })?;

        self.store.put(&kid, &key_bytes)?;

        Ok(json!({
            "_privacy": PRIVACY_SCHEME,
            "kid": kid,
            "nonce_b64": BASE64.encode(nonce_bytes),
            "ciphertext_b64": BASE64.encode(ciphertext),
        }))
    }

    /// Decrypt a wrapper. `None` means the key has been shredded.
    pub fn decrypt(&self, wrapper: &Value) -> Result<Option<Value>> {
        if wrapper.get("_privacy").and_then(Value::as_str) != Some(PRIVACY_SCHEME) {
            return Err(ProvaraError::Encoding {
                context: "unsupported privacy scheme".into(),
            });
        }
        let kid = wrapper
            .get("kid")
            .and_then(Value::as_str)
            .ok_or_else(|| ProvaraError::RequiredFieldMissing {
                context: "privacy wrapper kid".into(),
            })?;

        let Some(key_bytes) = self.store.get(kid)? else {
            return Ok(None); // erased
        };

        let nonce_bytes = decode_b64(wrapper, "nonce_b64")?;
        let ciphertext = decode_b64(wrapper, "ciphertext_b64")?;
        if nonce_bytes.len() != 12 {
            return Err(ProvaraError::Encoding {
                context: format!("nonce must be 12 bytes, got {}", nonce_bytes.len()),
            });
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| ProvaraError::Crypto {
                context: "AES-GCM decryption failed".into(),
            })?;
        Ok(Some(serde_json::from_slice(&plaintext)?))
    }

    /// Erase: delete the key, keep the ciphertext.
    pub fn shred(&self, kid: &str) -> Result<bool> {
        let shredded = self.store.delete(kid)?;
        if shredded {
            info!(kid = %kid, "privacy key shredded");
        }
        Ok(shredded)
    }
}

fn decode_b64(wrapper: &Value, field: &str) -> Result<Vec<u8>> {
    let raw = wrapper
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ProvaraError::RequiredFieldMissing {
            context: format!("privacy wrapper {field}"),
        })?;
    BASE64.decode(raw).map_err(|e| ProvaraError::Encoding {
        context: format!("{field}: {e}"),
    })
}
