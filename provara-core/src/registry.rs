//! The key registry materialized from `identity/keys.json`.
//!
//! Revoked keys stay in the registry forever so that historical signatures
//! remain checkable. Strict resolution refuses them; historical resolution
//! ignores status.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::error::{ProvaraError, Result};
use crate::signing::verifying_key_from_b64;

/// Lifecycle state of a registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Revoked,
}

/// One entry of `identity/keys.json`. Public material only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyEntry {
    pub key_id: String,
    pub algorithm: String,
    pub public_key_b64: String,
    pub roles: Vec<String>,
    pub scopes: Vec<String>,
    pub status: KeyStatus,
    pub created_at_utc: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeysFile {
    keys: Vec<KeyEntry>,
}

/// In-memory registry keyed by key id.
#[derive(Debug, Clone, Default)]
pub struct KeyRegistry {
    entries: BTreeMap<String, KeyEntry>,
}

impl KeyRegistry {
    pub fn from_entries(entries: Vec<KeyEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| (entry.key_id.clone(), entry))
            .collect();
        KeyRegistry { entries }
    }

    /// Load and materialize `keys.json`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let file: KeysFile = serde_json::from_str(&raw)?;
        Ok(Self::from_entries(file.keys))
    }

    /// Persist the registry back to `keys.json` layout.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = KeysFile {
            keys: self.entries.values().cloned().collect(),
        };
        fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    pub fn get(&self, key_id: &str) -> Option<&KeyEntry> {
        self.entries.get(key_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &KeyEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a key introduced by a KEY_PROMOTION event.
    pub fn insert(&mut self, entry: KeyEntry) {
        self.entries.insert(entry.key_id.clone(), entry);
    }

    /// Flip a key to revoked. The entry is never removed.
    pub fn revoke(&mut self, key_id: &str) -> Result<()> {
        let entry = self
            .entries
            .get_mut(key_id)
            .ok_or_else(|| ProvaraError::UnknownKeyId {
                context: key_id.to_string(),
            })?;
        entry.status = KeyStatus::Revoked;
        Ok(())
    }

    /// Strict resolution: the entry must exist, use a recognized algorithm,
    /// and not be revoked.
    pub fn resolve(&self, key_id: &str) -> Result<VerifyingKey> {
        let entry = self.lookup(key_id)?;
        if entry.status == KeyStatus::Revoked {
            return Err(ProvaraError::KeyNotFound {
                context: format!("{key_id} is revoked"),
            });
        }
        verifying_key_from_b64(&entry.public_key_b64)
    }

    /// Historical resolution: ignores revocation status so signatures made
    /// while the key was active can still verify.
    pub fn resolve_historical(&self, key_id: &str) -> Result<VerifyingKey> {
        let entry = self.lookup(key_id)?;
        verifying_key_from_b64(&entry.public_key_b64)
    }

    fn lookup(&self, key_id: &str) -> Result<&KeyEntry> {
        let entry = self
            .entries
            .get(key_id)
            .ok_or_else(|| ProvaraError::UnknownKeyId {
                context: key_id.to_string(),
            })?;
        if entry.algorithm != "Ed25519" {
            return Err(ProvaraError::KeyNotFound {
                context: format!("{key_id} uses unrecognized algorithm {}", entry.algorithm),
            });
        }
        Ok(entry)
    }
}

/// Build a fresh `keys.json` entry for a keypair.
pub fn new_key_entry(
    key_id: String,
    public_key_b64: String,
    roles: Vec<String>,
    scopes: Vec<String>,
    created_at_utc: String,
) -> KeyEntry {
    KeyEntry {
        key_id,
        algorithm: "Ed25519".to_string(),
        public_key_b64,
        roles,
        scopes,
        status: KeyStatus::Active,
        created_at_utc,
    }
}
