//! Typed policy documents written at bootstrap and read at runtime.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use provara_core::Result;

/// One signing authority listed in the sync contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authority {
    pub key_id: String,
    pub role: String,
}

/// `policies/sync_contract.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncContract {
    pub authorities: Vec<Authority>,
    pub merge_strategy: String,
}

impl Default for SyncContract {
    fn default() -> Self {
        SyncContract {
            authorities: Vec::new(),
            merge_strategy: "causal-append".to_string(),
        }
    }
}

/// One action class of the safety policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionClass {
    pub approval: String,
    pub description: String,
}

/// `policies/safety_policy.json`: escalating approval classes L0..L3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyPolicy {
    pub action_classes: BTreeMap<String, ActionClass>,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        let mut action_classes = BTreeMap::new();
        action_classes.insert(
            "L0".to_string(),
            ActionClass {
                approval: "automatic".to_string(),
                description: "Read-only queries over local state".to_string(),
            },
        );
        action_classes.insert(
            "L1".to_string(),
            ActionClass {
                approval: "automatic".to_string(),
                description: "Appending locally-scoped observations".to_string(),
            },
        );
        action_classes.insert(
            "L2".to_string(),
            ActionClass {
                approval: "operator".to_string(),
                description: "Canonical assertions and attestations".to_string(),
            },
        );
        action_classes.insert(
            "L3".to_string(),
            ActionClass {
                approval: "quorum".to_string(),
                description: "Key rotation, redaction, and sealing".to_string(),
            },
        );
        SafetyPolicy { action_classes }
    }
}

/// `policies/retention_policy.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub default_retention: String,
    pub redacted_payload_retention: String,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy {
            default_retention: "indefinite".to_string(),
            redacted_payload_retention: "hash-only".to_string(),
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// Write all three policy files from templates.
pub fn write_policy_templates(policies_dir: &Path, contract: &SyncContract) -> Result<()> {
    write_json(&policies_dir.join("sync_contract.json"), contract)?;
    write_json(&policies_dir.join("safety_policy.json"), &SafetyPolicy::default())?;
    write_json(
        &policies_dir.join("retention_policy.json"),
        &RetentionPolicy::default(),
    )?;
    Ok(())
}

/// Load the sync contract for merge decisions.
pub fn load_sync_contract(policies_dir: &Path) -> Result<SyncContract> {
    let raw = fs::read_to_string(policies_dir.join("sync_contract.json"))?;
    Ok(serde_json::from_str(&raw)?)
}
