//! Vault layout migration.
//!
//! Only layout `1.0` is defined; a bump to `1.1` is recorded by a
//! `com.provara.migration` event and a `spec_version` update in
//! `identity/genesis.json`. A dry run reports without touching anything.

use std::fs;

use serde_json::{json, Value};
use tracing::info;

use provara_core::{EventType, KeyPair, Namespace, ProvaraError, Result, MIGRATION_TYPE};

use crate::layout::VaultLayout;
use crate::log::append_signed_event;
use crate::state::finalize_mutation;

const KNOWN_VERSIONS: &[&str] = &["1.0", "1.1"];

/// Outcome of a migration run.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub source_version: String,
    pub target_version: String,
    pub events_migrated: u64,
    pub migration_event_id: Option<String>,
    pub dry_run: bool,
}

/// Migrate the vault layout to `target_version`.
pub fn migrate_vault(
    layout: &VaultLayout,
    target_version: &str,
    dry_run: bool,
    signer: &KeyPair,
    actor: &str,
) -> Result<MigrationReport> {
    if !KNOWN_VERSIONS.contains(&target_version) {
        return Err(ProvaraError::VaultStructureInvalid {
            context: format!("unsupported target version {target_version}"),
        });
    }

    let genesis_path = layout.genesis_file();
    let mut genesis: Value = serde_json::from_str(&fs::read_to_string(&genesis_path)?)?;
    let source_version = genesis
        .get("spec_version")
        .and_then(Value::as_str)
        .unwrap_or("1.0")
        .to_string();

    if source_version == target_version {
        return Ok(MigrationReport {
            source_version,
            target_version: target_version.to_string(),
            events_migrated: 0,
            migration_event_id: None,
            dry_run,
        });
    }

    if dry_run {
        return Ok(MigrationReport {
            source_version,
            target_version: target_version.to_string(),
            events_migrated: 0,
            migration_event_id: None,
            dry_run: true,
        });
    }

    let event = append_signed_event(
        layout,
        EventType::Extension(MIGRATION_TYPE.to_string()),
        Namespace::Canonical,
        actor,
        json!({
            "from_version": source_version,
            "to_version": target_version,
        }),
        signer,
    )?;

    genesis["spec_version"] = json!(target_version);
    fs::write(&genesis_path, serde_json::to_string_pretty(&genesis)?)?;
    finalize_mutation(layout, Some(signer))?;

    info!(from = %source_version, to = %target_version, "vault migrated");
    Ok(MigrationReport {
        source_version,
        target_version: target_version.to_string(),
        events_migrated: 1,
        migration_event_id: event["event_id"].as_str().map(str::to_string),
        dry_run: false,
    })
}
