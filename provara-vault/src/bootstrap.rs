//! Sovereign bootstrap: an empty directory becomes a compliant vault.
//!
//! All-or-nothing: any failure after the target check removes the partially
//! created tree. Private key material is returned to the caller and never
//! written inside the vault.

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use serde_json::json;
use tracing::info;

use provara_core::{
    new_key_entry, EventDraft, EventType, KeyPair, KeyRegistry, Namespace, ProvaraError, Result,
    SovereignReducer, SPEC_VERSION,
};

use crate::layout::VaultLayout;
use crate::log::EventLog;
use crate::manifest::refresh_artifacts;
use crate::now_utc_iso;
use crate::policy::{write_policy_templates, Authority, SyncContract};
use crate::state::write_current_state;
use crate::verify::run_self_test;

/// Everything bootstrap hands back to the operator. The private keys exist
/// only here, out of band.
#[derive(Debug)]
pub struct BootstrapResult {
    pub vault_path: PathBuf,
    pub uid: String,
    pub root_key_id: String,
    pub root_private_key_b64: String,
    pub quorum_key_id: Option<String>,
    pub quorum_private_key_b64: Option<String>,
    pub genesis_event_id: String,
    pub seed_event_id: String,
    pub merkle_root: String,
}

/// Bootstrap options.
#[derive(Debug, Clone, Default)]
pub struct BootstrapOptions {
    /// Identity string; random when not supplied.
    pub uid: Option<String>,
    /// Actor name for the genesis chain; defaults to `sovereign_genesis`.
    pub actor: Option<String>,
    /// Also generate a quorum keypair for recovery operations.
    pub include_quorum: bool,
    /// Carried into the GENESIS payload when this vault succeeds a sealed one.
    pub predecessor_vault: Option<serde_json::Value>,
}

/// Options for a successor vault: the GENESIS payload carries the sealed
/// predecessor's Merkle root and final event count.
pub fn successor_options(
    predecessor: &VaultLayout,
    mut base: BootstrapOptions,
) -> Result<BootstrapOptions> {
    let merkle_root = crate::manifest::load_merkle_root(predecessor)?;
    let final_event_count = EventLog::open(predecessor).read_all()?.len() as u64;
    base.predecessor_vault = Some(json!({
        "merkle_root": merkle_root,
        "final_event_count": final_event_count,
    }));
    Ok(base)
}

/// Create a compliant vault at `target`, which must be empty or absent.
pub fn bootstrap_vault(target: &Path, options: BootstrapOptions) -> Result<BootstrapResult> {
    if target.exists() && target.read_dir()?.next().is_some() {
        return Err(ProvaraError::VaultStructureInvalid {
            context: format!("target directory {} is not empty", target.display()),
        });
    }

    match build_vault(target, options) {
        Ok(result) => Ok(result),
        Err(err) => {
            // Transactional: never leave a half-built vault behind.
            let _ = fs::remove_dir_all(target);
            Err(err)
        }
    }
}

fn build_vault(target: &Path, options: BootstrapOptions) -> Result<BootstrapResult> {
    let layout = VaultLayout::new(target);
    layout.create_skeleton()?;

    let actor = options
        .actor
        .unwrap_or_else(|| "sovereign_genesis".to_string());
    let uid = options
        .uid
        .unwrap_or_else(|| format!("sovereign-{}", hex::encode(rand::random::<[u8; 8]>())));
    let birth_timestamp = now_utc_iso();

    let root_keypair = KeyPair::generate(&mut OsRng);
    let quorum_keypair = options.include_quorum.then(|| KeyPair::generate(&mut OsRng));

    // Public key material only.
    let mut entries = vec![new_key_entry(
        root_keypair.key_id(),
        root_keypair.public_key_b64(),
        vec!["root".into(), "attestation".into()],
        vec!["all".into()],
        birth_timestamp.clone(),
    )];
    if let Some(quorum) = &quorum_keypair {
        entries.push(new_key_entry(
            quorum.key_id(),
            quorum.public_key_b64(),
            vec!["quorum".into(), "recovery".into()],
            vec!["all".into()],
            birth_timestamp.clone(),
        ));
    }
    let registry = KeyRegistry::from_entries(entries);
    registry.save(&layout.keys_file())?;

    let mut authorities = vec![Authority {
        key_id: root_keypair.key_id(),
        role: "root".into(),
    }];
    if let Some(quorum) = &quorum_keypair {
        authorities.push(Authority {
            key_id: quorum.key_id(),
            role: "quorum".into(),
        });
    }
    write_policy_templates(
        &layout.policies_dir(),
        &SyncContract {
            authorities,
            merge_strategy: "causal-append".into(),
        },
    )?;

    let mut genesis_payload = json!({
        "uid": uid,
        "root_key_id": root_keypair.key_id(),
        "birth_timestamp": birth_timestamp,
    });
    if let Some(predecessor) = &options.predecessor_vault {
        genesis_payload["predecessor_vault"] = predecessor.clone();
    }

    let genesis = EventDraft {
        event_type: EventType::Genesis,
        namespace: Namespace::Canonical,
        actor: actor.clone(),
        ts_logical: 1,
        prev_event_hash: None,
        timestamp_utc: birth_timestamp.clone(),
        payload: genesis_payload,
    }
    .sign(&root_keypair)?;

    let seed = EventDraft {
        event_type: EventType::Observation,
        namespace: Namespace::Local,
        actor: actor.clone(),
        ts_logical: 2,
        prev_event_hash: Some(genesis.event_id.clone()),
        timestamp_utc: now_utc_iso(),
        payload: json!({
            "subject": "system",
            "predicate": "status",
            "value": "initialized",
            "confidence": 1.0,
        }),
    }
    .sign(&root_keypair)?;

    fs::write(
        layout.genesis_file(),
        serde_json::to_string_pretty(&json!({
            "uid": uid,
            "root_key_id": root_keypair.key_id(),
            "birth_timestamp": birth_timestamp,
            "spec_version": SPEC_VERSION,
            "genesis_event_id": genesis.event_id,
        }))?,
    )?;

    let log = EventLog::open(&layout);
    log.append(&[genesis.to_value()?, seed.to_value()?])?;

    let mut reducer = SovereignReducer::default();
    for event in log.read_all()? {
        reducer.apply_event(&event);
    }
    write_current_state(&layout, &reducer)?;

    let merkle_root = refresh_artifacts(&layout, Some(&root_keypair))?;

    run_self_test(&layout)?;
    info!(uid = %uid, root_key = %root_keypair.key_id(), "vault bootstrapped");

    Ok(BootstrapResult {
        vault_path: target.to_path_buf(),
        uid,
        root_key_id: root_keypair.key_id(),
        root_private_key_b64: root_keypair.seed_b64(),
        quorum_key_id: quorum_keypair.as_ref().map(KeyPair::key_id),
        quorum_private_key_b64: quorum_keypair.as_ref().map(KeyPair::seed_b64),
        genesis_event_id: genesis.event_id,
        seed_event_id: seed.event_id,
        merkle_root,
    })
}
