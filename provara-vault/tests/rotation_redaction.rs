//! Key rotation, tombstone redaction, sealing, and succession.

use serde_json::{json, Value};
use tempfile::tempdir;

use provara_core::{is_tombstone, EventType, KeyPair, KeyRegistry, KeyStatus, Namespace};
use provara_vault::{
    append_signed_event, bootstrap_vault, finalize_mutation, redact_event, rotate_key,
    seal_vault, successor_options, verify_vault, BootstrapOptions, EventLog, VaultLayout,
};

struct QuorumVault {
    layout: VaultLayout,
    root_key_id: String,
    root_keypair: KeyPair,
    quorum_keypair: KeyPair,
}

fn quorum_vault(dir: &std::path::Path) -> QuorumVault {
    let target = dir.join("vault");
    let result = bootstrap_vault(
        &target,
        BootstrapOptions {
            include_quorum: true,
            ..BootstrapOptions::default()
        },
    )
    .unwrap();
    QuorumVault {
        layout: VaultLayout::new(&target),
        root_key_id: result.root_key_id.clone(),
        root_keypair: KeyPair::from_seed_b64(&result.root_private_key_b64).unwrap(),
        quorum_keypair: KeyPair::from_seed_b64(result.quorum_private_key_b64.as_ref().unwrap())
            .unwrap(),
    }
}

#[test]
fn rotation_revokes_promotes_and_keeps_history_verifiable() {
    let dir = tempdir().unwrap();
    let vault = quorum_vault(dir.path());

    let rotation = rotate_key(
        &vault.layout,
        &vault.root_key_id,
        &vault.quorum_keypair,
        "quorum",
    )
    .unwrap();
    assert!(rotation.revocation_event_id.starts_with("evt_"));
    assert!(rotation.promotion_event_id.starts_with("evt_"));
    assert_ne!(rotation.new_key_id, vault.root_key_id);

    let events = EventLog::open(&vault.layout).read_all().unwrap();
    let types: Vec<&str> = events
        .iter()
        .map(|e| e["type"].as_str().unwrap())
        .collect();
    assert!(types.contains(&"KEY_REVOCATION"));
    assert!(types.contains(&"KEY_PROMOTION"));

    let registry = KeyRegistry::load(&vault.layout.keys_file()).unwrap();
    assert_eq!(
        registry.get(&vault.root_key_id).unwrap().status,
        KeyStatus::Revoked
    );
    assert!(registry.get(&rotation.new_key_id).is_some());

    // Strict resolution refuses the revoked key; historical still works.
    assert!(registry.resolve(&vault.root_key_id).is_err());
    assert!(registry.resolve_historical(&vault.root_key_id).is_ok());

    // Pre-revocation signatures verify through the historical path, so the
    // whole vault still passes.
    let report = verify_vault(&vault.layout).unwrap();
    assert!(report.passed(), "failures: {:?}", report.failures);
}

#[test]
fn self_revocation_is_refused() {
    let dir = tempdir().unwrap();
    let vault = quorum_vault(dir.path());

    let err = rotate_key(
        &vault.layout,
        &vault.root_key_id,
        &vault.root_keypair,
        "sovereign_genesis",
    )
    .unwrap_err();
    assert_eq!(err.code(), "PROVARA_E_SELF_REVOCATION");

    // Nothing was appended.
    assert_eq!(EventLog::open(&vault.layout).read_all().unwrap().len(), 2);
}

fn append_secret(vault: &QuorumVault) -> String {
    let event = append_signed_event(
        &vault.layout,
        EventType::Observation,
        Namespace::Local,
        "sovereign_genesis",
        json!({"subject": "secret", "predicate": "value", "value": "top-secret-data"}),
        &vault.root_keypair,
    )
    .unwrap();
    finalize_mutation(&vault.layout, Some(&vault.root_keypair)).unwrap();
    event["event_id"].as_str().unwrap().to_string()
}

#[test]
fn redaction_tombstones_the_target_and_still_verifies() {
    let dir = tempdir().unwrap();
    let vault = quorum_vault(dir.path());
    let target_id = append_secret(&vault);

    let redaction = redact_event(
        &vault.layout,
        &target_id,
        "GDPR_ERASURE",
        "Legal Team",
        &vault.root_keypair,
        "sovereign_genesis",
    )
    .unwrap();
    assert_eq!(redaction["type"], "com.provara.redaction");
    assert_eq!(redaction["payload"]["target_event_id"], json!(target_id));

    let events = EventLog::open(&vault.layout).read_all().unwrap();
    let target = events
        .iter()
        .find(|e| e["event_id"] == json!(target_id))
        .unwrap();
    assert!(is_tombstone(&target["payload"]));
    assert_eq!(
        target["payload"]["redaction_event_id"],
        redaction["event_id"]
    );
    assert!(target["payload"]["original_payload_hash"].is_string());
    // The plaintext is gone from the log.
    assert!(!serde_json::to_string(&events).unwrap().contains("top-secret-data"));

    let report = verify_vault(&vault.layout).unwrap();
    assert!(report.passed(), "failures: {:?}", report.failures);
    assert_eq!(report.redactions.len(), 1);
}

#[test]
fn redaction_is_idempotent() {
    let dir = tempdir().unwrap();
    let vault = quorum_vault(dir.path());
    let target_id = append_secret(&vault);

    let first = redact_event(
        &vault.layout,
        &target_id,
        "GDPR_ERASURE",
        "Authority",
        &vault.root_keypair,
        "sovereign_genesis",
    )
    .unwrap();
    let second = redact_event(
        &vault.layout,
        &target_id,
        "GDPR_ERASURE",
        "Authority",
        &vault.root_keypair,
        "sovereign_genesis",
    )
    .unwrap();
    assert_eq!(first["event_id"], second["event_id"]);

    // Genesis, seed, target, one redaction event. Nothing else.
    assert_eq!(EventLog::open(&vault.layout).read_all().unwrap().len(), 4);
}

#[test]
fn redacting_a_missing_event_is_an_error() {
    let dir = tempdir().unwrap();
    let vault = quorum_vault(dir.path());
    let err = redact_event(
        &vault.layout,
        "evt_000000000000000000000000",
        "reason",
        "authority",
        &vault.root_keypair,
        "sovereign_genesis",
    )
    .unwrap_err();
    assert!(err.to_string().contains("not present"));
}

#[test]
fn sealed_vault_refuses_appends_and_allows_succession() {
    let dir = tempdir().unwrap();
    let vault = quorum_vault(dir.path());

    let seal = seal_vault(&vault.layout, "sovereign_genesis", &vault.root_keypair).unwrap();
    assert_eq!(seal["type"], "com.provara.vault.seal");

    let err = append_signed_event(
        &vault.layout,
        EventType::Observation,
        Namespace::Local,
        "sovereign_genesis",
        json!({"subject": "s", "predicate": "p"}),
        &vault.root_keypair,
    )
    .unwrap_err();
    assert_eq!(err.code(), "PROVARA_E_VAULT_SEALED");

    // The sealed vault still verifies.
    assert!(verify_vault(&vault.layout).unwrap().passed());

    // A successor carries the predecessor's root and final count.
    let options = successor_options(&vault.layout, BootstrapOptions::default()).unwrap();
    let successor =
        bootstrap_vault(&dir.path().join("successor"), options).unwrap();
    let successor_layout = VaultLayout::new(dir.path().join("successor"));
    let events = EventLog::open(&successor_layout).read_all().unwrap();
    let predecessor: &Value = &events[0]["payload"]["predecessor_vault"];
    assert_eq!(predecessor["final_event_count"], 3);
    assert!(predecessor["merkle_root"].is_string());
    assert!(successor.genesis_event_id.starts_with("evt_"));
}
