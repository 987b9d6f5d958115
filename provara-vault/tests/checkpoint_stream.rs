//! Streaming reducer, signed checkpoints, resume, and replay determinism.

use std::fs;

use serde_json::json;
use tempfile::tempdir;

use provara_core::{
    EventDraft, EventType, KeyPair, KeyRegistry, Namespace, ReducerConfig, SovereignReducer,
};
use provara_vault::{
    bootstrap_vault, create_checkpoint, load_latest_checkpoint, migrate_vault, replay,
    resume_from_checkpoint, save_checkpoint, verify_checkpoint, verify_vault, BootstrapOptions,
    EventLog, StreamingReducer, VaultLayout,
};

struct Fixture {
    layout: VaultLayout,
    keypair: KeyPair,
}

fn fixture(dir: &std::path::Path) -> Fixture {
    let target = dir.join("vault");
    let result = bootstrap_vault(&target, BootstrapOptions::default()).unwrap();
    Fixture {
        layout: VaultLayout::new(&target),
        keypair: KeyPair::from_seed_b64(&result.root_private_key_b64).unwrap(),
    }
}

/// Deterministic event fixture: a fixed seed keypair and fixed timestamps.
fn seeded_events(count: u64) -> Vec<serde_json::Value> {
    let mut seed = [0u8; 32];
    seed[0] = 0x13;
    seed[1] = 0x37;
    let keypair = KeyPair::from_bytes(&seed);

    let mut events = Vec::new();
    let mut prev: Option<String> = None;
    for i in 1..=count {
        let event = EventDraft {
            event_type: EventType::Observation,
            namespace: Namespace::Local,
            actor: "fixture".into(),
            ts_logical: i,
            prev_event_hash: prev.clone(),
            timestamp_utc: format!("2026-01-01T00:00:{:02}Z", i % 60),
            payload: json!({
                "subject": format!("subject{}", i % 7),
                "predicate": "reading",
                "value": i,
                "confidence": 0.75,
            }),
        }
        .sign(&keypair)
        .unwrap();
        prev = Some(event.event_id.clone());
        events.push(event.to_value().unwrap());
    }
    events
}

#[test]
fn streaming_and_full_reducers_agree_byte_for_byte() {
    let events = seeded_events(100);

    let mut full = SovereignReducer::new(ReducerConfig::default());
    full.apply_events(&events);

    let mut streaming = StreamingReducer::new();
    for (i, event) in events.iter().enumerate() {
        streaming.feed(event, (i + 1) as u64);
    }

    assert_eq!(full.state_hash(), streaming.reducer().state_hash());
    assert_eq!(
        jcs_rs::canonicalize(&full.export_state().unwrap()).unwrap(),
        jcs_rs::canonicalize(&streaming.reducer().export_state().unwrap()).unwrap()
    );

    // The same fixture replays to the same hash every time.
    let mut again = SovereignReducer::new(ReducerConfig::default());
    again.apply_events(&seeded_events(100));
    assert_eq!(full.state_hash(), again.state_hash());
}

#[test]
fn checkpoint_create_verify_and_tamper() {
    let dir = tempdir().unwrap();
    let f = fixture(dir.path());

    let record = create_checkpoint(&f.layout, &f.keypair).unwrap();
    assert_eq!(record.event_count, 2);
    assert!(record.last_event_id.is_some());
    assert!(record.last_event_offset > 0);
    assert_eq!(record.actor_chain_heads.len(), 1);
    assert_eq!(record.type_counts["GENESIS"], 1);
    assert_eq!(record.type_counts["OBSERVATION"], 1);

    let value = serde_json::to_value(&record).unwrap();
    assert!(verify_checkpoint(&value, f.keypair.verifying_key()));

    let mut tampered = value.clone();
    tampered["event_count"] = json!(99);
    assert!(!verify_checkpoint(&tampered, f.keypair.verifying_key()));
}

#[test]
fn latest_checkpoint_wins() {
    let dir = tempdir().unwrap();
    let f = fixture(dir.path());

    let first = create_checkpoint(&f.layout, &f.keypair).unwrap();
    save_checkpoint(&f.layout, &first).unwrap();

    provara_vault::append_signed_event(
        &f.layout,
        EventType::Observation,
        Namespace::Local,
        "sovereign_genesis",
        json!({"subject": "door", "predicate": "state", "value": "closed"}),
        &f.keypair,
    )
    .unwrap();
    provara_vault::finalize_mutation(&f.layout, Some(&f.keypair)).unwrap();
    let second = create_checkpoint(&f.layout, &f.keypair).unwrap();

    let latest = load_latest_checkpoint(&f.layout).unwrap().unwrap();
    assert_eq!(latest.event_count, second.event_count);
    assert_eq!(latest.event_count, 3);
}

#[test]
fn resume_matches_full_replay() {
    let dir = tempdir().unwrap();
    let f = fixture(dir.path());

    create_checkpoint(&f.layout, &f.keypair).unwrap();

    // More events after the checkpoint.
    for value in ["a", "b", "c"] {
        provara_vault::append_signed_event(
            &f.layout,
            EventType::Observation,
            Namespace::Local,
            "sovereign_genesis",
            json!({"subject": "door", "predicate": "state", "value": value}),
            &f.keypair,
        )
        .unwrap();
    }
    provara_vault::finalize_mutation(&f.layout, Some(&f.keypair)).unwrap();

    let report = resume_from_checkpoint(&f.layout).unwrap();
    assert_eq!(report.resumed_from_event_count, 2);
    assert_eq!(report.events_replayed, 3);

    let full = replay(&f.layout).unwrap();
    assert_eq!(
        report.state_hash.as_deref(),
        full.state_hash(),
        "resumed state must match full replay"
    );
}

#[test]
fn checkpointed_vault_still_verifies() {
    let dir = tempdir().unwrap();
    let f = fixture(dir.path());
    create_checkpoint(&f.layout, &f.keypair).unwrap();

    let report = verify_vault(&f.layout).unwrap();
    assert!(report.passed(), "failures: {:?}", report.failures);

    // The checkpoint's signer is resolvable from the registry.
    let record = load_latest_checkpoint(&f.layout).unwrap().unwrap();
    let registry = KeyRegistry::load(&f.layout.keys_file()).unwrap();
    assert!(registry.resolve_historical(&record.key_id).is_ok());
}

#[test]
fn migration_dry_run_leaves_the_log_untouched() {
    let dir = tempdir().unwrap();
    let f = fixture(dir.path());

    let log_before = fs::read(EventLog::open(&f.layout).path()).unwrap();
    let genesis_before = fs::read(f.layout.genesis_file()).unwrap();

    let report = migrate_vault(&f.layout, "1.1", true, &f.keypair, "sovereign_genesis").unwrap();
    assert!(report.dry_run);
    assert_eq!(report.source_version, "1.0");
    assert_eq!(report.events_migrated, 0);

    assert_eq!(fs::read(EventLog::open(&f.layout).path()).unwrap(), log_before);
    assert_eq!(fs::read(f.layout.genesis_file()).unwrap(), genesis_before);
}

#[test]
fn migration_records_the_bump() {
    let dir = tempdir().unwrap();
    let f = fixture(dir.path());

    let report = migrate_vault(&f.layout, "1.1", false, &f.keypair, "sovereign_genesis").unwrap();
    assert_eq!(report.source_version, "1.0");
    assert_eq!(report.target_version, "1.1");
    assert!(report.migration_event_id.as_deref().unwrap().starts_with("evt_"));

    let events = EventLog::open(&f.layout).read_all().unwrap();
    let last = events.last().unwrap();
    assert_eq!(last["type"], "com.provara.migration");
    assert_eq!(last["payload"]["from_version"], "1.0");
    assert_eq!(last["payload"]["to_version"], "1.1");

    // Re-running is a no-op.
    let again = migrate_vault(&f.layout, "1.1", false, &f.keypair, "sovereign_genesis").unwrap();
    assert_eq!(again.events_migrated, 0);

    // Unknown versions are refused.
    assert!(migrate_vault(&f.layout, "9.9", false, &f.keypair, "sovereign_genesis").is_err());
}
