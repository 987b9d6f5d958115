//! Delta exchange between vaults: export, import, fork surfacing.
//!
//! A delta bundle is NDJSON: one leading state-vector object
//! (`actor_id -> last_known_event_id`) followed by canonical event lines.
//! Imports graft events onto local chains in the deterministic order
//! `(ts_logical, timestamp_utc, event_id)`; events that would fork are set
//! aside and reported, never silently resolved.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use tracing::{info, warn};

use provara_core::{
    chain, check_event_id, new_key_entry, validate_event, verify_event_signature, CausalFork,
    KeyPair, KeyRegistry, ProvaraError, Result,
};

use crate::layout::VaultLayout;
use crate::log::EventLog;
use crate::manifest::refresh_artifacts;
use crate::now_utc_iso;
use crate::state::{replay, write_current_state};
use crate::verify::resolve_for_log;

/// One event refused during import.
#[derive(Debug, Clone)]
pub struct RejectedEvent {
    pub event_id: String,
    pub code: String,
    pub reason: String,
}

/// Outcome of one delta import.
#[derive(Debug, Clone, Default)]
pub struct MergeResult {
    pub success: bool,
    pub events_merged: u64,
    pub duplicates_skipped: u64,
    pub new_state_hash: Option<String>,
    pub forks: Vec<CausalFork>,
    pub rejected: Vec<RejectedEvent>,
}

/// Outcome of a bidirectional sync.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub into_local: MergeResult,
    pub into_remote: MergeResult,
}

/// `actor_id -> last_known_event_id` over a log.
pub fn compute_state_vector(events: &[Value]) -> BTreeMap<String, String> {
    chain::chain_heads(events)
}

/// Export the log tail after `since_event_id` (everything when `None`),
/// preceded by this vault's state vector.
pub fn export_delta(layout: &VaultLayout, since_event_id: Option<&str>) -> Result<String> {
    let events = EventLog::open(layout).read_all()?;

    let tail: &[Value] = match since_event_id {
        None => &events,
        Some(id) => {
            let position = events
                .iter()
                .position(|e| e.get("event_id").and_then(Value::as_str) == Some(id))
                .ok_or_else(|| ProvaraError::HashMismatch {
                    context: format!("since_event_id {id} not present in log"),
                })?;
            &events[position + 1..]
        }
    };

    let vector: Map<String, Value> = compute_state_vector(&events)
        .into_iter()
        .map(|(actor, head)| (actor, Value::String(head)))
        .collect();

    let mut bundle = String::new();
    bundle.push_str(&String::from_utf8_lossy(&jcs_rs::canonicalize(
        &Value::Object(vector),
    )?));
    bundle.push('\n');
    for event in tail {
        bundle.push_str(&String::from_utf8_lossy(&jcs_rs::canonicalize(event)?));
        bundle.push('\n');
    }
    Ok(bundle)
}

fn sort_key(event: &Value) -> (u64, String, String) {
    (
        event.get("ts_logical").and_then(Value::as_u64).unwrap_or(0),
        event
            .get("timestamp_utc")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        event
            .get("event_id")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
    )
}

fn event_id_of(event: &Value) -> String {
    event
        .get("event_id")
        .and_then(Value::as_str)
        .unwrap_or("<missing event_id>")
        .to_string()
}

/// Import a delta bundle. Accepted events are appended in deterministic
/// order; forks are surfaced; the derived artifacts are refreshed.
pub fn import_delta(
    layout: &VaultLayout,
    bundle: &str,
    signer: Option<&KeyPair>,
) -> Result<MergeResult> {
    let mut result = MergeResult::default();

    let mut lines = bundle.lines().filter(|l| !l.trim().is_empty());
    let Some(vector_line) = lines.next() else {
        result.success = true;
        return Ok(result);
    };
    let _remote_vector: Value = serde_json::from_str(vector_line)?;

    let mut incoming: Vec<Value> = Vec::new();
    for line in lines {
        incoming.push(serde_json::from_str(line)?);
    }

    let log = EventLog::open(layout);
    let local_events = log.read_all()?;
    let mut registry = KeyRegistry::load(&layout.keys_file())?;
    let mut registry_changed = false;

    let mut known_ids: BTreeSet<String> = local_events.iter().map(event_id_of).collect();
    let mut heads = chain::chain_heads(&local_events);
    // Occupied chain slots: (actor, prev) -> successor already holding it.
    let mut successors: BTreeMap<(String, Option<String>), String> = BTreeMap::new();
    for event in &local_events {
        if let Some(actor) = event.get("actor").and_then(Value::as_str) {
            let prev = event
                .get("prev_event_hash")
                .and_then(Value::as_str)
                .map(str::to_string);
            successors.insert((actor.to_string(), prev), event_id_of(event));
        }
    }

    // Signature resolution consults the merged view so a revocation shipped
    // in this very delta still unlocks historical verification.
    let mut merged_view = local_events.clone();
    merged_view.extend(incoming.iter().cloned());

    // Validation pass.
    let mut candidates: Vec<Value> = Vec::new();
    let mut seen_in_bundle: BTreeSet<String> = BTreeSet::new();
    for event in incoming {
        let event_id = event_id_of(&event);
        if known_ids.contains(&event_id) || !seen_in_bundle.insert(event_id.clone()) {
            result.duplicates_skipped += 1;
            continue;
        }
        if let Err(err) = validate_event(&event).and_then(|()| check_event_id(&event)) {
            result.rejected.push(RejectedEvent {
                event_id,
                code: err.code().to_string(),
                reason: err.to_string(),
            });
            continue;
        }
        let key_id = event
            .get("actor_key_id")
            .and_then(Value::as_str)
            .unwrap_or("");
        match resolve_for_log(&registry, key_id, &merged_view) {
            Ok(public_key) if verify_event_signature(&event, &public_key) => {
                candidates.push(event);
            }
            Ok(_) => {
                let err = ProvaraError::InvalidSignature {
                    context: event_id.clone(),
                };
                result.rejected.push(RejectedEvent {
                    event_id,
                    code: err.code().to_string(),
                    reason: err.to_string(),
                });
            }
            Err(err) => {
                result.rejected.push(RejectedEvent {
                    event_id,
                    code: err.code().to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }

    candidates.sort_by_key(sort_key);

    // Graft in passes so in-bundle chains land regardless of line order.
    let mut accepted: Vec<Value> = Vec::new();
    loop {
        let mut progress = false;
        let mut deferred = Vec::new();
        for event in candidates {
            let actor = event
                .get("actor")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let prev = event
                .get("prev_event_hash")
                .and_then(Value::as_str)
                .map(str::to_string);
            let grafts = match (&prev, heads.get(&actor)) {
                (None, None) => true,
                (Some(p), Some(h)) => p == h,
                _ => false,
            };
            if grafts {
                let event_id = event_id_of(&event);
                heads.insert(actor.clone(), event_id.clone());
                successors.insert((actor, prev), event_id.clone());
                known_ids.insert(event_id);
                apply_key_lifecycle(&event, &mut registry, &mut registry_changed);
                accepted.push(event);
                progress = true;
            } else {
                deferred.push(event);
            }
        }
        candidates = deferred;
        if !progress || candidates.is_empty() {
            break;
        }
    }

    // Whatever is left either competes for an occupied slot (a fork) or
    // dangles off an unknown predecessor.
    for event in candidates {
        let event_id = event_id_of(&event);
        let actor = event
            .get("actor")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let prev = event
            .get("prev_event_hash")
            .and_then(Value::as_str)
            .map(str::to_string);

        match successors.get(&(actor.clone(), prev.clone())) {
            Some(existing) => {
                warn!(actor = %actor, event_id = %event_id, "causal fork surfaced");
                result.forks.push(CausalFork {
                    actor_id: actor,
                    fork_point_event_id: prev,
                    competing_event_ids: vec![existing.clone(), event_id],
                });
            }
            None => {
                let err = ProvaraError::BrokenCausalChain {
                    context: format!("{event_id} references unknown predecessor {prev:?}"),
                };
                result.rejected.push(RejectedEvent {
                    event_id,
                    code: err.code().to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }

    if !accepted.is_empty() {
        log.append(&accepted)?;
        result.events_merged = accepted.len() as u64;
    }
    if registry_changed {
        registry.save(&layout.keys_file())?;
    }

    let reducer = replay(layout)?;
    write_current_state(layout, &reducer)?;
    result.new_state_hash = reducer.state_hash().map(str::to_string);
    refresh_artifacts(layout, signer)?;

    result.success = result.rejected.is_empty() || result.events_merged > 0;
    info!(
        merged = result.events_merged,
        duplicates = result.duplicates_skipped,
        forks = result.forks.len(),
        rejected = result.rejected.len(),
        "delta import finished"
    );
    Ok(result)
}

fn apply_key_lifecycle(event: &Value, registry: &mut KeyRegistry, changed: &mut bool) {
    let Some(payload) = event.get("payload") else {
        return;
    };
    match event.get("type").and_then(Value::as_str) {
        Some("KEY_PROMOTION") => {
            let new_key_id = payload.get("new_key_id").and_then(Value::as_str);
            let public_key = payload.get("new_public_key_b64").and_then(Value::as_str);
            if let (Some(key_id), Some(public_key_b64)) = (new_key_id, public_key) {
                if registry.get(key_id).is_none() {
                    registry.insert(new_key_entry(
                        key_id.to_string(),
                        public_key_b64.to_string(),
                        vec!["root".into()],
                        vec!["all".into()],
                        now_utc_iso(),
                    ));
                    *changed = true;
                }
            }
        }
        Some("KEY_REVOCATION") => {
            if let Some(revoked) = payload.get("revoked_key_id").and_then(Value::as_str) {
                if registry.revoke(revoked).is_ok() {
                    *changed = true;
                }
            }
        }
        _ => {}
    }
}

/// Bidirectional delta exchange between two vaults.
pub fn sync_vaults(
    local: &VaultLayout,
    remote: &VaultLayout,
    local_signer: Option<&KeyPair>,
    remote_signer: Option<&KeyPair>,
) -> Result<SyncReport> {
    let from_remote = export_delta(remote, None)?;
    let into_local = import_delta(local, &from_remote, local_signer)?;

    let from_local = export_delta(local, None)?;
    let into_remote = import_delta(remote, &from_local, remote_signer)?;

    Ok(SyncReport {
        into_local,
        into_remote,
    })
}
