//! Tombstone redaction: erase a payload while preserving chain position.
//!
//! The targeted event's payload is replaced in place with a tombstone
//! carrying the pre-redaction payload hash, and a paired
//! `com.provara.redaction` event is appended. The target's signature is
//! broken by design; verifiers recognize tombstones and accept them.

use serde_json::{json, Value};
use tracing::info;

use provara_core::{is_tombstone, EventType, KeyPair, Namespace, ProvaraError, Result, REDACTION_TYPE};

use crate::layout::VaultLayout;
use crate::log::{append_signed_event, EventLog};
use crate::now_utc_iso;
use crate::state::finalize_mutation;

/// Redact `target_event_id`. Idempotent: re-redacting returns the prior
/// redaction event unchanged.
pub fn redact_event(
    layout: &VaultLayout,
    target_event_id: &str,
    reason: &str,
    authority: &str,
    signer: &KeyPair,
    actor: &str,
) -> Result<Value> {
    let log = EventLog::open(layout);
    let events = log.read_all()?;

    let target = events
        .iter()
        .find(|e| e.get("event_id").and_then(Value::as_str) == Some(target_event_id))
        .ok_or_else(|| ProvaraError::VaultStructureInvalid {
            context: format!("redaction target {target_event_id} not present in log"),
        })?;

    let payload = target.get("payload").cloned().unwrap_or(Value::Null);
    if is_tombstone(&payload) {
        // Already redacted: hand back the original redaction record.
        let prior = events
            .iter()
            .find(|e| {
                e.get("type").and_then(Value::as_str) == Some(REDACTION_TYPE)
                    && e.get("payload")
                        .and_then(|p| p.get("target_event_id"))
                        .and_then(Value::as_str)
                        == Some(target_event_id)
            })
            .cloned()
            .ok_or_else(|| ProvaraError::VaultStructureInvalid {
                context: format!("tombstone {target_event_id} has no paired redaction event"),
            })?;
        return Ok(prior);
    }

    let original_payload_hash = jcs_rs::canonical_hash_hex(&payload)?;

    let redaction = append_signed_event(
        layout,
        EventType::Extension(REDACTION_TYPE.to_string()),
        Namespace::Canonical,
        actor,
        json!({
            "target_event_id": target_event_id,
            "reason": reason,
            "authority": authority,
            "method": "TOMBSTONE",
            "timestamp": now_utc_iso(),
        }),
        signer,
    )?;
    let redaction_event_id = redaction["event_id"]
        .as_str()
        .unwrap_or_default()
        .to_string();

    // Rewrite the log with the tombstone in place. The target keeps its
    // event_id and (now broken) signature.
    let mut rewritten = log.read_all()?;
    for event in &mut rewritten {
        if event.get("event_id").and_then(Value::as_str) == Some(target_event_id) {
            event["payload"] = json!({
                "redacted": true,
                "original_payload_hash": original_payload_hash,
                "redaction_event_id": redaction_event_id,
            });
        }
    }
    log.rewrite_all(&rewritten)?;

    finalize_mutation(layout, Some(signer))?;
    info!(target = %target_event_id, reason = %reason, "event redacted");
    Ok(redaction)
}
