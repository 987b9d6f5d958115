//! Per-actor causal chains over the event log.
//!
//! For each actor, the subsequence of that actor's events in file order must
//! form a hash chain: the first event carries `prev_event_hash = null`, every
//! later one names the id of its immediate same-actor predecessor. Two
//! distinct events sharing `(actor, prev_event_hash)` are a fork.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Two or more events competing for the same chain position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalFork {
    pub actor_id: String,
    /// `None` when the competing events all claim to start the chain.
    pub fork_point_event_id: Option<String>,
    pub competing_event_ids: Vec<String>,
}

pub(crate) fn actor_of(event: &Value) -> Option<&str> {
    event.get("actor").and_then(Value::as_str)
}

pub(crate) fn event_id_of(event: &Value) -> Option<&str> {
    event.get("event_id").and_then(Value::as_str)
}

pub(crate) fn prev_hash_of(event: &Value) -> Option<&str> {
    event.get("prev_event_hash").and_then(Value::as_str)
}

/// All distinct actors appearing in the log.
pub fn all_actors(events: &[Value]) -> BTreeSet<String> {
    events
        .iter()
        .filter_map(actor_of)
        .map(str::to_string)
        .collect()
}

/// Latest event id per actor, in file order.
pub fn chain_heads(events: &[Value]) -> BTreeMap<String, String> {
    let mut heads = BTreeMap::new();
    for event in events {
        if let (Some(actor), Some(id)) = (actor_of(event), event_id_of(event)) {
            heads.insert(actor.to_string(), id.to_string());
        }
    }
    heads
}

/// Next logical timestamp for an actor: one past the maximum seen.
pub fn next_ts_logical(events: &[Value], actor: &str) -> u64 {
    events
        .iter()
        .filter(|e| actor_of(e) == Some(actor))
        .filter_map(|e| e.get("ts_logical").and_then(Value::as_u64))
        .max()
        .map_or(1, |max| max + 1)
}

/// Verify one actor's chain in file order.
pub fn verify_causal_chain(events: &[Value], actor: &str) -> bool {
    let mut last: Option<String> = None;
    let mut seen_any = false;

    for event in events.iter().filter(|e| actor_of(e) == Some(actor)) {
        let Some(id) = event_id_of(event) else {
            return false;
        };
        match prev_hash_of(event) {
            None => {
                // Only the first event of the chain may lack a predecessor.
                if seen_any {
                    return false;
                }
            }
            Some(prev) => {
                if last.as_deref() != Some(prev) {
                    return false;
                }
            }
        }
        last = Some(id.to_string());
        seen_any = true;
    }
    true
}

/// Verify every actor's chain; returns per-actor verdicts.
pub fn verify_all_chains(events: &[Value]) -> BTreeMap<String, bool> {
    all_actors(events)
        .into_iter()
        .map(|actor| {
            let ok = verify_causal_chain(events, &actor);
            (actor, ok)
        })
        .collect()
}

/// Scan for events competing for the same `(actor, prev_event_hash)` slot.
///
/// Forks are surfaced, never resolved.
pub fn detect_forks(events: &[Value]) -> Vec<CausalFork> {
    let mut slots: BTreeMap<(String, Option<String>), Vec<String>> = BTreeMap::new();
    for event in events {
        let (Some(actor), Some(id)) = (actor_of(event), event_id_of(event)) else {
            continue;
        };
        let slot = (actor.to_string(), prev_hash_of(event).map(str::to_string));
        let ids = slots.entry(slot).or_default();
        if !ids.contains(&id.to_string()) {
            ids.push(id.to_string());
        }
    }

    slots
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|((actor_id, fork_point_event_id), competing_event_ids)| CausalFork {
            actor_id,
            fork_point_event_id,
            competing_event_ids,
        })
        .collect()
}

/// Event ids appearing more than once, in first-seen order.
pub fn duplicate_event_ids(events: &[Value]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut dups = Vec::new();
    for event in events {
        let Some(id) = event_id_of(event) else {
            continue;
        };
        if !seen.insert(id.to_string()) && !dups.contains(&id.to_string()) {
            dups.push(id.to_string());
        }
    }
    dups
}
