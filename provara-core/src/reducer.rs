//! Deterministic fold of the event log into namespaced state.
//!
//! The reducer is a pure function of the event sequence: applying the same
//! events in the same order to an empty reducer must yield byte-identical
//! state on any platform. It consumes one event at a time, so callers can
//! stream a log of any size without materializing it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use jcs_rs::canonical_hash_hex;

use crate::error::Result;
use crate::event::EventType;
use crate::plugins::EventTypeRegistry;

const REDUCER_NAME: &str = "SovereignReducerV1";
const REDUCER_VERSION: &str = "1.0.0";
const DEFAULT_ATTESTATION_THRESHOLD: u64 = 1;
const DEFAULT_OBSERVATION_CONFIDENCE: f64 = 0.5;

/// Tuning knobs, threaded explicitly rather than read from global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReducerConfig {
    /// Attestations required before a key is promoted to `canonical`.
    pub attestation_threshold: u64,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        ReducerConfig {
            attestation_threshold: DEFAULT_ATTESTATION_THRESHOLD,
        }
    }
}

/// Identity block recorded inside the state metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReducerInfo {
    pub name: String,
    pub version: String,
    pub attestation_threshold: u64,
}

/// Bookkeeping carried alongside the payload buckets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMetadata {
    pub uid: Option<String>,
    pub genesis_event_id: Option<String>,
    pub last_event_id: Option<String>,
    pub event_count: u64,
    pub state_hash: Option<String>,
    pub current_epoch: Option<Value>,
    pub key_lifecycle: Vec<Value>,
    pub attestation_counts: BTreeMap<String, u64>,
    pub reducer: ReducerInfo,
}

/// The reducer output: three live buckets, an archive, and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReducerState {
    pub canonical: BTreeMap<String, Value>,
    pub local: BTreeMap<String, Value>,
    pub contested: BTreeMap<String, Value>,
    pub archived: BTreeMap<String, Vec<Value>>,
    pub metadata: StateMetadata,
}

#[derive(Clone, Copy)]
enum Bucket {
    Canonical,
    Local,
}

/// The deterministic fold. Feed events in file order.
pub struct SovereignReducer {
    state: ReducerState,
    ignored_types: BTreeSet<String>,
}

impl Default for SovereignReducer {
    fn default() -> Self {
        Self::new(ReducerConfig::default())
    }
}

impl SovereignReducer {
    pub fn new(config: ReducerConfig) -> Self {
        let mut reducer = SovereignReducer {
            state: ReducerState {
                canonical: BTreeMap::new(),
                local: BTreeMap::new(),
                contested: BTreeMap::new(),
                archived: BTreeMap::new(),
                metadata: StateMetadata {
                    uid: None,
                    genesis_event_id: None,
                    last_event_id: None,
                    event_count: 0,
                    state_hash: None,
                    current_epoch: None,
                    key_lifecycle: Vec::new(),
                    attestation_counts: BTreeMap::new(),
                    reducer: ReducerInfo {
                        name: REDUCER_NAME.to_string(),
                        version: REDUCER_VERSION.to_string(),
                        attestation_threshold: config.attestation_threshold,
                    },
                },
            },
            ignored_types: BTreeSet::new(),
        };
        reducer.update_state_hash();
        reducer
    }

    /// Resume from a previously exported state (checkpoint replay).
    pub fn from_state(state: ReducerState) -> Self {
        SovereignReducer {
            state,
            ignored_types: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> &ReducerState {
        &self.state
    }

    pub fn state_hash(&self) -> Option<&str> {
        self.state.metadata.state_hash.as_deref()
    }

    /// Event types seen but not folded.
    pub fn ignored_types(&self) -> &BTreeSet<String> {
        &self.ignored_types
    }

    /// State as a plain JSON value.
    pub fn export_state(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.state)?)
    }

    /// Apply one event and refresh the state hash.
    pub fn apply_event(&mut self, event: &Value) {
        self.apply_event_with(event, None);
    }

    /// Apply one event, consulting the plugin registry for reducer hooks.
    pub fn apply_event_with(&mut self, event: &Value, registry: Option<&EventTypeRegistry>) {
        self.fold(event, registry);
        self.update_state_hash();
    }

    pub fn apply_events(&mut self, events: &[Value]) {
        for event in events {
            self.apply_event(event);
        }
    }

    fn fold(&mut self, event: &Value, registry: Option<&EventTypeRegistry>) {
        let Some(map) = event.as_object() else {
            return;
        };

        let type_name = map.get("type").and_then(Value::as_str).unwrap_or("");
        let event_id = map
            .get("event_id")
            .and_then(Value::as_str)
            .unwrap_or("unknown_event")
            .to_string();
        let actor = map
            .get("actor")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let namespace = map
            .get("namespace")
            .and_then(Value::as_str)
            .unwrap_or("local");
        let ts = map
            .get("timestamp_utc")
            .and_then(Value::as_str)
            .map(str::to_string);
        let payload = map.get("payload").and_then(Value::as_object);

        match EventType::from(type_name) {
            EventType::Genesis => {
                if let Some(p) = payload {
                    self.state.metadata.uid =
                        p.get("uid").and_then(Value::as_str).map(str::to_string);
                }
                self.state.metadata.genesis_event_id = Some(event_id.clone());
            }
            EventType::Observation => {
                if let Some(p) = payload {
                    self.write_entry(&event_id, &actor, ts.as_deref(), p, Bucket::Local);
                }
            }
            EventType::Assertion => {
                if let Some(p) = payload {
                    let bucket = if namespace == "canonical" {
                        Bucket::Canonical
                    } else {
                        Bucket::Local
                    };
                    self.write_entry(&event_id, &actor, ts.as_deref(), p, bucket);
                }
            }
            EventType::Attestation => {
                if let Some(p) = payload {
                    self.attest(&event_id, &actor, p);
                }
            }
            EventType::Retraction => {
                if let Some(p) = payload {
                    self.retract(&event_id, p);
                }
            }
            EventType::KeyRevocation => {
                let revoked = payload
                    .and_then(|p| p.get("revoked_key_id"))
                    .cloned()
                    .unwrap_or(Value::Null);
                self.state.metadata.key_lifecycle.push(json!({
                    "type": "KEY_REVOCATION",
                    "event_id": event_id,
                    "revoked_key_id": revoked,
                }));
            }
            EventType::KeyPromotion => {
                let new_key = payload
                    .and_then(|p| p.get("new_key_id"))
                    .cloned()
                    .unwrap_or(Value::Null);
                let replaces = payload
                    .and_then(|p| p.get("replaces_key_id"))
                    .cloned()
                    .unwrap_or(Value::Null);
                self.state.metadata.key_lifecycle.push(json!({
                    "type": "KEY_PROMOTION",
                    "event_id": event_id,
                    "new_key_id": new_key,
                    "replaces_key_id": replaces,
                }));
            }
            EventType::ReducerEpoch => {
                if let Some(p) = payload {
                    self.state.metadata.current_epoch = Some(json!({
                        "epoch_id": p.get("epoch_id"),
                        "reducer_hash": p.get("reducer_hash"),
                        "effective_from_event_id": p
                            .get("effective_from_event_id")
                            .and_then(Value::as_str)
                            .unwrap_or(&event_id),
                    }));
                }
            }
            EventType::Extension(name) => {
                match registry.and_then(|r| r.reducer_hook(&name)) {
                    Some(hook) => hook(&mut self.state, event),
                    None => {
                        self.ignored_types.insert(name);
                    }
                }
            }
        }

        self.state.metadata.last_event_id = Some(event_id);
        self.state.metadata.event_count += 1;
    }

    fn write_entry(
        &mut self,
        event_id: &str,
        actor: &str,
        ts: Option<&str>,
        payload: &Map<String, Value>,
        bucket: Bucket,
    ) {
        let Some(key) = subject_predicate_key(payload) else {
            return;
        };
        let value = payload.get("value").cloned().unwrap_or(Value::Null);
        let confidence = payload
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_OBSERVATION_CONFIDENCE);

        let entry = json!({
            "value": value,
            "confidence": confidence,
            "event_id": event_id,
            "actor": actor,
            "ts": ts,
        });

        let prior = self.bucket_mut(bucket).get(&key).cloned();
        match prior {
            Some(prev) if prev.get("actor").and_then(Value::as_str) != Some(actor) => {
                self.bucket_mut(bucket).remove(&key);
                let values_disagree = prev.get("value") != Some(&value);
                self.state.archived.entry(key.clone()).or_default().push(prev);

                if values_disagree {
                    let mut contested_entry = entry;
                    if let Some(obj) = contested_entry.as_object_mut() {
                        obj.insert("status".to_string(), json!("AWAITING_RESOLUTION"));
                    }
                    self.state.contested.insert(key, contested_entry);
                } else {
                    self.bucket_mut(bucket).insert(key, entry);
                }
            }
            _ => {
                self.bucket_mut(bucket).insert(key, entry);
            }
        }
    }

    fn bucket_mut(&mut self, bucket: Bucket) -> &mut BTreeMap<String, Value> {
        match bucket {
            Bucket::Canonical => &mut self.state.canonical,
            Bucket::Local => &mut self.state.local,
        }
    }

    fn attest(&mut self, event_id: &str, actor: &str, payload: &Map<String, Value>) {
        let Some(key) = subject_predicate_key(payload) else {
            return;
        };
        let value = payload.get("value").cloned().unwrap_or(Value::Null);
        let target_event_id = payload
            .get("target_event_id")
            .and_then(Value::as_str)
            .unwrap_or(event_id);

        let count = self
            .state
            .metadata
            .attestation_counts
            .entry(key.clone())
            .or_insert(0);
        *count += 1;
        let count = *count;

        if count < self.state.metadata.reducer.attestation_threshold {
            return;
        }

        if let Some(existing) = self.state.canonical.remove(&key) {
            let mut archived = existing;
            if let Some(obj) = archived.as_object_mut() {
                obj.insert("superseded_by".to_string(), json!(event_id));
            }
            self.state.archived.entry(key.clone()).or_default().push(archived);
        }

        self.state.canonical.insert(
            key.clone(),
            json!({
                "value": value,
                "attested_by": actor,
                "provenance": target_event_id,
                "attestation_event_id": event_id,
                "attestations": count,
            }),
        );

        self.state.local.remove(&key);
        self.state.contested.remove(&key);
    }

    fn retract(&mut self, event_id: &str, payload: &Map<String, Value>) {
        let Some(key) = subject_predicate_key(payload) else {
            return;
        };

        let buckets = [
            &mut self.state.canonical,
            &mut self.state.local,
            &mut self.state.contested,
        ];
        for bucket in buckets {
            if let Some(existing) = bucket.remove(&key) {
                let mut archived = existing;
                if let Some(obj) = archived.as_object_mut() {
                    obj.insert("retracted".to_string(), json!(true));
                    obj.insert("superseded_by".to_string(), json!(event_id));
                }
                self.state
                    .archived
                    .entry(key.clone())
                    .or_default()
                    .push(archived);
            }
        }
    }

    /// Recompute `metadata.state_hash`: hash the state serialized with the
    /// `state_hash` field cleared.
    fn update_state_hash(&mut self) {
        self.state.metadata.state_hash = None;
        let hash = serde_json::to_value(&self.state)
            .ok()
            .map(|mut value| {
                if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
                    metadata.remove("state_hash");
                }
                value
            })
            .and_then(|value| canonical_hash_hex(&value).ok());
        self.state.metadata.state_hash = hash;
    }
}

fn subject_predicate_key(payload: &Map<String, Value>) -> Option<String> {
    let subject = payload.get("subject").and_then(Value::as_str)?;
    let predicate = payload.get("predicate").and_then(Value::as_str)?;
    Some(format!("{subject}:{predicate}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::EventTypeHandler;

    fn observation(event_id: &str, actor: &str, subject: &str, value: &str) -> Value {
        json!({
            "type": "OBSERVATION",
            "event_id": event_id,
            "actor": actor,
            "namespace": "local",
            "timestamp_utc": "2026-01-01T00:00:00Z",
            "payload": {"subject": subject, "predicate": "state", "value": value}
        })
    }

    #[test]
    fn empty_state_hash_is_stable() {
        let a = SovereignReducer::default();
        let b = SovereignReducer::default();
        assert!(a.state_hash().is_some());
        assert_eq!(a.state_hash(), b.state_hash());
    }

    #[test]
    fn observation_lands_in_local() {
        let mut reducer = SovereignReducer::default();
        reducer.apply_event(&observation("evt_1", "alice", "door", "open"));

        let entry = &reducer.state().local["door:state"];
        assert_eq!(entry["value"], "open");
        assert_eq!(entry["actor"], "alice");
        assert_eq!(entry["event_id"], "evt_1");
        assert_eq!(reducer.state().metadata.event_count, 1);
        assert_eq!(
            reducer.state().metadata.last_event_id.as_deref(),
            Some("evt_1")
        );
    }

    #[test]
    fn genesis_seeds_uid() {
        let mut reducer = SovereignReducer::default();
        reducer.apply_event(&json!({
            "type": "GENESIS",
            "event_id": "evt_g",
            "actor": "root",
            "payload": {"uid": "sovereign-1", "root_key_id": "bp1_x", "birth_timestamp": "t"}
        }));
        assert_eq!(reducer.state().metadata.uid.as_deref(), Some("sovereign-1"));
        assert_eq!(
            reducer.state().metadata.genesis_event_id.as_deref(),
            Some("evt_g")
        );
    }

    #[test]
    fn conflicting_actor_and_value_contests_the_key() {
        let mut reducer = SovereignReducer::default();
        reducer.apply_event(&observation("evt_1", "alice", "door", "open"));
        reducer.apply_event(&observation("evt_2", "bob", "door", "closed"));

        assert!(!reducer.state().local.contains_key("door:state"));
        let contested = &reducer.state().contested["door:state"];
        assert_eq!(contested["value"], "closed");
        assert_eq!(contested["actor"], "bob");
        let archived = &reducer.state().archived["door:state"];
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0]["actor"], "alice");
    }

    #[test]
    fn agreeing_actor_change_archives_but_keeps_key_live() {
        let mut reducer = SovereignReducer::default();
        reducer.apply_event(&observation("evt_1", "alice", "door", "open"));
        reducer.apply_event(&observation("evt_2", "bob", "door", "open"));

        let entry = &reducer.state().local["door:state"];
        assert_eq!(entry["actor"], "bob");
        assert!(!reducer.state().contested.contains_key("door:state"));
        assert_eq!(reducer.state().archived["door:state"].len(), 1);
    }

    #[test]
    fn canonical_assertion_goes_to_canonical_bucket() {
        let mut reducer = SovereignReducer::default();
        reducer.apply_event(&json!({
            "type": "ASSERTION",
            "event_id": "evt_1",
            "actor": "alice",
            "namespace": "canonical",
            "payload": {"subject": "sky", "predicate": "color", "value": "blue"}
        }));
        assert_eq!(reducer.state().canonical["sky:color"]["value"], "blue");
        assert!(reducer.state().local.is_empty());
    }

    #[test]
    fn attestation_promotes_at_default_threshold() {
        let mut reducer = SovereignReducer::default();
        reducer.apply_event(&observation("evt_1", "alice", "door", "open"));
        reducer.apply_event(&json!({
            "type": "ATTESTATION",
            "event_id": "evt_2",
            "actor": "bob",
            "payload": {
                "subject": "door",
                "predicate": "state",
                "value": "open",
                "target_event_id": "evt_1"
            }
        }));

        let canonical = &reducer.state().canonical["door:state"];
        assert_eq!(canonical["value"], "open");
        assert_eq!(canonical["provenance"], "evt_1");
        assert_eq!(canonical["attestations"], 1);
        assert!(!reducer.state().local.contains_key("door:state"));
    }

    #[test]
    fn attestation_below_threshold_does_not_promote() {
        let mut reducer = SovereignReducer::new(ReducerConfig {
            attestation_threshold: 2,
        });
        reducer.apply_event(&observation("evt_1", "alice", "door", "open"));
        reducer.apply_event(&json!({
            "type": "ATTESTATION",
            "event_id": "evt_2",
            "actor": "bob",
            "payload": {"subject": "door", "predicate": "state", "value": "open"}
        }));
        assert!(!reducer.state().canonical.contains_key("door:state"));
        assert!(reducer.state().local.contains_key("door:state"));

        reducer.apply_event(&json!({
            "type": "ATTESTATION",
            "event_id": "evt_3",
            "actor": "carol",
            "payload": {"subject": "door", "predicate": "state", "value": "open"}
        }));
        assert!(reducer.state().canonical.contains_key("door:state"));
    }

    #[test]
    fn retraction_archives_and_clears() {
        let mut reducer = SovereignReducer::default();
        reducer.apply_event(&observation("evt_1", "alice", "door", "open"));
        reducer.apply_event(&json!({
            "type": "RETRACTION",
            "event_id": "evt_2",
            "actor": "alice",
            "payload": {"subject": "door", "predicate": "state"}
        }));

        assert!(!reducer.state().local.contains_key("door:state"));
        let archived = &reducer.state().archived["door:state"];
        assert_eq!(archived[0]["retracted"], true);
        assert_eq!(archived[0]["superseded_by"], "evt_2");
    }

    #[test]
    fn key_lifecycle_events_do_not_touch_buckets() {
        let mut reducer = SovereignReducer::default();
        reducer.apply_event(&json!({
            "type": "KEY_REVOCATION",
            "event_id": "evt_1",
            "actor": "quorum",
            "payload": {"revoked_key_id": "bp1_old"}
        }));
        reducer.apply_event(&json!({
            "type": "KEY_PROMOTION",
            "event_id": "evt_2",
            "actor": "quorum",
            "payload": {
                "new_key_id": "bp1_new",
                "new_public_key_b64": "x",
                "algorithm": "Ed25519",
                "replaces_key_id": "bp1_old"
            }
        }));

        assert!(reducer.state().local.is_empty());
        assert_eq!(reducer.state().metadata.key_lifecycle.len(), 2);
        assert_eq!(
            reducer.state().metadata.key_lifecycle[0]["revoked_key_id"],
            "bp1_old"
        );
        assert_eq!(
            reducer.state().metadata.key_lifecycle[1]["new_key_id"],
            "bp1_new"
        );
    }

    #[test]
    fn unknown_types_are_counted_but_ignored() {
        let mut reducer = SovereignReducer::default();
        reducer.apply_event(&json!({
            "type": "com.acme.custom",
            "event_id": "evt_1",
            "actor": "alice",
            "payload": {"anything": true}
        }));
        assert_eq!(reducer.state().metadata.event_count, 1);
        assert!(reducer.state().local.is_empty());
        assert!(reducer.ignored_types().contains("com.acme.custom"));
    }

    #[test]
    fn registered_hook_folds_extension_events() {
        let mut registry = EventTypeRegistry::new();
        registry
            .register(
                "com.acme.counter",
                EventTypeHandler {
                    validator: None,
                    reducer_hook: Some(Box::new(|state, event| {
                        let key = "counter:total".to_string();
                        let prior = state
                            .local
                            .get(&key)
                            .and_then(|e| e.get("value"))
                            .and_then(Value::as_u64)
                            .unwrap_or(0);
                        let event_id = event
                            .get("event_id")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown_event");
                        state.local.insert(
                            key,
                            json!({"value": prior + 1, "event_id": event_id}),
                        );
                    })),
                },
            )
            .unwrap();

        let mut reducer = SovereignReducer::default();
        let event = json!({
            "type": "com.acme.counter",
            "event_id": "evt_1",
            "actor": "alice",
            "payload": {}
        });
        reducer.apply_event_with(&event, Some(&registry));
        assert_eq!(reducer.state().local["counter:total"]["value"], 1);
        assert!(reducer.ignored_types().is_empty());
    }

    #[test]
    fn replay_is_deterministic() {
        let events: Vec<Value> = (0..20)
            .map(|i| {
                observation(
                    &format!("evt_{i}"),
                    if i % 2 == 0 { "alice" } else { "bob" },
                    &format!("subject{}", i % 5),
                    &format!("v{i}"),
                )
            })
            .collect();

        let mut a = SovereignReducer::default();
        let mut b = SovereignReducer::default();
        a.apply_events(&events);
        b.apply_events(&events);

        assert_eq!(a.state_hash(), b.state_hash());
        assert_eq!(
            jcs_rs::canonicalize(&a.export_state().unwrap()).unwrap(),
            jcs_rs::canonicalize(&b.export_state().unwrap()).unwrap()
        );
    }

    #[test]
    fn state_hash_changes_with_each_event() {
        let mut reducer = SovereignReducer::default();
        let empty_hash = reducer.state_hash().map(str::to_string);
        reducer.apply_event(&observation("evt_1", "alice", "door", "open"));
        assert_ne!(reducer.state_hash().map(str::to_string), empty_hash);
    }

    #[test]
    fn resume_from_state_matches_straight_replay() {
        let events: Vec<Value> = (0..10)
            .map(|i| observation(&format!("evt_{i}"), "alice", "door", &format!("v{i}")))
            .collect();

        let mut full = SovereignReducer::default();
        full.apply_events(&events);

        let mut first_half = SovereignReducer::default();
        first_half.apply_events(&events[..5]);
        let mut resumed = SovereignReducer::from_state(first_half.state().clone());
        resumed.apply_events(&events[5..]);

        assert_eq!(full.state_hash(), resumed.state_hash());
    }
}
