//! The signed event envelope and its content-addressed identity.
//!
//! An event id commits to every field except `event_id` itself and `sig`:
//! `event_id = "evt_" + lower_hex(SHA-256(canonical(E \ {event_id, sig})))[:24]`.
//! Any mutation of the envelope changes the id.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{ProvaraError, Result};
use crate::signing::KeyPair;

/// Vault layout version understood by this implementation.
pub const SPEC_VERSION: &str = "1.0";

/// Reverse-domain type of the paired redaction record.
pub const REDACTION_TYPE: &str = "com.provara.redaction";
/// Reverse-domain type that freezes a vault.
pub const SEAL_TYPE: &str = "com.provara.vault.seal";
/// Reverse-domain type recording a layout version bump.
pub const MIGRATION_TYPE: &str = "com.provara.migration";

/// Event type tag. Core types are unprefixed; everything else uses
/// reverse-domain notation and round-trips through `Extension`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventType {
    Genesis,
    Observation,
    Assertion,
    Attestation,
    Retraction,
    KeyRevocation,
    KeyPromotion,
    ReducerEpoch,
    Extension(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Genesis => "GENESIS",
            EventType::Observation => "OBSERVATION",
            EventType::Assertion => "ASSERTION",
            EventType::Attestation => "ATTESTATION",
            EventType::Retraction => "RETRACTION",
            EventType::KeyRevocation => "KEY_REVOCATION",
            EventType::KeyPromotion => "KEY_PROMOTION",
            EventType::ReducerEpoch => "REDUCER_EPOCH",
            EventType::Extension(name) => name,
        }
    }

    pub fn is_core(&self) -> bool {
        !matches!(self, EventType::Extension(_))
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            "GENESIS" => EventType::Genesis,
            "OBSERVATION" => EventType::Observation,
            "ASSERTION" => EventType::Assertion,
            "ATTESTATION" => EventType::Attestation,
            "RETRACTION" => EventType::Retraction,
            "KEY_REVOCATION" => EventType::KeyRevocation,
            "KEY_PROMOTION" => EventType::KeyPromotion,
            "REDUCER_EPOCH" => EventType::ReducerEpoch,
            other => EventType::Extension(other.to_string()),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Err(D::Error::custom("event type must not be empty"));
        }
        Ok(EventType::from(s.as_str()))
    }
}

/// Namespace an event writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Canonical,
    Local,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Canonical => "canonical",
            Namespace::Local => "local",
        }
    }
}

/// A fully-formed event as it appears on the wire and on disk.
///
/// `prev_event_hash` is always serialized (`null` at a chain head); `sig` is
/// omitted until the event is signed, because the signature covers the
/// envelope without the `sig` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub namespace: Namespace,
    pub actor: String,
    pub actor_key_id: String,
    pub ts_logical: u64,
    pub prev_event_hash: Option<String>,
    pub timestamp_utc: String,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

impl Event {
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Envelope as signed: every field except `sig`.
    pub fn signing_payload(&self) -> Result<Value> {
        let mut value = self.to_value()?;
        if let Some(map) = value.as_object_mut() {
            map.remove("sig");
        }
        Ok(value)
    }
}

/// Everything needed to mint an event, before identity and signature exist.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_type: EventType,
    pub namespace: Namespace,
    pub actor: String,
    pub ts_logical: u64,
    pub prev_event_hash: Option<String>,
    pub timestamp_utc: String,
    pub payload: Value,
}

impl EventDraft {
    /// Derive the event id, then sign the canonical envelope.
    pub fn sign(self, keypair: &KeyPair) -> Result<Event> {
        let mut event = Event {
            event_id: String::new(),
            event_type: self.event_type,
            namespace: self.namespace,
            actor: self.actor,
            actor_key_id: keypair.key_id(),
            ts_logical: self.ts_logical,
            prev_event_hash: self.prev_event_hash,
            timestamp_utc: self.timestamp_utc,
            payload: self.payload,
            sig: None,
        };

        event.event_id = derive_event_id_value(&event.to_value()?)?;

        let signing_bytes = jcs_rs::canonicalize(&event.signing_payload()?)?;
        event.sig = Some(keypair.sign_b64(&signing_bytes));
        Ok(event)
    }
}

/// Derive an event id from an envelope value, ignoring any `event_id` and
/// `sig` fields already present.
pub fn derive_event_id_value(event: &Value) -> Result<String> {
    let map = event
        .as_object()
        .ok_or_else(|| ProvaraError::RequiredFieldMissing {
            context: "event must be a JSON object".into(),
        })?;

    let mut content = map.clone();
    content.remove("event_id");
    content.remove("sig");

    let hash = jcs_rs::canonical_hash(&Value::Object(content))?;
    Ok(format!("evt_{}", hex::encode(&hash[0..12])))
}

/// Recompute and compare an event's id against its content.
pub fn check_event_id(event: &Value) -> Result<()> {
    let claimed = event
        .get("event_id")
        .and_then(Value::as_str)
        .ok_or_else(|| ProvaraError::RequiredFieldMissing {
            context: "event_id".into(),
        })?;
    let derived = derive_event_id_value(event)?;
    if claimed != derived {
        return Err(ProvaraError::HashMismatch {
            context: format!("event_id {claimed} does not match content hash {derived}"),
        });
    }
    Ok(())
}

fn is_event_id(s: &str) -> bool {
    s.len() == 28
        && s.starts_with("evt_")
        && s.as_bytes()[4..]
            .iter()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

const REQUIRED_STRING_FIELDS: &[&str] =
    &["event_id", "type", "actor", "actor_key_id", "timestamp_utc", "sig"];

/// Structural validation of one envelope: required fields, namespace,
/// identifier formats, and type-specific payload requirements.
pub fn validate_event(event: &Value) -> Result<()> {
    let map = event
        .as_object()
        .ok_or_else(|| ProvaraError::RequiredFieldMissing {
            context: "event must be a JSON object".into(),
        })?;

    for field in REQUIRED_STRING_FIELDS {
        match map.get(*field) {
            Some(Value::String(s)) if !s.is_empty() => {}
            _ => {
                return Err(ProvaraError::RequiredFieldMissing {
                    context: (*field).to_string(),
                })
            }
        }
    }

    match map.get("namespace").and_then(Value::as_str) {
        Some("canonical") | Some("local") => {}
        Some(other) => {
            return Err(ProvaraError::NamespaceMismatch {
                context: other.to_string(),
            })
        }
        None => {
            return Err(ProvaraError::RequiredFieldMissing {
                context: "namespace".into(),
            })
        }
    }

    if map.get("ts_logical").and_then(Value::as_u64).is_none() {
        return Err(ProvaraError::RequiredFieldMissing {
            context: "ts_logical".into(),
        });
    }

    match map.get("prev_event_hash") {
        Some(Value::Null) => {}
        Some(Value::String(prev)) if is_event_id(prev) => {}
        Some(Value::String(prev)) => {
            return Err(ProvaraError::HashFormat {
                context: format!("prev_event_hash {prev}"),
            })
        }
        _ => {
            return Err(ProvaraError::RequiredFieldMissing {
                context: "prev_event_hash".into(),
            })
        }
    }

    let event_id = map.get("event_id").and_then(Value::as_str).unwrap_or("");
    if !is_event_id(event_id) {
        return Err(ProvaraError::HashFormat {
            context: format!("event_id {event_id}"),
        });
    }

    let payload = map
        .get("payload")
        .and_then(Value::as_object)
        .ok_or_else(|| ProvaraError::RequiredFieldMissing {
            context: "payload".into(),
        })?;

    let event_type = map.get("type").and_then(Value::as_str).unwrap_or("");
    validate_payload_fields(event_type, payload)
}

fn validate_payload_fields(event_type: &str, payload: &Map<String, Value>) -> Result<()> {
    let required: &[&str] = match EventType::from(event_type) {
        EventType::Genesis => &["uid", "root_key_id", "birth_timestamp"],
        EventType::Observation | EventType::Assertion => &["subject", "predicate"],
        EventType::Attestation => &["subject", "predicate", "value"],
        EventType::KeyRevocation => &["revoked_key_id"],
        EventType::KeyPromotion => &[
            "new_key_id",
            "new_public_key_b64",
            "algorithm",
            "replaces_key_id",
        ],
        EventType::ReducerEpoch => &["epoch_id", "reducer_hash"],
        EventType::Retraction => &["subject", "predicate"],
        EventType::Extension(_) => &[],
    };

    for field in required {
        if !payload.contains_key(*field) {
            return Err(ProvaraError::RequiredFieldMissing {
                context: format!("{event_type} payload field {field}"),
            });
        }
    }
    Ok(())
}

/// True when a payload is a redaction tombstone.
pub fn is_tombstone(payload: &Value) -> bool {
    payload.get("redacted").and_then(Value::as_bool) == Some(true)
        && payload.get("original_payload_hash").is_some()
}
