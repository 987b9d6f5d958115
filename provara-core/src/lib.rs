//! provara-core — Provara Protocol v1.0 core implementation
//!
//! The integrity subsystem of a sovereign event vault:
//!
//! - Ed25519 signing and verification (RFC 8032)
//! - SHA-256 hashing and Merkle trees (FIPS 180-4)
//! - Content-addressed event envelopes and per-actor causal chains
//! - Key registry with rotation-aware resolution
//! - Deterministic reducer folding the log into namespaced state
//!
//! ## Example
//!
//! ```rust
//! use provara_core::{EventDraft, EventType, KeyPair, Namespace, verify_event_signature};
//! use rand::thread_rng;
//!
//! let keypair = KeyPair::generate(&mut thread_rng());
//!
//! let event = EventDraft {
//!     event_type: EventType::Observation,
//!     namespace: Namespace::Local,
//!     actor: "sensor_1".into(),
//!     ts_logical: 1,
//!     prev_event_hash: None,
//!     timestamp_utc: "2026-01-01T00:00:00Z".into(),
//!     payload: serde_json::json!({"subject": "door", "predicate": "state", "value": "open"}),
//! }
//! .sign(&keypair)
//! .unwrap();
//!
//! let value = event.to_value().unwrap();
//! assert!(verify_event_signature(&value, keypair.verifying_key()));
//! ```

pub use ed25519_dalek::VerifyingKey;
pub use jcs_rs::{canonical_hash, canonical_hash_hex, canonical_to_string, canonicalize};

pub mod chain;
pub mod error;
pub mod event;
pub mod hash;
pub mod plugins;
pub mod reducer;
pub mod registry;
pub mod signing;

pub use chain::{
    all_actors, chain_heads, detect_forks, duplicate_event_ids, next_ts_logical,
    verify_all_chains, verify_causal_chain, CausalFork,
};
pub use error::{ProvaraError, Result};
pub use event::{
    check_event_id, derive_event_id_value, is_tombstone, validate_event, Event, EventDraft,
    EventType, Namespace, MIGRATION_TYPE, REDACTION_TYPE, SEAL_TYPE, SPEC_VERSION,
};
pub use hash::{merkle_root_from_entries, merkle_root_hex, sha256_bytes, sha256_file, sha256_hex};
pub use plugins::{EventTypeHandler, EventTypeRegistry, RESERVED_EVENT_TYPES};
pub use reducer::{ReducerConfig, ReducerState, SovereignReducer, StateMetadata};
pub use registry::{new_key_entry, KeyEntry, KeyRegistry, KeyStatus};
pub use signing::{
    derive_key_id, sign_manifest, verify_event_signature, verify_manifest_signature,
    verifying_key_from_b64, KeyPair, ManifestSignature,
};
