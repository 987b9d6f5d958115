//! Streaming replay with signed, resumable checkpoints.
//!
//! The streaming reducer consumes the log one line at a time, so memory
//! stays bounded no matter how long the log grows. Every `interval` events
//! it can emit a snapshot; a later replay seeks to the snapshot's byte
//! offset instead of starting over.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use provara_core::{
    KeyPair, KeyRegistry, ProvaraError, ReducerConfig, ReducerState, Result, SovereignReducer,
    VerifyingKey,
};

use crate::layout::VaultLayout;
use crate::log::EventLog;
use crate::manifest::{load_merkle_root, refresh_artifacts};
use crate::state::write_current_state;

/// Default snapshot cadence.
pub const DEFAULT_SNAPSHOT_INTERVAL: u64 = 1000;

/// One signed snapshot, persisted as `checkpoints/*.chk`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub event_count: u64,
    pub last_event_id: Option<String>,
    pub last_event_offset: u64,
    pub actor_chain_heads: BTreeMap<String, String>,
    pub type_counts: BTreeMap<String, u64>,
    pub merkle_root: String,
    pub state_hash: Option<String>,
    pub state: ReducerState,
    pub key_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

impl CheckpointRecord {
    fn sign(&mut self, keypair: &KeyPair) -> Result<()> {
        self.key_id = keypair.key_id();
        self.sig = None;
        let bytes = jcs_rs::canonicalize(&serde_json::to_value(&*self)?)?;
        self.sig = Some(keypair.sign_b64(&bytes));
        Ok(())
    }
}

/// Verify a checkpoint record's detached signature.
pub fn verify_checkpoint(record: &Value, public_key: &VerifyingKey) -> bool {
    provara_core::verify_event_signature(record, public_key)
}

/// Incremental reducer tracking the bookkeeping a snapshot needs.
pub struct StreamingReducer {
    reducer: SovereignReducer,
    event_count: u64,
    last_event_id: Option<String>,
    last_event_offset: u64,
    actor_chain_heads: BTreeMap<String, String>,
    type_counts: BTreeMap<String, u64>,
}

impl Default for StreamingReducer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingReducer {
    pub fn new() -> Self {
        StreamingReducer {
            reducer: SovereignReducer::new(ReducerConfig::default()),
            event_count: 0,
            last_event_id: None,
            last_event_offset: 0,
            actor_chain_heads: BTreeMap::new(),
            type_counts: BTreeMap::new(),
        }
    }

    /// Pick up where a snapshot left off.
    pub fn from_checkpoint(record: &CheckpointRecord) -> Self {
        StreamingReducer {
            reducer: SovereignReducer::from_state(record.state.clone()),
            event_count: record.event_count,
            last_event_id: record.last_event_id.clone(),
            last_event_offset: record.last_event_offset,
            actor_chain_heads: record.actor_chain_heads.clone(),
            type_counts: record.type_counts.clone(),
        }
    }

    /// Consume one event; `offset_after` is the byte offset past its line.
    pub fn feed(&mut self, event: &Value, offset_after: u64) {
        self.reducer.apply_event(event);
        self.event_count += 1;
        self.last_event_offset = offset_after;
        if let Some(id) = event.get("event_id").and_then(Value::as_str) {
            self.last_event_id = Some(id.to_string());
            if let Some(actor) = event.get("actor").and_then(Value::as_str) {
                self.actor_chain_heads
                    .insert(actor.to_string(), id.to_string());
            }
        }
        if let Some(type_name) = event.get("type").and_then(Value::as_str) {
            *self.type_counts.entry(type_name.to_string()).or_insert(0) += 1;
        }
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    pub fn reducer(&self) -> &SovereignReducer {
        &self.reducer
    }

    /// Capture and sign a snapshot of the current position.
    pub fn snapshot(&self, merkle_root: String, keypair: &KeyPair) -> Result<CheckpointRecord> {
        let mut record = CheckpointRecord {
            event_count: self.event_count,
            last_event_id: self.last_event_id.clone(),
            last_event_offset: self.last_event_offset,
            actor_chain_heads: self.actor_chain_heads.clone(),
            type_counts: self.type_counts.clone(),
            merkle_root,
            state_hash: self.reducer.state_hash().map(str::to_string),
            state: self.reducer.state().clone(),
            key_id: String::new(),
            sig: None,
        };
        record.sign(keypair)?;
        Ok(record)
    }
}

fn checkpoint_path(layout: &VaultLayout, event_count: u64) -> PathBuf {
    layout
        .checkpoints_dir()
        .join(format!("{event_count:012}.chk"))
}

/// Write a checkpoint record to `checkpoints/`.
pub fn save_checkpoint(layout: &VaultLayout, record: &CheckpointRecord) -> Result<PathBuf> {
    fs::create_dir_all(layout.checkpoints_dir())?;
    let path = checkpoint_path(layout, record.event_count);
    fs::write(&path, jcs_rs::canonicalize(&serde_json::to_value(record)?)?)?;
    Ok(path)
}

/// The checkpoint with the highest event count, if any.
pub fn load_latest_checkpoint(layout: &VaultLayout) -> Result<Option<CheckpointRecord>> {
    let dir = layout.checkpoints_dir();
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut best: Option<CheckpointRecord> = None;
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("chk") {
            continue;
        }
        let record: CheckpointRecord = serde_json::from_str(&fs::read_to_string(&path)?)?;
        if best
            .as_ref()
            .map(|b| record.event_count > b.event_count)
            .unwrap_or(true)
        {
            best = Some(record);
        }
    }
    Ok(best)
}

/// Replay the full log in streaming fashion and persist a fresh checkpoint.
pub fn create_checkpoint(layout: &VaultLayout, keypair: &KeyPair) -> Result<CheckpointRecord> {
    let log = EventLog::open(layout);
    let mut streaming = StreamingReducer::new();
    for item in log.stream()? {
        let (event, offset) = item?;
        streaming.feed(&event, offset);
    }

    let merkle_root = load_merkle_root(layout).unwrap_or_default();
    let record = streaming.snapshot(merkle_root, keypair)?;
    save_checkpoint(layout, &record)?;
    write_current_state(layout, streaming.reducer())?;
    refresh_artifacts(layout, Some(keypair))?;
    info!(events = record.event_count, "checkpoint created");
    Ok(record)
}

/// Outcome of a checkpoint resume.
#[derive(Debug)]
pub struct ResumeReport {
    pub resumed_from_event_count: u64,
    pub events_replayed: u64,
    pub state_hash: Option<String>,
}

/// Resume replay from the latest checkpoint: verify its signature, seek to
/// its byte offset, and stream only the suffix.
pub fn resume_from_checkpoint(layout: &VaultLayout) -> Result<ResumeReport> {
    let record = load_latest_checkpoint(layout)?.ok_or_else(|| {
        ProvaraError::VaultStructureInvalid {
            context: "no checkpoint to resume from".into(),
        }
    })?;

    let registry = KeyRegistry::load(&layout.keys_file())?;
    let public_key = registry.resolve_historical(&record.key_id)?;
    let record_value = serde_json::to_value(&record)?;
    if !verify_checkpoint(&record_value, &public_key) {
        return Err(ProvaraError::InvalidSignature {
            context: format!("checkpoint at event_count {}", record.event_count),
        });
    }

    let log = EventLog::open(layout);
    let mut streaming = StreamingReducer::from_checkpoint(&record);
    let resumed_from = streaming.event_count();
    for item in log.stream_from(record.last_event_offset)? {
        let (event, offset) = item?;
        streaming.feed(&event, offset);
    }

    write_current_state(layout, streaming.reducer())?;
    let report = ResumeReport {
        resumed_from_event_count: resumed_from,
        events_replayed: streaming.event_count() - resumed_from,
        state_hash: streaming.reducer().state_hash().map(str::to_string),
    };
    debug!(
        resumed_from = report.resumed_from_event_count,
        replayed = report.events_replayed,
        "resumed from checkpoint"
    );
    Ok(report)
}

/// Full streaming replay with a snapshot every `interval` events.
pub fn streaming_replay_with_snapshots(
    layout: &VaultLayout,
    interval: u64,
    keypair: &KeyPair,
) -> Result<Vec<CheckpointRecord>> {
    let interval = interval.max(1);
    let log = EventLog::open(layout);
    let merkle_root = load_merkle_root(layout).unwrap_or_default();

    let mut streaming = StreamingReducer::new();
    let mut snapshots = Vec::new();
    for item in log.stream()? {
        let (event, offset) = item?;
        streaming.feed(&event, offset);
        if streaming.event_count() % interval == 0 {
            let record = streaming.snapshot(merkle_root.clone(), keypair)?;
            save_checkpoint(layout, &record)?;
            snapshots.push(record);
        }
    }
    write_current_state(layout, streaming.reducer())?;
    refresh_artifacts(layout, Some(keypair))?;
    Ok(snapshots)
}
