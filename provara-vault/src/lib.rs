//! provara-vault — the Provara vault on disk.
//!
//! Everything that touches the filesystem lives here: bootstrap, the
//! append-only log and its locking, manifest and Merkle root sealing, the
//! verification pipeline, delta sync, key rotation, tombstone redaction,
//! streaming checkpoints, layout migration, backups, and the crypto-shred
//! sidecar. The cryptographic core is `provara-core`; this crate arranges
//! its pieces around a directory tree.

use chrono::{SecondsFormat, Utc};

pub mod backup;
pub mod bootstrap;
pub mod checkpoint;
pub mod layout;
pub mod log;
pub mod manifest;
pub mod migrate;
pub mod policy;
pub mod privacy;
pub mod redaction;
pub mod rotation;
pub mod state;
pub mod sync;
pub mod verify;

pub use backup::backup_vault;
pub use bootstrap::{bootstrap_vault, successor_options, BootstrapOptions, BootstrapResult};
pub use checkpoint::{
    create_checkpoint, load_latest_checkpoint, resume_from_checkpoint, save_checkpoint,
    streaming_replay_with_snapshots, verify_checkpoint, CheckpointRecord, ResumeReport,
    StreamingReducer, DEFAULT_SNAPSHOT_INTERVAL,
};
pub use layout::{VaultLayout, MANIFEST_EXCLUDE, REQUIRED_FILES};
pub use log::{append_signed_event, seal_vault, EventLog, EventStream};
pub use manifest::{
    build_manifest, check_manifest_against_disk, load_manifest, load_merkle_root,
    refresh_artifacts, FileEntry, Manifest,
};
pub use migrate::{migrate_vault, MigrationReport};
pub use policy::{load_sync_contract, Authority, RetentionPolicy, SafetyPolicy, SyncContract};
pub use privacy::{PrivacyKeyStore, PrivacyWrapper, PRIVACY_SCHEME};
pub use redaction::redact_event;
pub use rotation::{rotate_key, RotationResult};
pub use state::{finalize_mutation, load_current_state, replay, replay_with, write_current_state};
pub use sync::{
    compute_state_vector, export_delta, import_delta, sync_vaults, MergeResult, RejectedEvent,
    SyncReport,
};
pub use verify::{run_self_test, verify_vault, EventFailure, VerifyCheck, VerifyReport};

/// Current UTC time in ISO 8601, the format every on-disk timestamp uses.
pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
