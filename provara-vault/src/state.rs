//! Derived state: replaying the log and caching `state/current_state.json`.

use std::fs;

use serde_json::Value;

use provara_core::{EventTypeRegistry, ReducerConfig, Result, SovereignReducer};

use crate::layout::VaultLayout;
use crate::log::EventLog;

/// Fold the whole log into a fresh reducer.
pub fn replay(layout: &VaultLayout) -> Result<SovereignReducer> {
    replay_with(layout, None)
}

/// Fold the whole log, consulting plugin reducer hooks.
pub fn replay_with(
    layout: &VaultLayout,
    registry: Option<&EventTypeRegistry>,
) -> Result<SovereignReducer> {
    let events = EventLog::open(layout).read_all()?;
    let mut reducer = SovereignReducer::new(ReducerConfig::default());
    for event in &events {
        reducer.apply_event_with(event, registry);
    }
    Ok(reducer)
}

/// Cache the reducer output under `state/`.
pub fn write_current_state(layout: &VaultLayout, reducer: &SovereignReducer) -> Result<()> {
    let state = reducer.export_state()?;
    if let Some(parent) = layout.state_file().parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(layout.state_file(), jcs_rs::canonicalize(&state)?)?;
    Ok(())
}

/// Re-derive everything that follows from the log after a mutation:
/// replay into `state/current_state.json`, then rebuild the manifest
/// artifacts (re-signed when a signer is available). Returns the new
/// state hash.
pub fn finalize_mutation(
    layout: &VaultLayout,
    signer: Option<&provara_core::KeyPair>,
) -> Result<Option<String>> {
    let reducer = replay(layout)?;
    write_current_state(layout, &reducer)?;
    let hash = reducer.state_hash().map(str::to_string);
    crate::manifest::refresh_artifacts(layout, signer)?;
    Ok(hash)
}

/// The cached state, if one has been written.
pub fn load_current_state(layout: &VaultLayout) -> Result<Option<Value>> {
    let path = layout.state_file();
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&raw)?))
}
