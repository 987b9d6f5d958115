//! The append-only event log: `events/events.ndjson`.
//!
//! Single-writer, multi-reader. Appends take an exclusive advisory lock,
//! write whole canonical-JSON lines, and fsync before releasing, so readers
//! always see a consistent prefix without locking.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use fs2::FileExt;
use serde_json::Value;
use tracing::debug;

use provara_core::{
    chain, EventDraft, EventType, KeyPair, Namespace, ProvaraError, Result, SEAL_TYPE,
};

use crate::layout::VaultLayout;
use crate::now_utc_iso;

/// Handle on a vault's event log.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn open(layout: &VaultLayout) -> Self {
        EventLog {
            path: layout.events_file(),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// All events in file order. Whitespace-only lines are skipped; a line
    /// that is not valid JSON is a fatal error.
    pub fn read_all(&self) -> Result<Vec<Value>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }
        Ok(events)
    }

    /// Events paired with the byte offset just past their line, for
    /// checkpoint resume.
    pub fn read_with_offsets(&self) -> Result<Vec<(Value, u64)>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        self.stream()?.collect()
    }

    /// Events starting at a byte offset, for checkpoint resume.
    pub fn read_from_offset(&self, start: u64) -> Result<Vec<Value>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        self.stream_from(start)?
            .map(|item| item.map(|(event, _)| event))
            .collect()
    }

    /// Lazy line-by-line reader; memory stays bounded on logs of any size.
    pub fn stream(&self) -> Result<EventStream> {
        self.stream_from(0)
    }

    /// Lazy reader starting at a byte offset previously reported by a
    /// stream or checkpoint.
    pub fn stream_from(&self, start: u64) -> Result<EventStream> {
        use std::io::{Seek, SeekFrom};
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(start))?;
        Ok(EventStream {
            reader: BufReader::new(file),
            offset: start,
            line: String::new(),
        })
    }

    /// True once a seal event has been committed.
    pub fn is_sealed(&self) -> Result<bool> {
        let events = self.read_all()?;
        Ok(contains_seal(&events))
    }

    /// Append events under an exclusive advisory lock, refusing if sealed.
    /// Each line is flushed and fsynced before the lock is released.
    pub fn append(&self, events: &[Value]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;
        let result = self.append_locked(&file, events);
        let _ = fs2::FileExt::unlock(&file);
        result
    }

    fn append_locked(&self, mut file: &File, events: &[Value]) -> Result<()> {
        // Re-read under the lock: another writer may have sealed the vault.
        if self.is_sealed()? {
            return Err(ProvaraError::VaultSealed {
                context: self.path.display().to_string(),
            });
        }
        for event in events {
            let line = jcs_rs::canonicalize(event)?;
            file.write_all(&line)?;
            file.write_all(b"\n")?;
        }
        file.flush()?;
        file.sync_all()?;
        debug!(count = events.len(), "appended events");
        Ok(())
    }

    /// Replace the whole log atomically (tombstone redaction only).
    pub fn rewrite_all(&self, events: &[Value]) -> Result<()> {
        let lock_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        lock_file.lock_exclusive()?;
        let result = self.rewrite_locked(events);
        let _ = fs2::FileExt::unlock(&lock_file);
        result
    }

    fn rewrite_locked(&self, events: &[Value]) -> Result<()> {
        let tmp_path = self.path.with_extension("ndjson.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            for event in events {
                let line = jcs_rs::canonicalize(event)?;
                tmp.write_all(&line)?;
                tmp.write_all(b"\n")?;
            }
            tmp.flush()?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// Iterator over `(event, byte_offset_after_line)` pairs.
pub struct EventStream {
    reader: BufReader<File>,
    offset: u64,
    line: String,
}

impl Iterator for EventStream {
    type Item = Result<(Value, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            let read = match self.reader.read_line(&mut self.line) {
                Ok(n) => n,
                Err(err) => return Some(Err(err.into())),
            };
            if read == 0 {
                return None;
            }
            self.offset += read as u64;
            if self.line.trim().is_empty() {
                continue;
            }
            return Some(
                serde_json::from_str(self.line.trim_end())
                    .map(|event| (event, self.offset))
                    .map_err(Into::into),
            );
        }
    }
}

pub(crate) fn contains_seal(events: &[Value]) -> bool {
    events
        .iter()
        .any(|e| e.get("type").and_then(Value::as_str) == Some(SEAL_TYPE))
}

/// Sign a new event on `actor`'s chain and append it.
///
/// Chain position (`prev_event_hash`, `ts_logical`) is derived from the
/// current log contents.
pub fn append_signed_event(
    layout: &VaultLayout,
    event_type: EventType,
    namespace: Namespace,
    actor: &str,
    payload: Value,
    keypair: &KeyPair,
) -> Result<Value> {
    let log = EventLog::open(layout);
    let events = log.read_all()?;

    let heads = chain::chain_heads(&events);
    let draft = EventDraft {
        event_type,
        namespace,
        actor: actor.to_string(),
        ts_logical: chain::next_ts_logical(&events, actor),
        prev_event_hash: heads.get(actor).cloned(),
        timestamp_utc: now_utc_iso(),
        payload,
    };
    let event = draft.sign(keypair)?;
    let value = event.to_value()?;
    log.append(std::slice::from_ref(&value))?;
    Ok(value)
}

/// Append the seal event, after which the log refuses further appends.
pub fn seal_vault(layout: &VaultLayout, actor: &str, keypair: &KeyPair) -> Result<Value> {
    let log = EventLog::open(layout);
    let events = log.read_all()?;
    let final_event_count = events.len() as u64;
    let seal = append_signed_event(
        layout,
        EventType::Extension(SEAL_TYPE.to_string()),
        Namespace::Canonical,
        actor,
        serde_json::json!({
            "sealed_at_utc": now_utc_iso(),
            "final_event_count": final_event_count,
        }),
        keypair,
    )?;
    crate::state::finalize_mutation(layout, Some(keypair))?;
    Ok(seal)
}
