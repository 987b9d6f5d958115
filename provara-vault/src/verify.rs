//! The vault verification pipeline.
//!
//! Verification is all-or-nothing per vault: every failed invariant is
//! collected and reported, and any single failure fails the vault. Only I/O
//! errors abort the walk.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;

use serde_json::Value;
use tracing::{debug, warn};

use provara_core::{
    chain, check_event_id, is_tombstone, validate_event, verify_event_signature,
    verify_manifest_signature, KeyRegistry, ProvaraError, Result, VerifyingKey, REDACTION_TYPE,
};

use crate::layout::VaultLayout;
use crate::log::EventLog;
use crate::manifest::{check_manifest_against_disk, load_manifest, load_merkle_root};
use crate::state::{load_current_state, replay};

/// One named invariant check.
#[derive(Debug, Clone)]
pub struct VerifyCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

/// One failing event, with the violated invariant.
#[derive(Debug, Clone)]
pub struct EventFailure {
    pub event_id: String,
    pub code: String,
    pub spec_section: String,
    pub message: String,
}

/// Outcome of a full vault verification.
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub vault_path: String,
    pub checks: Vec<VerifyCheck>,
    pub failures: Vec<EventFailure>,
    pub event_count: u64,
    pub actor_count: u64,
    /// Redaction records for tombstoned events.
    pub redactions: Vec<Value>,
    pub chain_integrity: bool,
    pub signature_integrity: bool,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty() && self.checks.iter().all(|c| c.passed)
    }

    fn push(&mut self, name: &str, result: Result<()>) {
        match result {
            Ok(()) => self.checks.push(VerifyCheck {
                name: name.to_string(),
                passed: true,
                detail: String::new(),
            }),
            Err(err) => {
                warn!(check = name, error = %err, "verification check failed");
                self.checks.push(VerifyCheck {
                    name: name.to_string(),
                    passed: false,
                    detail: err.to_string(),
                });
            }
        }
    }

    fn fail_event(&mut self, event_id: &str, err: &ProvaraError) {
        self.failures.push(EventFailure {
            event_id: event_id.to_string(),
            code: err.code().to_string(),
            spec_section: err.spec_section().to_string(),
            message: err.to_string(),
        });
    }

    /// Machine-readable `key=value` lines for CI outputs.
    pub fn github_outputs(&self) -> String {
        let status = if self.passed() { "PASS" } else { "FAIL" };
        format!(
            "status={status}\nevent-count={}\nactor-count={}\nchain-integrity={}\nsignature-integrity={}\n",
            self.event_count, self.actor_count, self.chain_integrity, self.signature_integrity,
        )
    }

    /// Markdown job summary with pass/fail icons.
    pub fn markdown_summary(&self) -> String {
        let icon = if self.passed() { "✅" } else { "❌" };
        let status = if self.passed() { "PASS" } else { "FAIL" };
        let mut out = String::new();
        let _ = writeln!(out, "## {icon} Provara Vault Verified\n");
        let _ = writeln!(out, "| Property | Value |");
        let _ = writeln!(out, "|----------|-------|");
        let _ = writeln!(out, "| Status | **{status}** |");
        let _ = writeln!(out, "| Events | {} |", self.event_count);
        let _ = writeln!(out, "| Actors | {} |", self.actor_count);
        let _ = writeln!(
            out,
            "| Chain integrity | {} |",
            if self.chain_integrity { "✓" } else { "✗" }
        );
        let _ = writeln!(
            out,
            "| Signature integrity | {} |",
            if self.signature_integrity { "✓" } else { "✗" }
        );
        let failed: Vec<&VerifyCheck> = self.checks.iter().filter(|c| !c.passed).collect();
        if !failed.is_empty() || !self.failures.is_empty() {
            let _ = writeln!(out, "\n**Errors:**");
            for check in failed {
                let _ = writeln!(out, "- {}: {}", check.name, check.detail);
            }
            for failure in &self.failures {
                let _ = writeln!(
                    out,
                    "- {} [{} \u{a7}{}]: {}",
                    failure.event_id, failure.code, failure.spec_section, failure.message
                );
            }
        }
        out
    }
}

/// Resolve a signer for log verification: strict first, then historical when
/// the log itself carries the KEY_REVOCATION that retired the key.
pub(crate) fn resolve_for_log(
    registry: &KeyRegistry,
    key_id: &str,
    events: &[Value],
) -> Result<VerifyingKey> {
    match registry.resolve(key_id) {
        Ok(key) => Ok(key),
        Err(ProvaraError::KeyNotFound { .. }) if has_revocation_for(events, key_id) => {
            registry.resolve_historical(key_id)
        }
        Err(err) => Err(err),
    }
}

fn has_revocation_for(events: &[Value], key_id: &str) -> bool {
    events.iter().any(|e| {
        e.get("type").and_then(Value::as_str) == Some("KEY_REVOCATION")
            && e.get("payload")
                .and_then(|p| p.get("revoked_key_id"))
                .and_then(Value::as_str)
                == Some(key_id)
    })
}

/// Run every integrity check against a vault.
pub fn verify_vault(layout: &VaultLayout) -> Result<VerifyReport> {
    let mut report = VerifyReport {
        vault_path: layout.root().display().to_string(),
        chain_integrity: true,
        signature_integrity: true,
        ..VerifyReport::default()
    };

    report.push("required_files", layout.check_required_files());

    // Manifest artifacts: entries match disk, root matches manifest, and the
    // stored signature covers the current root.
    let manifest = match load_manifest(layout) {
        Ok(manifest) => {
            report.push("manifest_files", check_manifest_against_disk(layout, &manifest));
            Some(manifest)
        }
        Err(err) => {
            report.push("manifest_files", Err(err));
            None
        }
    };

    let stored_root = load_merkle_root(layout).ok();
    if let (Some(manifest), Some(stored)) = (&manifest, &stored_root) {
        let recomputed = manifest.merkle_root()?;
        let result = if !provara_core::hash::is_hex_digest(stored) {
            Err(ProvaraError::HashFormat {
                context: format!("merkle_root.txt holds {stored}"),
            })
        } else if &recomputed == stored {
            Ok(())
        } else {
            Err(ProvaraError::HashMismatch {
                context: format!("merkle_root.txt {stored} != recomputed {recomputed}"),
            })
        };
        report.push("merkle_root", result);
    } else {
        report.push(
            "merkle_root",
            Err(ProvaraError::VaultStructureInvalid {
                context: "merkle_root.txt unreadable".into(),
            }),
        );
    }

    let registry = KeyRegistry::load(&layout.keys_file())?;

    report.push(
        "manifest_signature",
        check_manifest_signature(layout, &registry, stored_root.as_deref()),
    );

    // Event log checks.
    let events = EventLog::open(layout).read_all()?;
    report.event_count = events.len() as u64;
    report.actor_count = chain::all_actors(&events).len() as u64;

    let redaction_records: Vec<&Value> = events
        .iter()
        .filter(|e| e.get("type").and_then(Value::as_str) == Some(REDACTION_TYPE))
        .collect();

    for dup in chain::duplicate_event_ids(&events) {
        let err = ProvaraError::DuplicateEventId { context: dup.clone() };
        report.fail_event(&dup, &err);
    }

    let mut tombstoned: BTreeSet<String> = BTreeSet::new();
    for event in &events {
        let event_id = event
            .get("event_id")
            .and_then(Value::as_str)
            .unwrap_or("<missing event_id>")
            .to_string();

        let payload = event.get("payload").cloned().unwrap_or(Value::Null);
        if is_tombstone(&payload) {
            // Tombstones intentionally fail signature and content checks;
            // record the paired redaction event instead.
            tombstoned.insert(event_id.clone());
            if let Some(record) = redaction_records.iter().find(|r| {
                r.get("payload")
                    .and_then(|p| p.get("target_event_id"))
                    .and_then(Value::as_str)
                    == Some(event_id.as_str())
            }) {
                report.redactions.push((*record).clone());
            } else {
                let err = ProvaraError::HashMismatch {
                    context: format!("tombstone {event_id} has no paired redaction event"),
                };
                report.fail_event(&event_id, &err);
            }
            continue;
        }

        if let Err(err) = validate_event(event) {
            report.fail_event(&event_id, &err);
            continue;
        }
        if let Err(err) = check_event_id(event) {
            report.fail_event(&event_id, &err);
            continue;
        }

        let key_id = event
            .get("actor_key_id")
            .and_then(Value::as_str)
            .unwrap_or("");
        match resolve_for_log(&registry, key_id, &events) {
            Ok(public_key) => {
                if !verify_event_signature(event, &public_key) {
                    report.signature_integrity = false;
                    let err = ProvaraError::InvalidSignature {
                        context: event_id.clone(),
                    };
                    report.fail_event(&event_id, &err);
                }
            }
            Err(err) => {
                report.signature_integrity = false;
                report.fail_event(&event_id, &err);
            }
        }
    }

    for (actor, ok) in chain::verify_all_chains(&events) {
        if !ok {
            report.chain_integrity = false;
            let err = ProvaraError::BrokenCausalChain {
                context: format!("actor {actor}"),
            };
            report.fail_event(&actor, &err);
        }
    }

    for fork in chain::detect_forks(&events) {
        report.chain_integrity = false;
        let err = ProvaraError::ForkDetected {
            context: format!(
                "actor {} at {:?}: {}",
                fork.actor_id,
                fork.fork_point_event_id,
                fork.competing_event_ids.join(", ")
            ),
        };
        report.fail_event(&fork.actor_id, &err);
    }

    // Replay determinism: the cached state, when present, must match.
    let reducer = replay(layout)?;
    let replay_result = match load_current_state(layout)? {
        Some(cached) => {
            let cached_hash = cached
                .get("metadata")
                .and_then(|m| m.get("state_hash"))
                .and_then(Value::as_str);
            if cached_hash == reducer.state_hash() {
                Ok(())
            } else {
                Err(ProvaraError::HashMismatch {
                    context: format!(
                        "cached state_hash {:?} != replayed {:?}",
                        cached_hash,
                        reducer.state_hash()
                    ),
                })
            }
        }
        None => Ok(()),
    };
    report.push("state_replay", replay_result);

    debug!(
        events = report.event_count,
        actors = report.actor_count,
        tombstones = tombstoned.len(),
        passed = report.passed(),
        "verification finished"
    );
    Ok(report)
}

fn check_manifest_signature(
    layout: &VaultLayout,
    registry: &KeyRegistry,
    expected_root: Option<&str>,
) -> Result<()> {
    let raw = fs::read_to_string(layout.manifest_sig_file())?;
    let record: Value = serde_json::from_str(&raw)?;
    let key_id = record
        .get("key_id")
        .and_then(Value::as_str)
        .ok_or_else(|| ProvaraError::RequiredFieldMissing {
            context: "manifest.sig key_id".into(),
        })?;
    let public_key = registry.resolve_historical(key_id)?;
    if !verify_manifest_signature(&record, &public_key, expected_root) {
        return Err(ProvaraError::InvalidSignature {
            context: "manifest.sig".into(),
        });
    }
    Ok(())
}

/// End-to-end self-test: the full pipeline must pass.
pub fn run_self_test(layout: &VaultLayout) -> Result<()> {
    let report = verify_vault(layout)?;
    if report.passed() {
        return Ok(());
    }
    let first = report
        .checks
        .iter()
        .find(|c| !c.passed)
        .map(|c| format!("{}: {}", c.name, c.detail))
        .or_else(|| {
            report
                .failures
                .first()
                .map(|f| format!("{} [{}]: {}", f.event_id, f.code, f.message))
        })
        .unwrap_or_else(|| "unknown failure".to_string());
    Err(ProvaraError::VaultStructureInvalid {
        context: format!("self-test failed: {first}"),
    })
}

/// Event ids currently tombstoned in a log.
pub fn tombstoned_event_ids(events: &[Value]) -> BTreeSet<String> {
    events
        .iter()
        .filter(|e| {
            e.get("payload")
                .map(is_tombstone)
                .unwrap_or(false)
        })
        .filter_map(|e| e.get("event_id").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}
