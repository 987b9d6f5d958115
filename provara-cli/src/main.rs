//! provara — command-line interface for sovereign event vaults.
//!
//! Exit codes: 0 on success, 1 on integrity or policy failure, 2 on usage
//! or malformed input. Failures are written to stderr as one structured
//! JSON object: `{code, message, context, doc_url}`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use provara_core::{EventType, KeyPair, Namespace, ProvaraError, Result};
use provara_vault::{
    backup_vault, bootstrap_vault, create_checkpoint, export_delta, finalize_mutation,
    import_delta, migrate_vault, redact_event, replay, resume_from_checkpoint, sync_vaults,
    verify_vault, BootstrapOptions, VaultLayout,
};

#[derive(Parser)]
#[command(name = "provara", version, about = "Sovereign append-only event vault")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new vault in an empty directory.
    Init {
        path: PathBuf,
        /// Identity string; random when omitted.
        #[arg(long)]
        uid: Option<String>,
        /// Actor name for the genesis chain.
        #[arg(long)]
        actor: Option<String>,
        /// Also generate a quorum keypair.
        #[arg(long)]
        quorum: bool,
        /// Where to write the private keys (out of band, never in the vault).
        #[arg(long)]
        private_keys: Option<PathBuf>,
    },
    /// Sign and append one event.
    Append {
        path: PathBuf,
        #[arg(long = "type")]
        event_type: String,
        /// Inline JSON payload, or @FILE to read it from disk.
        #[arg(long)]
        data: String,
        #[arg(long, default_value = "sovereign_genesis")]
        actor: String,
        #[arg(long)]
        keyfile: PathBuf,
        #[arg(long)]
        key_id: Option<String>,
        #[arg(long)]
        confidence: Option<f64>,
        #[arg(long, default_value = "local")]
        namespace: String,
    },
    /// Run every integrity check; non-zero exit on failure.
    Verify {
        path: PathBuf,
        #[arg(long)]
        verbose: bool,
        #[arg(long)]
        show_redacted: bool,
    },
    /// Replay the log and print the state JSON.
    Replay { path: PathBuf },
    /// Bidirectional delta exchange between two vaults.
    Sync {
        local: PathBuf,
        remote: PathBuf,
        /// Re-sign manifests after the merge.
        #[arg(long)]
        keyfile: Option<PathBuf>,
        #[arg(long)]
        key_id: Option<String>,
    },
    /// Export a delta bundle.
    Export {
        path: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Export events strictly after this event id.
        #[arg(long)]
        since: Option<String>,
    },
    /// Import a delta bundle.
    Import {
        path: PathBuf,
        #[arg(long)]
        delta: PathBuf,
        #[arg(long)]
        keyfile: Option<PathBuf>,
        #[arg(long)]
        key_id: Option<String>,
    },
    /// Tombstone-redact an event's payload.
    Redact {
        path: PathBuf,
        #[arg(long)]
        target: String,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        authority: String,
        #[arg(long, default_value = "TOMBSTONE")]
        method: String,
        #[arg(long)]
        keyfile: PathBuf,
        #[arg(long)]
        key_id: Option<String>,
        #[arg(long, default_value = "sovereign_genesis")]
        actor: String,
    },
    /// Copy the vault into a timestamped backup directory.
    Backup {
        path: PathBuf,
        #[arg(long)]
        to: PathBuf,
        /// Prune to the N most recent backups.
        #[arg(long)]
        keep: Option<usize>,
    },
    /// Write a signed reducer checkpoint.
    Checkpoint {
        path: PathBuf,
        #[arg(long)]
        keyfile: PathBuf,
        #[arg(long)]
        key_id: Option<String>,
    },
    /// Resume replay from the latest checkpoint.
    Resume { path: PathBuf },
    /// Migrate the vault layout version.
    Migrate {
        path: PathBuf,
        #[arg(long)]
        to: String,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        keyfile: PathBuf,
        #[arg(long)]
        key_id: Option<String>,
        #[arg(long, default_value = "sovereign_genesis")]
        actor: String,
    },
}

/// Private keys as written by `init`: `{"keys": [{key_id, private_key_b64, ...}]}`.
#[derive(Serialize, Deserialize)]
struct PrivateKeysFile {
    keys: Vec<PrivateKeyEntry>,
}

#[derive(Serialize, Deserialize)]
struct PrivateKeyEntry {
    key_id: String,
    private_key_b64: String,
    algorithm: String,
}

fn load_keypair(keyfile: &Path, key_id: Option<&str>) -> Result<KeyPair> {
    let raw = fs::read_to_string(keyfile)?;
    let file: PrivateKeysFile = serde_json::from_str(&raw)?;
    let entry = match key_id {
        Some(wanted) => file
            .keys
            .iter()
            .find(|k| k.key_id == wanted)
            .ok_or_else(|| ProvaraError::UnknownKeyId {
                context: format!("{wanted} not in {}", keyfile.display()),
            })?,
        None => file
            .keys
            .first()
            .ok_or_else(|| ProvaraError::RequiredFieldMissing {
                context: format!("no keys in {}", keyfile.display()),
            })?,
    };
    let keypair = KeyPair::from_seed_b64(&entry.private_key_b64)?;
    if keypair.key_id() != entry.key_id {
        return Err(ProvaraError::UnknownKeyId {
            context: format!(
                "keyfile entry {} does not match derived id {}",
                entry.key_id,
                keypair.key_id()
            ),
        });
    }
    Ok(keypair)
}

fn write_private_keys(path: &Path, entries: Vec<PrivateKeyEntry>) -> Result<()> {
    fs::write(
        path,
        serde_json::to_string_pretty(&PrivateKeysFile { keys: entries })?,
    )?;
    Ok(())
}

fn parse_payload(data: &str, confidence: Option<f64>) -> Result<Value> {
    let raw = match data.strip_prefix('@') {
        Some(file) => fs::read_to_string(file)?,
        None => data.to_string(),
    };
    let mut payload: Value = serde_json::from_str(&raw)?;
    if let (Some(confidence), Some(map)) = (confidence, payload.as_object_mut()) {
        map.insert("confidence".to_string(), json!(confidence));
    }
    Ok(payload)
}

fn parse_namespace(raw: &str) -> Result<Namespace> {
    match raw {
        "canonical" => Ok(Namespace::Canonical),
        "local" => Ok(Namespace::Local),
        other => Err(ProvaraError::NamespaceMismatch {
            context: other.to_string(),
        }),
    }
}

/// 1 for integrity/policy failures, 2 for usage or malformed input.
fn exit_code_for(err: &ProvaraError) -> u8 {
    match err {
        ProvaraError::Io(_)
        | ProvaraError::Json(_)
        | ProvaraError::Canonical(_)
        | ProvaraError::Encoding { .. }
        | ProvaraError::RequiredFieldMissing { .. }
        | ProvaraError::NamespaceMismatch { .. }
        | ProvaraError::HashFormat { .. } => 2,
        _ => 1,
    }
}

fn run(command: Command) -> Result<u8> {
    match command {
        Command::Init {
            path,
            uid,
            actor,
            quorum,
            private_keys,
        } => cmd_init(&path, uid, actor, quorum, private_keys),
        Command::Append {
            path,
            event_type,
            data,
            actor,
            keyfile,
            key_id,
            confidence,
            namespace,
        } => cmd_append(
            &path, &event_type, &data, &actor, &keyfile,
            key_id.as_deref(), confidence, &namespace,
        ),
        Command::Verify {
            path,
            verbose,
            show_redacted,
        } => cmd_verify(&path, verbose, show_redacted),
        Command::Replay { path } => cmd_replay(&path),
        Command::Sync {
            local,
            remote,
            keyfile,
            key_id,
        } => cmd_sync(&local, &remote, keyfile.as_deref(), key_id.as_deref()),
        Command::Export { path, output, since } => cmd_export(&path, &output, since.as_deref()),
        Command::Import {
            path,
            delta,
            keyfile,
            key_id,
        } => cmd_import(&path, &delta, keyfile.as_deref(), key_id.as_deref()),
        Command::Redact {
            path,
            target,
            reason,
            authority,
            method,
            keyfile,
            key_id,
            actor,
        } => cmd_redact(
            &path, &target, &reason, &authority, &method, &keyfile,
            key_id.as_deref(), &actor,
        ),
        Command::Backup { path, to, keep } => cmd_backup(&path, &to, keep),
        Command::Checkpoint {
            path,
            keyfile,
            key_id,
        } => cmd_checkpoint(&path, &keyfile, key_id.as_deref()),
        Command::Resume { path } => cmd_resume(&path),
        Command::Migrate {
            path,
            to,
            dry_run,
            keyfile,
            key_id,
            actor,
        } => cmd_migrate(&path, &to, dry_run, &keyfile, key_id.as_deref(), &actor),
    }
}

fn cmd_init(
    path: &Path,
    uid: Option<String>,
    actor: Option<String>,
    quorum: bool,
    private_keys: Option<PathBuf>,
) -> Result<u8> {
    let result = bootstrap_vault(
        path,
        BootstrapOptions {
            uid,
            actor,
            include_quorum: quorum,
            predecessor_vault: None,
        },
    )?;

    let keys_path = private_keys.unwrap_or_else(|| {
        path.parent()
            .unwrap_or_else(|| Path::new("."))
            .join("my_private_keys.json")
    });
    let mut entries = vec![PrivateKeyEntry {
        key_id: result.root_key_id.clone(),
        private_key_b64: result.root_private_key_b64.clone(),
        algorithm: "Ed25519".to_string(),
    }];
    if let (Some(kid), Some(seed)) = (&result.quorum_key_id, &result.quorum_private_key_b64) {
        entries.push(PrivateKeyEntry {
            key_id: kid.clone(),
            private_key_b64: seed.clone(),
            algorithm: "Ed25519".to_string(),
        });
    }
    write_private_keys(&keys_path, entries)?;

    println!("Vault created at {}", path.display());
    println!("  uid:         {}", result.uid);
    println!("  root key:    {}", result.root_key_id);
    if let Some(kid) = &result.quorum_key_id {
        println!("  quorum key:  {kid}");
    }
    println!("  merkle root: {}", result.merkle_root);
    println!("Private keys written to {} - store them securely.", keys_path.display());
    Ok(0)
}

#[allow(clippy::too_many_arguments)]
fn cmd_append(
    path: &Path,
    event_type: &str,
    data: &str,
    actor: &str,
    keyfile: &Path,
    key_id: Option<&str>,
    confidence: Option<f64>,
    namespace: &str,
) -> Result<u8> {
    let layout = VaultLayout::new(path);
    let keypair = load_keypair(keyfile, key_id)?;
    let payload = parse_payload(data, confidence)?;
    let namespace = parse_namespace(namespace)?;

    let event = provara_vault::append_signed_event(
        &layout,
        EventType::from(event_type),
        namespace,
        actor,
        payload,
        &keypair,
    )?;
    finalize_mutation(&layout, Some(&keypair))?;

    println!("{}", event["event_id"].as_str().unwrap_or_default());
    Ok(0)
}

fn cmd_verify(path: &Path, verbose: bool, show_redacted: bool) -> Result<u8> {
    let layout = VaultLayout::new(path);
    let report = verify_vault(&layout)?;

    println!("Verifying {}", path.display());
    println!("  events: {}  actors: {}", report.event_count, report.actor_count);
    for check in &report.checks {
        if check.passed {
            if verbose {
                println!("  ✓ {}", check.name);
            }
        } else {
            println!("  ✗ {}: {}", check.name, check.detail);
        }
    }
    for failure in &report.failures {
        println!(
            "  ✗ {} [{} §{}]: {}",
            failure.event_id, failure.code, failure.spec_section, failure.message
        );
    }
    if show_redacted && !report.redactions.is_empty() {
        println!("Redacted Events Metadata:");
        for record in &report.redactions {
            let payload = &record["payload"];
            println!(
                "  Target: {}  Reason: {}  Authority: {}",
                payload["target_event_id"].as_str().unwrap_or("?"),
                payload["reason"].as_str().unwrap_or("?"),
                payload["authority"].as_str().unwrap_or("?"),
            );
        }
    }

    // CI surface: key=value outputs plus a Markdown summary table.
    if let Ok(output_path) = std::env::var("GITHUB_OUTPUT") {
        append_to_file(&output_path, &report.github_outputs())?;
    }
    if let Ok(summary_path) = std::env::var("GITHUB_STEP_SUMMARY") {
        append_to_file(&summary_path, &report.markdown_summary())?;
    }

    if report.passed() {
        println!("OK");
        Ok(0)
    } else {
        println!("FAILED");
        Ok(1)
    }
}

fn append_to_file(path: &str, content: &str) -> Result<()> {
    use std::io::Write as _;
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

fn cmd_replay(path: &Path) -> Result<u8> {
    let layout = VaultLayout::new(path);
    let reducer = replay(&layout)?;
    let state = reducer.export_state()?;
    println!("{}", provara_core::canonical_to_string(&state)?);
    Ok(0)
}

fn cmd_sync(
    local: &Path,
    remote: &Path,
    keyfile: Option<&Path>,
    key_id: Option<&str>,
) -> Result<u8> {
    let keypair = keyfile.map(|f| load_keypair(f, key_id)).transpose()?;
    let report = sync_vaults(
        &VaultLayout::new(local),
        &VaultLayout::new(remote),
        keypair.as_ref(),
        keypair.as_ref(),
    )?;

    for (direction, result) in [
        ("remote -> local", &report.into_local),
        ("local -> remote", &report.into_remote),
    ] {
        println!(
            "{direction}: merged {} (duplicates {}, forks {}, rejected {})",
            result.events_merged,
            result.duplicates_skipped,
            result.forks.len(),
            result.rejected.len(),
        );
        for fork in &result.forks {
            println!(
                "  fork: actor {} at {:?} competing {:?}",
                fork.actor_id, fork.fork_point_event_id, fork.competing_event_ids
            );
        }
    }

    let clean = report.into_local.success
        && report.into_remote.success
        && report.into_local.forks.is_empty()
        && report.into_remote.forks.is_empty();
    Ok(if clean { 0 } else { 1 })
}

fn cmd_export(path: &Path, output: &Path, since: Option<&str>) -> Result<u8> {
    let bundle = export_delta(&VaultLayout::new(path), since)?;
    fs::write(output, &bundle)?;
    let events = bundle.lines().filter(|l| !l.trim().is_empty()).count().saturating_sub(1);
    println!("Exported {events} events to {}", output.display());
    Ok(0)
}

fn cmd_import(
    path: &Path,
    delta: &Path,
    keyfile: Option<&Path>,
    key_id: Option<&str>,
) -> Result<u8> {
    let keypair = keyfile.map(|f| load_keypair(f, key_id)).transpose()?;
    let bundle = fs::read_to_string(delta)?;
    let result = import_delta(&VaultLayout::new(path), &bundle, keypair.as_ref())?;

    println!(
        "Imported {} events (duplicates {}, rejected {})",
        result.events_merged,
        result.duplicates_skipped,
        result.rejected.len()
    );
    for rejected in &result.rejected {
        println!("  rejected {}: {}", rejected.event_id, rejected.reason);
    }
    for fork in &result.forks {
        println!(
            "  fork: actor {} at {:?} competing {:?}",
            fork.actor_id, fork.fork_point_event_id, fork.competing_event_ids
        );
    }
    if let Some(hash) = &result.new_state_hash {
        println!("New state hash: {hash}");
    }
    Ok(if result.success && result.forks.is_empty() { 0 } else { 1 })
}

#[allow(clippy::too_many_arguments)]
fn cmd_redact(
    path: &Path,
    target: &str,
    reason: &str,
    authority: &str,
    method: &str,
    keyfile: &Path,
    key_id: Option<&str>,
    actor: &str,
) -> Result<u8> {
    if method != "TOMBSTONE" {
        return Err(ProvaraError::RequiredFieldMissing {
            context: format!("unsupported redaction method {method}"),
        });
    }
    let keypair = load_keypair(keyfile, key_id)?;
    let redaction = redact_event(
        &VaultLayout::new(path),
        target,
        reason,
        authority,
        &keypair,
        actor,
    )?;
    println!(
        "Redacted {target}; redaction event {}",
        redaction["event_id"].as_str().unwrap_or_default()
    );
    Ok(0)
}

fn cmd_backup(path: &Path, to: &Path, keep: Option<usize>) -> Result<u8> {
    let backup = backup_vault(&VaultLayout::new(path), to, keep)?;
    println!("Backup written to {}", backup.display());
    Ok(0)
}

fn cmd_checkpoint(path: &Path, keyfile: &Path, key_id: Option<&str>) -> Result<u8> {
    let keypair = load_keypair(keyfile, key_id)?;
    let record = create_checkpoint(&VaultLayout::new(path), &keypair)?;
    println!(
        "Checkpoint at {} events (state hash {})",
        record.event_count,
        record.state_hash.as_deref().unwrap_or("?")
    );
    Ok(0)
}

fn cmd_resume(path: &Path) -> Result<u8> {
    let report = resume_from_checkpoint(&VaultLayout::new(path))?;
    println!(
        "Resumed from {} events, replayed {} more (state hash {})",
        report.resumed_from_event_count,
        report.events_replayed,
        report.state_hash.as_deref().unwrap_or("?")
    );
    Ok(0)
}

fn cmd_migrate(
    path: &Path,
    to: &str,
    dry_run: bool,
    keyfile: &Path,
    key_id: Option<&str>,
    actor: &str,
) -> Result<u8> {
    let keypair = load_keypair(keyfile, key_id)?;
    let report = migrate_vault(&VaultLayout::new(path), to, dry_run, &keypair, actor)?;
    if report.dry_run {
        println!(
            "Dry run: {} -> {} would migrate {} event(s)",
            report.source_version, report.target_version,
            u64::from(report.source_version != report.target_version)
        );
    } else {
        println!(
            "Migrated {} -> {} ({} event appended)",
            report.source_version, report.target_version, report.events_migrated
        );
    }
    Ok(0)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("{}", err.to_structured());
            ExitCode::from(exit_code_for(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_parsing_injects_confidence() {
        let payload = parse_payload(
            r#"{"subject": "s", "predicate": "p", "value": 1}"#,
            Some(0.9),
        )
        .unwrap();
        assert_eq!(payload["confidence"], json!(0.9));
    }

    #[test]
    fn payload_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("payload.json");
        fs::write(&file, r#"{"subject": "s", "predicate": "p"}"#).unwrap();
        let arg = format!("@{}", file.display());
        let payload = parse_payload(&arg, None).unwrap();
        assert_eq!(payload["subject"], "s");
    }

    #[test]
    fn namespace_parsing() {
        assert!(matches!(parse_namespace("local"), Ok(Namespace::Local)));
        assert!(matches!(
            parse_namespace("canonical"),
            Ok(Namespace::Canonical)
        ));
        assert!(parse_namespace("global").is_err());
    }

    #[test]
    fn exit_codes_split_usage_from_integrity() {
        assert_eq!(
            exit_code_for(&ProvaraError::NamespaceMismatch { context: "x".into() }),
            2
        );
        assert_eq!(
            exit_code_for(&ProvaraError::InvalidSignature { context: "x".into() }),
            1
        );
        assert_eq!(
            exit_code_for(&ProvaraError::VaultSealed { context: "x".into() }),
            1
        );
    }

    #[test]
    fn keyfile_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let keyfile = dir.path().join("keys.json");
        let keypair = KeyPair::generate(&mut rand::rngs::OsRng);
        write_private_keys(
            &keyfile,
            vec![PrivateKeyEntry {
                key_id: keypair.key_id(),
                private_key_b64: keypair.seed_b64(),
                algorithm: "Ed25519".into(),
            }],
        )
        .unwrap();

        let loaded = load_keypair(&keyfile, None).unwrap();
        assert_eq!(loaded.key_id(), keypair.key_id());
        let by_id = load_keypair(&keyfile, Some(&keypair.key_id())).unwrap();
        assert_eq!(by_id.key_id(), keypair.key_id());
        assert!(load_keypair(&keyfile, Some("bp1_missing")).is_err());
    }
}
