//! Manifest construction and the signed Merkle root over vault files.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use provara_core::{
    merkle_root_from_entries, sha256_file, sign_manifest, KeyPair, ProvaraError, Result,
    SPEC_VERSION,
};

use crate::layout::{is_safe_path, manifest_path, VaultLayout, MANIFEST_EXCLUDE};
use crate::now_utc_iso;

/// One hashed file in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

/// `manifest.json`: every vault file except the manifest artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub spec_version: String,
    pub file_count: u64,
    pub files: Vec<FileEntry>,
}

impl Manifest {
    pub fn entries_as_values(&self) -> Result<Vec<Value>> {
        self.files
            .iter()
            .map(|f| Ok(serde_json::to_value(f)?))
            .collect()
    }

    /// Merkle root over the canonical bytes of each file entry.
    pub fn merkle_root(&self) -> Result<String> {
        merkle_root_from_entries(&self.entries_as_values()?)
    }
}

fn walk_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            walk_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

/// Hash every regular file under the vault root into a manifest.
///
/// Paths that escape the root (via `..`, absolute components, or symlink
/// targets outside the tree) are a hard error, not a skip.
pub fn build_manifest(layout: &VaultLayout) -> Result<Manifest> {
    let root = layout.root();
    let mut paths = Vec::new();
    walk_files(root, &mut paths)?;

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let rel = path
            .strip_prefix(root)
            .map_err(|_| ProvaraError::PathUnsafe {
                context: path.display().to_string(),
            })?
            .to_path_buf();

        if !is_safe_path(root, &rel) {
            return Err(ProvaraError::PathUnsafe {
                context: rel.display().to_string(),
            });
        }

        let rel_str = manifest_path(&rel);
        if MANIFEST_EXCLUDE.contains(&rel_str.as_str()) {
            continue;
        }

        let metadata = fs::metadata(&path)?;
        files.push(FileEntry {
            path: rel_str,
            size: metadata.len(),
            sha256: sha256_file(&path)?,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(Manifest {
        spec_version: SPEC_VERSION.to_string(),
        file_count: files.len() as u64,
        files,
    })
}

/// Rebuild `manifest.json` and `merkle_root.txt`, and re-sign `manifest.sig`
/// when a signer is available. Returns the new Merkle root.
pub fn refresh_artifacts(layout: &VaultLayout, signer: Option<&KeyPair>) -> Result<String> {
    let manifest = build_manifest(layout)?;
    let root_hex = manifest.merkle_root()?;

    let manifest_value = serde_json::to_value(&manifest)?;
    fs::write(layout.manifest_file(), jcs_rs::canonicalize(&manifest_value)?)?;
    fs::write(layout.merkle_root_file(), format!("{root_hex}\n"))?;

    if let Some(keypair) = signer {
        let record = sign_manifest(&root_hex, keypair, now_utc_iso())?;
        fs::write(
            layout.manifest_sig_file(),
            serde_json::to_string_pretty(&record)?,
        )?;
    }

    info!(merkle_root = %root_hex, signed = signer.is_some(), "manifest refreshed");
    Ok(root_hex)
}

/// Load `manifest.json`.
pub fn load_manifest(layout: &VaultLayout) -> Result<Manifest> {
    let raw = fs::read_to_string(layout.manifest_file())?;
    Ok(serde_json::from_str(&raw)?)
}

/// Load the single-line Merkle root.
pub fn load_merkle_root(layout: &VaultLayout) -> Result<String> {
    let raw = fs::read_to_string(layout.merkle_root_file())?;
    Ok(raw.trim().to_string())
}

/// Check every manifest entry against the file currently on disk.
pub fn check_manifest_against_disk(layout: &VaultLayout, manifest: &Manifest) -> Result<()> {
    for entry in &manifest.files {
        let rel = Path::new(&entry.path);
        if !is_safe_path(layout.root(), rel) {
            return Err(ProvaraError::PathUnsafe {
                context: entry.path.clone(),
            });
        }
        let path = layout.root().join(rel);
        if !path.is_file() {
            return Err(ProvaraError::VaultStructureInvalid {
                context: format!("manifest entry missing on disk: {}", entry.path),
            });
        }
        let actual = sha256_file(&path)?;
        if actual != entry.sha256 {
            return Err(ProvaraError::HashMismatch {
                context: format!(
                    "{}: manifest {} != disk {}",
                    entry.path, entry.sha256, actual
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::thread_rng;
    use tempfile::tempdir;

    fn seeded_layout() -> (tempfile::TempDir, VaultLayout) {
        let dir = tempdir().unwrap();
        let layout = VaultLayout::new(dir.path());
        layout.create_skeleton().unwrap();
        fs::write(layout.events_file(), "{\"event_id\":\"evt_a\"}\n").unwrap();
        fs::write(layout.keys_file(), "{\"keys\":[]}").unwrap();
        (dir, layout)
    }

    #[test]
    fn manifest_lists_sorted_files_and_excludes_artifacts() {
        let (_dir, layout) = seeded_layout();
        fs::write(layout.manifest_file(), b"old").unwrap();
        fs::write(layout.merkle_root_file(), b"old").unwrap();
        fs::write(layout.manifest_sig_file(), b"old").unwrap();

        let manifest = build_manifest(&layout).unwrap();
        let paths: Vec<&str> = manifest.files.iter().map(|f| f.path.as_str()).collect();
        assert!(paths.contains(&"events/events.ndjson"));
        assert!(paths.contains(&"identity/keys.json"));
        assert!(!paths.contains(&"manifest.json"));
        assert!(!paths.contains(&"manifest.sig"));
        assert!(!paths.contains(&"merkle_root.txt"));

        let mut sorted = paths.clone();
        sorted.sort_unstable();
        assert_eq!(paths, sorted);
        assert_eq!(manifest.file_count, manifest.files.len() as u64);
    }

    #[test]
    fn refresh_writes_consistent_artifacts() {
        let (_dir, layout) = seeded_layout();
        let keypair = KeyPair::generate(&mut thread_rng());

        let root = refresh_artifacts(&layout, Some(&keypair)).unwrap();
        assert_eq!(load_merkle_root(&layout).unwrap(), root);

        let manifest = load_manifest(&layout).unwrap();
        assert_eq!(manifest.merkle_root().unwrap(), root);
        check_manifest_against_disk(&layout, &manifest).unwrap();

        let sig: Value =
            serde_json::from_str(&fs::read_to_string(layout.manifest_sig_file()).unwrap())
                .unwrap();
        assert!(provara_core::verify_manifest_signature(
            &sig,
            keypair.verifying_key(),
            Some(root.as_str())
        ));
    }

    #[test]
    fn disk_drift_is_detected() {
        let (_dir, layout) = seeded_layout();
        refresh_artifacts(&layout, None).unwrap();
        let manifest = load_manifest(&layout).unwrap();

        fs::write(layout.keys_file(), "{\"keys\":[{}]}").unwrap();
        let err = check_manifest_against_disk(&layout, &manifest).unwrap_err();
        assert!(matches!(err, ProvaraError::HashMismatch { .. }));
    }

    #[test]
    fn sidecar_is_never_in_the_manifest() {
        let (_dir, layout) = seeded_layout();
        fs::write(layout.privacy_db(), b"sqlite").unwrap();
        let manifest = build_manifest(&layout).unwrap();
        assert!(manifest
            .files
            .iter()
            .all(|f| f.path != "identity/privacy_keys.db"));
    }
}
