//! Vault directory layout and path safety.

use std::fs;
use std::path::{Component, Path, PathBuf};

use provara_core::{ProvaraError, Result};

/// Files every compliant vault must contain.
pub const REQUIRED_FILES: &[&str] = &[
    "identity/genesis.json",
    "identity/keys.json",
    "events/events.ndjson",
    "policies/sync_contract.json",
    "policies/safety_policy.json",
    "policies/retention_policy.json",
    "manifest.json",
    "manifest.sig",
    "merkle_root.txt",
];

/// Files excluded from manifest hashing: the manifest artifacts themselves,
/// plus the mutable crypto-shred sidecar, which lives outside the signed set.
pub const MANIFEST_EXCLUDE: &[&str] = &[
    "manifest.json",
    "manifest.sig",
    "merkle_root.txt",
    "identity/privacy_keys.db",
];

/// Directories created at bootstrap.
pub const SKELETON_DIRS: &[&str] = &["identity", "events", "policies", "state", "checkpoints"];

/// Typed access to a vault's well-known paths.
#[derive(Debug, Clone)]
pub struct VaultLayout {
    root: PathBuf,
}

impl VaultLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        VaultLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn events_file(&self) -> PathBuf {
        self.root.join("events").join("events.ndjson")
    }

    pub fn genesis_file(&self) -> PathBuf {
        self.root.join("identity").join("genesis.json")
    }

    pub fn keys_file(&self) -> PathBuf {
        self.root.join("identity").join("keys.json")
    }

    pub fn privacy_db(&self) -> PathBuf {
        self.root.join("identity").join("privacy_keys.db")
    }

    pub fn policies_dir(&self) -> PathBuf {
        self.root.join("policies")
    }

    pub fn manifest_file(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    pub fn manifest_sig_file(&self) -> PathBuf {
        self.root.join("manifest.sig")
    }

    pub fn merkle_root_file(&self) -> PathBuf {
        self.root.join("merkle_root.txt")
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join("state").join("current_state.json")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    /// Create the directory skeleton.
    pub fn create_skeleton(&self) -> Result<()> {
        for dir in SKELETON_DIRS {
            fs::create_dir_all(self.root.join(dir))?;
        }
        Ok(())
    }

    /// Check the spec-required file set, reporting everything missing.
    pub fn check_required_files(&self) -> Result<()> {
        let missing: Vec<&str> = REQUIRED_FILES
            .iter()
            .filter(|rel| !self.root.join(rel).is_file())
            .copied()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ProvaraError::VaultStructureInvalid {
                context: format!("missing required files: {}", missing.join(", ")),
            })
        }
    }
}

/// Verify a relative path stays inside the vault root.
///
/// Rejects absolute paths, `..` components, and symlinks whose resolved
/// target escapes the root.
pub fn is_safe_path(root: &Path, rel_path: &Path) -> bool {
    if rel_path.is_absolute() {
        return false;
    }
    if rel_path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return false;
    }

    let joined = root.join(rel_path);
    // A dangling entry cannot escape; only a resolvable one can point out.
    let Ok(resolved) = joined.canonicalize() else {
        return true;
    };
    let Ok(root_resolved) = root.canonicalize() else {
        return false;
    };
    resolved.starts_with(root_resolved)
}

/// Relative path with `/` separators regardless of platform, as stored in
/// the manifest.
pub fn manifest_path(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect::<Vec<_>>()
        .join("/")
}
