//! Timestamped full-tree backups with pruning.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use provara_core::Result;

use crate::layout::VaultLayout;

/// Copy the vault into `dest/<name>-<timestamp>/`, pruning to the `keep`
/// most recent backups when asked. Returns the new backup path.
pub fn backup_vault(
    layout: &VaultLayout,
    dest: &Path,
    keep: Option<usize>,
) -> Result<PathBuf> {
    fs::create_dir_all(dest)?;

    let vault_name = layout
        .root()
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("vault");
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
    let mut backup_dir = dest.join(format!("{vault_name}-{stamp}"));
    let mut attempt = 1;
    while backup_dir.exists() {
        backup_dir = dest.join(format!("{vault_name}-{stamp}-{attempt}"));
        attempt += 1;
    }
    copy_tree(layout.root(), &backup_dir)?;

    if let Some(keep) = keep {
        prune_backups(dest, vault_name, keep)?;
    }

    info!(backup = %backup_dir.display(), "backup written");
    Ok(backup_dir)
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

fn prune_backups(dest: &Path, vault_name: &str, keep: usize) -> Result<()> {
    let prefix = format!("{vault_name}-");
    let mut backups: Vec<PathBuf> = fs::read_dir(dest)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&prefix))
                    .unwrap_or(false)
        })
        .collect();

    // Timestamped names sort chronologically.
    backups.sort();
    while backups.len() > keep {
        let oldest = backups.remove(0);
        fs::remove_dir_all(&oldest)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn backup_copies_tree_and_prunes() {
        let vault_dir = tempdir().unwrap();
        let dest = tempdir().unwrap();
        let layout = VaultLayout::new(vault_dir.path().join("v"));
        layout.create_skeleton().unwrap();
        fs::write(layout.events_file(), "{}\n").unwrap();

        let b1 = backup_vault(&layout, dest.path(), Some(2)).unwrap();
        assert!(b1.join("events").join("events.ndjson").is_file());

        let _b2 = backup_vault(&layout, dest.path(), Some(2)).unwrap();
        let b3 = backup_vault(&layout, dest.path(), Some(2)).unwrap();

        let remaining: Vec<_> = fs::read_dir(dest.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(remaining.len(), 2);
        assert!(b3.exists());
        assert!(!b1.exists());
    }
}
