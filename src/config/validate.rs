//! Config validation logic.
//! Creates missing roots, verifies writability, disjoint paths, and platform-specific security checks.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::fs_ops::unique_temp_path;
use crate::platform::ensure_secure_directory;

use super::types::EngineConfig;

impl EngineConfig {
    /// Validate tuning values, create and probe the roots, and check they are disjoint.
    pub fn validate(&self) -> Result<()> {
        if !self.capacity_margin.is_finite() || !(0.0..=1.0).contains(&self.capacity_margin) {
            bail!(
                "capacity_margin must be between 0.0 and 1.0, got {}",
                self.capacity_margin
            );
        }
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }

        let roots: [(&Path, &str); 3] = [
            (&self.vault_root, "vault_root"),
            (&self.quarantine_root, "quarantine_root"),
            (&self.duplicates_root, "duplicates_root"),
        ];

        // 1) Each root: a directory (created if missing) we can write to.
        for (path, name) in roots {
            ensure_dir_is_or_create(path, name)?;
            ensure_writable(path, name)?;
        }
        if let Some(parent) = self.store_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir_is_or_create(parent, "store_path parent")?;
        }

        // 2) Resolve symlinks and ensure the roots are pairwise disjoint.
        let resolved: Vec<(PathBuf, &str)> = roots
            .iter()
            .map(|(p, name)| (dunce::canonicalize(p).unwrap_or_else(|_| p.to_path_buf()), *name))
            .collect();
        for (i, (a, an)) in resolved.iter().enumerate() {
            for (b, bn) in resolved.iter().skip(i + 1) {
                if a == b {
                    bail!("{an} and {bn} resolve to the same path: '{}'", a.display());
                }
                if a.starts_with(b) {
                    bail!("{an} '{}' must not be inside {bn} '{}'", a.display(), b.display());
                }
                if b.starts_with(a) {
                    bail!("{bn} '{}' must not be inside {an} '{}'", b.display(), a.display());
                }
            }
        }

        // 3) Platform-specific directory security checks (perms, ownership, etc).
        for (path, name) in roots {
            ensure_secure_directory(path, name)?;
        }

        info!(
            "Config validated: vault='{}' quarantine='{}' duplicates='{}' store='{}' log_file='{}'",
            self.vault_root.display(),
            self.quarantine_root.display(),
            self.duplicates_root.display(),
            self.store_path.display(),
            self.log_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<none>".into())
        );
        Ok(())
    }
}

/// Ensure directory exists (create if missing). If exists, it must be a directory.
fn ensure_dir_is_or_create(path: &Path, name: &str) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            error!("{name} exists but isn't a directory: {}", path.display());
            bail!("{name} exists but isn't a directory: {}", path.display());
        }
    } else {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create {name} directory '{}'", path.display()))?;
        info!("Created {name} directory: {}", path.display());
    }
    Ok(())
}

/// Ensure directory is writable using a non-destructive probe file.
fn ensure_writable(path: &Path, name: &str) -> Result<()> {
    let probe = unique_temp_path(path);
    fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&probe)
        .with_context(|| format!("Cannot write to {name} '{}'; check permissions", path.display()))?;
    let _ = fs::remove_file(&probe);
    debug!("{name} writable: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_roots() {
        let td = tempdir().unwrap();
        let cfg = EngineConfig::with_root(td.path());
        cfg.validate().unwrap();
        assert!(cfg.vault_root.is_dir());
        assert!(cfg.quarantine_root.is_dir());
        assert!(cfg.duplicates_root.is_dir());
    }

    #[test]
    fn nested_roots_are_rejected() {
        let td = tempdir().unwrap();
        let mut cfg = EngineConfig::with_root(td.path());
        cfg.quarantine_root = cfg.vault_root.join("q");
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("must not be inside"), "{err}");
    }

    #[test]
    fn margin_out_of_range_is_rejected() {
        let td = tempdir().unwrap();
        let mut cfg = EngineConfig::with_root(td.path());
        cfg.capacity_margin = 1.5;
        assert!(cfg.validate().is_err());
    }
}
