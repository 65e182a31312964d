//! Default path helpers and symlink checks.
//! Determines OS-appropriate config/data/log paths and detects symlinked ancestors for safety.

use dirs::{config_dir, data_dir};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::CONFIG_ENV_VAR;

/// `$VAULT_MOVER_CONFIG` if set, else the OS-appropriate default config path.
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(p) = env::var_os(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(p));
    }
    if let Some(mut base) = config_dir() {
        base.push("vault_mover");
        base.push("config.xml");
        Some(base)
    } else {
        env::var("HOME").ok().map(|h| {
            PathBuf::from(h)
                .join(".config")
                .join("vault_mover")
                .join("config.xml")
        })
    }
}

/// Root under which the default vault, quarantine, duplicates and record store live.
pub fn default_data_root() -> PathBuf {
    data_dir()
        .map(|d| d.join("vault_mover"))
        .or_else(|| {
            env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".local").join("share").join("vault_mover"))
        })
        .unwrap_or_else(|| PathBuf::from("vault_mover"))
}

/// OS-appropriate default log file path (data dir).
pub fn default_log_path() -> Option<PathBuf> {
    let base = default_data_root();
    // ensure dir exists (best-effort)
    let _ = fs::create_dir_all(&base);
    Some(base.join("vault_mover.log"))
}

/// Return true if any existing ancestor of `path` is a symlink.
pub fn path_has_symlink_ancestor(path: &Path) -> io::Result<bool> {
    let mut p = path.parent();
    while let Some(anc) = p {
        if anc.exists() {
            let meta = fs::symlink_metadata(anc)?;
            if meta.file_type().is_symlink() {
                return Ok(true);
            }
        }
        p = anc.parent();
    }
    Ok(false)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn detects_symlinked_ancestor() {
        let td = tempdir().unwrap();
        let real = td.path().join("real");
        fs::create_dir(&real).unwrap();
        let link = td.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();
        assert!(path_has_symlink_ancestor(&link.join("app.log")).unwrap());
        assert!(!path_has_symlink_ancestor(&real.join("app.log")).unwrap());
    }
}
