//! Windows implementations of platform helpers (best-effort, minimal ACL awareness).
//!
//! Notes:
//! - Windows lacks POSIX mode semantics; we do not attempt ACL management here.
//! - Atomic writes are temp + rename; std's rename replaces an existing target.

use anyhow::{bail, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use crate::fs_ops::unique_temp_path;

/// Open log file for appending (best-effort; no symlink defense available via std on Windows).
pub fn open_log_file_secure_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Replace `path` with `contents` via a synced sibling temp file and rename.
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let tmp = unique_temp_path(parent);
    let res = (|| -> io::Result<()> {
        let mut f = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
        f.write_all(contents)?;
        f.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if res.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    res
}

/// No-op on Windows; POSIX-style directory modes are not applicable.
pub fn set_dir_mode_0700(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// No-op on Windows; POSIX-style file modes are not applicable.
pub fn set_file_mode_0600(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Minimal security check: path must be an existing, non-readonly directory.
pub fn ensure_secure_directory(path: &Path, label: &str) -> Result<()> {
    let meta = fs::metadata(path)?;
    if !meta.is_dir() {
        bail!("{} '{}' is not a directory", label, path.display());
    }
    if meta.permissions().readonly() {
        bail!("{} '{}' has READONLY permissions; cannot write", label, path.display());
    }
    Ok(())
}
