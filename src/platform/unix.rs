//! Unix implementations of platform helpers.

use anyhow::{bail, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;

use crate::fs_ops::{fsync_dir, unique_temp_path};

/// Open log file for appending; set 0600 only when creating a new file.
/// If the file already exists, we preserve its existing permissions to avoid
/// clobbering administrator adjustments (e.g. group-readable for log shipping).
pub fn open_log_file_secure_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let existed = path.exists();
    let f = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600) // applies on create
        .custom_flags(libc::O_NOFOLLOW)
        .open(path)?;
    if !existed {
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
    Ok(f)
}

/// Replace `path` with `contents` atomically: temp file (0600) + fsync + rename + fsync dir.
/// Readers see either the old bytes or the new bytes, never a torn write.
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let tmp = unique_temp_path(parent);
    let res = (|| -> io::Result<()> {
        let mut f = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&tmp)?;
        f.write_all(contents)?;
        f.sync_all()?;
        fs::rename(&tmp, path)?;
        fsync_dir(parent)
    })();
    if res.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    res
}

/// POSIX chmod 0700 for directories.
pub fn set_dir_mode_0700(path: &Path) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))
}

/// POSIX chmod 0600 for files.
pub fn set_file_mode_0600(path: &Path) -> io::Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

/// Refuse directories that are symlinks, not ours, or world-writable.
pub fn ensure_secure_directory(path: &Path, label: &str) -> Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        bail!("{} '{}' is a symlink; refusing to use it", label, path.display());
    }
    if !meta.is_dir() {
        bail!("{} '{}' is not a directory", label, path.display());
    }
    let uid = unsafe { libc::geteuid() };
    if meta.uid() != uid && uid != 0 {
        bail!("{} '{}' is not owned by the current user", label, path.display());
    }
    if meta.mode() & 0o002 != 0 {
        bail!(
            "{} '{}' is world-writable (mode {:o})",
            label,
            path.display(),
            meta.mode() & 0o777
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn preserve_existing_log_file_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.txt");
        fs::write(&path, b"hello").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();
        let _f = open_log_file_secure_append(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640, "existing permissions should be preserved");
    }

    #[test]
    fn new_log_file_gets_0600() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new_log.txt");
        let _f = open_log_file_secure_append(&path).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "newly created log file should be 0600");
    }

    #[test]
    fn atomic_write_replaces_and_leaves_no_temp() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("store.json");
        atomic_write(&target, b"{\"v\":1}").unwrap();
        atomic_write(&target, b"{\"v\":2}").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"{\"v\":2}");
        let mode = fs::metadata(&target).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        for entry in fs::read_dir(dir.path()).unwrap() {
            let p = entry.unwrap().path();
            assert!(!crate::fs_ops::is_temp_name(&p), "leftover temp file: {}", p.display());
        }
    }

    #[test]
    fn world_writable_directory_is_rejected() {
        let dir = tempdir().unwrap();
        let d = dir.path().join("open");
        fs::create_dir(&d).unwrap();
        fs::set_permissions(&d, fs::Permissions::from_mode(0o777)).unwrap();
        assert!(ensure_secure_directory(&d, "vault").is_err());
        set_dir_mode_0700(&d).unwrap();
        ensure_secure_directory(&d, "vault").unwrap();
    }
}
