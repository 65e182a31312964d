//! Atomic rename helper.
//! - Renames within one filesystem; the caller owns any fallback.
//! - On Windows, removes an existing destination first (RenameFile doesn't overwrite).
//!   Callers only ever rename over a reservation they created themselves.
//! - On Unix, best-effort fsync of the destination directory after rename.

use std::fs;
use std::io;
use std::path::Path;

pub fn try_atomic_move(src: &Path, dst: &Path) -> io::Result<()> {
    #[cfg(windows)]
    {
        if dst.exists() {
            if let Err(e) = fs::remove_file(dst) {
                if e.kind() != io::ErrorKind::NotFound {
                    return Err(e);
                }
            }
        }
    }

    fs::rename(src, dst)?;

    // Ignore fsync errors to avoid turning a successful rename into a failure.
    #[cfg(unix)]
    if let Some(parent) = dst.parent() {
        let _ = super::util::fsync_dir(parent);
    }

    Ok(())
}

/// Rename `src` to `dst` only if nothing lives at `dst` yet.
///
/// Used for rollback and compensation, where clobbering a file that reappeared at the
/// original location would lose data. The check-then-rename window is tolerated because
/// the engine never writes to source locations itself.
pub fn move_back_no_clobber(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::symlink_metadata(dst) {
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("refusing to overwrite '{}'", dst.display()),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)?;
            }
            try_atomic_move(src, dst)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn move_back_refuses_existing_target() {
        let td = tempdir().unwrap();
        let a = td.path().join("a");
        let b = td.path().join("b");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();
        let err = move_back_no_clobber(&a, &b).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&b).unwrap(), b"b");
    }

    #[test]
    fn move_back_recreates_parent() {
        let td = tempdir().unwrap();
        let a = td.path().join("a");
        fs::write(&a, b"a").unwrap();
        let b = td.path().join("gone").join("b");
        move_back_no_clobber(&a, &b).unwrap();
        assert!(b.exists() && !a.exists());
    }
}
