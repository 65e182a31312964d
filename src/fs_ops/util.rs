#[cfg(unix)]
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Prefix shared by every hidden transient file this crate creates.
pub const TEMP_PREFIX: &str = ".vault_mover.";
pub const TEMP_SUFFIX: &str = ".tmp";

static SEQ: AtomicU64 = AtomicU64::new(0);

/// Hidden, unique temp path inside `dst_dir`: ".vault_mover.<pid>.<nanos>.<seq>.tmp".
pub fn unique_temp_path(dst_dir: &Path) -> PathBuf {
    let pid = std::process::id();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    dst_dir.join(format!("{TEMP_PREFIX}{pid}.{nanos}.{seq}{TEMP_SUFFIX}"))
}

pub fn is_temp_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|s| s.to_str())
        .map(|n| n.starts_with(TEMP_PREFIX) && n.ends_with(TEMP_SUFFIX))
        .unwrap_or(false)
}

pub fn is_cross_device(e: &io::Error) -> bool {
    // std::io::ErrorKind has no stable CrossDeviceLink variant,
    // so detect EXDEV / ERROR_NOT_SAME_DEVICE via raw OS error codes.
    if let Some(code) = e.raw_os_error() {
        #[cfg(unix)]
        {
            if code == libc::EXDEV {
                return true;
            }
        }
        #[cfg(windows)]
        {
            // ERROR_NOT_SAME_DEVICE
            if code == 17 {
                return true;
            }
        }
    }
    false
}

#[cfg(unix)]
pub fn fsync_dir(dir: &Path) -> io::Result<()> {
    let f = File::open(dir)?;
    f.sync_all()
}

#[cfg(windows)]
pub fn fsync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn temp_paths_are_unique_and_recognized() {
        let dir = Path::new("/tmp/x");
        let set: HashSet<PathBuf> = (0..64).map(|_| unique_temp_path(dir)).collect();
        assert_eq!(set.len(), 64);
        assert!(set.iter().all(|p| is_temp_name(p)));
        assert!(!is_temp_name(Path::new("/tmp/x/photo.jpg")));
    }
}
