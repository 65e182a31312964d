//! Metadata preservation.
//! - Captures timestamps (atime, mtime) and, on Unix, permission bits before a move.
//! - Re-applies them to the relocated file.
//! - Best-effort: failures are logged and ignored; content integrity is what the engine guards.

use filetime::{set_file_times, FileTime};
use std::fs;
use std::path::Path;
use tracing::{trace, warn};

/// Timestamps and mode bits taken from a source file.
#[derive(Debug, Clone, Copy)]
pub struct SourceStamp {
    pub accessed: FileTime,
    pub modified: FileTime,
    #[cfg(unix)]
    pub mode: u32,
    #[cfg(not(unix))]
    pub readonly: bool,
}

impl SourceStamp {
    pub fn capture(meta: &fs::Metadata) -> Self {
        Self {
            accessed: FileTime::from_last_access_time(meta),
            modified: FileTime::from_last_modification_time(meta),
            #[cfg(unix)]
            mode: {
                use std::os::unix::fs::PermissionsExt;
                meta.permissions().mode() & 0o7777
            },
            #[cfg(not(unix))]
            readonly: meta.permissions().readonly(),
        }
    }
}

pub fn apply_stamp(dest: &Path, stamp: &SourceStamp) {
    if let Err(e) = set_file_times(dest, stamp.accessed, stamp.modified) {
        warn!(path = %dest.display(), error = %e, "failed to set atime/mtime on destination");
    } else {
        trace!(path = %dest.display(), "set atime/mtime on destination");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(dest, fs::Permissions::from_mode(stamp.mode)) {
            warn!(path = %dest.display(), mode = format!("{:o}", stamp.mode), error = %e, "failed to set permissions on destination");
        }
    }

    #[cfg(not(unix))]
    {
        if let Ok(meta) = fs::metadata(dest) {
            let mut perms = meta.permissions();
            perms.set_readonly(stamp.readonly);
            if let Err(e) = fs::set_permissions(dest, perms) {
                warn!(path = %dest.display(), error = %e, "failed to set readonly attribute on destination");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mtime_is_carried_over() {
        let td = tempdir().unwrap();
        let a = td.path().join("a");
        let b = td.path().join("b");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();
        let old = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&a, old).unwrap();

        let stamp = SourceStamp::capture(&fs::metadata(&a).unwrap());
        apply_stamp(&b, &stamp);
        let got = FileTime::from_last_modification_time(&fs::metadata(&b).unwrap());
        assert_eq!(got.unix_seconds(), 1_600_000_000);
    }
}
