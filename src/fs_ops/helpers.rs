//! I/O helper utilities.
//!
//! Enrich io::Error with actionable hints. Used for quarantine messages and for
//! anyhow-returning setup code:
//!   fs::create_dir_all(dir).map_err(io_error_with_help("create dir", dir))?;

use anyhow::anyhow;
use std::io;
use std::path::Path;

/// Human-friendly message with op/path plus platform-aware hints.
pub fn describe_io(op: &str, path: &Path, e: &io::Error) -> String {
    let mut msg = format!("{} '{}': {}", op, path.display(), e);

    if let Some(code) = e.raw_os_error() {
        #[cfg(unix)]
        {
            let hint = match code {
                libc::EACCES | libc::EPERM => Some("permission denied; check ownership and write permissions"),
                libc::EXDEV => Some("cross-filesystem; atomic rename not possible"),
                libc::EBUSY => Some("resource busy; ensure no other process is writing"),
                libc::ENOENT => Some("path not found; verify it exists"),
                libc::EEXIST => Some("already exists; pick a unique name or remove the target"),
                libc::ENOSPC => Some("insufficient space on device"),
                libc::EROFS => Some("read-only filesystem; cannot write here"),
                libc::EIO => Some("low-level I/O error; the medium may be failing"),
                libc::ENAMETOOLONG => Some("filename or path too long; shorten path segments"),
                libc::ESTALE => Some("stale network file handle; remount or retry later"),
                libc::ETIMEDOUT => Some("timed out; network storage may be unavailable"),
                libc::EMFILE | libc::ENFILE => Some("file descriptor limit reached"),
                _ => None,
            };
            if let Some(h) = hint {
                msg.push_str(" (");
                msg.push_str(h);
                msg.push(')');
            }
        }
        #[cfg(windows)]
        {
            let hint = match code {
                5 => Some("access denied; check permissions"),
                17 => Some("not same device; cross-filesystem move"),
                32 => Some("sharing violation; file is in use"),
                2 | 3 => Some("path not found; verify it exists"),
                80 => Some("already exists; pick a unique name"),
                112 => Some("insufficient disk space"),
                206 => Some("filename or path too long"),
                _ => None,
            };
            if let Some(h) = hint {
                msg.push_str(" (");
                msg.push_str(h);
                msg.push(')');
            }
        }
        msg.push_str(&format!(" [os code: {}]", code));
    } else {
        let hint = match e.kind() {
            io::ErrorKind::PermissionDenied => Some("permission denied; check ownership and write permissions"),
            io::ErrorKind::NotFound => Some("path not found; verify it exists"),
            io::ErrorKind::AlreadyExists => Some("already exists; remove or choose a unique name"),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Some("busy/timed out; retry later"),
            _ => None,
        };
        if let Some(h) = hint {
            msg.push_str(" (");
            msg.push_str(h);
            msg.push(')');
        }
    }

    msg
}

/// Adapter for anyhow::Result code: `.map_err(io_error_with_help("op", path))`.
pub fn io_error_with_help<'a>(
    op: &'a str,
    path: &'a Path,
) -> impl FnOnce(io::Error) -> anyhow::Error + 'a {
    move |e: io::Error| anyhow!(describe_io(op, path, &e))
}
