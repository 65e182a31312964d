//! Free-space queries for capacity checks.

use std::io;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::ffi::OsStrExt;
#[cfg(windows)]
use std::os::windows::ffi::OsStrExt;

pub fn format_bytes(n: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let f = n as f64;
    if f >= GB {
        format!("{:.1} GiB", f / GB)
    } else if f >= MB {
        format!("{:.1} MiB", f / MB)
    } else if f >= KB {
        format!("{:.1} KiB", f / KB)
    } else {
        format!("{} B", n)
    }
}

/// Bytes required for `requested` bytes with a fractional safety `margin` (0.10 = 10%).
pub fn required_with_margin(requested: u128, margin: f64) -> u128 {
    let margin_bytes = (requested as f64 * margin.max(0.0)).ceil() as u128;
    requested.saturating_add(margin_bytes)
}

/// Nearest existing ancestor; statvfs needs a path that exists.
fn existing_ancestor(path: &Path) -> &Path {
    let mut p = path;
    while !p.exists() {
        match p.parent() {
            Some(parent) => p = parent,
            None => break,
        }
    }
    p
}

#[cfg(unix)]
pub fn free_space_bytes(path: &Path) -> io::Result<u64> {
    let path = existing_ancestor(path);
    let mut s: libc::statvfs = unsafe { std::mem::zeroed() };
    let cpath = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
    // SAFETY: cpath is NUL-terminated and `s` is a properly sized out-parameter.
    let rc = unsafe { libc::statvfs(cpath.as_ptr(), &mut s) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    #[allow(clippy::unnecessary_cast)]
    Ok((s.f_bavail as u64).saturating_mul(s.f_frsize as u64))
}

#[cfg(windows)]
pub fn free_space_bytes(path: &Path) -> io::Result<u64> {
    use std::iter::once;
    use windows_sys::Win32::Storage::FileSystem::GetDiskFreeSpaceExW;
    let path = existing_ancestor(path);
    let wide: Vec<u16> = path.as_os_str().encode_wide().chain(once(0)).collect();
    let mut free_avail: u64 = 0;
    let mut _total: u64 = 0;
    let mut _total_free: u64 = 0;
    let ok = unsafe {
        GetDiskFreeSpaceExW(
            wide.as_ptr(),
            &mut free_avail as *mut u64,
            &mut _total as *mut u64,
            &mut _total_free as *mut u64,
        )
    };
    if ok == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(free_avail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn margin_is_ten_percent() {
        assert_eq!(required_with_margin(1000, 0.10), 1100);
        assert_eq!(required_with_margin(0, 0.10), 0);
    }

    #[test]
    fn free_space_of_missing_child_uses_ancestor() {
        let td = tempdir().unwrap();
        let bytes = free_space_bytes(&td.path().join("not").join("yet")).unwrap();
        assert!(bytes > 0);
    }

    #[test]
    fn formats_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
    }
}
