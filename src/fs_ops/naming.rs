//! Collision-free name reservation.
//!
//! Duplicate storage and quarantine both need a target name that no other worker will
//! pick. A name is *reserved* by creating an empty file with O_EXCL; whoever creates it
//! owns it and later renames the real content over it.
//!
//! - `reserve_exact`: the requested path or `AlreadyExists`.
//! - `reserve_unique`: the requested name, else "stem (2).ext", "stem (3).ext", ...
//!   with the stem truncated so the name stays within filesystem limits.

use std::ffi::{OsStr, OsString};
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;

// Conservative filename limits (bytes/characters, platform-specific and approximate).
#[cfg(windows)]
pub const MAX_FILENAME_LEN: usize = 240;
#[cfg(not(windows))]
pub const MAX_FILENAME_LEN: usize = 255;

const MAX_TRIES: u64 = 10_000;

/// Atomically create an empty placeholder at `path`.
pub fn reserve_exact(path: &Path) -> io::Result<()> {
    OpenOptions::new().write(true).create_new(true).open(path).map(|_| ())
}

/// Reserve the first free variant of `name` inside `dir` and return its path.
pub fn reserve_unique(dir: &Path, name: &OsStr) -> io::Result<PathBuf> {
    let base = Path::new(name);
    let stem: OsString = base
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| name.to_os_string());
    let ext: Option<OsString> = base.extension().map(|e| e.to_os_string());

    let first = dir.join(build_name_with_suffix(&stem, ext.as_deref(), ""));
    match reserve_exact(&first) {
        Ok(()) => return Ok(first),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e),
    }

    for n in 2..=MAX_TRIES {
        let candidate = dir.join(build_name_with_suffix(&stem, ext.as_deref(), &format!(" ({n})")));
        match reserve_exact(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if n == 4 {
                    trace!(name = ?name, dir = %dir.display(), "reserve: multiple collisions, continuing to search");
                }
            }
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {:?} in {}", name, dir.display()),
    ))
}

#[cfg(unix)]
pub fn name_len_units(s: &OsStr) -> usize {
    use std::os::unix::ffi::OsStrExt;
    s.as_bytes().len()
}

#[cfg(windows)]
pub fn name_len_units(s: &OsStr) -> usize {
    s.to_string_lossy().len()
}

/// Truncate the stem so `stem + suffix + ["." + ext]` fits within MAX_FILENAME_LEN.
fn build_name_with_suffix(stem: &OsStr, ext: Option<&OsStr>, suffix: &str) -> OsString {
    let mut overhead = suffix.len();
    let mut ext_part = OsString::new();
    if let Some(e) = ext {
        overhead = overhead.saturating_add(1 + name_len_units(e));
        ext_part.push(".");
        ext_part.push(e);
    }

    let mut stem_os = stem.to_os_string();
    if name_len_units(&stem_os) + overhead > MAX_FILENAME_LEN {
        let budget = MAX_FILENAME_LEN.saturating_sub(overhead).max(1);
        let lossy = stem.to_string_lossy();
        let mut acc = String::new();
        for ch in lossy.chars() {
            if acc.len() + ch.len_utf8() > budget {
                break;
            }
            acc.push(ch);
        }
        if acc.is_empty() {
            acc.push('f');
        }
        stem_os = OsString::from(acc);
    }

    let mut out = stem_os;
    out.push(suffix);
    out.push(&ext_part);
    out
}
