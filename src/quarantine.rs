//! Quarantine: categorized holding areas for files the engine cannot safely place.
//!
//! Layout: `<quarantine_root>/<REASON>/<filename>` plus a sidecar
//! `<filename>.quarantine.json` carrying everything needed to retry later.
//! Quarantined bytes are never modified or deleted. When a file cannot be relocated
//! into quarantine at all (unreadable content on another volume), it is quarantined
//! in place: the sidecar is still written and `current_path` names the original.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::errors::{IntegrityError, ReadStage, RelocateError};
use crate::fs_ops::{self, describe_io};
use crate::integrity::{Digester, IntegrityVerifier};
use crate::model::{RelocationRecord, RelocationRequest};
use crate::mover::RenameFn;
use crate::platform::atomic_write;

pub const SIDECAR_SUFFIX: &str = ".quarantine.json";

/// Closed set of reasons a file can be quarantined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    ChecksumMismatch,
    PermissionDenied,
    InsufficientSpace,
    PathTooLong,
    InvalidCharacters,
    DestinationExists,
    TransientIo,
    CorruptionSuspected,
    Unclassified,
}

impl Reason {
    pub const ALL: [Reason; 9] = [
        Reason::ChecksumMismatch,
        Reason::PermissionDenied,
        Reason::InsufficientSpace,
        Reason::PathTooLong,
        Reason::InvalidCharacters,
        Reason::DestinationExists,
        Reason::TransientIo,
        Reason::CorruptionSuspected,
        Reason::Unclassified,
    ];

    /// Directory name under the quarantine root.
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::ChecksumMismatch => "CHECKSUM_MISMATCH",
            Reason::PermissionDenied => "PERMISSION_DENIED",
            Reason::InsufficientSpace => "INSUFFICIENT_SPACE",
            Reason::PathTooLong => "PATH_TOO_LONG",
            Reason::InvalidCharacters => "INVALID_CHARACTERS",
            Reason::DestinationExists => "DESTINATION_EXISTS",
            Reason::TransientIo => "TRANSIENT_IO",
            Reason::CorruptionSuspected => "CORRUPTION_SUSPECTED",
            Reason::Unclassified => "UNCLASSIFIED",
        }
    }

    /// Whether resubmitting after fixing the environment is expected to help.
    pub fn default_retryable(self) -> bool {
        match self {
            Reason::PermissionDenied
            | Reason::TransientIo
            | Reason::InsufficientSpace
            | Reason::DestinationExists => true,
            Reason::ChecksumMismatch
            | Reason::CorruptionSuspected
            | Reason::PathTooLong
            | Reason::InvalidCharacters
            | Reason::Unclassified => false,
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Reason {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_uppercase().replace('-', "_");
        Reason::ALL
            .into_iter()
            .find(|r| r.as_str() == norm)
            .ok_or_else(|| format!("unknown quarantine reason: '{s}'"))
    }
}

/// Map an engine error onto the closed reason set.
pub fn classify(err: &RelocateError) -> Reason {
    match err {
        RelocateError::IntegrityMismatch { .. } => Reason::ChecksumMismatch,
        RelocateError::PermissionDenied { .. } => Reason::PermissionDenied,
        RelocateError::InsufficientSpace { .. } => Reason::InsufficientSpace,
        RelocateError::PathTooLong(_) => Reason::PathTooLong,
        RelocateError::InvalidCharacters(_) => Reason::InvalidCharacters,
        RelocateError::DestinationExists(_) => Reason::DestinationExists,
        RelocateError::Io { source, .. } => classify_io(source),
        RelocateError::Integrity(IntegrityError::Io { stage, source, .. }) => {
            match (classify_io(source), stage) {
                (Reason::PermissionDenied, _) => Reason::PermissionDenied,
                (Reason::TransientIo, _) => Reason::TransientIo,
                (_, ReadStage::MidStream) => Reason::CorruptionSuspected,
                (other, ReadStage::Open) => other,
            }
        }
        RelocateError::SourceNotFound(_)
        | RelocateError::SourceNotFile(_)
        | RelocateError::DeclaredDigestMismatch { .. }
        | RelocateError::Integrity(IntegrityError::MalformedDigest { .. })
        | RelocateError::Store(_)
        | RelocateError::Interrupted => Reason::Unclassified,
    }
}

/// Classify a raw I/O error by kind and OS code.
pub fn classify_io(e: &io::Error) -> Reason {
    if let Some(code) = e.raw_os_error() {
        #[cfg(unix)]
        {
            match code {
                libc::EACCES | libc::EPERM | libc::EROFS => return Reason::PermissionDenied,
                libc::ENOSPC | libc::EDQUOT | libc::EFBIG => return Reason::InsufficientSpace,
                libc::ENAMETOOLONG => return Reason::PathTooLong,
                libc::EILSEQ => return Reason::InvalidCharacters,
                libc::EEXIST | libc::ENOTEMPTY => return Reason::DestinationExists,
                libc::ETIMEDOUT
                | libc::ESTALE
                | libc::EAGAIN
                | libc::EINTR
                | libc::EBUSY
                | libc::ECONNRESET
                | libc::ECONNABORTED
                | libc::EHOSTUNREACH
                | libc::ENETUNREACH
                | libc::ENETDOWN => return Reason::TransientIo,
                libc::EIO | libc::EBADMSG => return Reason::CorruptionSuspected,
                _ => {}
            }
        }
        #[cfg(windows)]
        {
            match code {
                5 | 19 => return Reason::PermissionDenied,
                39 | 112 => return Reason::InsufficientSpace,
                206 => return Reason::PathTooLong,
                123 => return Reason::InvalidCharacters,
                80 | 183 => return Reason::DestinationExists,
                32 | 33 | 53 | 64 | 121 => return Reason::TransientIo,
                23 | 1392 => return Reason::CorruptionSuspected,
                _ => {}
            }
        }
    }
    match e.kind() {
        io::ErrorKind::PermissionDenied => Reason::PermissionDenied,
        io::ErrorKind::AlreadyExists => Reason::DestinationExists,
        io::ErrorKind::TimedOut
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::Interrupted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted => Reason::TransientIo,
        io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => Reason::CorruptionSuspected,
        _ => Reason::Unclassified,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub id: Uuid,
    pub relocation_id: Uuid,
    pub current_path: PathBuf,
    pub sidecar_path: PathBuf,
    pub original_source_path: PathBuf,
    pub intended_destination: PathBuf,
    pub reason: Reason,
    pub message: String,
    pub digest: Option<String>,
    pub size_bytes: u64,
    pub recovery_attempts: u32,
    pub retryable: bool,
    /// True when the bytes could not be moved and still sit at the original path.
    pub in_place: bool,
    pub quarantined_at: DateTime<Utc>,
}

impl QuarantineEntry {
    /// A fresh request that resubmits this file once the underlying cause is fixed.
    pub fn to_request(&self) -> RelocationRequest {
        RelocationRequest::new(
            self.current_path.clone(),
            self.intended_destination.clone(),
            self.digest.clone().unwrap_or_default(),
            self.size_bytes,
        )
        .with_metadata("quarantine_id", self.id.to_string())
        .with_metadata("quarantine_reason", self.reason.as_str())
    }
}

/// Holding area rooted at one directory, one subdirectory per reason.
#[derive(Clone)]
pub struct QuarantineStore {
    root: PathBuf,
    digester: Arc<dyn Digester>,
    rename: RenameFn,
}

impl fmt::Debug for QuarantineStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuarantineStore")
            .field("root", &self.root)
            .field("algorithm", &self.digester.algorithm())
            .finish()
    }
}

impl QuarantineStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            digester: Arc::new(IntegrityVerifier::default()),
            rename: fs_ops::try_atomic_move,
        }
    }

    /// Digester used to check a copied file before the original is removed.
    pub fn with_digester(mut self, digester: Arc<dyn Digester>) -> Self {
        self.digester = digester;
        self
    }

    pub fn with_rename(mut self, rename: RenameFn) -> Self {
        self.rename = rename;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn reason_dir(&self, reason: Reason) -> PathBuf {
        self.root.join(reason.as_str())
    }

    pub fn classify(&self, err: &RelocateError) -> Reason {
        classify(err)
    }

    pub fn quarantine(
        &self,
        record: &RelocationRecord,
        reason: Reason,
        message: &str,
    ) -> Result<QuarantineEntry, RelocateError> {
        self.quarantine_with(record, reason, message, None)
    }

    /// Quarantine with an explicit `retryable` override.
    pub fn quarantine_with(
        &self,
        record: &RelocationRecord,
        reason: Reason,
        message: &str,
        retryable: Option<bool>,
    ) -> Result<QuarantineEntry, RelocateError> {
        let located = locate(record).ok_or_else(|| RelocateError::SourceNotFound(record.source_path.clone()))?;

        let dir = self.reason_dir(reason);
        fs::create_dir_all(&dir).map_err(|e| RelocateError::io("create quarantine directory", &dir, e))?;

        let (current_path, in_place) = self.relocate_into(&located, &dir, record.file_name().to_os_string())?;

        let sidecar_base = current_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| record.file_name().to_os_string());
        let sidecar_path =
            reserve_sidecar(&dir, &sidecar_base).map_err(|e| RelocateError::io("reserve quarantine sidecar", &dir, e))?;

        let entry = QuarantineEntry {
            id: Uuid::new_v4(),
            relocation_id: record.id,
            current_path,
            sidecar_path,
            original_source_path: record.source_path.clone(),
            intended_destination: record.intended_destination().to_path_buf(),
            reason,
            message: message.to_string(),
            digest: Some(record.content_digest.clone()).filter(|d| !d.is_empty()),
            size_bytes: record.size_bytes,
            recovery_attempts: 0,
            retryable: retryable.unwrap_or_else(|| reason.default_retryable()),
            in_place,
            quarantined_at: Utc::now(),
        };
        write_sidecar(&entry)?;

        warn!(
            id = %record.id,
            reason = %reason,
            src = %record.source_path.display(),
            dest = %record.destination_path.display(),
            quarantined = %entry.current_path.display(),
            in_place,
            digest = %record.content_digest,
            "File quarantined: {message}"
        );
        Ok(entry)
    }

    /// Move `located` into `dir`, falling back to copy, and finally to in-place.
    fn relocate_into(&self, located: &Path, dir: &Path, name: OsString) -> Result<(PathBuf, bool), RelocateError> {
        let target = fs_ops::reserve_unique(dir, &name)
            .map_err(|e| RelocateError::io("reserve quarantine name", dir, e))?;

        match (self.rename)(located, &target) {
            Ok(()) => return Ok((target, false)),
            Err(e) => {
                info!(src = %located.display(), error = %e, "quarantine rename failed, copying instead");
            }
        }

        let original = match self.digester.digest(located) {
            Ok(d) => d,
            Err(e) => {
                let _ = fs::remove_file(&target);
                warn!(src = %located.display(), error = %e, "cannot read original for quarantine copy; quarantining in place");
                return Ok((located.to_path_buf(), true));
            }
        };
        match fs_ops::copy_into_place(located, &target) {
            Ok(bytes) => match self.digester.verify(&target, &original) {
                Ok(v) if v.matches => {
                    if let Err(e) = fs::remove_file(located) {
                        warn!(path = %located.display(), error = %e, "copied into quarantine but could not remove original");
                    }
                    Ok((target, false))
                }
                Ok(v) => {
                    let _ = fs::remove_file(&target);
                    warn!(
                        src = %located.display(),
                        bytes,
                        expected = %original,
                        actual = %v.actual,
                        "quarantine copy does not match the original; quarantining in place"
                    );
                    Ok((located.to_path_buf(), true))
                }
                Err(e) => {
                    let _ = fs::remove_file(&target);
                    warn!(src = %located.display(), error = %e, "cannot verify quarantine copy; quarantining in place");
                    Ok((located.to_path_buf(), true))
                }
            },
            Err(e) => {
                let _ = fs::remove_file(&target);
                warn!(
                    src = %located.display(),
                    error = %describe_io("copy into quarantine", located, &e),
                    "quarantining in place"
                );
                Ok((located.to_path_buf(), true))
            }
        }
    }

    /// Every entry, optionally filtered to one reason, oldest first.
    pub fn list(&self, reason: Option<Reason>) -> Result<Vec<QuarantineEntry>, RelocateError> {
        let roots: Vec<PathBuf> = match reason {
            Some(r) => vec![self.reason_dir(r)],
            None => Reason::ALL.iter().map(|r| self.reason_dir(*r)).collect(),
        };

        let mut entries = Vec::new();
        for dir in roots.iter().filter(|d| d.is_dir()) {
            for dent in WalkDir::new(dir).min_depth(1).max_depth(1).into_iter().filter_map(Result::ok) {
                let is_sidecar = dent
                    .file_name()
                    .to_str()
                    .map(|n| n.ends_with(SIDECAR_SUFFIX))
                    .unwrap_or(false);
                if !dent.file_type().is_file() || !is_sidecar {
                    continue;
                }
                match read_sidecar(dent.path()) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!(path = %dent.path().display(), error = %e, "skipping unreadable quarantine sidecar"),
                }
            }
        }
        entries.sort_by_key(|e| e.quarantined_at);
        Ok(entries)
    }

    /// Count a recovery attempt and persist it to the sidecar.
    pub fn record_recovery_attempt(&self, entry: &mut QuarantineEntry) -> Result<(), RelocateError> {
        entry.recovery_attempts = entry.recovery_attempts.saturating_add(1);
        write_sidecar(entry)
    }
}

/// Where the file's bytes currently are: wherever the mover left them (a failed
/// rollback sets `final_path`), else the untouched source. The destination path alone
/// is never trusted since another relocation may own it.
fn locate(record: &RelocationRecord) -> Option<PathBuf> {
    record
        .final_path
        .iter()
        .chain(std::iter::once(&record.source_path))
        .find(|p| is_regular_file(p))
        .cloned()
}

/// `<base>.quarantine.json`, else `<base> (n).quarantine.json`; the suffix always stays last.
fn reserve_sidecar(dir: &Path, base: &std::ffi::OsStr) -> io::Result<PathBuf> {
    for n in 1..=10_000u32 {
        let mut name = base.to_os_string();
        if n > 1 {
            name.push(format!(" ({n})"));
        }
        name.push(SIDECAR_SUFFIX);
        let candidate = dir.join(name);
        match fs_ops::reserve_exact(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(io::ErrorKind::AlreadyExists, "no free sidecar name"))
}

fn is_regular_file(p: &Path) -> bool {
    fs::symlink_metadata(p).map(|m| m.file_type().is_file()).unwrap_or(false)
}

fn write_sidecar(entry: &QuarantineEntry) -> Result<(), RelocateError> {
    let bytes = serde_json::to_vec_pretty(entry).map_err(crate::errors::StoreError::from)?;
    atomic_write(&entry.sidecar_path, &bytes).map_err(|e| {
        error!(path = %entry.sidecar_path.display(), error = %e, "failed to write quarantine sidecar");
        RelocateError::io("write quarantine sidecar", &entry.sidecar_path, e)
    })
}

fn read_sidecar(path: &Path) -> Result<QuarantineEntry, RelocateError> {
    let bytes = fs::read(path).map_err(|e| RelocateError::io("read quarantine sidecar", path, e))?;
    let entry = serde_json::from_slice(&bytes).map_err(crate::errors::StoreError::from)?;
    Ok(entry)
}
