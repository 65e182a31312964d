//! Single verified relocation with rollback.
//!
//! `PENDING -> IN_PROGRESS -> VERIFYING -> COMPLETED`, or `FAILED` / `ROLLED_BACK` when
//! a step fails. The destination name is reserved with an exclusive create before any
//! bytes move, so two movers aiming at the same path never overwrite each other.
//! Attempts atomic rename; on failure (cross-filesystem or otherwise) falls back to a
//! fsynced copy into the reservation and removes the source only after verification.
//! No retries happen here.

use std::fs;
use std::io;
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::errors::RelocateError;
use crate::fs_ops::{
    self, apply_stamp, copy_into_place, move_back_no_clobber, reserve_exact, try_atomic_move,
    SourceStamp,
};
use crate::integrity::Digester;
use crate::model::{RelocationRecord, RelocationStatus};

pub const MAX_COMPONENT_BYTES: usize = 255;
pub const MAX_PATH_BYTES: usize = 4096;

/// How the bytes reached the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMethod {
    Rename,
    Copy,
}

#[derive(Debug)]
pub struct MoveResult {
    /// COMPLETED, FAILED or ROLLED_BACK.
    pub status: RelocationStatus,
    pub error: Option<RelocateError>,
    pub source_digest: Option<String>,
    pub method: Option<MoveMethod>,
    pub elapsed: Duration,
}

impl MoveResult {
    pub fn is_completed(&self) -> bool {
        self.status == RelocationStatus::Completed
    }

    /// True when the failure is the caller's fault and must not be quarantined.
    pub fn is_input_error(&self) -> bool {
        self.error.as_ref().is_some_and(RelocateError::is_input_error)
    }
}

/// The same-volume rename attempted before falling back to a copy.
pub type RenameFn = fn(&Path, &Path) -> io::Result<()>;

pub struct AtomicMover {
    digester: Arc<dyn Digester>,
    preserve_metadata: bool,
    rename: RenameFn,
}

impl AtomicMover {
    pub fn new(digester: Arc<dyn Digester>, preserve_metadata: bool) -> Self {
        Self {
            digester,
            preserve_metadata,
            rename: try_atomic_move,
        }
    }

    /// Replace the rename step, e.g. with one that always reports a cross-device error.
    pub fn with_rename(mut self, rename: RenameFn) -> Self {
        self.rename = rename;
        self
    }

    pub fn digester(&self) -> &Arc<dyn Digester> {
        &self.digester
    }

    /// Relocate `record.source_path` to `record.destination_path`, updating the record's
    /// status, timestamps, rollback flags and `final_path` as it goes.
    pub fn execute(&self, record: &mut RelocationRecord) -> MoveResult {
        self.run(record, false)
    }

    /// Like [`execute`](Self::execute) for a destination the caller already reserved
    /// (an empty placeholder it created with an exclusive create). The placeholder is
    /// removed again if the bytes never land.
    pub fn execute_reserved(&self, record: &mut RelocationRecord) -> MoveResult {
        let res = self.run(record, true);
        if !res.is_completed() && record.final_path.is_none() {
            release_reservation(&record.destination_path);
        }
        res
    }

    fn run(&self, record: &mut RelocationRecord, reserved: bool) -> MoveResult {
        let start = Instant::now();
        if record.status != RelocationStatus::InProgress {
            record.transition(RelocationStatus::InProgress);
        }
        info!(
            id = %record.id,
            src = %record.source_path.display(),
            dest = %record.destination_path.display(),
            digest = %record.content_digest,
            "relocation started"
        );

        let src = record.source_path.clone();
        let dest = record.destination_path.clone();

        // Steps 1-4: nothing has moved yet, a failure is a plain FAILED.
        let prepared = self.prepare(record, &src, &dest, reserved);
        let (source_digest, stamp) = match prepared {
            Ok(p) => p,
            Err(e) => return self.fail(record, e, None, None, start),
        };

        // Step 5: relocate over the reservation.
        let method = match (self.rename)(&src, &dest) {
            Ok(()) => MoveMethod::Rename,
            Err(e) => {
                warn!(
                    id = %record.id,
                    error = %e,
                    cross_device = fs_ops::is_cross_device(&e),
                    "Atomic rename failed, using safe copy+rename"
                );
                match copy_into_place(&src, &dest) {
                    Ok(bytes) => {
                        debug!(id = %record.id, bytes, "copied into reservation");
                        MoveMethod::Copy
                    }
                    Err(e) => {
                        release_reservation(&dest);
                        let err = RelocateError::io("copy into vault", &src, e);
                        return self.fail(record, err, Some(source_digest), None, start);
                    }
                }
            }
        };
        record.final_path = Some(dest.clone());
        info!(id = %record.id, method = ?method, elapsed_ms = start.elapsed().as_millis() as u64, "bytes relocated");

        if self.preserve_metadata {
            apply_stamp(&dest, &stamp);
        }

        // Step 6: verify the destination against the source digest.
        record.transition(RelocationStatus::Verifying);
        let verified = match self.digester.verify(&dest, &source_digest) {
            Ok(v) if v.matches => Ok(()),
            Ok(v) => Err(RelocateError::IntegrityMismatch {
                path: dest.clone(),
                expected: source_digest.clone(),
                actual: v.actual,
            }),
            Err(e) => Err(RelocateError::from(e)),
        };

        if let Err(err) = verified {
            error!(id = %record.id, dest = %dest.display(), error = %err, "verification failed; rolling back");
            return self.rollback(record, method, err, source_digest, start);
        }

        if method == MoveMethod::Copy {
            if let Err(e) = fs::remove_file(&src) {
                warn!(
                    id = %record.id,
                    src = %src.display(),
                    error = %fs_ops::describe_io("remove original file", &src, &e),
                    "verified copy landed but the source could not be removed"
                );
            }
        }

        record.transition(RelocationStatus::Completed);
        let elapsed = start.elapsed();
        info!(
            id = %record.id,
            dest = %dest.display(),
            elapsed_ms = elapsed.as_millis() as u64,
            "relocation verified"
        );
        MoveResult {
            status: RelocationStatus::Completed,
            error: None,
            source_digest: Some(source_digest),
            method: Some(method),
            elapsed,
        }
    }

    /// Source checks, declared-digest check, destination validation and reservation.
    fn prepare(
        &self,
        record: &RelocationRecord,
        src: &Path,
        dest: &Path,
        reserved: bool,
    ) -> Result<(String, SourceStamp), RelocateError> {
        let meta = fs::symlink_metadata(src).map_err(|e| RelocateError::io("open source", src, e))?;
        if !meta.file_type().is_file() {
            return Err(RelocateError::SourceNotFile(src.to_path_buf()));
        }

        self.digester.algorithm().validate_hex(&record.content_digest)?;
        let actual = self.digester.digest(src)?;
        if !actual.eq_ignore_ascii_case(&record.content_digest) {
            return Err(RelocateError::DeclaredDigestMismatch {
                path: src.to_path_buf(),
                declared: record.content_digest.clone(),
                actual,
            });
        }

        validate_destination(dest)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| RelocateError::io("create destination directory", parent, e))?;
        }
        if !reserved {
            reserve_exact(dest).map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => RelocateError::DestinationExists(dest.to_path_buf()),
                _ => RelocateError::io("reserve destination", dest, e),
            })?;
            debug!(id = %record.id, dest = %dest.display(), "destination reserved");
        }

        Ok((actual, SourceStamp::capture(&meta)))
    }

    fn rollback(
        &self,
        record: &mut RelocationRecord,
        method: MoveMethod,
        err: RelocateError,
        source_digest: String,
        start: Instant,
    ) -> MoveResult {
        let src = record.source_path.clone();
        let dest = record.destination_path.clone();
        record.rollback_attempted = true;

        let undone = match method {
            MoveMethod::Rename => move_back_no_clobber(&dest, &src),
            MoveMethod::Copy => fs::remove_file(&dest),
        };

        match undone {
            Ok(()) => {
                record.rollback_succeeded = Some(true);
                record.final_path = None;
                record.fail_with(RelocationStatus::RolledBack, err.to_string());
                let elapsed = start.elapsed();
                warn!(
                    id = %record.id,
                    src = %src.display(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "rolled back; source restored"
                );
                MoveResult {
                    status: RelocationStatus::RolledBack,
                    error: Some(err),
                    source_digest: Some(source_digest),
                    method: Some(method),
                    elapsed,
                }
            }
            Err(e) => {
                record.rollback_succeeded = Some(false);
                error!(
                    id = %record.id,
                    src = %src.display(),
                    dest = %dest.display(),
                    error = %fs_ops::describe_io("roll back", &dest, &e),
                    "rollback failed; bytes remain at destination"
                );
                self.fail(record, err, Some(source_digest), Some(method), start)
            }
        }
    }

    fn fail(
        &self,
        record: &mut RelocationRecord,
        err: RelocateError,
        source_digest: Option<String>,
        method: Option<MoveMethod>,
        start: Instant,
    ) -> MoveResult {
        record.fail_with(RelocationStatus::Failed, err.to_string());
        let elapsed = start.elapsed();
        warn!(
            id = %record.id,
            src = %record.source_path.display(),
            dest = %record.destination_path.display(),
            code = err.code(),
            elapsed_ms = elapsed.as_millis() as u64,
            "relocation failed: {err}"
        );
        MoveResult {
            status: RelocationStatus::Failed,
            error: Some(err),
            source_digest,
            method,
            elapsed,
        }
    }

    /// Undo a completed relocation: put the destination back at the source.
    /// Refuses to overwrite anything that appeared at the source since.
    pub fn compensate(&self, record: &RelocationRecord) -> Result<(), RelocateError> {
        let src = &record.source_path;
        let dest = &record.destination_path;
        match move_back_no_clobber(dest, src) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(RelocateError::io("compensate (source reappeared)", src, e));
            }
            Err(e) => {
                warn!(id = %record.id, error = %e, "compensating rename failed, copying back");
                fs_ops::copy_streaming(dest, src).map_err(|e| RelocateError::io("compensate by copy", src, e))?;
                let restored = self.digester.verify(src, &record.content_digest)?;
                if !restored.matches {
                    let _ = fs::remove_file(src);
                    return Err(RelocateError::IntegrityMismatch {
                        path: src.clone(),
                        expected: record.content_digest.clone(),
                        actual: restored.actual,
                    });
                }
                fs::remove_file(dest).map_err(|e| RelocateError::io("remove compensated destination", dest, e))?;
            }
        }
        info!(id = %record.id, src = %src.display(), dest = %dest.display(), "compensated: source restored");
        Ok(())
    }
}

/// Remove our own empty reservation after a failed relocation.
fn release_reservation(dest: &Path) {
    match fs::symlink_metadata(dest) {
        Ok(m) if m.is_file() && m.len() == 0 => {
            if let Err(e) = fs::remove_file(dest) {
                warn!(dest = %dest.display(), error = %e, "could not remove destination reservation");
            }
        }
        _ => {}
    }
}

/// Destination legality: component and total length, NUL and control characters.
pub fn validate_destination(dest: &Path) -> Result<(), RelocateError> {
    if dest.file_name().is_none() {
        return Err(RelocateError::InvalidCharacters(dest.to_path_buf()));
    }
    if path_len_bytes(dest) > MAX_PATH_BYTES {
        return Err(RelocateError::PathTooLong(dest.to_path_buf()));
    }
    for comp in dest.components() {
        if let Component::Normal(part) = comp {
            if fs_ops::naming::name_len_units(part) > MAX_COMPONENT_BYTES {
                return Err(RelocateError::PathTooLong(dest.to_path_buf()));
            }
            if part.to_string_lossy().chars().any(char::is_control) {
                return Err(RelocateError::InvalidCharacters(dest.to_path_buf()));
            }
        }
    }
    Ok(())
}

fn path_len_bytes(p: &Path) -> usize {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        p.as_os_str().as_bytes().len()
    }
    #[cfg(not(unix))]
    {
        p.as_os_str().to_string_lossy().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::{DigestAlgorithm, IntegrityVerifier};
    use crate::model::RelocationRequest;
    use tempfile::tempdir;

    fn mover() -> AtomicMover {
        AtomicMover::new(Arc::new(IntegrityVerifier::new(DigestAlgorithm::Sha256)), true)
    }

    fn cross_device(_: &Path, _: &Path) -> io::Result<()> {
        Err(io::Error::other("Invalid cross-device link"))
    }

    /// Reports every file under `vault` as corrupt on verify.
    struct CorruptVault {
        inner: IntegrityVerifier,
        vault: std::path::PathBuf,
    }

    impl Digester for CorruptVault {
        fn algorithm(&self) -> DigestAlgorithm {
            DigestAlgorithm::Sha256
        }

        fn digest(&self, path: &Path) -> Result<String, crate::errors::IntegrityError> {
            if path.starts_with(&self.vault) {
                return Ok("0".repeat(64));
            }
            self.inner.digest(path)
        }
    }

    fn record(src: &Path, dest: &Path, body: &[u8]) -> RelocationRecord {
        let d = DigestAlgorithm::Sha256.digest_bytes(body);
        RelocationRecord::from_request(&RelocationRequest::new(src, dest, d, body.len() as u64))
    }

    #[test]
    fn moves_and_verifies() {
        let td = tempdir().unwrap();
        let src = td.path().join("in/a.txt");
        fs::create_dir_all(src.parent().unwrap()).unwrap();
        fs::write(&src, b"hello").unwrap();
        let dest = td.path().join("vault/2024/a.txt");

        let mut rec = record(&src, &dest, b"hello");
        let res = mover().execute(&mut rec);
        assert!(res.is_completed(), "{:?}", res.error);
        assert_eq!(res.method, Some(MoveMethod::Rename));
        assert!(!src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"hello");
        assert_eq!(rec.status, RelocationStatus::Completed);
        assert_eq!(rec.final_path.as_deref(), Some(dest.as_path()));
    }

    #[test]
    fn declared_digest_mismatch_moves_nothing() {
        let td = tempdir().unwrap();
        let src = td.path().join("a.txt");
        fs::write(&src, b"hello").unwrap();
        let dest = td.path().join("vault/a.txt");
        let mut rec = record(&src, &dest, b"other content");

        let res = mover().execute(&mut rec);
        assert_eq!(res.status, RelocationStatus::Failed);
        assert!(res.is_input_error());
        assert!(src.exists());
        assert!(!dest.exists());
    }

    #[test]
    fn existing_destination_is_never_overwritten() {
        let td = tempdir().unwrap();
        let src = td.path().join("a.txt");
        fs::write(&src, b"new").unwrap();
        let dest = td.path().join("a-dest.txt");
        fs::write(&dest, b"old").unwrap();

        let mut rec = record(&src, &dest, b"new");
        let res = mover().execute(&mut rec);
        assert!(matches!(res.error, Some(RelocateError::DestinationExists(_))));
        assert_eq!(fs::read(&dest).unwrap(), b"old");
        assert!(src.exists());
    }

    #[test]
    fn compensate_restores_source() {
        let td = tempdir().unwrap();
        let src = td.path().join("a.txt");
        fs::write(&src, b"hello").unwrap();
        let dest = td.path().join("v/a.txt");
        let m = mover();
        let mut rec = record(&src, &dest, b"hello");
        assert!(m.execute(&mut rec).is_completed());

        m.compensate(&rec).unwrap();
        assert_eq!(fs::read(&src).unwrap(), b"hello");
        assert!(!dest.exists());
    }

    #[test]
    fn destination_validation() {
        assert!(validate_destination(Path::new("/v/ok.txt")).is_ok());
        assert!(matches!(
            validate_destination(Path::new("/v/bad\u{7}name")),
            Err(RelocateError::InvalidCharacters(_))
        ));
        let long = format!("/v/{}", "x".repeat(300));
        assert!(matches!(validate_destination(Path::new(&long)), Err(RelocateError::PathTooLong(_))));
    }

    #[cfg(unix)]
    #[test]
    fn permission_bits_are_preserved() {
        use std::os::unix::fs::PermissionsExt;
        let td = tempdir().unwrap();
        let src = td.path().join("a.sh");
        fs::write(&src, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o750)).unwrap();
        let dest = td.path().join("v/a.sh");
        let mut rec = record(&src, &dest, b"#!/bin/sh\n");
        assert!(mover().execute(&mut rec).is_completed());
        let mode = fs::metadata(&dest).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o750);
    }

    #[test]
    fn copy_fallback_completes_and_removes_source() {
        let td = tempdir().unwrap();
        let src = td.path().join("in/a.txt");
        fs::create_dir_all(src.parent().unwrap()).unwrap();
        fs::write(&src, b"copied bytes").unwrap();
        let dest = td.path().join("vault/a.txt");

        let mut rec = record(&src, &dest, b"copied bytes");
        let res = mover().with_rename(cross_device).execute(&mut rec);
        assert!(res.is_completed(), "{:?}", res.error);
        assert_eq!(res.method, Some(MoveMethod::Copy));
        assert!(!src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"copied bytes");
        assert_eq!(rec.final_path.as_deref(), Some(dest.as_path()));
        let leftovers: Vec<_> = fs::read_dir(td.path().join("vault")).unwrap().collect();
        assert_eq!(leftovers.len(), 1, "temp files left behind");
    }

    #[test]
    fn copy_verify_mismatch_removes_destination_and_keeps_source() {
        let td = tempdir().unwrap();
        let src = td.path().join("a.txt");
        fs::write(&src, b"payload").unwrap();
        let vault = td.path().join("vault");
        let dest = vault.join("a.txt");

        let digester = CorruptVault {
            inner: IntegrityVerifier::new(DigestAlgorithm::Sha256),
            vault: vault.clone(),
        };
        let m = AtomicMover::new(Arc::new(digester), true).with_rename(cross_device);
        let mut rec = record(&src, &dest, b"payload");
        let res = m.execute(&mut rec);

        assert_eq!(res.status, RelocationStatus::RolledBack);
        assert_eq!(res.method, Some(MoveMethod::Copy));
        assert!(matches!(res.error, Some(RelocateError::IntegrityMismatch { .. })));
        assert!(rec.rollback_attempted);
        assert_eq!(rec.rollback_succeeded, Some(true));
        assert!(rec.final_path.is_none());
        assert!(!dest.exists());
        assert_eq!(fs::read(&src).unwrap(), b"payload");
    }

    #[cfg(unix)]
    #[test]
    fn copy_fallback_preserves_mode_and_mtime() {
        use filetime::FileTime;
        use std::os::unix::fs::PermissionsExt;
        let td = tempdir().unwrap();
        let src = td.path().join("a.sh");
        fs::write(&src, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&src, fs::Permissions::from_mode(0o640)).unwrap();
        let mtime = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&src, mtime).unwrap();
        let dest = td.path().join("v/a.sh");

        let mut rec = record(&src, &dest, b"#!/bin/sh\n");
        let res = mover().with_rename(cross_device).execute(&mut rec);
        assert_eq!(res.method, Some(MoveMethod::Copy));
        assert!(res.is_completed(), "{:?}", res.error);

        let meta = fs::metadata(&dest).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o640);
        assert_eq!(FileTime::from_last_modification_time(&meta), mtime);
    }
}
