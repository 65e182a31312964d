//! Relocation engine: one file, a batch, or a side-effect-free preview.
//!
//! Per file: record PENDING -> claim the digest -> either relocate into duplicate storage
//! (content already archived) or relocate to the requested destination through the
//! coordinator -> settle the claim -> report an outcome.
//!
//! Batches run on a bounded rayon pool. Workers pull the next request in submission
//! order, so "stop on first error" and cancellation leave a clean tail of
//! NOT_ATTEMPTED files. Cancellation is only observed between files.

use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::coordinator::{CoordinatedOutcome, TransactionCoordinator};
use crate::duplicates::{duplicate_storage_dir, Claim, DuplicateRegistry};
use crate::errors::RelocateError;
use crate::fs_ops::{self, format_bytes, free_space_bytes, required_with_margin};
use crate::integrity::{Digester, IntegrityVerifier};
use crate::model::{
    BatchOutcome, BatchRequest, BatchSummary, DuplicateEntry, OutcomeStatus,
    RelocationOutcome, RelocationRecord, RelocationRequest, RelocationStatus,
};
use crate::mover::{validate_destination, AtomicMover};
use crate::quarantine::{classify, QuarantineStore, Reason};
use crate::shutdown::CancelToken;
use crate::store::{RecordStore, RedbStore, Transaction};

/// Free space on the volume holding `path`.
pub trait CapacityProbe: Send + Sync {
    fn available_bytes(&self, path: &Path) -> io::Result<u64>;
}

/// statvfs / GetDiskFreeSpaceExW backed probe.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsCapacity;

impl CapacityProbe for FsCapacity {
    fn available_bytes(&self, path: &Path) -> io::Result<u64> {
        free_space_bytes(path)
    }
}

/// Progress hooks, called synchronously from worker threads.
pub trait RelocationObserver: Send + Sync {
    fn on_start(&self, _request: &RelocationRequest) {}
    fn on_verified(&self, _record: &RelocationRecord) {}
    fn on_terminal(&self, _outcome: &RelocationOutcome) {}
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl RelocationObserver for NoopObserver {}

/// What `relocate_one` would do, computed without touching anything.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewResult {
    pub would_be_duplicate: bool,
    pub canonical_path: Option<PathBuf>,
    pub outcome: RelocationOutcome,
}

pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn RecordStore>>,
    digester: Option<Arc<dyn Digester>>,
    capacity: Arc<dyn CapacityProbe>,
    observer: Arc<dyn RelocationObserver>,
    cancel: CancelToken,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            digester: None,
            capacity: Arc::new(FsCapacity),
            observer: Arc::new(NoopObserver),
            cancel: CancelToken::new(),
        }
    }

    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn digester(mut self, digester: Arc<dyn Digester>) -> Self {
        self.digester = Some(digester);
        self
    }

    pub fn capacity_probe(mut self, probe: Arc<dyn CapacityProbe>) -> Self {
        self.capacity = probe;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn RelocationObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Open the record store (the configured database unless one was supplied) and
    /// load the duplicate registry from it.
    pub fn build(self) -> Result<RelocationEngine, RelocateError> {
        let store: Arc<dyn RecordStore> = match self.store {
            Some(s) => s,
            None => Arc::new(RedbStore::open(&self.config.store_path)?),
        };
        let digester: Arc<dyn Digester> = self
            .digester
            .unwrap_or_else(|| Arc::new(IntegrityVerifier::new(self.config.digest_algorithm)));
        let registry = Arc::new(DuplicateRegistry::load_from(store.as_ref())?);
        let quarantine = QuarantineStore::new(&self.config.quarantine_root).with_digester(Arc::clone(&digester));
        let mover = Arc::new(AtomicMover::new(digester, self.config.preserve_metadata));
        let coordinator = TransactionCoordinator::new(Arc::clone(&store), quarantine, Arc::clone(&mover));
        Ok(RelocationEngine {
            config: self.config,
            store,
            registry,
            mover,
            coordinator,
            capacity: self.capacity,
            observer: self.observer,
            cancel: self.cancel,
        })
    }
}

pub struct RelocationEngine {
    config: EngineConfig,
    store: Arc<dyn RecordStore>,
    registry: Arc<DuplicateRegistry>,
    mover: Arc<AtomicMover>,
    coordinator: TransactionCoordinator,
    capacity: Arc<dyn CapacityProbe>,
    observer: Arc<dyn RelocationObserver>,
    cancel: CancelToken,
}

/// Releases a provisional canonical claim unless it was confirmed.
struct ClaimGuard<'a> {
    registry: &'a DuplicateRegistry,
    digest: &'a str,
    settled: bool,
}

impl<'a> ClaimGuard<'a> {
    fn new(registry: &'a DuplicateRegistry, digest: &'a str) -> Self {
        Self {
            registry,
            digest,
            settled: false,
        }
    }

    fn confirm(mut self, path: &Path) {
        self.settled = true;
        self.registry.confirm_canonical(self.digest, path);
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.registry.release_canonical(self.digest);
        }
    }
}

impl RelocationEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn registry(&self) -> &DuplicateRegistry {
        &self.registry
    }

    pub fn quarantine(&self) -> &QuarantineStore {
        self.coordinator.quarantine_store()
    }

    pub fn digester(&self) -> &Arc<dyn Digester> {
        self.mover.digester()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Relocate one file end to end. Never panics on I/O problems: every failure is
    /// reported through the outcome.
    pub fn relocate_one(&self, request: &RelocationRequest) -> RelocationOutcome {
        let start = Instant::now();
        self.observer.on_start(request);
        let mut record = RelocationRecord::from_request(request);

        let mut tx = Transaction::new();
        tx.put_relocation(&record);
        if let Err(e) = self.store.commit(tx) {
            let err = RelocateError::from(e);
            error!(id = %record.id, error = %err, "cannot record relocation; nothing moved");
            record.fail_with(RelocationStatus::Failed, err.to_string());
            return self.finish(request, &record, None, Some(&err), None, start);
        }

        if let Err(e) = self.digester().algorithm().validate_hex(&request.content_digest) {
            let err = RelocateError::from(e);
            record.fail_with(RelocationStatus::Failed, err.to_string());
            self.audit(&record);
            return self.finish(request, &record, None, Some(&err), None, start);
        }

        let digest = request.content_digest.as_str();
        match self.registry.lookup_or_register_canonical(digest, &request.destination_path) {
            Claim::DuplicateOf(canonical) => self.relocate_duplicate(request, record, canonical, start),
            Claim::Canonical => {
                let guard = ClaimGuard::new(&self.registry, digest);
                let out = self.coordinator.run(
                    &mut record,
                    |r| self.mover.execute(r),
                    |r, tx| {
                        tx.put_duplicate(&DuplicateEntry::canonical(
                            r.content_digest.clone(),
                            r.destination_path.clone(),
                        ));
                    },
                );
                if out.status == RelocationStatus::Completed {
                    guard.confirm(&record.destination_path);
                    self.observer.on_verified(&record);
                } else {
                    drop(guard);
                }
                self.finish_coordinated(request, &record, &out, None, start)
            }
        }
    }

    /// Content already archived: move the file into duplicate storage so nothing is lost.
    fn relocate_duplicate(
        &self,
        request: &RelocationRequest,
        mut record: RelocationRecord,
        canonical: PathBuf,
        start: Instant,
    ) -> RelocationOutcome {
        let digest = request.content_digest.as_str();
        let dir = duplicate_storage_dir(&self.config.duplicates_root, Utc::now().date_naive(), digest);
        let reserved = fs::create_dir_all(&dir)
            .and_then(|()| fs_ops::reserve_unique(&dir, record.file_name()))
            .map_err(|e| RelocateError::io("reserve duplicate storage", &dir, e));

        let dup_path = match reserved {
            Ok(p) => p,
            Err(err) => {
                // Treat like any other failed move so the file is isolated, not dropped.
                let reason = classify(&err);
                warn!(id = %record.id, error = %err, "duplicate storage unavailable");
                record.fail_with(RelocationStatus::Failed, err.to_string());
                let quarantined = match self.quarantine().quarantine(&record, reason, &err.to_string()) {
                    Ok(entry) => {
                        record.final_path = Some(entry.current_path.clone());
                        record.transition(RelocationStatus::Quarantined);
                        let mut tx = Transaction::new();
                        tx.put_relocation(&record).put_quarantine(&entry);
                        if let Err(e) = self.store.commit(tx) {
                            warn!(id = %record.id, error = %e, "terminal audit record not persisted");
                        }
                        Some((reason, entry.id))
                    }
                    Err(qe) => {
                        error!(id = %record.id, error = %qe, "quarantine failed");
                        self.audit(&record);
                        None
                    }
                };
                return self.finish(request, &record, Some(canonical), Some(&err), quarantined, start);
            }
        };

        record.reroute(dup_path.clone());
        record.transition(RelocationStatus::InProgress);
        info!(
            id = %record.id,
            digest,
            canonical = %canonical.display(),
            dup = %dup_path.display(),
            "duplicate content; rerouting to duplicate storage"
        );

        // Persist the reroute before any bytes move.
        let mut tx = Transaction::new();
        tx.put_relocation(&record);
        if let Err(e) = self.store.commit(tx) {
            let err = RelocateError::from(e);
            error!(id = %record.id, error = %err, "cannot record reroute; nothing moved");
            if let Err(e) = fs::remove_file(&dup_path) {
                warn!(dup = %dup_path.display(), error = %e, "could not remove duplicate reservation");
            }
            record.fail_with(RelocationStatus::Failed, err.to_string());
            return self.finish(request, &record, Some(canonical), Some(&err), None, start);
        }

        let registry = &self.registry;
        let out = self.coordinator.run(
            &mut record,
            |r| self.mover.execute_reserved(r),
            |r, tx| {
                tx.add_duplicate_sighting(digest, &canonical, &r.destination_path);
                r.transition(RelocationStatus::Duplicate);
            },
        );
        if out.status == RelocationStatus::Duplicate {
            registry.register_duplicate(digest, &dup_path);
            self.observer.on_verified(&record);
        }
        self.finish_coordinated(request, &record, &out, Some(canonical), start)
    }

    fn finish_coordinated(
        &self,
        request: &RelocationRequest,
        record: &RelocationRecord,
        out: &CoordinatedOutcome,
        canonical: Option<PathBuf>,
        start: Instant,
    ) -> RelocationOutcome {
        let mut outcome = self.outcome(request, record, canonical, out.error.as_ref(), start);
        outcome.reason = out.reason;
        outcome.quarantine_id = out.quarantine.as_ref().map(|q| q.id);
        self.observer.on_terminal(&outcome);
        outcome
    }

    fn finish(
        &self,
        request: &RelocationRequest,
        record: &RelocationRecord,
        canonical: Option<PathBuf>,
        err: Option<&RelocateError>,
        quarantine: Option<(Reason, uuid::Uuid)>,
        start: Instant,
    ) -> RelocationOutcome {
        let mut outcome = self.outcome(request, record, canonical, err, start);
        if let Some((reason, id)) = quarantine {
            outcome.reason = Some(reason);
            outcome.quarantine_id = Some(id);
        }
        self.observer.on_terminal(&outcome);
        outcome
    }

    fn outcome(
        &self,
        request: &RelocationRequest,
        record: &RelocationRecord,
        canonical: Option<PathBuf>,
        err: Option<&RelocateError>,
        start: Instant,
    ) -> RelocationOutcome {
        let mut outcome = RelocationOutcome::from_record(record, start.elapsed());
        outcome.destination_path = request.destination_path.clone();
        outcome.canonical_path = canonical;
        outcome.error_code = err.map(RelocateError::code);
        outcome
    }

    fn audit(&self, record: &RelocationRecord) {
        let mut tx = Transaction::new();
        tx.put_relocation(record);
        if let Err(e) = self.store.commit(tx) {
            warn!(id = %record.id, error = %e, "terminal audit record not persisted");
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Relocate every request in `batch` with bounded concurrency.
    pub fn relocate_batch(&self, batch: &BatchRequest) -> BatchOutcome {
        let started_at = Utc::now();
        let n = batch.requests.len();
        let total_bytes = batch.total_bytes();
        info!(batch = %batch.id, files = n, bytes = %total_bytes, "batch started");

        if batch.options.validate_capacity && n > 0 {
            if let Err(reason) = self.check_capacity(total_bytes) {
                warn!(batch = %batch.id, "batch aborted: {reason}");
                let outcomes = batch
                    .requests
                    .iter()
                    .map(|r| RelocationOutcome::not_attempted(r, reason.clone()))
                    .collect();
                return self.settle_batch(batch, outcomes, started_at, Some(reason));
            }
        }

        let workers = batch.options.max_parallelism.min(self.config.workers).max(1);
        let next = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let slots: Mutex<Vec<Option<RelocationOutcome>>> = Mutex::new(vec![None; n]);

        let work = || loop {
            if stop.load(Ordering::Relaxed) || self.cancelled() {
                break;
            }
            let i = next.fetch_add(1, Ordering::Relaxed);
            if i >= n {
                break;
            }
            let outcome = self.relocate_one(&batch.requests[i]);
            if batch.options.stop_on_first_error && outcome.is_failure() {
                warn!(batch = %batch.id, file = %outcome.source_path.display(), "stopping batch after first error");
                stop.store(true, Ordering::Relaxed);
            }
            slots.lock().unwrap_or_else(PoisonError::into_inner)[i] = Some(outcome);
        };

        match rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("vault-mover-{i}"))
            .build()
        {
            Ok(pool) => pool.scope(|s| {
                for _ in 0..workers {
                    s.spawn(|_| work());
                }
            }),
            Err(e) => {
                warn!(error = %e, "could not start worker pool; running batch on the calling thread");
                work();
            }
        }

        let cancelled = self.cancelled();
        let not_run_reason = if cancelled {
            "cancelled before dispatch"
        } else {
            "not dispatched: batch stopped after first error"
        };
        let outcomes: Vec<RelocationOutcome> = slots
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .zip(&batch.requests)
            .map(|(slot, req)| slot.unwrap_or_else(|| RelocationOutcome::not_attempted(req, not_run_reason)))
            .collect();
        let skipped = outcomes.iter().any(|o| o.status == OutcomeStatus::NotAttempted);
        let aborted = if cancelled && skipped {
            Some("cancelled".to_string())
        } else if stop.load(Ordering::Relaxed) {
            Some("stopped after first error".to_string())
        } else {
            None
        };
        self.settle_batch(batch, outcomes, started_at, aborted)
    }

    fn check_capacity(&self, total_bytes: u128) -> Result<(), String> {
        let required = required_with_margin(total_bytes, self.config.capacity_margin);
        match self.capacity.available_bytes(&self.config.vault_root) {
            Ok(avail) if u128::from(avail) >= required => Ok(()),
            Ok(avail) => Err(RelocateError::InsufficientSpace {
                required,
                available: u128::from(avail),
                dest: self.config.vault_root.clone(),
            }
            .to_string()
                + &format!(" ({} free)", format_bytes(avail))),
            Err(e) => Err(fs_ops::describe_io("capacity check", &self.config.vault_root, &e)),
        }
    }

    fn settle_batch(
        &self,
        batch: &BatchRequest,
        outcomes: Vec<RelocationOutcome>,
        started_at: chrono::DateTime<Utc>,
        aborted: Option<String>,
    ) -> BatchOutcome {
        let outcome = BatchOutcome::from_outcomes(batch.id, outcomes, started_at, aborted);
        let mut tx = Transaction::new();
        tx.put_batch(&BatchSummary::from(&outcome));
        if let Err(e) = self.store.commit(tx) {
            warn!(batch = %batch.id, error = %e, "batch summary not persisted");
        }
        info!(
            batch = %batch.id,
            total = outcome.total,
            successful = outcome.successful,
            duplicate = outcome.duplicate,
            quarantined = outcome.quarantined,
            failed = outcome.failed,
            aborted = outcome.aborted.as_deref().unwrap_or("no"),
            "batch finished"
        );
        outcome
    }

    /// Same decisions as `relocate_one`, with no filesystem or record-store mutation.
    pub fn preview(&self, request: &RelocationRequest) -> PreviewResult {
        let start = Instant::now();
        let mut record = RelocationRecord::from_request(request);
        let decided = self.predict(request, &mut record);
        let (canonical, err, reason) = match decided {
            Ok(canonical) => (canonical, None, None),
            Err(err) => {
                let reason = (!err.is_input_error()).then(|| classify(&err));
                record.status = if reason.is_some() {
                    RelocationStatus::Quarantined
                } else {
                    RelocationStatus::Failed
                };
                record.error = Some(err.to_string());
                (None, Some(err), reason)
            }
        };
        let mut outcome = self.outcome(request, &record, canonical.clone(), err.as_ref(), start);
        outcome.reason = reason;
        PreviewResult {
            would_be_duplicate: record.status == RelocationStatus::Duplicate,
            canonical_path: canonical,
            outcome,
        }
    }

    fn predict(
        &self,
        request: &RelocationRequest,
        record: &mut RelocationRecord,
    ) -> Result<Option<PathBuf>, RelocateError> {
        let src = &request.source_path;
        let meta = fs::symlink_metadata(src).map_err(|e| RelocateError::io("open source", src, e))?;
        if !meta.file_type().is_file() {
            return Err(RelocateError::SourceNotFile(src.clone()));
        }
        let digester = self.digester();
        digester.algorithm().validate_hex(&request.content_digest)?;
        let actual = digester.digest(src)?;
        if actual != request.content_digest {
            return Err(RelocateError::DeclaredDigestMismatch {
                path: src.clone(),
                declared: request.content_digest.clone(),
                actual,
            });
        }

        if let Some(canonical) = self.registry.lookup(&request.content_digest) {
            let dir = duplicate_storage_dir(
                &self.config.duplicates_root,
                Utc::now().date_naive(),
                &request.content_digest,
            );
            record.final_path = Some(predict_free_name(&dir, record.file_name()));
            record.status = RelocationStatus::Duplicate;
            return Ok(Some(canonical));
        }

        let dest = &request.destination_path;
        validate_destination(dest)?;
        if fs::symlink_metadata(dest).is_ok() {
            return Err(RelocateError::DestinationExists(dest.clone()));
        }
        record.final_path = Some(dest.clone());
        record.status = RelocationStatus::Completed;
        Ok(None)
    }
}

/// First name `reserve_unique` would pick, checked without creating anything.
fn predict_free_name(dir: &Path, name: &std::ffi::OsStr) -> PathBuf {
    let first = dir.join(name);
    if fs::symlink_metadata(&first).is_err() {
        return first;
    }
    let base = Path::new(name);
    let stem = base.file_stem().unwrap_or(name).to_string_lossy().into_owned();
    let ext = base.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();
    (2..)
        .map(|n| dir.join(format!("{stem} ({n}){ext}")))
        .find(|p| fs::symlink_metadata(p).is_err())
        .unwrap_or(first)
}
