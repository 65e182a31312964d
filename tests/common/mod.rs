#![allow(dead_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use uuid::Uuid;
use vault_mover::{
    BatchSummary, CapacityProbe, DigestAlgorithm, Digester, DuplicateEntry, EngineConfig, IntegrityError,
    IntegrityVerifier, QuarantineEntry, ReadStage, Reason, RecordStore, RelocationEngine, RelocationRecord,
    RelocationRequest, RedbStore, StoreError, Transaction,
};

/// What a [`FaultyDigester`] hook asks for.
pub enum Fault {
    /// Hash normally.
    None,
    /// Return a digest that matches nothing.
    WrongDigest,
    /// Fail as if the read broke part-way through the file.
    MidStream,
}

type Hook = Box<dyn Fn(&Path) -> Fault + Send + Sync>;

/// Real SHA-256 digester with a per-path fault hook.
pub struct FaultyDigester {
    inner: IntegrityVerifier,
    hook: Hook,
    pub calls: AtomicUsize,
}

impl FaultyDigester {
    pub fn with_hook(hook: impl Fn(&Path) -> Fault + Send + Sync + 'static) -> Self {
        Self {
            inner: IntegrityVerifier::new(DigestAlgorithm::Sha256),
            hook: Box::new(hook),
            calls: AtomicUsize::new(0),
        }
    }

    /// Wrong digest for anything under `root` (the destination side of a move).
    pub fn corrupt_under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self::with_hook(move |p| if p.starts_with(&root) { Fault::WrongDigest } else { Fault::None })
    }

    /// Mid-stream read failure for exactly `path`.
    pub fn unreadable(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::with_hook(move |p| if p == path { Fault::MidStream } else { Fault::None })
    }
}

impl Digester for FaultyDigester {
    fn algorithm(&self) -> DigestAlgorithm {
        DigestAlgorithm::Sha256
    }

    fn digest(&self, path: &Path) -> Result<String, IntegrityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match (self.hook)(path) {
            Fault::None => self.inner.digest(path),
            Fault::WrongDigest => Ok("0".repeat(64)),
            Fault::MidStream => Err(IntegrityError::Io {
                path: path.to_path_buf(),
                stage: ReadStage::MidStream,
                source: io::Error::other("input/output error"),
            }),
        }
    }
}

/// In-memory store that rejects the commit numbered `fail_at` (1-based).
pub struct FailingStore {
    inner: RedbStore,
    commits: AtomicUsize,
    fail_at: usize,
}

impl FailingStore {
    pub fn failing_commit(fail_at: usize) -> Self {
        Self {
            inner: RedbStore::in_memory().unwrap(),
            commits: AtomicUsize::new(0),
            fail_at,
        }
    }
}

impl RecordStore for FailingStore {
    fn commit(&self, tx: Transaction) -> Result<(), StoreError> {
        let n = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_at {
            return Err(StoreError::Rejected(format!("injected failure on commit {n}")));
        }
        self.inner.commit(tx)
    }
    fn relocation(&self, id: Uuid) -> Result<Option<RelocationRecord>, StoreError> {
        self.inner.relocation(id)
    }
    fn relocations_by_digest(&self, digest: &str) -> Result<Vec<RelocationRecord>, StoreError> {
        self.inner.relocations_by_digest(digest)
    }
    fn relocations_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<RelocationRecord>, StoreError> {
        self.inner.relocations_between(from, to)
    }
    fn in_flight_relocations(&self) -> Result<Vec<RelocationRecord>, StoreError> {
        self.inner.in_flight_relocations()
    }
    fn quarantine_entries(&self, reason: Option<Reason>) -> Result<Vec<QuarantineEntry>, StoreError> {
        self.inner.quarantine_entries(reason)
    }
    fn duplicate_entry(&self, digest: &str) -> Result<Option<DuplicateEntry>, StoreError> {
        self.inner.duplicate_entry(digest)
    }
    fn duplicate_entries(&self) -> Result<Vec<DuplicateEntry>, StoreError> {
        self.inner.duplicate_entries()
    }
    fn batch_summaries(&self) -> Result<Vec<BatchSummary>, StoreError> {
        self.inner.batch_summaries()
    }
}

pub struct FixedCapacity(pub u64);

impl CapacityProbe for FixedCapacity {
    fn available_bytes(&self, _path: &Path) -> io::Result<u64> {
        Ok(self.0)
    }
}

/// Engine over `<root>/data` with an in-memory store and unlimited free space.
pub fn engine(root: &Path) -> RelocationEngine {
    builder(root).build().unwrap()
}

pub fn builder(root: &Path) -> vault_mover::EngineBuilder {
    RelocationEngine::builder(EngineConfig::with_root(root.join("data")))
        .store(Arc::new(RedbStore::in_memory().unwrap()))
        .capacity_probe(Arc::new(FixedCapacity(u64::MAX)))
}

/// Write `body` under `<root>/incoming/<name>` and build a request targeting `dest`.
pub fn request(root: &Path, name: &str, body: &[u8], dest: &Path) -> RelocationRequest {
    let src = root.join("incoming").join(name);
    std::fs::create_dir_all(src.parent().unwrap()).unwrap();
    std::fs::write(&src, body).unwrap();
    RelocationRequest::new(src, dest, sha256(body), body.len() as u64)
}

pub fn sha256(body: &[u8]) -> String {
    DigestAlgorithm::Sha256.digest_bytes(body)
}
