//! Transactional record store.
//!
//! Four logical tables: relocation records (keyed by id, indexed by digest and by
//! creation time), quarantine entries, duplicate entries (keyed by digest) and batch
//! summaries. Writers stage mutations in a [`Transaction`] and hand it to
//! [`RecordStore::commit`]; a transaction that is dropped instead is discarded.
//!
//! [`RedbStore`] maps one commit onto one redb write transaction, so a commit only
//! writes the rows it changes and a failed commit leaves nothing behind. Rows are
//! JSON; index keys are fixed-width big-endian so ranges come back in order.

use chrono::{DateTime, Utc};
use redb::backends::InMemoryBackend;
use redb::{Database, ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::model::{BatchSummary, DuplicateEntry, DuplicateSighting, RelocationRecord};
use crate::quarantine::{QuarantineEntry, Reason};

// ---- Tables ----
const RELOCATIONS: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("relocations");
// [digest][0x00][created(8)][id(16)] -> id
const BY_DIGEST: TableDefinition<&[u8], &[u8; 16]> = TableDefinition::new("relocations_by_digest");
// [created(8)][id(16)] -> id
const BY_CREATED: TableDefinition<&[u8], &[u8; 16]> = TableDefinition::new("relocations_by_created");
// id -> created; records not yet terminal
const IN_FLIGHT: TableDefinition<&[u8; 16], u64> = TableDefinition::new("relocations_in_flight");
const QUARANTINE: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("quarantine");
const DUPLICATES: TableDefinition<&str, &[u8]> = TableDefinition::new("duplicates");
const BATCHES: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("batches");

#[derive(Debug, Clone)]
enum Mutation {
    Relocation(Box<RelocationRecord>),
    Quarantine(Box<QuarantineEntry>),
    Duplicate(DuplicateEntry),
    Sighting {
        digest: String,
        canonical: PathBuf,
        sighting: DuplicateSighting,
    },
    Batch(BatchSummary),
}

/// A unit of staged record-store mutations. Nothing is visible until committed.
#[derive(Debug, Default)]
pub struct Transaction {
    mutations: Vec<Mutation>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_relocation(&mut self, record: &RelocationRecord) -> &mut Self {
        self.mutations.push(Mutation::Relocation(Box::new(record.clone())));
        self
    }

    pub fn put_quarantine(&mut self, entry: &QuarantineEntry) -> &mut Self {
        self.mutations.push(Mutation::Quarantine(Box::new(entry.clone())));
        self
    }

    pub fn put_duplicate(&mut self, entry: &DuplicateEntry) -> &mut Self {
        self.mutations.push(Mutation::Duplicate(entry.clone()));
        self
    }

    /// Append a duplicate sighting to whatever entry is stored for `digest` at commit time.
    /// Concurrent committers never drop each other's sightings.
    pub fn add_duplicate_sighting(&mut self, digest: &str, canonical: &Path, path: &Path) -> &mut Self {
        self.mutations.push(Mutation::Sighting {
            digest: digest.to_string(),
            canonical: canonical.to_path_buf(),
            sighting: DuplicateSighting {
                path: path.to_path_buf(),
                detected_at: Utc::now(),
            },
        });
        self
    }

    pub fn put_batch(&mut self, summary: &BatchSummary) -> &mut Self {
        self.mutations.push(Mutation::Batch(summary.clone()));
        self
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.mutations.is_empty() {
            trace!(pending = self.mutations.len(), "transaction discarded without commit");
        }
    }
}

/// Persistent store the engine records its bookkeeping in.
pub trait RecordStore: Send + Sync {
    /// Atomically apply every mutation in `tx`, or none of them.
    fn commit(&self, tx: Transaction) -> Result<(), StoreError>;

    fn relocation(&self, id: Uuid) -> Result<Option<RelocationRecord>, StoreError>;
    fn relocations_by_digest(&self, digest: &str) -> Result<Vec<RelocationRecord>, StoreError>;
    /// Records created in `[from, to]`, oldest first.
    fn relocations_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RelocationRecord>, StoreError>;
    /// Records a crash left unfinished (PENDING, IN_PROGRESS or VERIFYING).
    fn in_flight_relocations(&self) -> Result<Vec<RelocationRecord>, StoreError>;

    fn quarantine_entries(&self, reason: Option<Reason>) -> Result<Vec<QuarantineEntry>, StoreError>;
    fn duplicate_entry(&self, digest: &str) -> Result<Option<DuplicateEntry>, StoreError>;
    fn duplicate_entries(&self) -> Result<Vec<DuplicateEntry>, StoreError>;
    fn batch_summaries(&self) -> Result<Vec<BatchSummary>, StoreError>;
}

fn backend<E: Into<redb::Error>>(e: E) -> StoreError {
    StoreError::Backend(e.into())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(table: &'static str, bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|source| StoreError::Corrupt { table, source })
}

/// Microseconds since the epoch with the sign bit flipped, so byte order is time order.
fn time_key(t: DateTime<Utc>) -> u64 {
    (t.timestamp_micros() as u64) ^ (1 << 63)
}

fn k_created(t: DateTime<Utc>, id: &Uuid) -> Vec<u8> {
    [time_key(t).to_be_bytes().as_slice(), id.as_bytes()].concat()
}

fn k_digest(digest: &str, t: DateTime<Utc>, id: &Uuid) -> Vec<u8> {
    [digest.as_bytes(), &[0u8], &k_created(t, id)].concat()
}

/// Bounds of every index key for `digest`. Hex digests never contain 0x00 or 0x01.
fn digest_bounds(digest: &str) -> (Vec<u8>, Vec<u8>) {
    ([digest.as_bytes(), &[0u8]].concat(), [digest.as_bytes(), &[1u8]].concat())
}

fn put_relocation(w: &WriteTransaction<'_>, r: &RelocationRecord) -> Result<(), StoreError> {
    let id = r.id.as_bytes();
    let mut rows = w.open_table(RELOCATIONS).map_err(backend)?;
    let old: Option<RelocationRecord> = match rows.get(id).map_err(backend)? {
        Some(row) => Some(decode("relocations", row.value())?),
        None => None,
    };
    rows.insert(id, encode(r)?.as_slice()).map_err(backend)?;

    let mut by_digest = w.open_table(BY_DIGEST).map_err(backend)?;
    let mut by_created = w.open_table(BY_CREATED).map_err(backend)?;
    if let Some(old) = &old {
        by_digest
            .remove(k_digest(&old.content_digest, old.created_at, &old.id).as_slice())
            .map_err(backend)?;
        by_created
            .remove(k_created(old.created_at, &old.id).as_slice())
            .map_err(backend)?;
    }
    by_digest
        .insert(k_digest(&r.content_digest, r.created_at, &r.id).as_slice(), id)
        .map_err(backend)?;
    by_created
        .insert(k_created(r.created_at, &r.id).as_slice(), id)
        .map_err(backend)?;

    let mut in_flight = w.open_table(IN_FLIGHT).map_err(backend)?;
    if r.status.is_terminal() {
        in_flight.remove(id).map_err(backend)?;
    } else {
        in_flight.insert(id, time_key(r.created_at)).map_err(backend)?;
    }
    Ok(())
}

fn add_sighting(
    w: &WriteTransaction<'_>,
    digest: &str,
    canonical: PathBuf,
    sighting: DuplicateSighting,
) -> Result<(), StoreError> {
    let mut t = w.open_table(DUPLICATES).map_err(backend)?;
    let stored: Option<DuplicateEntry> = match t.get(digest).map_err(backend)? {
        Some(row) => Some(decode("duplicates", row.value())?),
        None => None,
    };
    let mut entry = stored.unwrap_or_else(|| DuplicateEntry::canonical(digest, canonical));
    if !entry.duplicates.iter().any(|d| d.path == sighting.path) {
        entry.duplicates.push(sighting);
    }
    t.insert(digest, encode(&entry)?.as_slice()).map_err(backend)?;
    Ok(())
}

fn apply(w: &WriteTransaction<'_>, m: Mutation) -> Result<(), StoreError> {
    match m {
        Mutation::Relocation(r) => put_relocation(w, &r)?,
        Mutation::Quarantine(q) => {
            let mut t = w.open_table(QUARANTINE).map_err(backend)?;
            t.insert(q.id.as_bytes(), encode(&*q)?.as_slice()).map_err(backend)?;
        }
        Mutation::Duplicate(d) => {
            let mut t = w.open_table(DUPLICATES).map_err(backend)?;
            t.insert(d.digest.as_str(), encode(&d)?.as_slice()).map_err(backend)?;
        }
        Mutation::Sighting {
            digest,
            canonical,
            sighting,
        } => add_sighting(w, &digest, canonical, sighting)?,
        Mutation::Batch(b) => {
            let mut t = w.open_table(BATCHES).map_err(backend)?;
            t.insert(b.batch_id.as_bytes(), encode(&b)?.as_slice()).map_err(backend)?;
        }
    }
    Ok(())
}

fn fetch(r: &ReadTransaction<'_>, ids: &[[u8; 16]]) -> Result<Vec<RelocationRecord>, StoreError> {
    let rows = r.open_table(RELOCATIONS).map_err(backend)?;
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(row) = rows.get(id).map_err(backend)? {
            out.push(decode("relocations", row.value())?);
        }
    }
    Ok(out)
}

/// redb-backed store; `in_memory()` keeps the same tables in RAM.
pub struct RedbStore {
    db: Database,
    path: Option<PathBuf>,
}

impl fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedbStore").field("path", &self.path).finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create the database at `path`, creating its parent directory if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let db = Database::create(&path).map_err(backend)?;
        info!(path = %path.display(), "record store opened");
        Self::init(db, Some(path))
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .map_err(backend)?;
        Self::init(db, None)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // Read transactions fail on tables that were never created.
    fn init(db: Database, path: Option<PathBuf>) -> Result<Self, StoreError> {
        let w = db.begin_write().map_err(backend)?;
        {
            w.open_table(RELOCATIONS).map_err(backend)?;
            w.open_table(BY_DIGEST).map_err(backend)?;
            w.open_table(BY_CREATED).map_err(backend)?;
            w.open_table(IN_FLIGHT).map_err(backend)?;
            w.open_table(QUARANTINE).map_err(backend)?;
            w.open_table(DUPLICATES).map_err(backend)?;
            w.open_table(BATCHES).map_err(backend)?;
        }
        w.commit().map_err(backend)?;
        debug!(persistent = path.is_some(), "record store tables ready");
        Ok(Self { db, path })
    }

    fn read(&self) -> Result<ReadTransaction<'_>, StoreError> {
        self.db.begin_read().map_err(backend)
    }

    fn in_flight_ids(&self) -> Result<Vec<[u8; 16]>, StoreError> {
        let r = self.read()?;
        let t = r.open_table(IN_FLIGHT).map_err(backend)?;
        let mut ids = t
            .iter()
            .map_err(backend)?
            .map(|item| item.map(|(k, v)| (v.value(), *k.value())))
            .collect::<Result<Vec<(u64, [u8; 16])>, _>>()
            .map_err(backend)?;
        ids.sort();
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }
}

impl RecordStore for RedbStore {
    fn commit(&self, mut tx: Transaction) -> Result<(), StoreError> {
        let mutations = std::mem::take(&mut tx.mutations);
        if mutations.is_empty() {
            return Ok(());
        }
        let count = mutations.len();
        // An early return drops `w`, which aborts everything staged so far.
        let w = self.db.begin_write().map_err(backend)?;
        for m in mutations {
            apply(&w, m)?;
        }
        w.commit().map_err(backend)?;
        trace!(mutations = count, "record store commit");
        Ok(())
    }

    fn relocation(&self, id: Uuid) -> Result<Option<RelocationRecord>, StoreError> {
        let r = self.read()?;
        Ok(fetch(&r, &[*id.as_bytes()])?.pop())
    }

    fn relocations_by_digest(&self, digest: &str) -> Result<Vec<RelocationRecord>, StoreError> {
        let r = self.read()?;
        let (lo, hi) = digest_bounds(digest);
        let ids = {
            let idx = r.open_table(BY_DIGEST).map_err(backend)?;
            idx.range(lo.as_slice()..hi.as_slice())
                .map_err(backend)?
                .map(|item| item.map(|(_, v)| *v.value()))
                .collect::<Result<Vec<[u8; 16]>, _>>()
                .map_err(backend)?
        };
        fetch(&r, &ids)
    }

    fn relocations_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RelocationRecord>, StoreError> {
        if from > to {
            return Ok(Vec::new());
        }
        let r = self.read()?;
        let lo = [time_key(from).to_be_bytes().as_slice(), &[0u8; 16]].concat();
        let hi = [time_key(to).to_be_bytes().as_slice(), &[0xffu8; 16]].concat();
        let ids = {
            let idx = r.open_table(BY_CREATED).map_err(backend)?;
            idx.range(lo.as_slice()..=hi.as_slice())
                .map_err(backend)?
                .map(|item| item.map(|(_, v)| *v.value()))
                .collect::<Result<Vec<[u8; 16]>, _>>()
                .map_err(backend)?
        };
        // Keys have microsecond resolution; the bounds are exact.
        Ok(fetch(&r, &ids)?
            .into_iter()
            .filter(|rec| rec.created_at >= from && rec.created_at <= to)
            .collect())
    }

    fn in_flight_relocations(&self) -> Result<Vec<RelocationRecord>, StoreError> {
        let ids = self.in_flight_ids()?;
        let r = self.read()?;
        fetch(&r, &ids)
    }

    fn quarantine_entries(&self, reason: Option<Reason>) -> Result<Vec<QuarantineEntry>, StoreError> {
        let r = self.read()?;
        let t = r.open_table(QUARANTINE).map_err(backend)?;
        let mut out = Vec::new();
        for item in t.iter().map_err(backend)? {
            let (_, row) = item.map_err(backend)?;
            let q: QuarantineEntry = decode("quarantine", row.value())?;
            if reason.is_none_or(|want| q.reason == want) {
                out.push(q);
            }
        }
        out.sort_by_key(|q| q.quarantined_at);
        Ok(out)
    }

    fn duplicate_entry(&self, digest: &str) -> Result<Option<DuplicateEntry>, StoreError> {
        let r = self.read()?;
        let t = r.open_table(DUPLICATES).map_err(backend)?;
        let found = match t.get(digest).map_err(backend)? {
            Some(row) => Some(decode("duplicates", row.value())?),
            None => None,
        };
        Ok(found)
    }

    fn duplicate_entries(&self) -> Result<Vec<DuplicateEntry>, StoreError> {
        let r = self.read()?;
        let t = r.open_table(DUPLICATES).map_err(backend)?;
        let mut out = Vec::new();
        for item in t.iter().map_err(backend)? {
            let (_, row) = item.map_err(backend)?;
            out.push(decode("duplicates", row.value())?);
        }
        Ok(out)
    }

    fn batch_summaries(&self) -> Result<Vec<BatchSummary>, StoreError> {
        let r = self.read()?;
        let t = r.open_table(BATCHES).map_err(backend)?;
        let mut out: Vec<BatchSummary> = Vec::new();
        for item in t.iter().map_err(backend)? {
            let (_, row) = item.map_err(backend)?;
            out.push(decode("batches", row.value())?);
        }
        out.sort_by_key(|b| b.started_at);
        Ok(out)
    }
}
