//! Content-digest registry: which archive path holds the canonical copy of each digest.
//!
//! One registry is shared by every batch worker. The check-and-register step is atomic
//! per digest: the first claimant gets a *provisional* canonical claim, and anyone else
//! arriving with the same digest blocks until that claim is confirmed (they become a
//! duplicate of it) or released (the next waiter becomes the canonical claimant).

use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use crate::errors::StoreError;
use crate::model::{DuplicateEntry, DuplicateSighting};
use crate::store::RecordStore;

/// Result of [`DuplicateRegistry::lookup_or_register_canonical`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// Caller holds the provisional canonical claim and must confirm or release it.
    Canonical,
    /// Content already archived at this path.
    DuplicateOf(PathBuf),
}

#[derive(Debug)]
enum Slot {
    Provisional(PathBuf),
    Confirmed(DuplicateEntry),
}

#[derive(Debug, Default)]
pub struct DuplicateRegistry {
    slots: Mutex<HashMap<String, Slot>>,
    settled: Condvar,
}

impl DuplicateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the registry with every canonical entry persisted in `store`.
    pub fn load_from(store: &dyn RecordStore) -> Result<Self, StoreError> {
        let entries = store.duplicate_entries()?;
        let count = entries.len();
        let slots = entries
            .into_iter()
            .map(|e| (e.digest.clone(), Slot::Confirmed(e)))
            .collect();
        debug!(entries = count, "duplicate registry loaded");
        Ok(Self {
            slots: Mutex::new(slots),
            settled: Condvar::new(),
        })
    }

    // Slots are only replaced wholesale, so a poisoned map is still consistent.
    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Confirmed canonical location for `digest`, if any. Never blocks on provisional claims.
    pub fn lookup(&self, digest: &str) -> Option<PathBuf> {
        match self.slots().get(digest) {
            Some(Slot::Confirmed(e)) => Some(e.canonical_path.clone()),
            _ => None,
        }
    }

    pub fn entry(&self, digest: &str) -> Option<DuplicateEntry> {
        match self.slots().get(digest) {
            Some(Slot::Confirmed(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// True while some worker holds an unsettled canonical claim for `digest`.
    pub fn is_pending(&self, digest: &str) -> bool {
        matches!(self.slots().get(digest), Some(Slot::Provisional(_)))
    }

    pub fn len(&self) -> usize {
        self.slots()
            .values()
            .filter(|s| matches!(s, Slot::Confirmed(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record `path` as canonical for `digest` unless one is already known.
    /// Returns the entry that is canonical afterwards.
    pub fn register_canonical(&self, digest: &str, path: &Path) -> DuplicateEntry {
        let mut slots = self.slots();
        if let Some(Slot::Confirmed(existing)) = slots.get(digest) {
            return existing.clone();
        }
        let entry = DuplicateEntry::canonical(digest, path);
        slots.insert(digest.to_string(), Slot::Confirmed(entry.clone()));
        self.settled.notify_all();
        entry
    }

    /// Atomic check-and-claim. Blocks while another worker holds a provisional claim on
    /// the same digest.
    pub fn lookup_or_register_canonical(&self, digest: &str, intended: &Path) -> Claim {
        let mut slots = self.slots();
        loop {
            match slots.get(digest) {
                Some(Slot::Confirmed(e)) => return Claim::DuplicateOf(e.canonical_path.clone()),
                Some(Slot::Provisional(holder)) => {
                    debug!(digest, holder = %holder.display(), "waiting for canonical claim to settle");
                    slots = self
                        .settled
                        .wait(slots)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                None => {
                    slots.insert(digest.to_string(), Slot::Provisional(intended.to_path_buf()));
                    return Claim::Canonical;
                }
            }
        }
    }

    /// Settle a provisional claim: `path` now holds the digest. Wakes waiters.
    pub fn confirm_canonical(&self, digest: &str, path: &Path) -> DuplicateEntry {
        let mut slots = self.slots();
        let entry = match slots.get(digest) {
            Some(Slot::Confirmed(existing)) => existing.clone(),
            _ => {
                let e = DuplicateEntry::canonical(digest, path);
                slots.insert(digest.to_string(), Slot::Confirmed(e.clone()));
                e
            }
        };
        self.settled.notify_all();
        info!(digest, canonical = %entry.canonical_path.display(), "canonical registered");
        entry
    }

    /// Drop a provisional claim whose move did not land. Wakes waiters so one can claim.
    pub fn release_canonical(&self, digest: &str) {
        let mut slots = self.slots();
        if matches!(slots.get(digest), Some(Slot::Provisional(_))) {
            slots.remove(digest);
            debug!(digest, "provisional canonical claim released");
        }
        self.settled.notify_all();
    }

    /// Append a duplicate sighting to the confirmed entry for `digest` and return the
    /// updated entry. `None` when the digest has no canonical copy.
    pub fn register_duplicate(&self, digest: &str, path: &Path) -> Option<DuplicateEntry> {
        let mut slots = self.slots();
        match slots.get_mut(digest) {
            Some(Slot::Confirmed(e)) => {
                if !e.duplicates.iter().any(|d| d.path == path) {
                    e.duplicates.push(DuplicateSighting {
                        path: path.to_path_buf(),
                        detected_at: Utc::now(),
                    });
                }
                Some(e.clone())
            }
            _ => None,
        }
    }
}

/// `<root>/<YYYY-MM-DD>/<first 8 hex of digest>/<file_name>`.
pub fn duplicate_storage_dir(root: &Path, date: NaiveDate, digest: &str) -> PathBuf {
    let prefix: String = digest.chars().take(8).collect();
    root.join(date.format("%Y-%m-%d").to_string()).join(prefix)
}

pub fn duplicate_storage_path(root: &Path, date: NaiveDate, digest: &str, file_name: &std::ffi::OsStr) -> PathBuf {
    duplicate_storage_dir(root, date, digest).join(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn first_claim_is_canonical_then_duplicates() {
        let reg = DuplicateRegistry::new();
        assert_eq!(reg.lookup_or_register_canonical("d", Path::new("/v/a")), Claim::Canonical);
        assert!(reg.lookup("d").is_none(), "provisional claims are not visible to lookup");
        reg.confirm_canonical("d", Path::new("/v/a"));
        assert_eq!(
            reg.lookup_or_register_canonical("d", Path::new("/v/b")),
            Claim::DuplicateOf(PathBuf::from("/v/a"))
        );
    }

    #[test]
    fn register_canonical_never_overwrites() {
        let reg = DuplicateRegistry::new();
        reg.register_canonical("d", Path::new("/v/first"));
        let e = reg.register_canonical("d", Path::new("/v/second"));
        assert_eq!(e.canonical_path, PathBuf::from("/v/first"));
    }

    #[test]
    fn duplicate_sightings_are_idempotent() {
        let reg = DuplicateRegistry::new();
        reg.register_canonical("d", Path::new("/v/a"));
        reg.register_duplicate("d", Path::new("/dup/a"));
        let e = reg.register_duplicate("d", Path::new("/dup/a")).unwrap();
        assert_eq!(e.duplicates.len(), 1);
        assert!(reg.register_duplicate("unknown", Path::new("/x")).is_none());
    }

    #[test]
    fn waiter_takes_over_a_released_claim() {
        let reg = Arc::new(DuplicateRegistry::new());
        assert_eq!(reg.lookup_or_register_canonical("d", Path::new("/v/a")), Claim::Canonical);

        let r2 = Arc::clone(&reg);
        let waiter = thread::spawn(move || r2.lookup_or_register_canonical("d", Path::new("/v/b")));
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished(), "second claimant must wait for the first");

        reg.release_canonical("d");
        assert_eq!(waiter.join().unwrap(), Claim::Canonical);
    }

    #[test]
    fn waiter_becomes_duplicate_after_confirm() {
        let reg = Arc::new(DuplicateRegistry::new());
        reg.lookup_or_register_canonical("d", Path::new("/v/a"));
        let r2 = Arc::clone(&reg);
        let waiter = thread::spawn(move || r2.lookup_or_register_canonical("d", Path::new("/v/b")));
        thread::sleep(Duration::from_millis(20));
        reg.confirm_canonical("d", Path::new("/v/a"));
        assert_eq!(waiter.join().unwrap(), Claim::DuplicateOf(PathBuf::from("/v/a")));
    }

    #[test]
    fn storage_path_layout() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let p = duplicate_storage_path(
            Path::new("/dups"),
            date,
            "0123456789abcdef",
            std::ffi::OsStr::new("IMG_1.jpg"),
        );
        assert_eq!(p, PathBuf::from("/dups/2024-03-09/01234567/IMG_1.jpg"));
    }
}
