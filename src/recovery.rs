//! Startup reconciliation.
//! Removes orphaned temp files and settles relocation records a crash left unfinished,
//! so an unattended host self-heals before taking new work.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::EngineConfig;
use crate::coordinator::MANUAL_RECONCILIATION;
use crate::fs_ops::is_temp_name;
use crate::integrity::Digester;
use crate::model::{DuplicateEntry, RelocationRecord, RelocationStatus};
use crate::store::{RecordStore, Transaction};

pub const INTERRUPTED_SAFE: &str = "interrupted; safe to resubmit";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub temps_removed: usize,
    /// Records whose bytes had fully landed; marked COMPLETED.
    pub completed: usize,
    /// Rerouted duplicates whose bytes had landed in duplicate storage; marked DUPLICATE.
    pub duplicates: usize,
    /// Records whose source was still intact; marked FAILED and safe to resubmit.
    pub resubmittable: usize,
    /// Records needing an operator.
    pub manual: usize,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

pub fn reconcile(store: &dyn RecordStore, cfg: &EngineConfig, digester: &dyn Digester) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    for root in [&cfg.vault_root, &cfg.duplicates_root, &cfg.quarantine_root] {
        report.temps_removed += cleanup_temps(root);
    }

    let pending = store
        .in_flight_relocations()
        .context("listing unfinished relocation records")?;
    for mut record in pending {
        let mut tx = Transaction::new();
        match settle(&mut record, digester) {
            Settled::Completed => {
                report.completed += 1;
                if store.duplicate_entry(&record.content_digest)?.is_none() {
                    tx.put_duplicate(&DuplicateEntry::canonical(
                        record.content_digest.clone(),
                        record.destination_path.clone(),
                    ));
                }
            }
            Settled::Duplicate => {
                report.duplicates += 1;
                let canonical = match store.duplicate_entry(&record.content_digest)? {
                    Some(entry) => entry.canonical_path,
                    None => record.intended_destination().to_path_buf(),
                };
                let landed = record.final_path.as_deref().unwrap_or(&record.destination_path);
                tx.add_duplicate_sighting(&record.content_digest, &canonical, landed);
            }
            Settled::Resubmittable => report.resubmittable += 1,
            Settled::Manual => report.manual += 1,
        }
        tx.put_relocation(&record);
        store
            .commit(tx)
            .with_context(|| format!("persisting reconciled record {}", record.id))?;
    }

    if report.is_clean() {
        debug!("reconcile: nothing to do");
    } else {
        info!(
            temps = report.temps_removed,
            completed = report.completed,
            duplicates = report.duplicates,
            resubmittable = report.resubmittable,
            manual = report.manual,
            "reconcile finished"
        );
    }
    Ok(report)
}

enum Settled {
    Completed,
    Duplicate,
    Resubmittable,
    Manual,
}

fn settle(record: &mut RelocationRecord, digester: &dyn Digester) -> Settled {
    let dest = record
        .final_path
        .clone()
        .unwrap_or_else(|| record.destination_path.clone());
    let source_present = fs::symlink_metadata(&record.source_path)
        .map(|m| m.is_file())
        .unwrap_or(false);
    let dest_meta = fs::symlink_metadata(&dest).ok().filter(|m| m.is_file());

    if !source_present {
        let landed = dest_meta.is_some()
            && digester
                .verify(&dest, &record.content_digest)
                .map(|v| v.matches)
                .unwrap_or(false);
        if landed && record.requested_destination.is_some() {
            info!(id = %record.id, dest = %dest.display(), "reconcile: duplicate had landed; marking duplicate");
            record.final_path = Some(dest);
            record.transition(RelocationStatus::Duplicate);
            return Settled::Duplicate;
        }
        if landed {
            info!(id = %record.id, dest = %dest.display(), "reconcile: move had landed; marking completed");
            record.final_path = Some(dest);
            record.transition(RelocationStatus::Completed);
            return Settled::Completed;
        }
    } else {
        // An empty placeholder is our own reservation; anything with bytes is not ours to touch.
        if dest_meta.as_ref().is_some_and(|m| m.len() == 0) && record.size_bytes > 0 {
            match fs::remove_file(&dest) {
                Ok(()) => debug!(id = %record.id, dest = %dest.display(), "reconcile: removed empty reservation"),
                Err(e) => warn!(id = %record.id, dest = %dest.display(), error = %e, "reconcile: could not remove reservation"),
            }
        }
        let dest_clear = fs::symlink_metadata(&dest).is_err() || record.size_bytes == 0;
        if dest_clear || record.final_path.is_none() {
            record.final_path = None;
            record.fail_with(RelocationStatus::Failed, INTERRUPTED_SAFE);
            info!(id = %record.id, src = %record.source_path.display(), "reconcile: {INTERRUPTED_SAFE}");
            return Settled::Resubmittable;
        }
    }

    let note = format!(
        "{MANUAL_RECONCILIATION}: interrupted while {}; source '{}' present: {}, destination '{}' present: {}",
        record.status,
        record.source_path.display(),
        source_present,
        dest.display(),
        dest_meta.is_some()
    );
    error!(id = %record.id, src = %record.source_path.display(), dest = %dest.display(), "{note}");
    record.fail_with(RelocationStatus::Failed, note);
    Settled::Manual
}

fn cleanup_temps(root: &Path) -> usize {
    if !root.is_dir() {
        return 0;
    }
    let mut removed = 0;
    for ent in WalkDir::new(root).follow_links(false).into_iter().flatten() {
        let p = ent.path();
        if ent.file_type().is_file() && is_temp_name(p) {
            match fs::remove_file(p) {
                Ok(()) => {
                    removed += 1;
                    debug!(path = %p.display(), "Removed orphan temp file");
                }
                Err(e) => warn!(error = %e, path = %p.display(), "Failed to remove orphan temp file"),
            }
        }
    }
    removed
}
