//! Couples one filesystem relocation with one record-store mutation.
//!
//! The filesystem is not transactional, so the pair is kept consistent by ordering:
//! move first, commit second, and undo the move if the commit is rejected. When the
//! undo fails too, the record says so and names both paths for an operator.

use std::sync::Arc;
use tracing::{error, warn};

use crate::errors::RelocateError;
use crate::model::{RelocationRecord, RelocationStatus};
use crate::mover::{AtomicMover, MoveResult};
use crate::quarantine::{QuarantineEntry, QuarantineStore, Reason};
use crate::store::{RecordStore, Transaction};

pub const MANUAL_RECONCILIATION: &str = "manual reconciliation required";

#[derive(Debug)]
pub struct CoordinatedOutcome {
    pub status: RelocationStatus,
    pub error: Option<RelocateError>,
    pub source_digest: Option<String>,
    pub reason: Option<Reason>,
    pub quarantine: Option<QuarantineEntry>,
    /// `Some(true)` when a rejected commit was undone by moving the file back.
    pub compensated: Option<bool>,
}

pub struct TransactionCoordinator {
    store: Arc<dyn RecordStore>,
    quarantine: QuarantineStore,
    mover: Arc<AtomicMover>,
}

impl TransactionCoordinator {
    pub fn new(store: Arc<dyn RecordStore>, quarantine: QuarantineStore, mover: Arc<AtomicMover>) -> Self {
        Self {
            store,
            quarantine,
            mover,
        }
    }

    pub fn quarantine_store(&self) -> &QuarantineStore {
        &self.quarantine
    }

    /// Run `move_fn`; only a COMPLETED move has `update_fn` staged alongside the record
    /// and committed. `update_fn` may also advance the record (COMPLETED to DUPLICATE)
    /// before it is staged. Any other result discards the transaction, quarantines the file
    /// when the failure calls for it, and writes a terminal audit record.
    pub fn run<M, U>(&self, record: &mut RelocationRecord, move_fn: M, update_fn: U) -> CoordinatedOutcome
    where
        M: FnOnce(&mut RelocationRecord) -> MoveResult,
        U: FnOnce(&mut RelocationRecord, &mut Transaction),
    {
        let mut tx = Transaction::new();
        let moved = move_fn(record);

        if moved.is_completed() {
            update_fn(record, &mut tx);
            tx.put_relocation(record);
            return match self.store.commit(tx) {
                Ok(()) => CoordinatedOutcome {
                    status: record.status,
                    error: None,
                    source_digest: moved.source_digest,
                    reason: None,
                    quarantine: None,
                    compensated: None,
                },
                Err(e) => self.compensate(record, e.into(), moved.source_digest),
            };
        }
        drop(tx);

        let MoveResult {
            status,
            error,
            source_digest,
            ..
        } = moved;
        let quarantinable = status == RelocationStatus::Failed
            && error.as_ref().is_some_and(|e| !e.is_input_error());

        if !quarantinable {
            self.write_audit(record, None);
            return CoordinatedOutcome {
                status,
                error,
                source_digest,
                reason: None,
                quarantine: None,
                compensated: None,
            };
        }

        let err = error.unwrap_or(RelocateError::Interrupted);
        let reason = self.quarantine.classify(&err);
        match self.quarantine.quarantine(record, reason, &err.to_string()) {
            Ok(entry) => {
                record.final_path = Some(entry.current_path.clone());
                record.transition(RelocationStatus::Quarantined);
                self.write_audit(record, Some(&entry));
                CoordinatedOutcome {
                    status: RelocationStatus::Quarantined,
                    error: Some(err),
                    source_digest,
                    reason: Some(reason),
                    quarantine: Some(entry),
                    compensated: None,
                }
            }
            Err(qe) => {
                error!(
                    id = %record.id,
                    src = %record.source_path.display(),
                    dest = %record.destination_path.display(),
                    reason = %reason,
                    error = %qe,
                    "quarantine failed; file left where the mover put it"
                );
                record.error = Some(format!("{err}; quarantine failed: {qe}"));
                self.write_audit(record, None);
                CoordinatedOutcome {
                    status: RelocationStatus::Failed,
                    error: Some(err),
                    source_digest,
                    reason: Some(reason),
                    quarantine: None,
                    compensated: None,
                }
            }
        }
    }

    fn compensate(
        &self,
        record: &mut RelocationRecord,
        commit_err: RelocateError,
        source_digest: Option<String>,
    ) -> CoordinatedOutcome {
        warn!(id = %record.id, error = %commit_err, "record commit failed after move; compensating");
        let compensated = match self.mover.compensate(record) {
            Ok(()) => {
                record.final_path = None;
                record.fail_with(
                    RelocationStatus::Failed,
                    format!("record commit failed ({commit_err}); source restored"),
                );
                true
            }
            Err(ce) => {
                error!(
                    id = %record.id,
                    src = %record.source_path.display(),
                    dest = %record.destination_path.display(),
                    commit_error = %commit_err,
                    compensation_error = %ce,
                    "{MANUAL_RECONCILIATION}"
                );
                record.fail_with(
                    RelocationStatus::Failed,
                    format!(
                        "{MANUAL_RECONCILIATION}: commit failed ({commit_err}) and compensation failed ({ce}); \
                         bytes at '{}', source was '{}'",
                        record.destination_path.display(),
                        record.source_path.display()
                    ),
                );
                false
            }
        };
        self.write_audit(record, None);
        CoordinatedOutcome {
            status: RelocationStatus::Failed,
            error: Some(commit_err),
            source_digest,
            reason: None,
            quarantine: None,
            compensated: Some(compensated),
        }
    }

    /// Best-effort terminal record in its own small transaction.
    fn write_audit(&self, record: &RelocationRecord, entry: Option<&QuarantineEntry>) {
        let mut tx = Transaction::new();
        tx.put_relocation(record);
        if let Some(q) = entry {
            tx.put_quarantine(q);
        }
        if let Err(e) = self.store.commit(tx) {
            warn!(id = %record.id, status = %record.status, error = %e, "terminal audit record not persisted");
        }
    }
}
