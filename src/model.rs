//! Data model shared by the mover, coordinator, engine and record store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::quarantine::Reason;

/// Immutable input handed to the engine by the naming/classification collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelocationRequest {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub content_digest: String,
    pub size_bytes: u64,
    /// Opaque audit metadata; never interpreted.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl RelocationRequest {
    pub fn new(
        source_path: impl Into<PathBuf>,
        destination_path: impl Into<PathBuf>,
        content_digest: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_path: source_path.into(),
            destination_path: destination_path.into(),
            content_digest: content_digest.into(),
            size_bytes,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelocationStatus {
    Pending,
    InProgress,
    Verifying,
    Completed,
    Failed,
    RolledBack,
    Quarantined,
    Duplicate,
}

impl RelocationStatus {
    /// No further transitions happen once a record reaches one of these.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RelocationStatus::Completed
                | RelocationStatus::Quarantined
                | RelocationStatus::Duplicate
                | RelocationStatus::Failed
                | RelocationStatus::RolledBack
        )
    }
}

impl fmt::Display for RelocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelocationStatus::Pending => "PENDING",
            RelocationStatus::InProgress => "IN_PROGRESS",
            RelocationStatus::Verifying => "VERIFYING",
            RelocationStatus::Completed => "COMPLETED",
            RelocationStatus::Failed => "FAILED",
            RelocationStatus::RolledBack => "ROLLED_BACK",
            RelocationStatus::Quarantined => "QUARANTINED",
            RelocationStatus::Duplicate => "DUPLICATE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub status: RelocationStatus,
    pub at: DateTime<Utc>,
}

/// Persisted tracking entity for one relocation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelocationRecord {
    pub id: Uuid,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    /// Set when the file was rerouted to duplicate storage: the destination the caller asked for.
    #[serde(default)]
    pub requested_destination: Option<PathBuf>,
    pub content_digest: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub status: RelocationStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub rollback_attempted: bool,
    pub rollback_succeeded: Option<bool>,
    /// Where the bytes ended up (vault, duplicate storage or quarantine).
    pub final_path: Option<PathBuf>,
    #[serde(default)]
    pub transitions: Vec<StatusTransition>,
}

impl RelocationRecord {
    pub fn from_request(req: &RelocationRequest) -> Self {
        let now = Utc::now();
        Self {
            id: req.id,
            source_path: req.source_path.clone(),
            destination_path: req.destination_path.clone(),
            requested_destination: None,
            content_digest: req.content_digest.clone(),
            size_bytes: req.size_bytes,
            metadata: req.metadata.clone(),
            status: RelocationStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            error: None,
            rollback_attempted: false,
            rollback_succeeded: None,
            final_path: None,
            transitions: vec![StatusTransition {
                status: RelocationStatus::Pending,
                at: now,
            }],
        }
    }

    /// Move to `status`, stamping `started_at`/`completed_at` as appropriate.
    pub fn transition(&mut self, status: RelocationStatus) {
        let now = Utc::now();
        if status == RelocationStatus::InProgress && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if status.is_terminal() {
            // Keep completed_at >= started_at even when the clock steps backwards.
            let done = match self.started_at {
                Some(started) if started > now => started,
                _ => now,
            };
            self.completed_at = Some(done);
        }
        self.status = status;
        self.transitions.push(StatusTransition { status, at: now });
    }

    /// Point the record at `to`. The first destination is kept in `requested_destination`.
    pub fn reroute(&mut self, to: PathBuf) {
        let previous = std::mem::replace(&mut self.destination_path, to);
        self.requested_destination.get_or_insert(previous);
    }

    /// Where the caller wanted the file, regardless of any reroute.
    pub fn intended_destination(&self) -> &Path {
        self.requested_destination.as_deref().unwrap_or(&self.destination_path)
    }

    pub fn fail_with(&mut self, status: RelocationStatus, error: impl Into<String>) {
        self.error = Some(error.into());
        self.transition(status);
    }

    pub fn file_name(&self) -> &std::ffi::OsStr {
        self.source_path
            .file_name()
            .or_else(|| self.destination_path.file_name())
            .unwrap_or_else(|| std::ffi::OsStr::new("file"))
    }
}

/// One duplicate sighting of an already-archived digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateSighting {
    pub path: PathBuf,
    pub detected_at: DateTime<Utc>,
}

/// Canonical location of a digest plus every duplicate encountered since.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateEntry {
    pub digest: String,
    pub canonical_path: PathBuf,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub duplicates: Vec<DuplicateSighting>,
}

impl DuplicateEntry {
    pub fn canonical(digest: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            digest: digest.into(),
            canonical_path: path.into(),
            registered_at: Utc::now(),
            duplicates: Vec::new(),
        }
    }

    pub fn duplicate_paths(&self) -> impl Iterator<Item = &Path> {
        self.duplicates.iter().map(|d| d.path.as_path())
    }
}

/// Final per-file status reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Completed,
    Duplicate,
    Quarantined,
    RolledBack,
    Failed,
    /// Never dispatched (batch stopped, cancelled or failed its capacity check).
    NotAttempted,
}

/// The four buckets every outcome is counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeCategory {
    Successful,
    Duplicate,
    Quarantined,
    Failed,
}

impl OutcomeStatus {
    pub fn category(self) -> OutcomeCategory {
        match self {
            OutcomeStatus::Completed => OutcomeCategory::Successful,
            OutcomeStatus::Duplicate => OutcomeCategory::Duplicate,
            OutcomeStatus::Quarantined => OutcomeCategory::Quarantined,
            OutcomeStatus::RolledBack | OutcomeStatus::Failed | OutcomeStatus::NotAttempted => {
                OutcomeCategory::Failed
            }
        }
    }

    pub fn from_record(status: RelocationStatus) -> Self {
        match status {
            RelocationStatus::Completed => OutcomeStatus::Completed,
            RelocationStatus::Duplicate => OutcomeStatus::Duplicate,
            RelocationStatus::Quarantined => OutcomeStatus::Quarantined,
            RelocationStatus::RolledBack => OutcomeStatus::RolledBack,
            _ => OutcomeStatus::Failed,
        }
    }
}

/// Per-file result of `relocate_one` (and the predicted result of `preview`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelocationOutcome {
    pub request_id: Uuid,
    pub status: OutcomeStatus,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub final_path: Option<PathBuf>,
    pub digest: String,
    pub canonical_path: Option<PathBuf>,
    pub reason: Option<Reason>,
    pub quarantine_id: Option<Uuid>,
    pub error: Option<String>,
    pub error_code: Option<i32>,
    pub rollback_attempted: bool,
    pub elapsed_ms: u64,
}

impl RelocationOutcome {
    pub fn from_record(record: &RelocationRecord, elapsed: Duration) -> Self {
        Self {
            request_id: record.id,
            status: OutcomeStatus::from_record(record.status),
            source_path: record.source_path.clone(),
            destination_path: record.destination_path.clone(),
            final_path: record.final_path.clone(),
            digest: record.content_digest.clone(),
            canonical_path: None,
            reason: None,
            quarantine_id: None,
            error: record.error.clone(),
            error_code: None,
            rollback_attempted: record.rollback_attempted,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn not_attempted(req: &RelocationRequest, why: impl Into<String>) -> Self {
        Self {
            request_id: req.id,
            status: OutcomeStatus::NotAttempted,
            source_path: req.source_path.clone(),
            destination_path: req.destination_path.clone(),
            final_path: None,
            digest: req.content_digest.clone(),
            canonical_path: None,
            reason: None,
            quarantine_id: None,
            error: Some(why.into()),
            error_code: None,
            rollback_attempted: false,
            elapsed_ms: 0,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self.status,
            OutcomeStatus::Failed | OutcomeStatus::RolledBack | OutcomeStatus::Quarantined
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOptions {
    pub max_parallelism: usize,
    pub stop_on_first_error: bool,
    pub validate_capacity: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_parallelism: 4,
            stop_on_first_error: false,
            validate_capacity: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub requests: Vec<RelocationRequest>,
    #[serde(default)]
    pub options: BatchOptions,
}

impl BatchRequest {
    pub fn new(requests: Vec<RelocationRequest>, options: BatchOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            requests,
            options,
        }
    }

    pub fn total_bytes(&self) -> u128 {
        self.requests.iter().map(|r| r.size_bytes as u128).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub batch_id: Uuid,
    pub outcomes: Vec<RelocationOutcome>,
    pub total: usize,
    pub successful: usize,
    pub duplicate: usize,
    pub quarantined: usize,
    pub failed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Set when the batch stopped early (capacity check, stop-on-error, cancellation).
    pub aborted: Option<String>,
}

impl BatchOutcome {
    /// Tally outcomes into the four buckets; they always sum to `total`.
    pub fn from_outcomes(
        batch_id: Uuid,
        outcomes: Vec<RelocationOutcome>,
        started_at: DateTime<Utc>,
        aborted: Option<String>,
    ) -> Self {
        let (mut successful, mut duplicate, mut quarantined, mut failed) = (0, 0, 0, 0);
        for o in &outcomes {
            match o.status.category() {
                OutcomeCategory::Successful => successful += 1,
                OutcomeCategory::Duplicate => duplicate += 1,
                OutcomeCategory::Quarantined => quarantined += 1,
                OutcomeCategory::Failed => failed += 1,
            }
        }
        Self {
            batch_id,
            total: outcomes.len(),
            outcomes,
            successful,
            duplicate,
            quarantined,
            failed,
            started_at,
            finished_at: Utc::now(),
            aborted,
        }
    }

    pub fn counts_balance(&self) -> bool {
        self.successful + self.duplicate + self.quarantined + self.failed == self.total
    }
}

/// Persisted projection of a finished batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub total: usize,
    pub successful: usize,
    pub duplicate: usize,
    pub quarantined: usize,
    pub failed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub aborted: Option<String>,
}

impl From<&BatchOutcome> for BatchSummary {
    fn from(o: &BatchOutcome) -> Self {
        Self {
            batch_id: o.batch_id,
            total: o.total,
            successful: o.successful,
            duplicate: o.duplicate,
            quarantined: o.quarantined,
            failed: o.failed,
            started_at: o.started_at,
            finished_at: o.finished_at,
            aborted: o.aborted.clone(),
        }
    }
}
