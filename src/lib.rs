//! Core library for `vault_mover`.
//!
//! Relocates files into an archive vault so that every file ends up in exactly one of
//! three places: its destination, duplicate storage, or quarantine. Each relocation is
//! digest-verified, rolled back on mismatch, and recorded in a crash-safe record store.
//!
//! Entry point is [`RelocationEngine`]; the pieces it is built from are public so hosts
//! can swap the record store, digester or capacity probe.

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod duplicates;
pub mod engine;
pub mod errors;
pub mod fs_ops;
pub mod integrity;
pub mod model;
pub mod mover;
pub mod output;
pub mod platform;
pub mod quarantine;
pub mod recovery;
pub mod shutdown;
pub mod store;

pub use config::{
    CAPACITY_MARGIN_DEFAULT, CONFIG_ENV_VAR, EngineConfig, LogLevel, create_template_config,
    default_config_path, default_data_root, default_log_path, ensure_default_config_exists, load_config,
    load_config_from_xml_path, path_has_symlink_ancestor,
};
pub use coordinator::{CoordinatedOutcome, TransactionCoordinator};
pub use duplicates::{Claim, DuplicateRegistry};
pub use engine::{
    CapacityProbe, EngineBuilder, FsCapacity, NoopObserver, PreviewResult, RelocationEngine, RelocationObserver,
};
pub use errors::{IntegrityError, ReadStage, RelocateError, StoreError};
pub use integrity::{DigestAlgorithm, Digester, IntegrityVerifier, Verification};
pub use model::{
    BatchOptions, BatchOutcome, BatchRequest, BatchSummary, DuplicateEntry, DuplicateSighting, OutcomeCategory,
    OutcomeStatus, RelocationOutcome, RelocationRecord, RelocationRequest, RelocationStatus,
};
pub use mover::{AtomicMover, MoveMethod, MoveResult};
pub use quarantine::{QuarantineEntry, QuarantineStore, Reason};
pub use recovery::{ReconcileReport, reconcile};
pub use shutdown::CancelToken;
pub use store::{RecordStore, RedbStore, Transaction};
