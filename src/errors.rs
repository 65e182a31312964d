//! Typed error definitions for vault_mover.
//! Every failure the engine can hit is a variant here so the quarantine classifier
//! can work from structured values instead of message text.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Where in a digest computation an I/O failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStage {
    /// The file could not be opened at all.
    Open,
    /// The file opened but a read failed part-way through.
    MidStream,
}

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("cannot read '{path}' ({stage:?}): {source}")]
    Io {
        path: PathBuf,
        stage: ReadStage,
        #[source]
        source: io::Error,
    },

    #[error("malformed {algorithm} digest '{digest}': expected {expected_len} lowercase hex chars")]
    MalformedDigest {
        algorithm: &'static str,
        digest: String,
        expected_len: usize,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("record store row in '{table}' is corrupt: {source}")]
    Corrupt {
        table: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("record store serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("record store backend: {0}")]
    Backend(#[from] redb::Error),

    #[error("record store commit rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum RelocateError {
    #[error("Source path not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Source is not a regular file: {0}")]
    SourceNotFile(PathBuf),

    #[error("Declared digest {declared} does not match content of {path} (actual {actual})")]
    DeclaredDigestMismatch {
        path: PathBuf,
        declared: String,
        actual: String,
    },

    #[error("Integrity mismatch at {path}: expected {expected}, found {actual}")]
    IntegrityMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Permission denied on {path}: {context}")]
    PermissionDenied { path: PathBuf, context: String },

    #[error("Insufficient disk space for destination {dest}: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        required: u128,
        available: u128,
        dest: PathBuf,
    },

    #[error("Path too long: {0}")]
    PathTooLong(PathBuf),

    #[error("Path contains invalid characters: {0}")]
    InvalidCharacters(PathBuf),

    #[error("Destination already exists: {0}")]
    DestinationExists(PathBuf),

    #[error("{op} '{path}': {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Operation interrupted by user")]
    Interrupted,
}

impl RelocateError {
    /// Build an `Io` variant, lifting well-known kinds into their dedicated variants.
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::NotFound if op == "open source" => RelocateError::SourceNotFound(path),
            io::ErrorKind::PermissionDenied => RelocateError::PermissionDenied {
                path,
                context: format!("{op}: {source}"),
            },
            _ => RelocateError::Io { op, path, source },
        }
    }

    /// Stable numeric code for logs and exit statuses.
    pub fn code(&self) -> i32 {
        match self {
            RelocateError::SourceNotFound(_) => 10,
            RelocateError::SourceNotFile(_) => 11,
            RelocateError::DeclaredDigestMismatch { .. } => 12,
            RelocateError::IntegrityMismatch { .. } => 20,
            RelocateError::PermissionDenied { .. } => 21,
            RelocateError::InsufficientSpace { .. } => 22,
            RelocateError::PathTooLong(_) => 23,
            RelocateError::InvalidCharacters(_) => 24,
            RelocateError::DestinationExists(_) => 25,
            RelocateError::Io { .. } => 26,
            RelocateError::Integrity(IntegrityError::MalformedDigest { .. }) => 13,
            RelocateError::Integrity(IntegrityError::Io { .. }) => 27,
            RelocateError::Store(_) => 30,
            RelocateError::Interrupted => 130,
        }
    }

    /// Input errors are fatal before anything moves: they are surfaced, never quarantined.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            RelocateError::SourceNotFound(_)
                | RelocateError::SourceNotFile(_)
                | RelocateError::DeclaredDigestMismatch { .. }
                | RelocateError::Integrity(IntegrityError::MalformedDigest { .. })
                | RelocateError::Interrupted
        )
    }
}
