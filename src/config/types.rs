//! Core configuration types.
//! - EngineConfig holds the roots and tuning knobs the relocation engine runs with.
//! - LogLevel represents verbosity with simple parsing helpers.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::integrity::DigestAlgorithm;

use super::paths;
use super::CAPACITY_MARGIN_DEFAULT;

/// Program-defined verbosity levels exposed to users/config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Only errors
    Quiet,
    /// Informational output (default)
    #[default]
    Normal,
    /// More info (like verbose)
    Info,
    /// Debug/trace
    Debug,
}

impl LogLevel {
    /// Parse common string names into our LogLevel (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "quiet" | "error" | "none" => Some(LogLevel::Quiet),
            "normal" | "warn" => Some(LogLevel::Normal),
            "info" | "verbose" | "detailed" => Some(LogLevel::Info),
            "debug" | "trace" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Quiet => "quiet",
            LogLevel::Normal => "normal",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid log level: '{s}'"))
    }
}

/// Runtime configuration for the relocation engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Archive root; canonical files land under it
    pub vault_root: PathBuf,
    /// Holding area, one subdirectory per quarantine reason
    pub quarantine_root: PathBuf,
    /// Duplicate storage, `<date>/<digest prefix>/<name>`
    pub duplicates_root: PathBuf,
    /// redb database holding the record store
    pub store_path: PathBuf,
    /// Extra free space required on top of a batch's bytes (0.10 = 10%)
    pub capacity_margin: f64,
    /// Upper bound on batch worker threads
    pub workers: usize,
    pub digest_algorithm: DigestAlgorithm,
    /// Preserve timestamps and permission bits on relocated files
    pub preserve_metadata: bool,
    /// Console verbosity
    pub log_level: LogLevel,
    /// Optional path to a log file
    pub log_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut cfg = Self::with_root(paths::default_data_root());
        cfg.log_file = paths::default_log_path();
        cfg
    }
}

impl EngineConfig {
    /// Lay every root out under one directory; no log file.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            vault_root: root.join("vault"),
            quarantine_root: root.join("quarantine"),
            duplicates_root: root.join("duplicates"),
            store_path: root.join("records.redb"),
            capacity_margin: CAPACITY_MARGIN_DEFAULT,
            workers: default_workers(),
            digest_algorithm: DigestAlgorithm::default(),
            preserve_metadata: true,
            log_level: LogLevel::Normal,
            log_file: None,
        }
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
