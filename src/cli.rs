//! CLI definition and parsing.
//!
//! Notes:
//! - CLI flags override config values (which are loaded from XML if present).
//! - --debug is a shorthand for --log-level debug.

use clap::{Args as ClapArgs, Parser, Subcommand, ValueHint};
use std::path::PathBuf;

use crate::config::{EngineConfig, LogLevel};
use crate::integrity::DigestAlgorithm;
use crate::model::BatchOptions;
use crate::quarantine::Reason;

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Atomically relocate verified files into a deduplicated vault"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Explicit config.xml (overrides VAULT_MOVER_CONFIG and the default location).
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Override the data root; vault, quarantine, duplicates and the record store live below it.
    #[arg(long, global = true, value_hint = ValueHint::DirPath)]
    pub data_root: Option<PathBuf>,

    #[arg(short = 'd', long, global = true, help = "Enable debug logging (shorthand for --log-level debug)")]
    pub debug: bool,

    #[arg(long, global = true, help = "Set log level: quiet, normal, info, debug")]
    pub log_level: Option<String>,

    #[arg(long, global = true, value_hint = ValueHint::FilePath, help = "Also write logs to this file")]
    pub log_file: Option<PathBuf>,

    #[arg(long, global = true, help = "Emit logs in structured JSON")]
    pub json: bool,

    /// Print where vault_mover will look for the config file, then exit.
    #[arg(long, global = true)]
    pub print_config: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Relocate every request in a JSON manifest.
    Relocate(RelocateArgs),
    /// Print the content digest of a file.
    Digest {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
        #[arg(long)]
        algorithm: Option<DigestAlgorithm>,
    },
    /// List quarantined files.
    Quarantine {
        #[arg(long)]
        reason: Option<Reason>,
    },
    /// Settle records and temp files left behind by an interrupted run.
    Reconcile,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RelocateArgs {
    /// JSON file holding an array of requests (or a full batch object).
    #[arg(value_hint = ValueHint::FilePath)]
    pub manifest: PathBuf,

    #[arg(long, help = "Maximum files relocated concurrently")]
    pub parallelism: Option<usize>,

    #[arg(long)]
    pub stop_on_first_error: bool,

    #[arg(long, value_name = "BOOL", help = "Check free space for the whole batch before starting")]
    pub validate_capacity: Option<bool>,

    #[arg(long, help = "Show what would happen without moving anything")]
    pub dry_run: bool,
}

impl RelocateArgs {
    /// Manifest options with CLI flags layered on top.
    pub fn apply_options(&self, base: BatchOptions) -> BatchOptions {
        BatchOptions {
            max_parallelism: self.parallelism.unwrap_or(base.max_parallelism).max(1),
            stop_on_first_error: base.stop_on_first_error || self.stop_on_first_error,
            validate_capacity: self.validate_capacity.unwrap_or(base.validate_capacity),
        }
    }
}

impl Args {
    /// Precedence: --debug > --log-level value > None (use config).
    pub fn effective_log_level(&self) -> Option<LogLevel> {
        if self.debug {
            return Some(LogLevel::Debug);
        }
        self.log_level.as_deref().and_then(LogLevel::parse)
    }

    /// Apply CLI overrides to a loaded config (in place). No-ops for unset flags.
    pub fn apply_overrides(&self, cfg: &mut EngineConfig) {
        if let Some(root) = &self.data_root {
            let rooted = EngineConfig::with_root(root);
            cfg.vault_root = rooted.vault_root;
            cfg.quarantine_root = rooted.quarantine_root;
            cfg.duplicates_root = rooted.duplicates_root;
            cfg.store_path = rooted.store_path;
        }
        if let Some(level) = self.effective_log_level() {
            cfg.log_level = level;
        }
        if let Some(f) = &self.log_file {
            cfg.log_file = Some(f.clone());
        }
        if let Some(Command::Relocate(r)) = &self.command
            && let Some(p) = r.parallelism
        {
            cfg.workers = cfg.workers.max(p);
        }
    }
}

pub fn parse() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_wins_over_log_level() {
        let a = Args::try_parse_from(["vault_mover", "--log-level", "quiet", "-d", "reconcile"]).unwrap();
        assert_eq!(a.effective_log_level(), Some(LogLevel::Debug));
    }

    #[test]
    fn relocate_flags_override_manifest_options() {
        let a = Args::try_parse_from([
            "vault_mover",
            "relocate",
            "m.json",
            "--parallelism",
            "8",
            "--validate-capacity",
            "false",
        ])
        .unwrap();
        let Some(Command::Relocate(r)) = &a.command else {
            panic!("expected relocate");
        };
        let o = r.apply_options(BatchOptions::default());
        assert_eq!(o.max_parallelism, 8);
        assert!(!o.validate_capacity);
        assert!(!o.stop_on_first_error);

        let mut cfg = EngineConfig::with_root("/tmp/x");
        cfg.workers = 2;
        a.apply_overrides(&mut cfg);
        assert_eq!(cfg.workers, 8);
    }

    #[test]
    fn quarantine_reason_parses() {
        let a = Args::try_parse_from(["vault_mover", "quarantine", "--reason", "CHECKSUM_MISMATCH"]).unwrap();
        assert!(matches!(a.command, Some(Command::Quarantine { reason: Some(Reason::ChecksumMismatch) })));
    }

    #[test]
    fn data_root_relays_out_every_root() {
        let a = Args::try_parse_from(["vault_mover", "--data-root", "/srv/v", "reconcile"]).unwrap();
        let mut cfg = EngineConfig::with_root("/elsewhere");
        a.apply_overrides(&mut cfg);
        assert_eq!(cfg.vault_root, PathBuf::from("/srv/v/vault"));
        assert_eq!(cfg.store_path, PathBuf::from("/srv/v/records.redb"));
    }

    #[test]
    fn print_config_needs_no_subcommand() {
        let a = Args::try_parse_from(["vault_mover", "--print-config"]).unwrap();
        assert!(a.print_config);
        assert!(a.command.is_none());
    }
}
