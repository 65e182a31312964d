//! Application orchestrator.
//! Loads and merges config, initializes logging, installs the ctrl-c handler, validates
//! roots, reconciles leftovers from a crashed run, then dispatches the subcommand.

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

use vault_mover::cli::{Args, Command, RelocateArgs};
use vault_mover::fs_ops::io_error_with_help;
use vault_mover::output as out;
use vault_mover::{
    BatchOptions, BatchRequest, CONFIG_ENV_VAR, Digester, EngineConfig, IntegrityVerifier, OutcomeStatus,
    QuarantineStore, RelocationEngine, RelocationRequest, default_config_path, ensure_default_config_exists,
    load_config, load_config_from_xml_path, recovery, shutdown,
};

use crate::logging::init_tracing;

/// Manifest accepted by `relocate`: either a bare request list or a full batch.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum Manifest {
    Requests(Vec<RelocationRequest>),
    Batch(BatchRequest),
}

/// Exit status for a finished run.
pub enum Exit {
    Ok,
    /// Some files failed, were quarantined or were never attempted.
    Partial,
}

pub fn run(args: Args) -> Result<Exit> {
    if args.print_config {
        print_config_location(&args);
        return Ok(Exit::Ok);
    }

    let mut cfg = match &args.config {
        Some(p) => load_config_from_xml_path(p)?,
        None => {
            if let Some(created) = ensure_default_config_exists() {
                out::print_success(&format!("A template vault_mover config was written to: {}", created.display()));
                out::print_info(&format!("Edit it to set the vault roots, or point {CONFIG_ENV_VAR} at another file."));
            }
            load_config()?
        }
    };
    args.apply_overrides(&mut cfg);

    let guard = init_tracing(cfg.log_level, cfg.log_file.as_deref(), args.json).inspect_err(|e| {
        out::print_error(&format!("Failed to initialize logging: {e}"));
    })?;

    // Dropping the guard flushes the file writer; do it on ctrl-c as well.
    let guard_slot = Arc::new(Mutex::new(guard));
    {
        let guard_slot = Arc::clone(&guard_slot);
        ctrlc::set_handler(move || {
            shutdown::request();
            out::print_warn("Received interrupt; finishing in-flight files then stopping...");
            if let Ok(mut g) = guard_slot.lock() {
                let _ = g.take();
            }
        })
        .expect("failed to install signal handler");
    }

    debug!(?args, "starting vault_mover");
    let result = dispatch(&args, &cfg);
    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "vault_mover failed");
    }
    if let Ok(mut g) = guard_slot.lock() {
        let _ = g.take();
    }
    result
}

fn dispatch(args: &Args, cfg: &EngineConfig) -> Result<Exit> {
    let Some(command) = &args.command else {
        bail!("no subcommand given; see --help");
    };
    match command {
        Command::Digest { path, algorithm } => {
            let verifier = IntegrityVerifier::new(algorithm.unwrap_or(cfg.digest_algorithm));
            let digest = verifier
                .digest(path)
                .with_context(|| format!("hashing {}", path.display()))?;
            out::print_user(&format!("{digest}  {}", path.display()));
            Ok(Exit::Ok)
        }
        Command::Quarantine { reason } => {
            let entries = QuarantineStore::new(&cfg.quarantine_root).list(*reason)?;
            out::print_quarantine(&entries);
            Ok(Exit::Ok)
        }
        Command::Reconcile => {
            cfg.validate()?;
            let engine = RelocationEngine::builder(cfg.clone()).build()?;
            let report = recovery::reconcile(engine.store().as_ref(), cfg, engine.digester().as_ref())?;
            out::print_reconcile(&report);
            Ok(if report.manual > 0 { Exit::Partial } else { Exit::Ok })
        }
        Command::Relocate(r) => relocate(r, cfg),
    }
}

fn read_manifest(path: &Path, r: &RelocateArgs) -> Result<BatchRequest> {
    let raw = fs::read_to_string(path).map_err(io_error_with_help("read manifest", path))?;
    let manifest: Manifest =
        serde_json::from_str(&raw).with_context(|| format!("parsing manifest {}", path.display()))?;
    let mut batch = match manifest {
        Manifest::Requests(requests) => BatchRequest::new(requests, BatchOptions::default()),
        Manifest::Batch(b) => b,
    };
    batch.options = r.apply_options(batch.options);
    Ok(batch)
}

fn relocate(r: &RelocateArgs, cfg: &EngineConfig) -> Result<Exit> {
    let batch = read_manifest(&r.manifest, r)?;
    if batch.requests.is_empty() {
        bail!("manifest {} holds no requests", r.manifest.display());
    }
    cfg.validate()?;
    let engine = RelocationEngine::builder(cfg.clone()).build()?;

    if r.dry_run {
        info!(files = batch.requests.len(), "dry run; nothing will be moved");
        let mut clean = true;
        for req in &batch.requests {
            let p = engine.preview(req);
            clean &= p.outcome.status != OutcomeStatus::Failed && p.outcome.status != OutcomeStatus::Quarantined;
            out::print_outcome(&p.outcome, true);
        }
        return Ok(if clean { Exit::Ok } else { Exit::Partial });
    }

    let report = recovery::reconcile(engine.store().as_ref(), cfg, engine.digester().as_ref())?;
    if !report.is_clean() {
        out::print_reconcile(&report);
    }
    // Settled records may have registered digests the registry has not seen yet.
    let engine = if report.completed + report.duplicates > 0 {
        drop(engine);
        RelocationEngine::builder(cfg.clone()).build()?
    } else {
        engine
    };
    if shutdown::is_requested() {
        return Ok(Exit::Partial);
    }

    let outcome = engine.relocate_batch(&batch);
    out::print_batch(&outcome);
    Ok(if outcome.successful + outcome.duplicate == outcome.total {
        Exit::Ok
    } else {
        Exit::Partial
    })
}

fn print_config_location(args: &Args) {
    if let Some(p) = &args.config {
        out::print_info(&format!("Using --config:\n  {}", p.display()));
        return;
    }
    if let Ok(env) = std::env::var(CONFIG_ENV_VAR) {
        out::print_info(&format!("Using {CONFIG_ENV_VAR} (explicit):\n  {env}"));
        return;
    }
    match default_config_path() {
        Some(p) => {
            out::print_info(&format!("Default vault_mover config path:\n  {}", p.display()));
            if !p.exists() {
                out::print_info("No config file exists there yet; one is created on the next run.");
            }
        }
        None => out::print_error("Could not determine a default config path"),
    }
}
