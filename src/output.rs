//! User-facing terminal output. Colors only when stdout is a TTY.

use owo_colors::OwoColorize;

use crate::model::{BatchOutcome, OutcomeStatus, RelocationOutcome};
use crate::quarantine::QuarantineEntry;
use crate::recovery::ReconcileReport;

fn is_tty() -> bool {
    atty::is(atty::Stream::Stdout)
}

pub fn print_info(msg: &str) {
    if is_tty() {
        println!("{} {}", "info:".cyan().bold(), msg);
    } else {
        println!("info: {msg}");
    }
}

pub fn print_warn(msg: &str) {
    if is_tty() {
        eprintln!("{} {}", "warn:".yellow().bold(), msg);
    } else {
        eprintln!("warn: {msg}");
    }
}

pub fn print_error(msg: &str) {
    if is_tty() {
        eprintln!("{} {}", "error:".red().bold(), msg);
    } else {
        eprintln!("error: {msg}");
    }
}

pub fn print_success(msg: &str) {
    if is_tty() {
        println!("{} {}", "ok:".green().bold(), msg);
    } else {
        println!("ok: {msg}");
    }
}

/// Plain line with no prefix, for output scripts consume.
pub fn print_user(msg: &str) {
    println!("{msg}");
}

fn status_label(status: OutcomeStatus) -> &'static str {
    match status {
        OutcomeStatus::Completed => "COMPLETED",
        OutcomeStatus::Duplicate => "DUPLICATE",
        OutcomeStatus::Quarantined => "QUARANTINED",
        OutcomeStatus::RolledBack => "ROLLED_BACK",
        OutcomeStatus::Failed => "FAILED",
        OutcomeStatus::NotAttempted => "NOT_ATTEMPTED",
    }
}

/// One line per file: `<STATUS> <source> -> <where it ended up>`.
pub fn print_outcome(o: &RelocationOutcome, preview: bool) {
    let label = status_label(o.status);
    let target = o.final_path.as_deref().unwrap_or(o.destination_path.as_path());
    let mut line = format!("{} -> {}", o.source_path.display(), target.display());
    if let Some(c) = &o.canonical_path {
        line.push_str(&format!(" (copy of {})", c.display()));
    }
    if let Some(r) = o.reason {
        line.push_str(&format!(" [{r}]"));
    }
    if let Some(e) = &o.error {
        line.push_str(&format!(": {e}"));
    }
    let label = if preview { format!("would be {label}") } else { label.to_string() };

    if !is_tty() {
        println!("{label} {line}");
        return;
    }
    match o.status {
        OutcomeStatus::Completed => println!("{} {line}", label.green().bold()),
        OutcomeStatus::Duplicate => println!("{} {line}", label.cyan().bold()),
        OutcomeStatus::Quarantined => println!("{} {line}", label.yellow().bold()),
        _ => println!("{} {line}", label.red().bold()),
    }
}

pub fn print_batch(b: &BatchOutcome) {
    for o in &b.outcomes {
        print_outcome(o, false);
    }
    let summary = format!(
        "{} files: {} moved, {} duplicate, {} quarantined, {} failed",
        b.total, b.successful, b.duplicate, b.quarantined, b.failed
    );
    match &b.aborted {
        Some(why) => print_warn(&format!("{summary} (batch aborted: {why})")),
        None if b.failed + b.quarantined == 0 => print_success(&summary),
        None => print_warn(&summary),
    }
}

pub fn print_quarantine(entries: &[QuarantineEntry]) {
    if entries.is_empty() {
        print_info("quarantine is empty");
        return;
    }
    for e in entries {
        print_user(&format!(
            "{}  {:<22} {}  (from {}; retryable: {}; attempts: {})",
            e.quarantined_at.format("%Y-%m-%d %H:%M:%S"),
            e.reason.as_str(),
            e.current_path.display(),
            e.original_source_path.display(),
            e.retryable,
            e.recovery_attempts
        ));
    }
}

pub fn print_reconcile(r: &ReconcileReport) {
    if r.is_clean() {
        print_success("nothing to reconcile");
        return;
    }
    let msg = format!(
        "removed {} temp files; {} records completed, {} duplicates settled, {} safe to resubmit",
        r.temps_removed, r.completed, r.duplicates, r.resubmittable
    );
    if r.manual > 0 {
        print_warn(&format!("{msg}; {} need manual reconciliation", r.manual));
    } else {
        print_success(&msg);
    }
}
