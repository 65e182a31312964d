mod common;

use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

use common::{Fault, FaultyDigester};
use vault_mover::{OutcomeStatus, Reason, RecordStore, RelocationStatus};

#[test]
fn destination_mismatch_restores_the_source() {
    let td = tempdir().unwrap();
    let vault = td.path().join("data/vault");
    let engine = common::builder(td.path())
        .digester(Arc::new(FaultyDigester::corrupt_under(&vault)))
        .build()
        .unwrap();
    let dest = vault.join("doc.pdf");
    let req = common::request(td.path(), "doc.pdf", b"%PDF-1.7", &dest);

    let out = engine.relocate_one(&req);

    assert_eq!(out.status, OutcomeStatus::RolledBack);
    assert!(out.rollback_attempted);
    assert_eq!(fs::read(&req.source_path).unwrap(), b"%PDF-1.7");
    assert!(!dest.exists());
    let rec = engine.store().relocation(req.id).unwrap().unwrap();
    assert_eq!(rec.status, RelocationStatus::RolledBack);
    assert_eq!(rec.rollback_succeeded, Some(true));
    assert!(engine.registry().lookup(&req.content_digest).is_none());
    assert!(!engine.registry().is_pending(&req.content_digest));
}

#[test]
fn failed_rollback_quarantines_the_bytes() {
    let td = tempdir().unwrap();
    let vault = td.path().join("data/vault");
    let src = td.path().join("incoming/doc.pdf");
    let intruder = src.clone();
    let vault_hook = vault.clone();
    // A file reappearing at the source makes the no-clobber move back impossible.
    let digester = FaultyDigester::with_hook(move |p| {
        if p.starts_with(&vault_hook) {
            if !intruder.exists() {
                fs::write(&intruder, b"someone else").unwrap();
            }
            Fault::WrongDigest
        } else {
            Fault::None
        }
    });
    let engine = common::builder(td.path()).digester(Arc::new(digester)).build().unwrap();
    let req = common::request(td.path(), "doc.pdf", b"%PDF-1.7", &vault.join("doc.pdf"));

    let out = engine.relocate_one(&req);

    assert_eq!(out.status, OutcomeStatus::Quarantined);
    assert_eq!(out.reason, Some(Reason::ChecksumMismatch));
    let held = out.final_path.unwrap();
    assert!(held.starts_with(td.path().join("data/quarantine/CHECKSUM_MISMATCH")));
    assert_eq!(fs::read(&held).unwrap(), b"%PDF-1.7");
    assert_eq!(fs::read(&src).unwrap(), b"someone else");
    assert!(!vault.join("doc.pdf").exists());

    let entries = engine.quarantine().list(Some(Reason::ChecksumMismatch)).unwrap();
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].retryable);
    assert_eq!(Some(entries[0].id), out.quarantine_id);
    assert_eq!(engine.store().quarantine_entries(None).unwrap().len(), 1);
}
