mod common;

use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

use vault_mover::recovery::INTERRUPTED_SAFE;
use vault_mover::{
    IntegrityVerifier, RecordStore, RelocationRecord, RelocationStatus, RedbStore, Transaction, reconcile,
};

#[test]
fn crash_mid_move_is_settled_on_next_start() {
    let td = tempdir().unwrap();
    let store_path = td.path().join("records.redb");
    let engine = common::builder(td.path())
        .store(Arc::new(RedbStore::open(&store_path).unwrap()))
        .build()
        .unwrap();
    let cfg = engine.config().clone();
    let req = common::request(td.path(), "half.bin", b"half done", &cfg.vault_root.join("half.bin"));

    // Simulate a crash right after the destination was reserved.
    let mut rec = RelocationRecord::from_request(&req);
    rec.transition(RelocationStatus::InProgress);
    let mut tx = Transaction::new();
    tx.put_relocation(&rec);
    engine.store().commit(tx).unwrap();
    fs::create_dir_all(&cfg.vault_root).unwrap();
    fs::write(&req.destination_path, b"").unwrap();
    fs::write(cfg.vault_root.join(".vault_mover.9.9.9.tmp"), b"partial").unwrap();
    drop(engine);

    let reopened = RedbStore::open(&store_path).unwrap();
    let report = reconcile(&reopened, &cfg, &IntegrityVerifier::default()).unwrap();

    assert_eq!((report.temps_removed, report.resubmittable), (1, 1));
    assert!(!req.destination_path.exists());
    assert!(req.source_path.exists());
    let after = reopened.relocation(req.id).unwrap().unwrap();
    assert_eq!(after.status, RelocationStatus::Failed);
    assert_eq!(after.error.as_deref(), Some(INTERRUPTED_SAFE));

    let second = reconcile(&reopened, &cfg, &IntegrityVerifier::default()).unwrap();
    assert!(second.is_clean());
}
